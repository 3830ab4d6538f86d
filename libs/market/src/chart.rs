use anyhow::{Error, ensure};
use charming::{
    Chart, ImageFormat, ImageRenderer,
    component::{Axis, Legend, Title},
    element::{AxisLabel, AxisType, ItemStyle, LineStyle, SplitLine, TextStyle},
    series::Bar,
};

use crate::gex::{GexReport, StrikeGex};

/// Strikes further than this from spot are left off the chart.
const WINDOW_PCT: f64 = 0.05;
const WIDTH: u32 = 1200;
const HEIGHT: u32 = 600;

/// Strikes within the chart window around spot, in strike order.
pub fn chart_window(spot: f64, strikes: &[StrikeGex]) -> Vec<&StrikeGex> {
    let mut window: Vec<&StrikeGex> = strikes
        .iter()
        .filter(|s| (s.strike - spot).abs() <= spot * WINDOW_PCT)
        .collect();
    window.sort_by(|a, b| a.strike.total_cmp(&b.strike));
    window
}

fn millions(v: f64) -> f64 {
    (v / 1_000_000.0 * 100.0).round() / 100.0
}

/// Call and put GEX per strike as a PNG. Blocking; run off the async runtime.
pub fn generate_gex_chart(report: &GexReport) -> Result<Vec<u8>, Error> {
    let window = chart_window(report.spot, &report.strikes);
    ensure!(!window.is_empty(), "no strikes near spot {}", report.spot);

    let labels: Vec<String> = window.iter().map(|s| format!("{}", s.strike)).collect();
    let calls: Vec<f64> = window.iter().map(|s| millions(s.call_gex)).collect();
    let puts: Vec<f64> = window.iter().map(|s| millions(s.put_gex)).collect();

    let mut title = format!("{} GEX | ${:.2}", report.ticker.to_uppercase(), report.spot);
    if let Some(flip) = report.levels.gamma_flip {
        title.push_str(&format!(" | Flip {flip:.2}"));
    }

    let chart = Chart::new()
        .background_color("#0b0c17")
        .title(
            Title::new()
                .text(title)
                .left("center")
                .top("2%")
                .text_style(TextStyle::new().color("#ffffff").font_size(14)),
        )
        .legend(
            Legend::new()
                .top("8%")
                .text_style(TextStyle::new().color("#a0a0a0")),
        )
        .x_axis(
            Axis::new()
                .type_(AxisType::Category)
                .data(labels)
                .axis_label(AxisLabel::new().rotate(45).color("#a0a0a0"))
                .split_line(SplitLine::new().line_style(LineStyle::new().color("#2d2f45"))),
        )
        .y_axis(
            Axis::new()
                .type_(AxisType::Value)
                .name("GEX (M)")
                .axis_label(AxisLabel::new().color("#a0a0a0"))
                .split_line(SplitLine::new().line_style(LineStyle::new().color("#2d2f45"))),
        )
        .series(
            Bar::new()
                .name("Call GEX")
                .data(calls)
                .item_style(ItemStyle::new().color("#00d084")),
        )
        .series(
            Bar::new()
                .name("Put GEX")
                .data(puts)
                .item_style(ItemStyle::new().color("#ff4d4f")),
        );

    let mut renderer = ImageRenderer::new(WIDTH, HEIGHT);
    let png_bytes = renderer.render_format(ImageFormat::Png, &chart)?;
    Ok(png_bytes)
}

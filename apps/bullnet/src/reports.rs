use anyhow::Result;
use chrono::Utc;
use market::{
    chart::generate_gex_chart,
    darkpool::{DarkPoolReport, min_print_size},
    gex::{GammaRegime, GexReport},
    ticker,
};
use poise::CreateReply;
use serenity::all::{
    ChannelId, CreateAttachment, CreateEmbed, CreateEmbedFooter, CreateMessage, Http, Timestamp,
};
use tracing::{debug, info, instrument, warn};

use crate::{Data, format};

/// A GEX report ready to post: text block first, then the embed with its chart.
pub struct GexPost {
    pub report: GexReport,
    pub text: String,
    pub embed: CreateEmbed,
    pub chart: Option<CreateAttachment>,
}

impl GexPost {
    pub fn reply(&self) -> CreateReply {
        let reply = CreateReply::default().embed(self.embed.clone());
        match &self.chart {
            Some(chart) => reply.attachment(chart.clone()),
            None => reply,
        }
    }

    pub async fn send_to(&self, http: &Http, channel: ChannelId) -> Result<()> {
        channel
            .send_message(http, CreateMessage::new().content(&self.text))
            .await?;

        let mut msg = CreateMessage::new().embed(self.embed.clone());
        if let Some(chart) = &self.chart {
            msg = msg.add_file(chart.clone());
        }
        channel.send_message(http, msg).await?;
        Ok(())
    }
}

pub struct DarkPoolPost {
    pub report: DarkPoolReport,
    pub text: String,
    pub embed: Option<CreateEmbed>,
}

impl DarkPoolPost {
    pub async fn send_to(&self, http: &Http, channel: ChannelId) -> Result<()> {
        channel
            .send_message(http, CreateMessage::new().content(&self.text))
            .await?;
        if let Some(embed) = &self.embed {
            channel
                .send_message(http, CreateMessage::new().embed(embed.clone()))
                .await?;
        }
        Ok(())
    }
}

pub fn now_text(data: &Data) -> String {
    Utc::now()
        .with_timezone(&data.tz)
        .format("%d.%m.%Y %H:%M")
        .to_string()
}

fn regime_color(regime: Option<GammaRegime>) -> u32 {
    match regime {
        Some(GammaRegime::Positive) => 0x00FF88,
        Some(GammaRegime::Negative) => 0xFF3B3B,
        None => 0x808080,
    }
}

fn gex_embed(report: &GexReport, ratio: f64) -> CreateEmbed {
    let gold = ticker::is_gold(&report.ticker);
    let etf = if gold { "GLD" } else { report.ticker.as_str() };
    let cfd = if gold { "XAUUSD" } else { "CFD" };
    let title = if gold { "GOLD" } else { report.ticker.as_str() };
    let lv = &report.levels;

    let field = |v: Option<f64>| {
        format!(
            "`{}` {etf}\n`{}` {cfd}",
            format::price(v),
            format::cfd_price(v, ratio)
        )
    };

    let mut embed = CreateEmbed::default()
        .title(format!("BullNet GEX - {title}"))
        .description(format!(
            "Regime: {}\nSpot: ${:.2} {etf}\nSource: {}",
            lv.regime
                .map(|r| r.label().to_uppercase())
                .unwrap_or_else(|| "N/A".to_string()),
            report.spot,
            lv.source
        ))
        .color(regime_color(lv.regime))
        .timestamp(Timestamp::now())
        .field("Gamma Flip", field(lv.gamma_flip), true)
        .field("Call Wall", field(lv.call_wall), true)
        .field("Put Wall", field(lv.put_wall), true);

    if lv.hvl.is_some() {
        embed = embed.field("HVL", field(lv.hvl), true);
    }

    embed.footer(CreateEmbedFooter::new(format!(
        "Ratio: {ratio:.4} | {} | BULLNET",
        lv.source.to_uppercase()
    )))
}

async fn render_chart(report: &GexReport) -> Option<CreateAttachment> {
    let chart_report = report.clone();
    debug!("generating chart (spawn_blocking)");

    match tokio::task::spawn_blocking(move || generate_gex_chart(&chart_report)).await {
        Ok(Ok(bytes)) => {
            info!(bytes = bytes.len(), "chart generated");
            Some(CreateAttachment::bytes(
                bytes,
                format!("{}_gex.png", report.ticker.to_lowercase()),
            ))
        }
        Ok(Err(e)) => {
            warn!(error = ?e, "generate_gex_chart failed");
            None
        }
        Err(e) => {
            warn!(error = ?e, "spawn_blocking join failed");
            None
        }
    }
}

/// Runs the GEX engine and builds the post. Also pushes the levels to the
/// TradingView seed repository when configured.
#[instrument(name = "gex_post", skip(data))]
pub async fn gex_post(data: &Data, ticker: &str) -> Result<GexPost> {
    let ticker = ticker::normalize(ticker);
    let ratio = data.ratio_for(&ticker).await;

    let report = data.gex.run(&ticker).await?;
    let text = format::gex_message(&report, ratio, &now_text(data));

    let mut embed = gex_embed(&report, ratio);
    let chart = render_chart(&report).await;
    if let Some(chart) = &chart {
        embed = embed.image(format!("attachment://{}", chart.filename));
    }

    if let Some(seeds) = &data.pine_seeds
        && let Err(e) = seeds.push(&ticker, &report.levels).await
    {
        warn!(error = ?e, "pine seeds push failed");
    }

    Ok(GexPost {
        report,
        text,
        embed,
        chart,
    })
}

fn darkpool_embed(report: &DarkPoolReport, ratio: f64) -> Option<CreateEmbed> {
    if report.levels.is_empty() {
        return None;
    }

    let labels = format::labels(&report.ticker);
    let cfd = if ticker::is_gold(&report.ticker) { "XAUUSD" } else { "CFD" };

    let mut embed = CreateEmbed::default()
        .title(format!("BullNet Dark Pool - {}", labels.title))
        .description(format!(
            "Source: {} | {} Levels",
            report.source.map(|s| s.as_str()).unwrap_or("N/A"),
            report.levels.len()
        ))
        .color(0x7B68EE)
        .timestamp(Timestamp::now());

    for lvl in report.levels.iter().take(6) {
        embed = embed.field(
            lvl.kind.label(),
            format!(
                "`{:.2}` {}\n`{:.0}` {cfd}\nVol: {}",
                lvl.strike,
                labels.etf,
                lvl.strike * ratio,
                format::thousands(lvl.volume)
            ),
            true,
        );
    }

    if let Some(finra) = &report.finra {
        embed = embed.field(
            "FINRA Short %",
            format!("`{:.1}%`\n{}", finra.short_percent, finra.date),
            true,
        );
    }

    Some(embed.footer(CreateEmbedFooter::new(format!("Ratio: {ratio:.2} | BULLNET"))))
}

/// Dark pool levels for `ticker`. The GEX run only supplies spot and the
/// strike table for the fallbacks, so its failure is not fatal. The result
/// also feeds the level memory.
#[instrument(name = "darkpool_post", skip(data))]
pub async fn darkpool_post(data: &Data, ticker: &str) -> Result<DarkPoolPost> {
    let ticker = ticker::normalize(ticker);
    let ratio = data.ratio_for(&ticker).await;

    let (spot, strikes) = match data.gex.run(&ticker).await {
        Ok(gex) => (Some(gex.spot), gex.strikes),
        Err(e) => {
            warn!(error = ?e, "gex unavailable, dark pool without spot");
            (None, Vec::new())
        }
    };

    let report = data.darkpool.levels(&ticker, spot, &strikes).await;

    if !report.levels.is_empty()
        && let Err(e) = data.memory.update(&ticker, &report.levels, spot).await
    {
        warn!(error = ?e, "level memory update failed");
    }

    let text = format::truncate(&format::darkpool_message(&report, ratio, &now_text(data)));
    let embed = darkpool_embed(&report, ratio);

    Ok(DarkPoolPost {
        report,
        text,
        embed,
    })
}

/// Block prints for `ticker`, recorded for accumulation detection.
#[instrument(name = "prints_post", skip(data))]
pub async fn prints_post(data: &Data, ticker: &str) -> Result<String> {
    let ticker = ticker::normalize(ticker);
    let ratio = data.ratio_for(&ticker).await;
    let min_size = min_print_size(&ticker);

    let prints = data.darkpool.prints(&ticker, min_size).await;
    if let Err(e) = data.accumulation.record(&ticker, &prints).await {
        warn!(error = ?e, "accumulation record failed");
    }

    Ok(format::truncate(&format::prints_message(
        &ticker, &prints, ratio, min_size,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_follow_regime() {
        assert_eq!(regime_color(Some(GammaRegime::Positive)), 0x00FF88);
        assert_eq!(regime_color(Some(GammaRegime::Negative)), 0xFF3B3B);
        assert_eq!(regime_color(None), 0x808080);
    }

    #[test]
    fn no_embed_without_levels() {
        let report = DarkPoolReport {
            ticker: "QQQ".to_string(),
            timestamp: Utc::now(),
            source: None,
            levels: Vec::new(),
            finra: None,
        };
        assert!(darkpool_embed(&report, 41.33).is_none());
    }
}

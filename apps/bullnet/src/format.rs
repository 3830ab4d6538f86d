//! Discord text blocks. Everything here is pure so the layouts can be tested
//! without a gateway connection.

use chrono::NaiveDate;
use market::{
    accumulation::{AccumulationZone, Bias},
    darkpool::{BlockPrint, DarkPoolReport, PrintSide},
    gex::{GammaRegime, GexReport},
    memory::MemoryLevel,
    ticker,
};

/// Discord rejects messages over 2000 characters.
pub const MAX_MESSAGE_LEN: usize = 1900;
const WIDTH: usize = 44;

pub struct Labels {
    pub etf: String,
    pub cfd: &'static str,
    pub title: String,
}

pub fn labels(ticker: &str) -> Labels {
    if ticker::is_gold(ticker) {
        Labels {
            etf: "GLD".to_string(),
            cfd: "XAUUSD",
            title: "GOLD".to_string(),
        }
    } else {
        let upper = ticker.to_uppercase();
        Labels {
            etf: upper.clone(),
            cfd: "NAS100 CFD",
            title: upper,
        }
    }
}

pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub fn price(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "N/A".to_string())
}

pub fn cfd_price(v: Option<f64>, ratio: f64) -> String {
    price(v.map(|v| v * ratio))
}

fn rule(c: char) -> String {
    c.to_string().repeat(WIDTH)
}

fn code_block(lines: &[String]) -> String {
    format!("```\n{}\n```", lines.join("\n"))
}

fn regime_label(regime: Option<GammaRegime>) -> String {
    regime
        .map(|r| r.label().to_uppercase())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Cuts to the Discord limit on a char boundary and closes an open code block.
pub fn truncate(msg: &str) -> String {
    if msg.chars().count() <= MAX_MESSAGE_LEN {
        return msg.to_string();
    }

    let mut cut: String = msg.chars().take(MAX_MESSAGE_LEN).collect();
    if cut.matches("```").count() % 2 == 1 {
        cut.push_str("\n```");
    }
    cut
}

pub fn error_message(context: &str, err: &anyhow::Error) -> String {
    truncate(&format!("{context}\nFehler: {err:#}"))
}

pub fn gex_message(report: &GexReport, ratio: f64, now: &str) -> String {
    let l = labels(&report.ticker);
    let lv = &report.levels;

    let hint = match lv.regime {
        Some(GammaRegime::Positive) => "UEBER Flip = Range/Magnet",
        _ => "UNTER Flip = Acceleration",
    };

    let mut key_levels = vec![
        ("Gamma Flip:", lv.gamma_flip),
        ("Call Wall:", lv.call_wall),
        ("Put Wall:", lv.put_wall),
    ];
    if lv.hvl.is_some() {
        key_levels.push(("HVL:", lv.hvl));
    }

    let mut lines = vec![
        format!("BullNet GEX Report - {}", l.title),
        rule('='),
        format!(
            "  {now}  |  {}: ${:.2}  |  Source: {}",
            l.etf, report.spot, lv.source
        ),
        String::new(),
        format!("  Gamma Regime: {}", regime_label(lv.regime)),
        format!("  {hint}"),
        String::new(),
        "--- KEY LEVELS ---".to_string(),
    ];
    for (name, v) in &key_levels {
        lines.push(format!(
            "  {name:<13} {} {}  =  {} {}",
            price(*v),
            l.etf,
            cfd_price(*v, ratio),
            l.cfd
        ));
    }

    lines.push(String::new());
    lines.push(format!("--- {} INPUT ---", l.cfd));
    for (name, v) in &key_levels {
        lines.push(format!("  {name:<14} {}", cfd_price(*v, ratio)));
    }

    lines.push(String::new());
    lines.push(rule('='));
    lines.push(format!(
        "  Ratio: {ratio:.4} | {} (15min delayed)",
        lv.source.to_uppercase()
    ));

    code_block(&lines)
}

/// One-line regime check.
pub fn gamma_line(report: &GexReport) -> String {
    let lv = &report.levels;
    let side = match lv.gamma_flip {
        Some(flip) if report.spot > flip => "Oberhalb",
        Some(_) => "Unterhalb",
        None => "Kein Flip",
    };

    format!(
        "Gamma: {} | Flip: {} | Spot: {:.2} | {side}",
        regime_label(lv.regime),
        price(lv.gamma_flip),
        report.spot
    )
}

fn level_block(title: &str, rows: &[(&str, String)], footer: String) -> String {
    let mut lines = vec![title.to_string(), rule('-')];
    for (name, value) in rows {
        lines.push(format!("{name:<15}{value}"));
    }
    lines.push(rule('-'));
    lines.push(footer);
    code_block(&lines)
}

/// ETF levels as typed into the TradingView indicator.
pub fn levels_message(report: &GexReport, ratio: f64) -> String {
    let lv = &report.levels;
    level_block(
        "TradingView Input",
        &[
            ("Gamma Flip:", price(lv.gamma_flip)),
            ("Call Wall:", price(lv.call_wall)),
            ("Put Wall:", price(lv.put_wall)),
            ("HVL:", price(lv.hvl)),
        ],
        format!("Ratio: {ratio:.2} | Spot: ${:.2}", report.spot),
    )
}

pub fn gold_levels_message(report: &GexReport, ratio: f64) -> String {
    let lv = &report.levels;
    let row = |v: Option<f64>| format!("{}  (GLD {})", cfd_price(v, ratio), price(v));
    level_block(
        "Gold / XAUUSD Levels",
        &[
            ("Gamma Flip:", row(lv.gamma_flip)),
            ("Call Wall:", row(lv.call_wall)),
            ("Put Wall:", row(lv.put_wall)),
            ("HVL:", row(lv.hvl)),
        ],
        format!("GLD Spot: ${:.2} | Ratio: {ratio:.4}", report.spot),
    )
}

/// Signal label and marker for a FINRA short percentage.
pub fn finra_signal(short_percent: f64) -> (&'static str, &'static str) {
    if short_percent > 55.0 {
        ("BEARISH", "🔴")
    } else if short_percent > 45.0 {
        ("Neutral", "⚪")
    } else {
        ("BULLISH", "🟢")
    }
}

pub fn darkpool_message(report: &DarkPoolReport, ratio: f64, now: &str) -> String {
    let l = labels(&report.ticker);
    // The dark pool block names the Nasdaq contract plain "CFD".
    let cfd = if ticker::is_gold(&report.ticker) { l.cfd } else { "CFD" };
    let source = report.source.map(|s| s.as_str()).unwrap_or("N/A");

    let mut lines = vec![
        format!("BullNet Dark Pool - {}", l.title),
        rule('='),
        format!("  {now}  |  Source: {source}"),
        String::new(),
    ];

    if let Some(finra) = &report.finra {
        let (signal, marker) = finra_signal(finra.short_percent);
        lines.push(format!("  FINRA Short Volume ({}):", finra.date));
        lines.push(format!(
            "  Short: {} / Total: {}",
            thousands(finra.short_volume),
            thousands(finra.total_volume)
        ));
        lines.push(format!(
            "  Short %: {:.1}% = {signal} {marker}",
            finra.short_percent
        ));
        lines.push(String::new());
    }

    if report.levels.is_empty() {
        lines.push("  Keine Dark Pool Daten verfuegbar.".to_string());
        lines.push(String::new());
    } else {
        lines.push("--- DARK POOL LEVELS ---".to_string());
        lines.push(String::new());

        for lvl in report.levels.iter().take(8) {
            let volume = if lvl.volume > 0 {
                thousands(lvl.volume)
            } else {
                "N/A".to_string()
            };
            let trades = if lvl.trades > 0 {
                format!(" | {} Trades", lvl.trades)
            } else {
                String::new()
            };

            lines.push(format!("  [{}] {}:", lvl.kind.icon(), lvl.kind.label()));
            lines.push(format!(
                "      {:.2} {}  =  {:.2} {}  |  Vol: {volume}{trades}",
                lvl.strike,
                l.etf,
                lvl.strike * ratio,
                cfd
            ));
            lines.push(String::new());
        }

        lines.push(format!("--- {cfd} INPUT ---"));
        lines.push(String::new());
        for (i, lvl) in report.levels.iter().take(8).enumerate() {
            lines.push(format!(
                "  Zone {}: {:.2} {} = {:.2} {}  ({})",
                i + 1,
                lvl.strike,
                l.etf,
                lvl.strike * ratio,
                cfd,
                lvl.kind.label()
            ));
        }
        lines.push(String::new());
    }

    lines.push(rule('='));
    lines.push(format!("  Ratio: {ratio:.4} | Daten: Vortag (T+1)"));

    code_block(&lines)
}

#[derive(Debug, Default, PartialEq)]
pub struct PrintSummary {
    pub bid_count: usize,
    pub ask_count: usize,
    pub mid_count: usize,
    pub bid_volume: u64,
    pub ask_volume: u64,
}

impl PrintSummary {
    pub fn from_prints(prints: &[BlockPrint]) -> Self {
        let mut s = Self::default();
        for p in prints {
            match p.side_kind() {
                PrintSide::Bid => {
                    s.bid_count += 1;
                    s.bid_volume += p.size;
                }
                PrintSide::Ask => {
                    s.ask_count += 1;
                    s.ask_volume += p.size;
                }
                PrintSide::Mid => s.mid_count += 1,
                PrintSide::Unknown => {}
            }
        }
        s
    }

    /// One side needs 20% more volume than the other to count.
    pub fn bias(&self) -> &'static str {
        let (bid, ask) = (self.bid_volume as f64, self.ask_volume as f64);
        if bid > ask * 1.2 {
            "BULLISH 🟢"
        } else if ask > bid * 1.2 {
            "BEARISH 🔴"
        } else {
            "NEUTRAL ⚪"
        }
    }
}

fn premium_text(premium: f64) -> String {
    if premium >= 1_000_000.0 {
        format!(" ${:.1}M", premium / 1_000_000.0)
    } else if premium >= 1_000.0 {
        format!(" ${:.0}K", premium / 1_000.0)
    } else {
        String::new()
    }
}

pub fn prints_message(ticker: &str, prints: &[BlockPrint], ratio: f64, min_size: u64) -> String {
    let l = labels(ticker);
    let title = format!("BullNet Block Trades - {}", l.title);

    if prints.is_empty() {
        return code_block(&[
            title,
            rule('='),
            "  Keine Block Trades gefunden.".to_string(),
            rule('='),
        ]);
    }

    let summary = PrintSummary::from_prints(prints);
    let min_label = if min_size >= 1_000 {
        format!("{}K", min_size / 1_000)
    } else {
        min_size.to_string()
    };

    let mut lines = vec![
        title,
        rule('='),
        format!("  Top Block Trades (>{min_label} Shares)"),
        format!(
            "  Bid: {} ({}) | Ask: {} ({}) | Mid: {}",
            summary.bid_count,
            thousands(summary.bid_volume),
            summary.ask_count,
            thousands(summary.ask_volume),
            summary.mid_count
        ),
        format!("  Block Trade Bias: {}", summary.bias()),
        String::new(),
    ];

    for p in prints.iter().take(10) {
        let marker = match p.side_kind() {
            PrintSide::Bid => "🟢",
            PrintSide::Ask => "🔴",
            _ => "⚪",
        };
        lines.push(format!(
            "  {marker} {:.2} {} = {:.0} {}",
            p.price,
            l.etf,
            p.price * ratio,
            l.cfd
        ));
        lines.push(format!(
            "     {} Shares | {}{}",
            thousands(p.size),
            p.side,
            premium_text(p.premium)
        ));
        lines.push(format!("     {}  [{}]", p.time, p.exchange));
        lines.push(String::new());
    }

    lines.push(rule('='));
    lines.push(format!("  Ratio: {ratio:.4} | Daten: Vortag (T+1)"));
    lines.push(format!("  → !dp {} fuer DP Zonen im Indikator", l.etf));

    code_block(&lines)
}

pub fn memory_message(
    ticker: &str,
    levels: &[MemoryLevel],
    spot: Option<f64>,
    today: NaiveDate,
) -> String {
    let ticker = ticker.to_uppercase();
    if levels.is_empty() {
        return format!("Keine aktiven DP Levels für {ticker}.");
    }

    let mut out = vec![
        format!("**BullNet DP Memory - {ticker}**"),
        format!("Aktive (nicht erreichte) Levels: **{}**", levels.len()),
        "```".to_string(),
    ];

    for (i, lvl) in levels.iter().take(12).enumerate() {
        let repeat = if lvl.seen_count > 1 {
            format!(" x{}", lvl.seen_count)
        } else {
            String::new()
        };
        let distance = match spot {
            Some(spot) if spot > 0.0 => {
                let pct = (lvl.price - spot) / spot * 100.0;
                let arrow = if pct > 0.0 { "↑" } else { "↓" };
                format!(" | {arrow}{:.2}%", pct.abs())
            }
            _ => String::new(),
        };

        out.push(format!(
            "  {:>2}. {:>8.2}  Vol: {:>10}  | {}d{repeat}{distance}",
            i + 1,
            lvl.price,
            thousands(lvl.volume),
            lvl.age_days(today)
        ));
    }
    out.push("```".to_string());

    out.join("\n")
}

pub fn accumulation_message(ticker: &str, zones: &[AccumulationZone], ratio: f64) -> String {
    let l = labels(ticker);
    let title = format!("BullNet Akkumulation - {}", l.etf);

    if zones.is_empty() {
        return code_block(&[
            title,
            rule('='),
            "  Nicht genug historische Daten (min. 2 Tage)".to_string(),
            rule('='),
        ]);
    }

    let mut lines = vec![
        title,
        rule('='),
        "  Institutionelle Zonen (7-Tage Rolling)".to_string(),
        String::new(),
        "--- AKKUMULATIONS-ZONEN ---".to_string(),
        String::new(),
    ];

    for (i, z) in zones.iter().enumerate() {
        let marker = match z.bias {
            Bias::Bullish => "🟢",
            Bias::Bearish => "🔴",
        };
        lines.push(format!(
            "  {marker} Zone {}: {:.2} {}  =  {:.0} {}",
            i + 1,
            z.price,
            l.etf,
            z.price * ratio,
            l.cfd
        ));
        lines.push(format!(
            "     {} Tage aktiv | {} Shares total",
            z.days,
            thousands(z.total_volume)
        ));
        lines.push(format!(
            "     Bid: {} | Ask: {} | {}",
            thousands(z.bid_volume),
            thousands(z.ask_volume),
            z.bias.label()
        ));
        lines.push(String::new());
    }

    lines.push(rule('='));
    lines.push("  Lookback: 7 Tage | Cluster: ±0.3%".to_string());

    code_block(&lines)
}

pub fn ratio_message(ratio: f64, updated: bool) -> String {
    if updated {
        format!("Ratio gesetzt: {ratio:.2}")
    } else {
        format!("Aktueller Ratio: {ratio:.2}")
    }
}

pub fn gold_ratio_message(ratio: f64, updated: bool) -> String {
    if updated {
        format!("Gold Ratio gesetzt: {ratio:.4}")
    } else {
        format!(
            "Gold Ratio: {ratio:.4}\nBeispiel: GLD $260 x {ratio:.4} = XAUUSD ${:.2}",
            260.0 * ratio
        )
    }
}

pub fn help_message() -> String {
    let section = |name: &str| vec!["-".repeat(35), format!("  {name}"), "-".repeat(35)];

    let mut lines = vec!["BullNet GEX Bot - Befehle".to_string(), "=".repeat(35)];
    lines.extend(section("NASDAQ / QQQ"));
    lines.extend(
        [
            "!gex         Voller GEX Report",
            "!levels      TradingView Werte",
            "!gamma       Schnellcheck Regime",
            "!darkpool    Dark Pool Levels",
            "!dp          Kurzform darkpool",
            "!prints      Block Trades mit Bias",
            "!memory      Gemerkte DP Levels",
            "!accumulation  Akkumulations-Zonen",
            "!ratio       Ratio anzeigen/setzen",
        ]
        .map(String::from),
    );
    lines.extend(section("GOLD / XAUUSD"));
    lines.extend(
        [
            "!gold        Gold GEX Report",
            "!goldlevels  XAUUSD Werte",
            "!goldratio   Gold Ratio setzen",
        ]
        .map(String::from),
    );
    lines.extend(section("KOMBI"));
    lines.extend(
        [
            "!all         NAS + DP + Gold",
            "!test        CBOE Verbindung",
            "!hilfe       Diese Hilfe",
        ]
        .map(String::from),
    );
    lines.push("=".repeat(35));
    lines.push("Auto: 14:00, 17:00, 20:00 UTC (Mo-Fr)".to_string());

    code_block(&lines)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use market::{
        darkpool::{DarkPoolLevel, DarkPoolSource, FinraShortVolume, LevelKind},
        gex::KeyLevels,
    };

    use super::*;

    fn report(ticker: &str) -> GexReport {
        GexReport {
            ticker: ticker.to_string(),
            spot: 601.3,
            levels: KeyLevels {
                call_wall: Some(610.0),
                put_wall: Some(600.0),
                gamma_flip: Some(622.04),
                regime: Some(GammaRegime::Negative),
                hvl: None,
                abs_gamma_strike: None,
                source: "cboe".to_string(),
            },
            strikes: Vec::new(),
        }
    }

    fn print(price: f64, size: u64, side: &str) -> BlockPrint {
        BlockPrint {
            time: "2025-01-10 15:59".to_string(),
            price,
            size,
            premium: price * size as f64,
            side: side.to_string(),
            exchange: "D".to_string(),
        }
    }

    #[test]
    fn groups_thousands() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1_000), "1,000");
        assert_eq!(thousands(1_209_524), "1,209,524");
    }

    #[test]
    fn truncation_closes_code_block() {
        let long = format!("```\n{}\n```", "x".repeat(3000));
        let cut = truncate(&long);

        assert!(cut.ends_with("\n```"));
        assert_eq!(cut.chars().count(), MAX_MESSAGE_LEN + 4);
        assert_eq!(truncate("kurz"), "kurz");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "ü".repeat(2500);
        assert_eq!(truncate(&long).chars().count(), MAX_MESSAGE_LEN);
    }

    #[test]
    fn gex_message_converts_levels() {
        let msg = gex_message(&report("QQQ"), 41.33, "10.01.2025 15:00");

        assert!(msg.starts_with("```\nBullNet GEX Report - QQQ\n"));
        assert!(msg.contains("QQQ: $601.30  |  Source: cboe"));
        assert!(msg.contains("Gamma Regime: NEGATIV"));
        assert!(msg.contains("UNTER Flip = Acceleration"));
        assert!(msg.contains("Call Wall:    610.00 QQQ  =  25211.30 NAS100 CFD"));
        assert!(msg.contains("--- NAS100 CFD INPUT ---"));
        assert!(!msg.contains("HVL"));
        assert!(msg.ends_with("Ratio: 41.3300 | CBOE (15min delayed)\n```"));
    }

    #[test]
    fn gold_uses_xauusd_labels() {
        let msg = gex_message(&report("GLD"), 10.97, "now");
        assert!(msg.contains("BullNet GEX Report - GOLD"));
        assert!(msg.contains("XAUUSD"));

        let levels = gold_levels_message(&report("GLD"), 10.0);
        assert!(levels.contains("Call Wall:     6100.00  (GLD 610.00)"));
        assert!(levels.contains("HVL:           N/A  (GLD N/A)"));
    }

    #[test]
    fn gamma_line_reports_side_of_flip() {
        assert_eq!(
            gamma_line(&report("QQQ")),
            "Gamma: NEGATIV | Flip: 622.04 | Spot: 601.30 | Unterhalb"
        );
    }

    #[test]
    fn darkpool_message_with_finra() {
        let dp = DarkPoolReport {
            ticker: "QQQ".to_string(),
            timestamp: Utc::now(),
            source: Some(DarkPoolSource::ChartExchange),
            levels: vec![DarkPoolLevel {
                strike: 600.0,
                kind: LevelKind::Support,
                volume: 1_209_524,
                trades: 697,
                dollar_volume: 0.0,
                open_interest: 0,
            }],
            finra: Some(FinraShortVolume {
                date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
                short_volume: 10_414_395,
                total_volume: 19_288_145,
                short_percent: 54.0,
            }),
        };

        let msg = darkpool_message(&dp, 41.33, "now");
        assert!(msg.contains("Source: chartexchange"));
        assert!(msg.contains("Short %: 54.0% = Neutral"));
        assert!(msg.contains("[S] DP Support:"));
        assert!(msg.contains("Vol: 1,209,524 | 697 Trades"));
        assert!(msg.contains("Zone 1: 600.00 QQQ = 24798.00 CFD  (DP Support)"));
        assert!(msg.contains("--- CFD INPUT ---"));
        assert!(!msg.contains("NAS100"));
    }

    #[test]
    fn empty_darkpool_message() {
        let dp = DarkPoolReport {
            ticker: "QQQ".to_string(),
            timestamp: Utc::now(),
            source: None,
            levels: Vec::new(),
            finra: None,
        };
        let msg = darkpool_message(&dp, 41.33, "now");
        assert!(msg.contains("Source: N/A"));
        assert!(msg.contains("Keine Dark Pool Daten verfuegbar."));
    }

    #[test]
    fn finra_thresholds() {
        assert_eq!(finra_signal(60.0).0, "BEARISH");
        assert_eq!(finra_signal(50.0).0, "Neutral");
        assert_eq!(finra_signal(45.0).0, "BULLISH");
    }

    #[test]
    fn prints_bias_needs_clear_majority() {
        let prints = vec![
            print(600.0, 300_000, "Bid"),
            print(601.0, 200_000, "Ask"),
            print(602.0, 150_000, "Mid"),
        ];
        let summary = PrintSummary::from_prints(&prints);
        assert_eq!(summary.bid_count, 1);
        assert_eq!(summary.mid_count, 1);
        assert_eq!(summary.bias(), "BULLISH 🟢");

        let even = PrintSummary::from_prints(&[print(1.0, 100, "Bid"), print(1.0, 110, "Ask")]);
        assert_eq!(even.bias(), "NEUTRAL ⚪");

        let msg = prints_message("QQQ", &prints, 41.33, 100_000);
        assert!(msg.contains("Top Block Trades (>100K Shares)"));
        assert!(msg.contains("300,000 Shares | Bid $180.0M"));
        assert!(msg.contains("→ !dp QQQ"));
    }

    #[test]
    fn memory_message_shows_distance() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let level = MemoryLevel {
            price: 613.0,
            volume: 850_000,
            trades: 400,
            kind: LevelKind::Resistance,
            added: NaiveDate::from_ymd_opt(2025, 3, 7).unwrap(),
            last_seen: today,
            seen_count: 2,
        };

        let msg = memory_message("qqq", &[level], Some(601.0), today);
        assert!(msg.starts_with("**BullNet DP Memory - QQQ**"));
        assert!(msg.contains("   613.00  Vol:    850,000  | 3d x2 | ↑2.00%"));

        assert_eq!(
            memory_message("GLD", &[], None, today),
            "Keine aktiven DP Levels für GLD."
        );
    }

    #[test]
    fn accumulation_message_lists_zones() {
        let zone = AccumulationZone {
            price: 600.17,
            days: 2,
            total_volume: 150_000,
            bid_volume: 120_000,
            ask_volume: 30_000,
            total_trades: 3,
            bias: Bias::Bullish,
            strength: 3.0,
        };

        let msg = accumulation_message("QQQ", &[zone], 41.33);
        assert!(msg.contains("Zone 1: 600.17 QQQ  =  24805 NAS100 CFD"));
        assert!(msg.contains("2 Tage aktiv | 150,000 Shares total"));
        assert!(msg.contains("Bid: 120,000 | Ask: 30,000 | BULLISH"));

        assert!(accumulation_message("GLD", &[], 10.97).contains("min. 2 Tage"));
    }

    #[test]
    fn help_lists_commands() {
        let help = help_message();
        for cmd in ["!gex", "!darkpool", "!prints", "!memory", "!goldratio", "!hilfe"] {
            assert!(help.contains(cmd), "{cmd} missing");
        }
    }
}

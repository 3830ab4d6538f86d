mod chartexchange;
mod finra;
mod table;

#[cfg(feature = "browser")]
mod browser;

use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

#[cfg(feature = "browser")]
pub use browser::BrowserTableFetcher;
pub use chartexchange::{
    BlockPrint, ChartExchange, PrintSide, ProviderLevel, extract_levels, extract_prints,
    levels_urls, parse_number, prints_urls,
};
pub use finra::{FinraClient, FinraShortVolume, candidate_dates, parse_short_volume};
pub use table::{HttpTableFetcher, Table, TableFetcher, parse_html_tables};

use crate::gex::StrikeGex;

pub const MAX_LEVELS: usize = 8;
const MAX_PROVIDER_LEVELS: usize = 15;
const MAX_PRINTS: usize = 15;

const LEVEL_BLOCK_VOLUME: u64 = 50_000;
const PRINT_BLOCK_DOLLARS: f64 = 5_000_000.0;
const NEAR_SPOT_PCT: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelKind {
    #[serde(rename = "DP Support")]
    Support,
    #[serde(rename = "DP Resistance")]
    Resistance,
    #[serde(rename = "High Volume")]
    HighVolume,
    #[serde(rename = "Block Trade")]
    BlockTrade,
}

impl LevelKind {
    /// Side of spot with a 0.5% band counted as at-the-money.
    pub fn from_spot(strike: f64, spot: f64) -> Self {
        if strike > spot * 1.005 {
            LevelKind::Resistance
        } else if strike < spot * 0.995 {
            LevelKind::Support
        } else {
            LevelKind::HighVolume
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LevelKind::Support => "DP Support",
            LevelKind::Resistance => "DP Resistance",
            LevelKind::HighVolume => "High Volume",
            LevelKind::BlockTrade => "Block Trade",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            LevelKind::Support => "S",
            LevelKind::Resistance => "R",
            LevelKind::HighVolume => "HV",
            LevelKind::BlockTrade => "BT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DarkPoolLevel {
    pub strike: f64,
    pub kind: LevelKind,
    pub volume: u64,
    pub trades: u64,
    pub dollar_volume: f64,
    /// Only set for levels derived from the options chain.
    pub open_interest: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DarkPoolSource {
    ChartExchange,
    OptionsDerived,
}

impl DarkPoolSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DarkPoolSource::ChartExchange => "chartexchange",
            DarkPoolSource::OptionsDerived => "options-derived",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DarkPoolReport {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub source: Option<DarkPoolSource>,
    pub levels: Vec<DarkPoolLevel>,
    pub finra: Option<FinraShortVolume>,
}

/// Smallest print worth reporting; gold trades in much smaller blocks.
pub fn min_print_size(ticker: &str) -> u64 {
    if crate::ticker::is_gold(ticker) {
        5_000
    } else {
        100_000
    }
}

fn sort_by_strike(levels: &mut [DarkPoolLevel]) {
    levels.sort_by(|a, b| a.strike.total_cmp(&b.strike));
}

/// Top provider levels by volume, typed against spot.
pub fn levels_from_provider(provider: &[ProviderLevel], spot: Option<f64>) -> Vec<DarkPoolLevel> {
    let mut ranked = provider.to_vec();
    ranked.sort_by(|a, b| b.volume.cmp(&a.volume));

    let mut levels: Vec<DarkPoolLevel> = ranked
        .into_iter()
        .take(MAX_LEVELS)
        .map(|l| {
            let kind = match spot {
                Some(_) if l.volume > LEVEL_BLOCK_VOLUME => LevelKind::BlockTrade,
                Some(spot) => LevelKind::from_spot(l.price, spot),
                None => LevelKind::HighVolume,
            };
            DarkPoolLevel {
                strike: l.price,
                kind,
                volume: l.volume,
                trades: l.trades,
                dollar_volume: l.price * l.volume as f64,
                open_interest: 0,
            }
        })
        .collect();

    sort_by_strike(&mut levels);
    levels
}

/// Buckets prints by whole-dollar price (halves to even) and ranks buckets
/// by dollar volume.
pub fn levels_from_prints(prints: &[BlockPrint], spot: Option<f64>) -> Vec<DarkPoolLevel> {
    #[derive(Default)]
    struct Bucket {
        shares: u64,
        dollars: f64,
        count: u64,
    }

    let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();
    for p in prints {
        let bucket = buckets.entry(p.price.round_ties_even() as i64).or_default();
        bucket.shares += p.size;
        bucket.dollars += if p.premium > 0.0 {
            p.premium
        } else {
            p.price * p.size as f64
        };
        bucket.count += 1;
    }

    let mut ranked: Vec<(i64, Bucket)> = buckets.into_iter().collect();
    ranked.sort_by(|a, b| b.1.dollars.total_cmp(&a.1.dollars));

    let mut levels: Vec<DarkPoolLevel> = ranked
        .into_iter()
        .take(MAX_LEVELS)
        .map(|(price, b)| {
            let strike = price as f64;
            let kind = match spot {
                Some(_) if b.dollars > PRINT_BLOCK_DOLLARS => LevelKind::BlockTrade,
                Some(spot) => LevelKind::from_spot(strike, spot),
                None => LevelKind::HighVolume,
            };
            DarkPoolLevel {
                strike,
                kind,
                volume: b.shares,
                trades: b.count,
                dollar_volume: b.dollars,
                open_interest: 0,
            }
        })
        .collect();

    sort_by_strike(&mut levels);
    levels
}

/// Linear-interpolated quantile, `q` in [0, 1].
fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (pos - lower as f64)
}

/// Dark pool style levels from option volume and open interest near spot.
pub fn derive_from_options(spot: f64, strikes: &[StrikeGex]) -> Vec<DarkPoolLevel> {
    if strikes.is_empty() {
        return Vec::new();
    }

    let mut near: Vec<&StrikeGex> = strikes
        .iter()
        .filter(|s| (s.strike - spot).abs() / spot <= NEAR_SPOT_PCT)
        .collect();
    if near.is_empty() {
        near = strikes.iter().collect();
    }

    let volumes: Vec<f64> = near.iter().map(|s| s.total_volume as f64).collect();
    let block_threshold = quantile(&volumes, 0.9);

    let score = |s: &StrikeGex| s.total_volume as f64 * 2.0 + s.total_oi as f64;
    near.sort_by(|a, b| score(b).total_cmp(&score(a)));

    let mut levels: Vec<DarkPoolLevel> = near
        .into_iter()
        .take(MAX_LEVELS)
        .map(|s| {
            let kind = if s.total_volume as f64 > block_threshold {
                LevelKind::BlockTrade
            } else {
                LevelKind::from_spot(s.strike, spot)
            };
            DarkPoolLevel {
                strike: s.strike,
                kind,
                volume: s.total_volume,
                trades: 0,
                dollar_volume: 0.0,
                open_interest: s.total_oi,
            }
        })
        .collect();

    sort_by_strike(&mut levels);
    levels
}

/// Provider levels first, aggregated prints second, the options chain last.
pub fn combine(
    provider: &[ProviderLevel],
    prints: &[BlockPrint],
    spot: Option<f64>,
    strikes: &[StrikeGex],
) -> (Option<DarkPoolSource>, Vec<DarkPoolLevel>) {
    if provider.len() >= 3 {
        return (
            Some(DarkPoolSource::ChartExchange),
            levels_from_provider(provider, spot),
        );
    }

    if prints.len() >= 5 {
        return (
            Some(DarkPoolSource::ChartExchange),
            levels_from_prints(prints, spot),
        );
    }

    match spot {
        Some(spot) if !strikes.is_empty() => (
            Some(DarkPoolSource::OptionsDerived),
            derive_from_options(spot, strikes),
        ),
        _ => (None, Vec::new()),
    }
}

pub struct DarkPoolService {
    chartexchange: ChartExchange,
    finra: FinraClient,
}

impl DarkPoolService {
    pub fn new(fetcher: Arc<dyn TableFetcher>, finra: FinraClient) -> Self {
        Self {
            chartexchange: ChartExchange::new(fetcher),
            finra,
        }
    }

    /// Browser fetcher when built with the `browser` feature, plain HTTP otherwise.
    pub fn from_env() -> Result<Self> {
        #[cfg(feature = "browser")]
        let fetcher: Arc<dyn TableFetcher> = Arc::new(BrowserTableFetcher::from_env());
        #[cfg(not(feature = "browser"))]
        let fetcher: Arc<dyn TableFetcher> =
            Arc::new(HttpTableFetcher::new(std::time::Duration::from_secs(30))?);

        Ok(Self::new(fetcher, FinraClient::from_env()?))
    }

    #[instrument(name = "darkpool_levels", skip(self, strikes))]
    pub async fn levels(
        &self,
        ticker: &str,
        spot: Option<f64>,
        strikes: &[StrikeGex],
    ) -> DarkPoolReport {
        let provider = self
            .chartexchange
            .fetch_levels(ticker, MAX_PROVIDER_LEVELS)
            .await;

        let prints = if provider.len() >= 3 {
            Vec::new()
        } else {
            self.chartexchange.fetch_prints(ticker, 0, MAX_PRINTS).await
        };

        let (source, levels) = combine(&provider, &prints, spot, strikes);
        let finra = self
            .finra
            .fetch_short_volume(ticker, Local::now().date_naive())
            .await;

        info!(
            levels = levels.len(),
            source = source.map(|s| s.as_str()).unwrap_or("none"),
            "dark pool levels combined"
        );

        DarkPoolReport {
            ticker: ticker.to_string(),
            timestamp: Utc::now(),
            source,
            levels,
            finra,
        }
    }

    pub async fn prints(&self, ticker: &str, min_size: u64) -> Vec<BlockPrint> {
        self.chartexchange
            .fetch_prints(ticker, min_size, MAX_PRINTS)
            .await
    }
}

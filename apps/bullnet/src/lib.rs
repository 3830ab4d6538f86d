use std::sync::Arc;

use chrono_tz::Tz;
use market::{AccumulationTracker, DarkPoolService, GexService, LevelMemory, PineSeeds, ticker};
use tokio::sync::RwLock;

pub mod command;
pub mod config;
pub mod format;
pub mod reports;

/// ETF to CFD price multipliers, adjustable at runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ratios {
    /// QQQ to NAS100 CFD.
    pub nasdaq: f64,
    /// GLD to XAUUSD.
    pub gold: f64,
}

impl Ratios {
    pub fn for_ticker(&self, ticker: &str) -> f64 {
        if ticker::is_gold(ticker) {
            self.gold
        } else {
            self.nasdaq
        }
    }
}

#[derive(Clone)]
pub struct Data {
    pub gex: Arc<GexService>,
    pub darkpool: Arc<DarkPoolService>,
    pub memory: Arc<LevelMemory>,
    pub accumulation: Arc<AccumulationTracker>,
    pub pine_seeds: Option<Arc<PineSeeds>>,
    pub ratios: Arc<RwLock<Ratios>>,
    pub tz: Tz,
}

impl Data {
    pub async fn ratio_for(&self, ticker: &str) -> f64 {
        self.ratios.read().await.for_ticker(ticker)
    }
}

pub type Error = anyhow::Error;
pub type Context<'a> = poise::Context<'a, Data, Error>;

use std::{collections::HashSet, sync::Arc};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    darkpool::{DarkPoolLevel, LevelKind},
    store::{KeyLocks, KvStore},
};

/// Price distance, relative to spot, at which a level counts as reached.
pub const HIT_TOLERANCE: f64 = 0.0015;
pub const MAX_AGE_DAYS: i64 = 14;
pub const MIN_VOLUME_TO_REMEMBER: u64 = 250_000;
pub const MAX_NEW_PER_UPDATE: usize = 3;
pub const MAX_LEVELS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryLevel {
    pub price: f64,
    pub volume: u64,
    #[serde(default)]
    pub trades: u64,
    #[serde(rename = "type")]
    pub kind: LevelKind,
    pub added: NaiveDate,
    pub last_seen: NaiveDate,
    #[serde(default = "one")]
    pub seen_count: u32,
}

fn one() -> u32 {
    1
}

impl MemoryLevel {
    pub fn age_days(&self, today: NaiveDate) -> i64 {
        (today - self.added).num_days()
    }

    pub fn is_hit(&self, spot: f64) -> bool {
        spot > 0.0 && (spot - self.price).abs() / spot < HIT_TOLERANCE
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStats {
    pub added: usize,
    pub hit: usize,
    pub expired: usize,
}

fn cents(price: f64) -> i64 {
    (price * 100.0).round() as i64
}

/// Applies one day of dark-pool levels to the remembered set.
///
/// Expired and reached levels are dropped first. New levels are taken biggest
/// first; one matching a remembered price (to the cent) refreshes it instead
/// of being added.
pub fn update_levels(
    existing: Vec<MemoryLevel>,
    new_levels: &[DarkPoolLevel],
    spot: Option<f64>,
    today: NaiveDate,
) -> (Vec<MemoryLevel>, UpdateStats) {
    let mut stats = UpdateStats::default();

    let mut active: Vec<MemoryLevel> = existing
        .into_iter()
        .filter(|lvl| {
            if lvl.age_days(today) > MAX_AGE_DAYS {
                stats.expired += 1;
                return false;
            }
            if spot.is_some_and(|s| lvl.is_hit(s)) {
                stats.hit += 1;
                return false;
            }
            true
        })
        .collect();

    let mut known: HashSet<i64> = active.iter().map(|l| cents(l.price)).collect();

    let mut candidates: Vec<&DarkPoolLevel> = new_levels.iter().collect();
    candidates.sort_by(|a, b| b.volume.cmp(&a.volume));

    for lvl in candidates {
        if lvl.volume < MIN_VOLUME_TO_REMEMBER {
            continue;
        }

        let key = cents(lvl.strike);
        if known.contains(&key) {
            if let Some(seen) = active.iter_mut().find(|a| cents(a.price) == key) {
                if lvl.volume > seen.volume {
                    seen.volume = lvl.volume;
                    seen.last_seen = today;
                }
                seen.seen_count += 1;
            }
            continue;
        }

        if stats.added >= MAX_NEW_PER_UPDATE {
            continue;
        }

        active.push(MemoryLevel {
            price: lvl.strike,
            volume: lvl.volume,
            trades: lvl.trades,
            kind: lvl.kind,
            added: today,
            last_seen: today,
            seen_count: 1,
        });
        known.insert(key);
        stats.added += 1;
    }

    active.sort_by(|a, b| b.volume.cmp(&a.volume));
    active.truncate(MAX_LEVELS);

    (active, stats)
}

/// Levels price has not reached yet.
pub fn active_levels(levels: Vec<MemoryLevel>, spot: Option<f64>) -> Vec<MemoryLevel> {
    match spot {
        Some(spot) if spot > 0.0 => levels.into_iter().filter(|l| !l.is_hit(spot)).collect(),
        _ => levels,
    }
}

/// The `n` biggest unvisited levels, ordered by price.
pub fn top_zones(levels: Vec<MemoryLevel>, n: usize, spot: Option<f64>) -> Vec<MemoryLevel> {
    let mut top = active_levels(levels, spot);
    top.sort_by(|a, b| b.volume.cmp(&a.volume));
    top.truncate(n);
    top.sort_by(|a, b| a.price.total_cmp(&b.price));
    top
}

/// Remembered dark-pool levels, one JSON list per ticker.
pub struct LevelMemory {
    store: Arc<dyn KvStore>,
    locks: KeyLocks,
}

impl LevelMemory {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            locks: KeyLocks::default(),
        }
    }

    fn key(ticker: &str) -> String {
        format!("dp_memory:{}", ticker.to_uppercase())
    }

    pub async fn load(&self, ticker: &str) -> Result<Vec<MemoryLevel>> {
        match self.store.get(&Self::key(ticker)).await? {
            Some(json) => serde_json::from_str(&json)
                .with_context(|| format!("decode level memory for {ticker}")),
            None => Ok(Vec::new()),
        }
    }

    #[instrument(name = "memory_update", skip(self, new_levels), fields(new = new_levels.len()))]
    pub async fn update(
        &self,
        ticker: &str,
        new_levels: &[DarkPoolLevel],
        spot: Option<f64>,
    ) -> Result<Vec<MemoryLevel>> {
        let key = Self::key(ticker);
        let _guard = self.locks.lock(&key).await;

        let existing = self.load(ticker).await?;
        let (active, stats) = update_levels(existing, new_levels, spot, Local::now().date_naive());

        self.store.set(&key, serde_json::to_string(&active)?).await?;

        info!(
            active = active.len(),
            added = stats.added,
            hit = stats.hit,
            expired = stats.expired,
            "level memory updated"
        );
        Ok(active)
    }

    pub async fn active(&self, ticker: &str, spot: Option<f64>) -> Result<Vec<MemoryLevel>> {
        Ok(active_levels(self.load(ticker).await?, spot))
    }

    pub async fn top_zones(
        &self,
        ticker: &str,
        n: usize,
        spot: Option<f64>,
    ) -> Result<Vec<MemoryLevel>> {
        Ok(top_zones(self.load(ticker).await?, n, spot))
    }
}

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    darkpool::{BlockPrint, PrintSide},
    store::{KeyLocks, KvStore},
};

pub const LOOKBACK_DAYS: u64 = 7;
/// Prices within this fraction of a cluster's reference belong to it.
pub const CLUSTER_PCT: f64 = 0.003;
pub const MIN_DAYS: usize = 2;
pub const MIN_VOLUME: u64 = 100_000;
const MAX_ZONES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulationTrade {
    pub price: f64,
    pub shares: u64,
    pub side: String,
}

impl From<&BlockPrint> for AccumulationTrade {
    fn from(print: &BlockPrint) -> Self {
        Self {
            price: print.price,
            shares: print.size,
            side: print.side.clone(),
        }
    }
}

/// Stored trades per UTC day.
pub type History = BTreeMap<NaiveDate, Vec<AccumulationTrade>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    Bullish,
    Bearish,
}

impl Bias {
    pub fn label(&self) -> &'static str {
        match self {
            Bias::Bullish => "BULLISH",
            Bias::Bearish => "BEARISH",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccumulationZone {
    /// Volume-weighted cluster price, rounded to cents.
    pub price: f64,
    pub days: usize,
    pub total_volume: u64,
    pub bid_volume: u64,
    pub ask_volume: u64,
    pub total_trades: usize,
    pub bias: Bias,
    pub strength: f64,
}

fn cutoff(today: NaiveDate, days: u64) -> NaiveDate {
    today.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)
}

/// Replaces today's trades and drops days outside the rolling window.
pub fn record_day(history: &mut History, today: NaiveDate, trades: Vec<AccumulationTrade>) {
    history.insert(today, trades);
    let keep_from = cutoff(today, LOOKBACK_DAYS);
    history.retain(|date, _| *date >= keep_from);
}

struct Cluster<'a> {
    reference: f64,
    trades: Vec<(NaiveDate, &'a AccumulationTrade)>,
}

impl Cluster<'_> {
    fn reweigh(&mut self) {
        let shares: u64 = self.trades.iter().map(|(_, t)| t.shares).sum();
        if shares > 0 {
            let weighted: f64 = self.trades.iter().map(|(_, t)| t.price * t.shares as f64).sum();
            self.reference = weighted / shares as f64;
        }
    }
}

/// Price zones traded on several days within the lookback, strongest first.
pub fn detect(history: &History, today: NaiveDate, lookback_days: u64) -> Vec<AccumulationZone> {
    let from = cutoff(today, lookback_days);

    let mut trades: Vec<(NaiveDate, &AccumulationTrade)> = history
        .range(from..)
        .flat_map(|(date, day)| day.iter().map(move |t| (*date, t)))
        .filter(|(_, t)| t.price > 0.0)
        .collect();
    trades.sort_by(|a, b| a.1.price.total_cmp(&b.1.price));

    let mut clusters: Vec<Cluster> = Vec::new();
    for (date, trade) in trades {
        match clusters
            .iter_mut()
            .find(|c| (trade.price - c.reference).abs() / c.reference <= CLUSTER_PCT)
        {
            Some(cluster) => {
                cluster.trades.push((date, trade));
                cluster.reweigh();
            }
            None => clusters.push(Cluster {
                reference: trade.price,
                trades: vec![(date, trade)],
            }),
        }
    }

    let mut zones: Vec<AccumulationZone> = clusters
        .into_iter()
        .filter_map(|cluster| {
            let days = cluster.trades.iter().map(|(d, _)| *d).collect::<BTreeSet<_>>().len();
            let total_volume: u64 = cluster.trades.iter().map(|(_, t)| t.shares).sum();
            if days < MIN_DAYS || total_volume < MIN_VOLUME {
                return None;
            }

            let volume_on = |side: PrintSide| -> u64 {
                cluster
                    .trades
                    .iter()
                    .filter(|(_, t)| PrintSide::from_label(&t.side) == side)
                    .map(|(_, t)| t.shares)
                    .sum()
            };
            let bid_volume = volume_on(PrintSide::Bid);
            let ask_volume = volume_on(PrintSide::Ask);

            Some(AccumulationZone {
                price: (cluster.reference * 100.0).round() / 100.0,
                days,
                total_volume,
                bid_volume,
                ask_volume,
                total_trades: cluster.trades.len(),
                bias: if bid_volume > ask_volume {
                    Bias::Bullish
                } else {
                    Bias::Bearish
                },
                strength: days as f64 * (total_volume as f64 / 100_000.0),
            })
        })
        .collect();

    zones.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    zones.truncate(MAX_ZONES);
    zones
}

/// Rolling block print history per ticker.
pub struct AccumulationTracker {
    store: Arc<dyn KvStore>,
    locks: KeyLocks,
}

impl AccumulationTracker {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            locks: KeyLocks::default(),
        }
    }

    fn key(ticker: &str) -> String {
        format!("accumulation:{}", ticker.to_uppercase())
    }

    async fn load(&self, ticker: &str) -> Result<History> {
        match self.store.get(&Self::key(ticker)).await? {
            Some(json) => serde_json::from_str(&json)
                .with_context(|| format!("decode accumulation history for {ticker}")),
            None => Ok(History::new()),
        }
    }

    #[instrument(name = "accumulation_record", skip(self, prints), fields(prints = prints.len()))]
    pub async fn record(&self, ticker: &str, prints: &[BlockPrint]) -> Result<()> {
        if prints.is_empty() {
            return Ok(());
        }

        let key = Self::key(ticker);
        let _guard = self.locks.lock(&key).await;

        let today = Utc::now().date_naive();
        let mut history = self.load(ticker).await?;
        record_day(&mut history, today, prints.iter().map(AccumulationTrade::from).collect());

        self.store.set(&key, serde_json::to_string(&history)?).await?;

        info!(days = history.len(), "accumulation prints saved");
        Ok(())
    }

    pub async fn zones(&self, ticker: &str) -> Result<Vec<AccumulationZone>> {
        let history = self.load(ticker).await?;
        Ok(detect(&history, Utc::now().date_naive(), LOOKBACK_DAYS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn trade(price: f64, shares: u64, side: &str) -> AccumulationTrade {
        AccumulationTrade {
            price,
            shares,
            side: side.to_string(),
        }
    }

    #[test]
    fn rolling_window_keeps_seven_days() {
        let mut history = History::new();
        record_day(&mut history, day(1), vec![trade(600.0, 1, "Bid")]);
        record_day(&mut history, day(5), vec![trade(600.0, 1, "Bid")]);
        record_day(&mut history, day(9), vec![trade(600.0, 1, "Bid")]);

        assert_eq!(history.keys().copied().collect::<Vec<_>>(), vec![day(5), day(9)]);

        record_day(&mut history, day(9), vec![trade(601.0, 2, "Ask")]);
        assert_eq!(history[&day(9)], vec![trade(601.0, 2, "Ask")]);
    }

    #[test]
    fn clusters_multi_day_zones() {
        let mut history = History::new();
        history.insert(
            day(10),
            vec![trade(600.0, 80_000, "Bid"), trade(650.0, 500_000, "Ask")],
        );
        history.insert(
            day(11),
            vec![trade(601.0, 40_000, "Bid"), trade(599.5, 30_000, "Ask")],
        );
        history.insert(day(12), vec![trade(620.0, 20_000, "Mid")]);

        let zones = detect(&history, day(12), LOOKBACK_DAYS);
        assert_eq!(zones.len(), 1);

        let zone = &zones[0];
        assert_eq!(zone.days, 2);
        assert_eq!(zone.total_volume, 150_000);
        assert_eq!(zone.bid_volume, 120_000);
        assert_eq!(zone.ask_volume, 30_000);
        assert_eq!(zone.total_trades, 3);
        assert_eq!(zone.bias, Bias::Bullish);
        assert!((zone.strength - 3.0).abs() < 1e-9);
        assert!(zone.price > 599.5 && zone.price < 601.0);
    }

    #[test]
    fn bias_counts_exact_sides_only() {
        let mut history = History::new();
        history.insert(
            day(10),
            vec![trade(600.0, 90_000, "Below Bid"), trade(600.1, 40_000, "Ask")],
        );
        history.insert(day(11), vec![trade(600.2, 30_000, "Bid")]);

        let zones = detect(&history, day(11), LOOKBACK_DAYS);
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].bid_volume, 30_000);
        assert_eq!(zones[0].ask_volume, 40_000);
        assert_eq!(zones[0].total_volume, 160_000);
        assert_eq!(zones[0].bias, Bias::Bearish);
    }

    #[test]
    fn single_day_or_thin_clusters_are_ignored() {
        let mut history = History::new();
        history.insert(day(10), vec![trade(600.0, 500_000, "Bid")]);
        history.insert(day(11), vec![trade(500.0, 10_000, "Bid")]);
        history.insert(day(12), vec![trade(500.5, 10_000, "Bid")]);

        assert!(detect(&history, day(12), LOOKBACK_DAYS).is_empty());
    }

    #[test]
    fn old_days_fall_out_of_lookback() {
        let mut history = History::new();
        history.insert(day(1), vec![trade(600.0, 200_000, "Ask")]);
        history.insert(day(10), vec![trade(600.0, 200_000, "Ask")]);

        assert!(detect(&history, day(10), LOOKBACK_DAYS).is_empty());
        assert_eq!(detect(&history, day(8), LOOKBACK_DAYS).len(), 1);
    }

    #[tokio::test]
    async fn tracker_records_and_detects() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path().join("store.json")));

        let yesterday = Utc::now().date_naive() - Days::new(1);
        let mut seeded = History::new();
        seeded.insert(yesterday, vec![trade(600.2, 90_000, "Ask")]);
        store
            .set("accumulation:QQQ", serde_json::to_string(&seeded).unwrap())
            .await
            .unwrap();

        let tracker = AccumulationTracker::new(store);
        let print = BlockPrint {
            time: "10:31".into(),
            price: 600.0,
            size: 60_000,
            premium: 36_000_000.0,
            side: "Ask".into(),
            exchange: "D".into(),
        };
        tracker.record("qqq", &[print]).await.unwrap();

        let zones = tracker.zones("QQQ").await.unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].bias, Bias::Bearish);
        assert_eq!(zones[0].total_volume, 150_000);
    }
}

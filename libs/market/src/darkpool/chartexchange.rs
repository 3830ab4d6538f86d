use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::table::{Table, TableFetcher};
use crate::ticker::normalize;

const BASE_URL: &str = "https://chartexchange.com/symbol";

const LEVELS_TTL: Duration = Duration::from_secs(300);
const PRINTS_TTL: Duration = Duration::from_secs(600);

const NASDAQ_TICKERS: &[&str] = &[
    "QQQ", "AAPL", "MSFT", "AMZN", "GOOGL", "GOOG", "META", "NVDA", "TSLA", "AMD", "NFLX", "AVGO",
    "INTC", "MU", "QCOM",
];

/// Aggregated dark pool volume at one price, as published by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderLevel {
    pub price: f64,
    pub volume: u64,
    pub trades: u64,
}

/// One off-exchange block trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockPrint {
    pub time: String,
    pub price: f64,
    pub size: u64,
    /// Dollar value of the trade, zero when not published.
    pub premium: f64,
    pub side: String,
    pub exchange: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintSide {
    Bid,
    Ask,
    Mid,
    Unknown,
}

impl PrintSide {
    /// Loose match for display: `Below Bid` counts as a bid.
    pub fn parse(text: &str) -> Self {
        let text = text.to_lowercase();
        if text.contains("bid") {
            PrintSide::Bid
        } else if text.contains("ask") {
            PrintSide::Ask
        } else if text.contains("mid") {
            PrintSide::Mid
        } else {
            PrintSide::Unknown
        }
    }

    /// Exact `Bid`, `Ask` or `Mid` label. Anything else is unknown.
    pub fn from_label(text: &str) -> Self {
        match text.trim() {
            "Bid" => PrintSide::Bid,
            "Ask" => PrintSide::Ask,
            "Mid" => PrintSide::Mid,
            _ => PrintSide::Unknown,
        }
    }
}

impl BlockPrint {
    pub fn side_kind(&self) -> PrintSide {
        PrintSide::parse(&self.side)
    }
}

#[derive(Debug, Clone, Copy)]
enum Page {
    Levels,
    Prints,
}

/// Exchange prefixes to try, primary first. Prints and levels pages do not
/// always live under the same prefix.
fn exchange_candidates(ticker: &str, page: Page) -> Vec<&'static str> {
    match (ticker, page) {
        ("GLD" | "SLV", Page::Levels) => vec!["amex", "nyse_arca", "nyse"],
        ("GLD", Page::Prints) => vec!["amex", "nyse", "nyse_arca", "arca"],
        ("SLV", Page::Prints) => vec!["amex", "nyse", "nyse_arca"],
        ("SPY" | "IWM", _) => vec!["nyse_arca", "nyse"],
        (t, _) if NASDAQ_TICKERS.contains(&t) => vec!["nasdaq"],
        (_, Page::Levels) => vec!["nasdaq"],
        (_, Page::Prints) => vec!["nasdaq", "nyse"],
    }
}

pub fn levels_urls(ticker: &str) -> Vec<String> {
    let ticker = normalize(ticker);
    exchange_candidates(&ticker, Page::Levels)
        .into_iter()
        .map(|ex| {
            format!(
                "{BASE_URL}/{ex}-{}/exchange-volume/",
                ticker.to_lowercase()
            )
        })
        .collect()
}

pub fn prints_urls(ticker: &str) -> Vec<String> {
    let ticker = normalize(ticker);
    exchange_candidates(&ticker, Page::Prints)
        .into_iter()
        .map(|ex| {
            format!(
                "{BASE_URL}/{ex}-{}/exchange-volume/dark-pool-prints/",
                ticker.to_lowercase()
            )
        })
        .collect()
}

/// Parses `1,234`, `$1.5M`, `500K`, `2B`.
pub fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != ',' && *c != '$')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    let (digits, multiplier) = match cleaned.chars().last()?.to_ascii_uppercase() {
        'K' => (&cleaned[..cleaned.len() - 1], 1_000.0),
        'M' => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        'B' => (&cleaned[..cleaned.len() - 1], 1_000_000_000.0),
        _ => (cleaned, 1.0),
    };

    let digits = digits.trim();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    digits.parse::<f64>().ok().map(|v| v * multiplier)
}

fn digits_only(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn decimal_only(text: &str) -> Option<f64> {
    let digits: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}

/// Classifies a row by the shape of its cells: a decimal in a plausible price
/// range, a large integer volume, then a smaller integer trade count.
fn level_from_cells(cells: &[String]) -> Option<ProviderLevel> {
    let mut price: Option<f64> = None;
    let mut volume: Option<u64> = None;
    let mut trades: Option<u64> = None;

    for text in cells {
        let Some(val) = parse_number(text) else {
            continue;
        };
        let has_decimal = text.replace(',', "").contains('.');

        if price.is_none() && has_decimal && val > 10.0 && val < 50_000.0 {
            price = Some(val);
        } else if volume.is_none() && val >= 100.0 && !has_decimal {
            volume = Some(val as u64);
        } else if let Some(v) = volume
            && trades.is_none()
            && val < v as f64
            && val >= 1.0
        {
            trades = Some(val as u64);
        }
    }

    Some(ProviderLevel {
        price: price?,
        volume: volume?,
        trades: trades.unwrap_or(0),
    })
}

fn levels_from_headed(table: &Table) -> Vec<ProviderLevel> {
    let level_idx = table.column("level").unwrap_or(0);
    let trades_idx = table.column("trades").unwrap_or(1);
    let volume_idx = table.column("volume").unwrap_or(2);

    table
        .rows
        .iter()
        .filter(|cells| cells.len() >= 3)
        .filter_map(|cells| {
            let price = cells.get(level_idx).and_then(|c| decimal_only(c))?;
            let volume = cells.get(volume_idx).and_then(|c| digits_only(c))?;
            let trades = cells
                .get(trades_idx)
                .and_then(|c| digits_only(c))
                .unwrap_or(0);
            (price > 0.0 && volume > 0).then_some(ProviderLevel {
                price,
                volume,
                trades,
            })
        })
        .collect()
}

/// Dark pool levels from the first table headed `Level … Volume`, or from
/// cell shapes when no table carries those headers. Sorted by volume, capped.
pub fn extract_levels(tables: &[Table], max_levels: usize) -> Vec<ProviderLevel> {
    let mut levels = match tables
        .iter()
        .map(levels_from_headed_if_match)
        .find(|l| !l.is_empty())
    {
        Some(levels) => levels,
        None => tables
            .iter()
            .flat_map(|t| t.rows.iter())
            .filter(|cells| cells.len() >= 3)
            .filter_map(|cells| level_from_cells(cells))
            .collect(),
    };

    levels.sort_by(|a, b| b.volume.cmp(&a.volume));
    levels.truncate(max_levels);
    levels
}

fn levels_from_headed_if_match(table: &Table) -> Vec<ProviderLevel> {
    if table.has_columns(&["level", "volume"]) {
        levels_from_headed(table)
    } else {
        Vec::new()
    }
}

fn cell_text(table: &Table, cells: &[String], name: &str) -> String {
    table
        .column(name)
        .and_then(|i| cells.get(i))
        .map(|c| c.trim().to_string())
        .unwrap_or_default()
}

/// Block prints from the first table headed `Time`, `Price`, `Size`.
pub fn extract_prints(tables: &[Table], min_size: u64, max_prints: usize) -> Vec<BlockPrint> {
    let Some(table) = tables
        .iter()
        .find(|t| t.has_columns(&["time", "price", "size"]) && !t.rows.is_empty())
    else {
        return Vec::new();
    };

    let cell = |cells: &Vec<String>, name: &str| cell_text(table, cells, name);

    let mut prints: Vec<BlockPrint> = table
        .rows
        .iter()
        .filter(|cells| cells.len() >= 4)
        .filter_map(|cells| {
            let price = decimal_only(&cell(cells, "price"))?;
            let size = digits_only(&cell(cells, "size")).unwrap_or(0);
            (size >= min_size && price > 0.0).then(|| BlockPrint {
                time: cell(cells, "time"),
                price,
                size,
                premium: parse_number(&cell(cells, "premium")).unwrap_or(0.0),
                side: cell(cells, "side"),
                exchange: cell(cells, "exchange"),
            })
        })
        .collect();

    prints.sort_by(|a, b| b.size.cmp(&a.size));
    prints.truncate(max_prints);
    prints
}

struct Cached<T> {
    at: Instant,
    value: T,
}

/// ChartExchange dark pool pages with per-ticker result caching.
pub struct ChartExchange {
    fetcher: Arc<dyn TableFetcher>,
    levels_ttl: Duration,
    prints_ttl: Duration,
    levels_cache: Mutex<HashMap<String, Cached<Vec<ProviderLevel>>>>,
    prints_cache: Mutex<HashMap<(String, u64), Cached<Vec<BlockPrint>>>>,
}

impl ChartExchange {
    pub fn new(fetcher: Arc<dyn TableFetcher>) -> Self {
        Self::with_ttl(fetcher, LEVELS_TTL, PRINTS_TTL)
    }

    pub fn with_ttl(
        fetcher: Arc<dyn TableFetcher>,
        levels_ttl: Duration,
        prints_ttl: Duration,
    ) -> Self {
        Self {
            fetcher,
            levels_ttl,
            prints_ttl,
            levels_cache: Mutex::new(HashMap::new()),
            prints_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Walks the candidate URLs until one yields rows. Fetch errors are
    /// logged and treated like an empty page.
    async fn first_tables<T>(
        &self,
        urls: &[String],
        extract: impl Fn(&[Table]) -> Vec<T>,
    ) -> Vec<T> {
        for url in urls {
            match self.fetcher.fetch_tables(url).await {
                Ok(None) => {
                    warn!(url, "page not found, trying next");
                }
                Ok(Some(tables)) => {
                    let rows = extract(&tables);
                    debug!(url, rows = rows.len(), "rows extracted");
                    if !rows.is_empty() {
                        return rows;
                    }
                }
                Err(e) => {
                    warn!(url, error = ?e, "fetch failed");
                }
            }
        }
        Vec::new()
    }

    #[instrument(name = "chartexchange_levels", skip(self))]
    pub async fn fetch_levels(&self, ticker: &str, max_levels: usize) -> Vec<ProviderLevel> {
        let ticker = normalize(ticker);

        if let Some(hit) = self.levels_cache.lock().await.get(&ticker)
            && hit.at.elapsed() < self.levels_ttl
        {
            info!("levels cache hit");
            return hit.value.clone();
        }

        let levels = self
            .first_tables(&levels_urls(&ticker), |t| extract_levels(t, max_levels))
            .await;

        if let Some(top) = levels.first() {
            info!(
                count = levels.len(),
                top_price = top.price,
                top_volume = top.volume,
                "levels fetched"
            );
            self.levels_cache.lock().await.insert(
                ticker,
                Cached {
                    at: Instant::now(),
                    value: levels.clone(),
                },
            );
        } else {
            warn!("no dark pool levels found");
        }

        levels
    }

    #[instrument(name = "chartexchange_prints", skip(self))]
    pub async fn fetch_prints(
        &self,
        ticker: &str,
        min_size: u64,
        max_prints: usize,
    ) -> Vec<BlockPrint> {
        let ticker = normalize(ticker);
        let key = (ticker.clone(), min_size);

        if let Some(hit) = self.prints_cache.lock().await.get(&key)
            && hit.at.elapsed() < self.prints_ttl
        {
            info!("prints cache hit");
            return hit.value.clone();
        }

        let prints = self
            .first_tables(&prints_urls(&ticker), |t| {
                extract_prints(t, min_size, max_prints)
            })
            .await;

        if let Some(top) = prints.first() {
            info!(
                count = prints.len(),
                top_size = top.size,
                top_price = top.price,
                "prints fetched"
            );
            self.prints_cache.lock().await.insert(
                key,
                Cached {
                    at: Instant::now(),
                    value: prints.clone(),
                },
            );
        } else {
            warn!("no dark pool prints found");
        }

        prints
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::Result;
    use async_trait::async_trait;

    use super::*;

    fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
        Table {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn parses_suffixed_numbers() {
        assert_eq!(parse_number("1,234"), Some(1234.0));
        assert_eq!(parse_number("$1.5M"), Some(1_500_000.0));
        assert_eq!(parse_number("500k"), Some(500_000.0));
        assert_eq!(parse_number("2B"), Some(2_000_000_000.0));
        assert_eq!(parse_number("Bid"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("09:31:02"), None);
    }

    #[test]
    fn classifies_print_side() {
        assert_eq!(PrintSide::parse("Bid"), PrintSide::Bid);
        assert_eq!(PrintSide::parse("Below Bid"), PrintSide::Bid);
        assert_eq!(PrintSide::parse("ASK"), PrintSide::Ask);
        assert_eq!(PrintSide::parse("Mid"), PrintSide::Mid);
        assert_eq!(PrintSide::parse(""), PrintSide::Unknown);

        assert_eq!(PrintSide::from_label("Bid"), PrintSide::Bid);
        assert_eq!(PrintSide::from_label("Below Bid"), PrintSide::Unknown);
        assert_eq!(PrintSide::from_label("ask"), PrintSide::Unknown);
    }

    #[test]
    fn builds_candidate_urls() {
        assert_eq!(
            levels_urls("gold"),
            vec![
                "https://chartexchange.com/symbol/amex-gld/exchange-volume/",
                "https://chartexchange.com/symbol/nyse_arca-gld/exchange-volume/",
                "https://chartexchange.com/symbol/nyse-gld/exchange-volume/",
            ]
        );
        assert_eq!(
            prints_urls("QQQ"),
            vec!["https://chartexchange.com/symbol/nasdaq-qqq/exchange-volume/dark-pool-prints/"]
        );
        assert_eq!(prints_urls("XOM").len(), 2);
        assert_eq!(prints_urls("GLD").len(), 4);
    }

    #[test]
    fn extracts_levels_from_headed_table() {
        let tables = vec![
            table(&["Date", "Close"], &[&["2025-01-10", "601.00"]]),
            table(
                &["Level", "Trades", "Volume", "Notional"],
                &[
                    &["600.07", "587", "363,714", "218.2M"],
                    &["601.07", "697", "1,209,524", "727.0M"],
                    &["0", "1", "5", "0"],
                ],
            ),
        ];

        let levels = extract_levels(&tables, 15);
        assert_eq!(levels.len(), 2);
        assert_eq!(
            levels[0],
            ProviderLevel {
                price: 601.07,
                volume: 1_209_524,
                trades: 697
            }
        );
    }

    #[test]
    fn falls_back_to_cell_shapes() {
        let tables = vec![table(
            &[],
            &[
                &["459.94", "216,874", "405"],
                &["Total", "n/a", "-"],
                &["1.50", "2,000", "10"],
            ],
        )];

        let levels = extract_levels(&tables, 15);
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].price, 459.94);
        assert_eq!(levels[0].volume, 216_874);
        assert_eq!(levels[0].trades, 405);
    }

    #[test]
    fn extracts_prints_above_min_size() {
        let tables = vec![table(
            &["Time", "Price", "Size", "Premium", "Side", "Exchange"],
            &[
                &["09:31:02", "601.10", "150,000", "$90.2M", "Bid", "FINRA"],
                &["10:02:44", "600.50", "50,000", "$30.0M", "Ask", "FINRA"],
                &["15:59:58", "602.00", "400,000", "240.8M", "Mid", "ADF"],
            ],
        )];

        let prints = extract_prints(&tables, 100_000, 15);
        assert_eq!(prints.len(), 2);
        assert_eq!(prints[0].size, 400_000);
        assert_eq!(prints[0].side, "Mid");
        assert_eq!(prints[1].premium, 90_200_000.0);
        assert_eq!(prints[1].time, "09:31:02");
    }

    struct CountingFetcher {
        calls: AtomicUsize,
        missing_first: bool,
    }

    #[async_trait]
    impl TableFetcher for CountingFetcher {
        async fn fetch_tables(&self, _url: &str) -> Result<Option<Vec<Table>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.missing_first && n == 0 {
                return Ok(None);
            }
            Ok(Some(vec![
                table(
                    &["Level", "Trades", "Volume"],
                    &[&["245.10", "12", "80,000"], &["246.00", "30", "120,000"]],
                ),
                table(
                    &["Time", "Price", "Size", "Side"],
                    &[&["09:31:02", "245.20", "150,000", "Bid"]],
                ),
            ]))
        }
    }

    #[tokio::test]
    async fn tries_next_exchange_and_caches() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            missing_first: true,
        });
        let ce = ChartExchange::new(fetcher.clone());

        let levels = ce.fetch_levels("GLD", 15).await;
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].volume, 120_000);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        let again = ce.fetch_levels("gold", 15).await;
        assert_eq!(again, levels);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn default_cache_lifetimes() {
        assert_eq!(LEVELS_TTL, Duration::from_secs(5 * 60));
        assert_eq!(PRINTS_TTL, Duration::from_secs(10 * 60));
    }

    #[tokio::test]
    async fn cached_results_expire() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            missing_first: false,
        });
        let ce = ChartExchange::with_ttl(
            fetcher.clone(),
            Duration::from_millis(50),
            Duration::from_millis(150),
        );
        let calls = || fetcher.calls.load(Ordering::SeqCst);

        assert_eq!(ce.fetch_levels("QQQ", 15).await.len(), 2);
        assert_eq!(ce.fetch_prints("QQQ", 0, 15).await.len(), 1);
        ce.fetch_levels("QQQ", 15).await;
        ce.fetch_prints("QQQ", 0, 15).await;
        assert_eq!(calls(), 2);

        tokio::time::sleep(Duration::from_millis(80)).await;
        ce.fetch_levels("QQQ", 15).await;
        ce.fetch_prints("QQQ", 0, 15).await;
        assert_eq!(calls(), 3);

        tokio::time::sleep(Duration::from_millis(100)).await;
        ce.fetch_prints("QQQ", 0, 15).await;
        assert_eq!(calls(), 4);
    }

    #[tokio::test]
    async fn empty_results_are_not_cached() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            missing_first: false,
        });
        let ce = ChartExchange::new(fetcher.clone());

        // no print reaches the minimum size
        assert!(ce.fetch_prints("QQQ", 1_000_000, 15).await.is_empty());
        assert!(ce.fetch_prints("QQQ", 1_000_000, 15).await.is_empty());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::Result;
use regex::{Regex, RegexBuilder};
use reqwest::{
    Client, Url,
    cookie::{CookieStore, Jar},
    header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER},
};
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::{GammaRegime, KeyLevels, StrikeGex, find_key_levels};
use crate::http::BROWSER_USER_AGENT;

const BARCHART_BASE: &str = "https://www.barchart.com";
const BARCHART_API_PATH: &str = "/proxies/core-api/v1/options/get";
const API_FIELDS: &str = "symbol,strikePrice,optionType,baseLastPrice,dailyGamma,gamma,dailyOpenInterest,openInterest,daysToExpiration,expirationDate";

const ETF_TICKERS: &[&str] = &[
    "QQQ", "SPY", "IWM", "DIA", "GLD", "SLV", "TLT", "XLF", "XLE", "VOO",
];

/// Levels scraped from Barchart. `spot` may be missing when the page text
/// carries the levels but no quote.
#[derive(Debug, Clone)]
pub struct BarchartLevels {
    pub spot: Option<f64>,
    pub levels: KeyLevels,
    pub strikes: Vec<StrikeGex>,
}

/// Cookie-session client for the Barchart gamma exposure page and its
/// internal options API.
pub struct BarchartClient {
    client: Client,
    jar: Arc<Jar>,
    base: String,
}

impl BarchartClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base(BARCHART_BASE, timeout)
    }

    pub fn with_base(base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .cookie_provider(Arc::clone(&jar))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            jar,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    fn page_url(&self, ticker: &str) -> String {
        let asset_type = if ETF_TICKERS.contains(&ticker) {
            "etfs-funds"
        } else {
            "stocks"
        };
        format!("{}/{asset_type}/quotes/{ticker}/gamma-exposure", self.base)
    }

    /// Page text first, internal API second. `Ok(None)` when neither yields levels.
    #[instrument(name = "barchart_levels", skip(self))]
    pub async fn fetch_levels(&self, ticker: &str) -> Result<Option<BarchartLevels>> {
        let ticker = ticker.to_uppercase();
        let page_url = self.page_url(&ticker);

        let page = self
            .client
            .get(&page_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        info!(chars = page.len(), "page loaded");

        let (mut levels, spot) = parse_page_levels(&ticker, &page);

        if levels.gamma_flip.is_some() {
            levels.source = "barchart".to_string();
            return Ok(Some(BarchartLevels {
                spot,
                levels,
                strikes: Vec::new(),
            }));
        }

        info!("page text incomplete, trying API");
        match self.fetch_via_api(&ticker, &page_url).await {
            Ok(Some(api)) => return Ok(Some(api)),
            Ok(None) => {}
            Err(e) => warn!(error = ?e, "barchart API failed"),
        }

        if levels.is_empty() {
            warn!("all barchart methods failed");
            return Ok(None);
        }

        levels.source = "barchart-partial".to_string();
        Ok(Some(BarchartLevels {
            spot,
            levels,
            strikes: Vec::new(),
        }))
    }

    fn xsrf_token(&self) -> Option<String> {
        let url = Url::parse(&self.base).ok()?;
        let cookies = self.jar.cookies(&url)?;
        let cookies = cookies.to_str().ok()?;

        cookies.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == "XSRF-TOKEN").then(|| percent_decode(value))
        })
    }

    async fn fetch_via_api(&self, ticker: &str, referer: &str) -> Result<Option<BarchartLevels>> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(REFERER, HeaderValue::from_str(referer)?);
        if let Some(token) = self.xsrf_token() {
            headers.insert("x-xsrf-token", HeaderValue::from_str(&token)?);
        }

        let resp = self
            .client
            .get(format!("{}{BARCHART_API_PATH}", self.base))
            .headers(headers)
            .query(&[
                ("symbols", ticker),
                ("raw", "1"),
                ("fields", API_FIELDS),
                ("groupBy", "strikePrice"),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "barchart API rejected request");
            return Ok(None);
        }

        let body: Value = resp.json().await?;
        let records = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if records.is_empty() {
            warn!("barchart API returned no data");
            return Ok(None);
        }

        info!(records = records.len(), "barchart API data received");
        Ok(levels_from_api(&records))
    }
}

fn percent_decode(value: &str) -> String {
    url::form_urlencoded::parse(format!("v={value}").as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| value.to_string())
}

fn ticker_regex(ticker: &str, tail: &str) -> Option<Regex> {
    RegexBuilder::new(&format!(r"{}\s+{tail}\s+is\s+(\d+\.?\d*)", regex::escape(ticker)))
        .case_insensitive(true)
        .build()
        .ok()
}

fn capture_f64(re: Option<Regex>, text: &str) -> Option<f64> {
    re?.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Reads "`T` gamma flip point is X", "`T` put wall is X", "`T` call wall is X"
/// and the last price from the rendered page.
pub fn parse_page_levels(ticker: &str, page: &str) -> (KeyLevels, Option<f64>) {
    let mut levels = KeyLevels {
        gamma_flip: capture_f64(ticker_regex(ticker, r"gamma\s+flip\s+point"), page),
        put_wall: capture_f64(ticker_regex(ticker, r"put\s+wall"), page),
        call_wall: capture_f64(ticker_regex(ticker, r"call\s+wall"), page),
        ..Default::default()
    };

    let spot = RegexBuilder::new(r"Last\s*Price[:\s]*\$?(\d+\.?\d*)")
        .case_insensitive(true)
        .build()
        .ok()
        .and_then(|re| capture_f64(Some(re), page))
        .or_else(|| capture_f64(Regex::new(r#""lastPrice":\s*(\d+\.?\d*)"#).ok(), page));

    if let (Some(spot), Some(flip)) = (spot, levels.gamma_flip) {
        levels.regime = Some(GammaRegime::from_flip(spot, flip));
    }

    (levels, spot)
}

fn field_f64(raw: &Value, keys: &[&str]) -> f64 {
    keys.iter()
        .filter_map(|k| match raw.get(*k)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.replace(',', "").parse().ok(),
            _ => None,
        })
        .find(|v| *v != 0.0)
        .unwrap_or(0.0)
}

/// GEX = gamma × OI × 100 × spot² × 0.01 over all contracts of the API payload.
fn levels_from_api(records: &[Value]) -> Option<BarchartLevels> {
    let raws: Vec<&Value> = records.iter().map(|r| r.get("raw").unwrap_or(r)).collect();

    let spot = raws
        .iter()
        .map(|raw| field_f64(raw, &["baseLastPrice", "baseDailyLastPrice"]))
        .filter(|p| *p > 0.0)
        .last()?;

    let mut by_strike: BTreeMap<i64, StrikeGex> = BTreeMap::new();

    for raw in raws {
        let strike = field_f64(raw, &["strikePrice"]);
        let gamma = field_f64(raw, &["dailyGamma", "gamma"]);
        let oi = field_f64(raw, &["dailyOpenInterest", "openInterest"]);
        let is_call = raw
            .get("optionType")
            .and_then(Value::as_str)
            .is_some_and(|t| t.to_lowercase().contains("call"));

        if strike <= 0.0 || gamma <= 0.0 || oi <= 0.0 {
            continue;
        }

        let gex = gamma * oi.trunc() * 100.0 * spot * spot * 0.01;
        let entry = by_strike
            .entry((strike * 1000.0).round() as i64)
            .or_insert_with(|| StrikeGex {
                strike,
                call_gex: 0.0,
                put_gex: 0.0,
                net_gex: 0.0,
                total_oi: 0,
                total_volume: 0,
            });

        if is_call {
            entry.call_gex += gex;
            entry.net_gex += gex;
        } else {
            entry.put_gex -= gex;
            entry.net_gex -= gex;
        }
        entry.total_oi += oi as u64;
    }

    if by_strike.is_empty() {
        warn!("barchart API: insufficient data");
        return None;
    }

    let strikes: Vec<StrikeGex> = by_strike.into_values().collect();
    let mut levels = find_key_levels(spot, &strikes);
    levels.source = "barchart-api".to_string();

    Some(BarchartLevels {
        spot: Some(spot),
        levels,
        strikes,
    })
}

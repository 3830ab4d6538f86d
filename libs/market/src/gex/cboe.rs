use std::{
    collections::BTreeMap,
    sync::LazyLock,
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{OptionContract, OptionKind};
use crate::http::browser_client;

const DEFAULT_BASE_API: &str = "https://cdn.cboe.com/api/global/delayed_quotes/options";

/// Strikes further than this fraction from spot are ignored.
pub const STRIKE_RANGE_PCT: f64 = 0.20;

const FALLBACK_IV: f64 = 0.20;

static OPTION_SYMBOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{6})([CP])(\d{8})$").expect("valid regex"));

#[derive(Clone)]
pub struct CboeClient {
    client: Client,
    base_api: String,
}

impl CboeClient {
    pub fn new(base_api: String) -> Result<Self> {
        let client = browser_client(Duration::from_secs(30))?;
        Ok(Self { client, base_api })
    }

    /// CBOE_API_BASE_URL overrides the public delayed quotes endpoint.
    pub fn from_env() -> Result<Self> {
        let base_api =
            std::env::var("CBOE_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_API.to_string());
        Self::new(base_api)
    }

    fn chain_url(&self, ticker: &str) -> String {
        format!(
            "{}/{}.json",
            self.base_api.trim_end_matches('/'),
            ticker.to_uppercase()
        )
    }

    pub async fn fetch_chain(&self, ticker: &str) -> Result<OptionChain> {
        let res: ChainResponse = self
            .client
            .get(self.chain_url(ticker))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("decode CBOE chain for {ticker}"))?;

        let spot = res
            .data
            .spot()
            .with_context(|| format!("CBOE: no spot price for {ticker}"))?;

        info!(ticker, spot, contracts = res.data.options.len(), "CBOE chain fetched");

        Ok(OptionChain {
            spot,
            options: res.data.options,
        })
    }

    /// Raw connectivity check: HTTP status, payload size, spot and contract count.
    pub async fn probe(&self, ticker: &str) -> Result<ChainProbe> {
        let resp = self.client.get(self.chain_url(ticker)).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;

        let (spot, contracts) = match serde_json::from_str::<ChainResponse>(&body) {
            Ok(res) => (res.data.close, res.data.options.len()),
            Err(_) => (None, 0),
        };

        Ok(ChainProbe {
            status,
            bytes: body.len(),
            spot,
            contracts,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChainProbe {
    pub status: u16,
    pub bytes: usize,
    pub spot: Option<f64>,
    pub contracts: usize,
}

#[derive(Debug, Clone)]
pub struct OptionChain {
    pub spot: f64,
    pub options: Vec<RawOption>,
}

#[derive(Debug, Deserialize)]
struct ChainResponse {
    #[serde(default)]
    data: ChainData,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ChainData {
    pub current_price: Option<f64>,
    pub close: Option<f64>,
    pub last_trade_price: Option<f64>,
    pub prev_day_close: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    #[serde(default)]
    pub options: Vec<RawOption>,
}

impl ChainData {
    /// First positive of current price, close, last trade, previous close, bid, ask.
    pub fn spot(&self) -> Option<f64> {
        [
            self.current_price,
            self.close,
            self.last_trade_price,
            self.prev_day_close,
            self.bid,
            self.ask,
        ]
        .into_iter()
        .flatten()
        .find(|v| *v > 0.0)
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct RawOption {
    #[serde(default)]
    pub option: String,
    pub open_interest: Option<f64>,
    pub volume: Option<f64>,
    pub iv: Option<f64>,
    pub gamma: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

/// Splits an OCC style symbol (`QQQ250117C00500000`) into expiry, kind and strike.
pub fn parse_option_symbol(symbol: &str) -> Option<(NaiveDate, OptionKind, f64)> {
    let caps = OPTION_SYMBOL.captures(symbol)?;

    let expiration = NaiveDate::parse_from_str(&caps[1], "%y%m%d").ok()?;
    let kind = if &caps[2] == "C" {
        OptionKind::Call
    } else {
        OptionKind::Put
    };
    let strike = caps[3].parse::<u64>().ok()? as f64 / 1000.0;

    Some((expiration, kind, strike))
}

/// Filters the raw chain down to contracts usable for gamma calculation.
pub fn parse_options(spot: f64, options: &[RawOption], now: NaiveDateTime) -> Vec<OptionContract> {
    let mut skipped: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut contracts = Vec::with_capacity(options.len());

    for opt in options {
        let Some((expiration, kind, strike)) = parse_option_symbol(&opt.option) else {
            *skipped.entry("no_symbol").or_default() += 1;
            continue;
        };

        if strike <= 0.0 {
            *skipped.entry("no_strike").or_default() += 1;
            continue;
        }

        if (strike - spot).abs() / spot > STRIKE_RANGE_PCT {
            *skipped.entry("out_of_range").or_default() += 1;
            continue;
        }

        // Whole days, floored: contracts expiring today already count as expired.
        let until_expiry = expiration.and_time(chrono::NaiveTime::MIN) - now;
        let dte = until_expiry.num_seconds().div_euclid(86_400);
        if dte < 0 {
            *skipped.entry("expired").or_default() += 1;
            continue;
        }

        let bid = opt.bid.unwrap_or(0.0);
        let ask = opt.ask.unwrap_or(0.0);
        let mut iv = opt.iv.unwrap_or(0.0);
        if iv <= 0.0 {
            if bid <= 0.0 && ask <= 0.0 {
                *skipped.entry("no_iv").or_default() += 1;
                continue;
            }
            iv = FALLBACK_IV;
        }

        contracts.push(OptionContract {
            strike,
            kind,
            expiration,
            dte,
            t: (dte as f64 / 365.0).max(1.0 / 365.0),
            open_interest: opt.open_interest.unwrap_or(0.0).max(0.0) as u64,
            volume: opt.volume.unwrap_or(0.0).max(0.0) as u64,
            iv,
            gamma: opt.gamma.unwrap_or(0.0),
            bid,
            ask,
        });
    }

    debug!(parsed = contracts.len(), ?skipped, "CBOE contracts parsed");
    contracts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(symbol: &str, iv: f64, bid: f64) -> RawOption {
        RawOption {
            option: symbol.to_string(),
            open_interest: Some(1200.0),
            volume: Some(300.0),
            iv: Some(iv),
            gamma: Some(0.0),
            bid: Some(bid),
            ask: Some(bid),
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 10)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap()
    }

    #[test]
    fn parses_occ_symbol() {
        let (exp, kind, strike) = parse_option_symbol("QQQ250117C00500000").unwrap();
        assert_eq!(exp, NaiveDate::from_ymd_opt(2025, 1, 17).unwrap());
        assert_eq!(kind, OptionKind::Call);
        assert_eq!(strike, 500.0);

        let (_, kind, strike) = parse_option_symbol("GLD250221P00245500").unwrap();
        assert_eq!(kind, OptionKind::Put);
        assert_eq!(strike, 245.5);

        assert!(parse_option_symbol("QQQ").is_none());
        assert!(parse_option_symbol("QQQ251399C00500000").is_none());
    }

    #[test]
    fn spot_prefers_current_price_then_close() {
        let data = ChainData {
            current_price: None,
            close: Some(0.0),
            last_trade_price: Some(501.2),
            bid: Some(501.0),
            ..Default::default()
        };
        assert_eq!(data.spot(), Some(501.2));

        let data = ChainData {
            current_price: Some(499.0),
            close: Some(498.0),
            ..Default::default()
        };
        assert_eq!(data.spot(), Some(499.0));
        assert_eq!(ChainData::default().spot(), None);
    }

    #[test]
    fn filters_contracts() {
        let options = vec![
            raw("QQQ250117C00500000", 0.18, 2.0),
            // 30% above spot
            raw("QQQ250117C00650000", 0.18, 2.0),
            // expires today
            raw("QQQ250110P00500000", 0.18, 2.0),
            // no IV and no quote
            raw("QQQ250117P00490000", 0.0, 0.0),
            // no IV but quoted
            raw("QQQ250117P00495000", 0.0, 1.5),
            raw("garbage", 0.2, 1.0),
        ];

        let contracts = parse_options(500.0, &options, now());
        assert_eq!(contracts.len(), 2);

        let first = &contracts[0];
        assert_eq!(first.dte, 6);
        assert!((first.t - 6.0 / 365.0).abs() < 1e-12);
        assert_eq!(first.open_interest, 1200);

        let fallback = &contracts[1];
        assert_eq!(fallback.kind, OptionKind::Put);
        assert_eq!(fallback.iv, 0.20);
    }

    #[test]
    fn next_day_expiry_has_minimum_time() {
        let options = vec![raw("QQQ250111C00500000", 0.2, 1.0)];
        let contracts = parse_options(500.0, &options, now());
        assert_eq!(contracts[0].dte, 0);
        assert!((contracts[0].t - 1.0 / 365.0).abs() < 1e-12);
    }

    #[test]
    fn decodes_chain_json() {
        let json = r#"{"data":{"close":501.5,"options":[{"option":"QQQ250117C00500000","open_interest":10,"volume":null,"iv":0.2,"gamma":0.01,"bid":1.0,"ask":1.1}]}}"#;
        let res: ChainResponse = serde_json::from_str(json).unwrap();
        assert_eq!(res.data.spot(), Some(501.5));
        assert_eq!(res.data.options.len(), 1);
        assert_eq!(res.data.options[0].volume, None);
    }
}

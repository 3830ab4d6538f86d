mod barchart;
mod calculator;
mod cboe;

use std::{str::FromStr, time::Duration};

use anyhow::{Error, Result, bail, ensure};
use chrono::{Local, NaiveDate};
use tracing::{info, instrument, warn};

pub use barchart::{BarchartClient, BarchartLevels, parse_page_levels};
pub use calculator::{
    DIVIDEND_YIELD, MAX_EXPIRATIONS, RISK_FREE_RATE, bs_gamma, calculate_gex, find_key_levels,
    gamma_flip,
};
pub use cboe::{
    CboeClient, ChainData, ChainProbe, OptionChain, RawOption, STRIKE_RANGE_PCT,
    parse_option_symbol, parse_options,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Call,
    Put,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionContract {
    pub strike: f64,
    pub kind: OptionKind,
    pub expiration: NaiveDate,
    pub dte: i64,
    /// Time to expiry in years, floored at one day.
    pub t: f64,
    pub open_interest: u64,
    pub volume: u64,
    pub iv: f64,
    /// Provider gamma, zero when the feed has none.
    pub gamma: f64,
    pub bid: f64,
    pub ask: f64,
}

/// Dealer gamma exposure aggregated for one strike. Put GEX is stored negative.
#[derive(Debug, Clone, PartialEq)]
pub struct StrikeGex {
    pub strike: f64,
    pub call_gex: f64,
    pub put_gex: f64,
    pub net_gex: f64,
    pub total_oi: u64,
    pub total_volume: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GammaRegime {
    Positive,
    Negative,
}

impl GammaRegime {
    pub fn from_flip(spot: f64, flip: f64) -> Self {
        if spot > flip {
            GammaRegime::Positive
        } else {
            GammaRegime::Negative
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GammaRegime::Positive => "Positiv",
            GammaRegime::Negative => "Negativ",
        }
    }

    /// Regime encoded for OHLCV-style exports.
    pub fn as_signal(regime: Option<GammaRegime>) -> i8 {
        match regime {
            Some(GammaRegime::Positive) => 1,
            Some(GammaRegime::Negative) => -1,
            None => 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyLevels {
    pub call_wall: Option<f64>,
    pub put_wall: Option<f64>,
    pub gamma_flip: Option<f64>,
    pub regime: Option<GammaRegime>,
    pub hvl: Option<f64>,
    pub abs_gamma_strike: Option<f64>,
    pub source: String,
}

impl KeyLevels {
    pub fn is_empty(&self) -> bool {
        self.call_wall.is_none()
            && self.put_wall.is_none()
            && self.gamma_flip.is_none()
            && self.hvl.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct GexReport {
    pub ticker: String,
    pub spot: f64,
    pub levels: KeyLevels,
    pub strikes: Vec<StrikeGex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GexSource {
    #[default]
    Cboe,
    Barchart,
}

impl FromStr for GexSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cboe" => Ok(GexSource::Cboe),
            "barchart" => Ok(GexSource::Barchart),
            other => bail!("unknown GEX source: {other}"),
        }
    }
}

pub struct GexService {
    cboe: CboeClient,
    barchart: Option<BarchartClient>,
}

impl GexService {
    pub fn new(cboe: CboeClient, barchart: Option<BarchartClient>) -> Self {
        Self { cboe, barchart }
    }

    /// Expects GEX_SOURCE to be `cboe` (default) or `barchart`.
    pub fn from_env() -> Result<Self> {
        let source: GexSource = match std::env::var("GEX_SOURCE") {
            Ok(v) => v.parse()?,
            Err(_) => GexSource::default(),
        };

        let barchart = match source {
            GexSource::Barchart => Some(BarchartClient::new(Duration::from_secs(30))?),
            GexSource::Cboe => None,
        };

        Ok(Self::new(CboeClient::from_env()?, barchart))
    }

    pub fn cboe(&self) -> &CboeClient {
        &self.cboe
    }

    #[instrument(name = "gex_run", skip(self))]
    pub async fn run(&self, ticker: &str) -> Result<GexReport> {
        if let Some(barchart) = &self.barchart {
            match barchart.fetch_levels(ticker).await {
                Ok(Some(BarchartLevels {
                    spot: Some(spot),
                    levels,
                    strikes,
                })) => {
                    info!(source = %levels.source, "barchart levels used");
                    return Ok(GexReport {
                        ticker: ticker.to_string(),
                        spot,
                        levels,
                        strikes,
                    });
                }
                Ok(_) => warn!("barchart returned no usable levels, falling back to cboe"),
                Err(e) => warn!(error = ?e, "barchart failed, falling back to cboe"),
            }
        }

        self.run_cboe(ticker).await
    }

    async fn run_cboe(&self, ticker: &str) -> Result<GexReport> {
        let chain = self.cboe.fetch_chain(ticker).await?;
        ensure!(!chain.options.is_empty(), "CBOE: no options data for {ticker}");

        let contracts = parse_options(chain.spot, &chain.options, Local::now().naive_local());
        ensure!(!contracts.is_empty(), "CBOE: no usable contracts for {ticker}");

        let strikes = calculate_gex(chain.spot, &contracts);
        let mut levels = find_key_levels(chain.spot, &strikes);
        levels.source = "cboe".to_string();

        info!(
            gamma_flip = ?levels.gamma_flip,
            call_wall = ?levels.call_wall,
            put_wall = ?levels.put_wall,
            hvl = ?levels.hvl,
            "cboe levels calculated"
        );

        Ok(GexReport {
            ticker: ticker.to_string(),
            spot: chain.spot,
            levels,
            strikes,
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, http::StatusCode, routing::get};
    use chrono::Days;
    use serde_json::{Value, json};

    use super::*;
    use crate::testing::serve;

    fn chain() -> Value {
        let expiry = (Local::now().date_naive() + Days::new(30)).format("%y%m%d");
        json!({
            "data": {
                "current_price": 600.0,
                "options": [
                    {"option": format!("QQQ{expiry}C00610000"), "open_interest": 5000.0,
                     "volume": 900.0, "iv": 0.2, "gamma": 0.02, "bid": 1.0, "ask": 1.1},
                    {"option": format!("QQQ{expiry}P00590000"), "open_interest": 6000.0,
                     "volume": 400.0, "iv": 0.2, "gamma": 0.02, "bid": 1.0, "ask": 1.1},
                ]
            }
        })
    }

    async fn service(barchart_status: StatusCode) -> GexService {
        let app = Router::new()
            .route(
                "/etfs-funds/quotes/QQQ/gamma-exposure",
                get(move || async move { (barchart_status, "<html>maintenance</html>") }),
            )
            .route("/QQQ.json", get(|| async { Json(chain()) }));
        let base = serve(app).await;

        GexService::new(
            CboeClient::new(base.clone()).unwrap(),
            Some(BarchartClient::with_base(base, Duration::from_secs(5)).unwrap()),
        )
    }

    #[tokio::test]
    async fn falls_back_to_cboe_when_barchart_fails() {
        let report = service(StatusCode::INTERNAL_SERVER_ERROR)
            .await
            .run("QQQ")
            .await
            .unwrap();

        assert_eq!(report.levels.source, "cboe");
        assert_eq!(report.spot, 600.0);
        assert_eq!(report.levels.call_wall, Some(610.0));
        assert_eq!(report.levels.put_wall, Some(590.0));
        assert_eq!(report.levels.hvl, Some(610.0));
        assert_eq!(report.strikes.len(), 2);
    }

    #[tokio::test]
    async fn falls_back_when_barchart_page_has_no_levels() {
        // The page loads but carries no levels and the options API is missing.
        let report = service(StatusCode::OK).await.run("QQQ").await.unwrap();
        assert_eq!(report.levels.source, "cboe");
    }

    #[tokio::test]
    async fn missing_chain_is_an_error() {
        let base = serve(Router::new()).await;
        let gex = GexService::new(CboeClient::new(base).unwrap(), None);
        assert!(gex.run("QQQ").await.is_err());
    }

    #[test]
    fn parses_gex_source() {
        assert_eq!("CBOE".parse::<GexSource>().unwrap(), GexSource::Cboe);
        assert_eq!(" barchart ".parse::<GexSource>().unwrap(), GexSource::Barchart);
        assert!("yahoo".parse::<GexSource>().is_err());
    }

    #[test]
    fn regime_relative_to_flip() {
        assert_eq!(GammaRegime::from_flip(101.0, 100.0), GammaRegime::Positive);
        assert_eq!(GammaRegime::from_flip(100.0, 100.0), GammaRegime::Negative);
        assert_eq!(GammaRegime::as_signal(None), 0);
        assert_eq!(GammaRegime::as_signal(Some(GammaRegime::Negative)), -1);
    }
}

use std::time::Duration;

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Weekday};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::http::browser_client;

const DEFAULT_BASE_URL: &str = "https://cdn.finra.org/equity/regsho/daily";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinraShortVolume {
    pub date: NaiveDate,
    pub short_volume: u64,
    pub total_volume: u64,
    /// Percent, rounded to one decimal.
    pub short_percent: f64,
}

/// Weekdays one to four days before `today`, most recent first.
pub fn candidate_dates(today: NaiveDate) -> Vec<NaiveDate> {
    (1..=4)
        .filter_map(|back| today.checked_sub_days(chrono::Days::new(back)))
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

fn volume_field(field: &str) -> u64 {
    field.trim().parse::<f64>().map(|v| v.max(0.0) as u64).unwrap_or(0)
}

/// Finds `ticker` in a pipe-separated RegSHO daily file
/// (`Date|Symbol|ShortVolume|ShortExemptVolume|TotalVolume|Market`).
pub fn parse_short_volume(text: &str, ticker: &str, date: NaiveDate) -> Option<FinraShortVolume> {
    text.lines().find_map(|line| {
        let parts: Vec<&str> = line.trim().split('|').collect();
        if parts.len() < 5 || !parts[1].eq_ignore_ascii_case(ticker) {
            return None;
        }

        let short_volume = volume_field(parts[2]);
        let total_volume = volume_field(parts[4]);
        let pct = if total_volume > 0 {
            short_volume as f64 / total_volume as f64 * 100.0
        } else {
            0.0
        };

        Some(FinraShortVolume {
            date,
            short_volume,
            total_volume,
            short_percent: (pct * 10.0).round() / 10.0,
        })
    })
}

pub struct FinraClient {
    client: Client,
    base_url: String,
}

impl FinraClient {
    pub fn new(base_url: String) -> Result<Self> {
        Ok(Self {
            client: browser_client(Duration::from_secs(15))?,
            base_url,
        })
    }

    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("FINRA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }

    /// Latest published short volume for `ticker`. Missing days and request
    /// failures move on to the previous weekday.
    #[instrument(name = "finra_short_volume", skip(self))]
    pub async fn fetch_short_volume(
        &self,
        ticker: &str,
        today: NaiveDate,
    ) -> Option<FinraShortVolume> {
        for date in candidate_dates(today) {
            let url = format!(
                "{}/CNMSshvol{}.txt",
                self.base_url.trim_end_matches('/'),
                date.format("%Y%m%d")
            );

            let text = match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.text().await {
                    Ok(t) => t,
                    Err(e) => {
                        debug!(%date, error = ?e, "finra body read failed");
                        continue;
                    }
                },
                Ok(resp) => {
                    debug!(%date, status = %resp.status(), "finra file unavailable");
                    continue;
                }
                Err(e) => {
                    debug!(%date, error = ?e, "finra request failed");
                    continue;
                }
            };

            if let Some(found) = parse_short_volume(&text, ticker, date) {
                info!(
                    %date,
                    short = found.short_volume,
                    total = found.total_volume,
                    pct = found.short_percent,
                    "finra short volume"
                );
                return Some(found);
            }
        }

        None
    }
}

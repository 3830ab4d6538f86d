//! Publishes GEX levels as a TradingView seed CSV.
//!
//! `request.seed()` only reads OHLCV files, so the levels are packed into the
//! price columns: open = gamma flip, high = call wall, low = put wall,
//! close = HVL, volume = regime (1 / -1 / 0).

use std::time::Duration;

use anyhow::{Context, Result, ensure};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use reqwest::{
    Client, StatusCode,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::gex::{GammaRegime, KeyLevels};

const GITHUB_API: &str = "https://api.github.com";
const REPO_NAME: &str = "pine_seeds";
pub const CSV_HEADER: &str = "time,open,high,low,close,volume";
/// Rows carried over from the existing file; the new row makes it 30.
pub const KEEP_ROWS: usize = 29;

pub fn csv_row(at: DateTime<Utc>, levels: &KeyLevels) -> String {
    format!(
        "{},{},{},{},{},{}",
        at.timestamp(),
        levels.gamma_flip.unwrap_or(0.0),
        levels.call_wall.unwrap_or(0.0),
        levels.put_wall.unwrap_or(0.0),
        levels.hvl.unwrap_or(0.0),
        GammaRegime::as_signal(levels.regime),
    )
}

/// Appends `row` to the data rows of `existing`, keeping the newest ones.
pub fn build_csv(existing: Option<&str>, row: &str) -> String {
    let mut rows: Vec<&str> = existing
        .map(|text| {
            text.trim()
                .lines()
                .skip(1)
                .filter(|l| !l.trim().is_empty())
                .collect()
        })
        .unwrap_or_default();

    let skip = rows.len().saturating_sub(KEEP_ROWS);
    rows.drain(..skip);
    rows.push(row);

    format!("{CSV_HEADER}\n{}\n", rows.join("\n"))
}

#[derive(Debug, Deserialize)]
struct ContentFile {
    sha: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct PutContent<'a> {
    message: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

pub struct PineSeeds {
    client: Client,
    username: String,
}

impl PineSeeds {
    pub fn new(token: &str, username: String) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("token {token}"))?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github.v3+json"));

        let client = Client::builder()
            .user_agent("BullNet-Bot")
            .default_headers(headers)
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self { client, username })
    }

    /// `None` unless both GITHUB_TOKEN and GITHUB_USERNAME are set.
    pub fn from_env() -> Result<Option<Self>> {
        let token = std::env::var("GITHUB_TOKEN").unwrap_or_default();
        let username = std::env::var("GITHUB_USERNAME").unwrap_or_default();

        if token.is_empty() || username.is_empty() {
            return Ok(None);
        }
        Self::new(&token, username).map(Some)
    }

    fn file_url(&self, ticker: &str) -> String {
        format!(
            "{GITHUB_API}/repos/{}/{REPO_NAME}/contents/data/{}_gex.csv",
            self.username,
            ticker.to_uppercase()
        )
    }

    #[instrument(name = "pine_seeds_push", skip(self, levels), fields(source = %levels.source))]
    pub async fn push(&self, ticker: &str, levels: &KeyLevels) -> Result<()> {
        ensure!(!levels.is_empty(), "no levels to push");

        let url = self.file_url(ticker);
        let resp = self.client.get(&url).send().await?;

        let existing = match resp.status() {
            StatusCode::NOT_FOUND => None,
            _ => {
                let file: ContentFile = resp.error_for_status()?.json().await?;
                let packed: String = file.content.split_whitespace().collect();
                let bytes = STANDARD.decode(packed).context("decode seed file")?;
                Some((file.sha, String::from_utf8(bytes)?))
            }
        };

        let now = Utc::now();
        let csv = build_csv(
            existing.as_ref().map(|(_, text)| text.as_str()),
            &csv_row(now, levels),
        );

        let body = PutContent {
            message: format!(
                "GEX update {ticker} {} UTC | GF:{:?} CW:{:?} PW:{:?} | {}",
                now.format("%Y-%m-%d %H:%M"),
                levels.gamma_flip,
                levels.call_wall,
                levels.put_wall,
                levels.source
            ),
            content: STANDARD.encode(csv),
            sha: existing.as_ref().map(|(sha, _)| sha.as_str()),
        };

        self.client
            .put(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        info!(ticker, "seed file pushed");
        Ok(())
    }
}

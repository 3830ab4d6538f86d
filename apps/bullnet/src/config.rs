use std::env::var;

use anyhow::{Context, Result};
use chrono_tz::Tz;

use crate::Ratios;

#[derive(Clone)]
pub struct Config {
    /// Without a token the bot prints one report to stdout and exits.
    pub discord_token: Option<String>,
    /// Scheduled reports go here; 0 disables them.
    pub channel_id: u64,
    pub schedule_enabled: bool,
    pub version: String,
    pub timezone: Tz,
    pub ratios: Ratios,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parse_f64 = |key: &str, default: f64| -> Result<f64> {
            match get(key) {
                Some(v) => v.trim().parse().with_context(|| format!("{key} must be a number")),
                None => Ok(default),
            }
        };

        let channel_id = match get("DISCORD_CHANNEL_ID") {
            Some(v) if !v.trim().is_empty() => v
                .trim()
                .parse()
                .context("DISCORD_CHANNEL_ID must be a numeric channel id")?,
            _ => 0,
        };

        let timezone = match get("REPORT_TIMEZONE") {
            Some(v) => v
                .parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("REPORT_TIMEZONE: {e}"))?,
            None => chrono_tz::Europe::Berlin,
        };

        Ok(Self {
            discord_token: get("DISCORD_TOKEN").filter(|t| !t.trim().is_empty()),
            channel_id,
            schedule_enabled: get("SCHEDULE_ENABLED")
                .is_none_or(|v| v.trim().eq_ignore_ascii_case("true")),
            version: get("APP_VERSION").unwrap_or_else(|| "Unknown".to_string()),
            timezone,
            ratios: Ratios {
                nasdaq: parse_f64("QQQ_CFD_RATIO", 41.33)?,
                gold: parse_f64("GLD_XAUUSD_RATIO", 10.97)?,
            },
        })
    }

    pub fn schedule_active(&self) -> bool {
        self.schedule_enabled && self.channel_id > 0
    }
}

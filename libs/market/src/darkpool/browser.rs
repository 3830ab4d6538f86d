use std::{ffi::OsStr, path::PathBuf, thread::sleep, time::Duration};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::table::{Table, TableFetcher, is_not_found_title};
use crate::http::BROWSER_USER_AGENT;

const TABLE_SELECTOR: &str = "table tbody tr";

const EXTRACT_TABLES_JS: &str = r#"(() => JSON.stringify(
    Array.from(document.querySelectorAll('table')).map(table => ({
        headers: Array.from(table.querySelectorAll('thead th')).map(h => h.textContent.trim()),
        rows: Array.from(table.querySelectorAll('tbody tr')).map(tr =>
            Array.from(tr.querySelectorAll('td')).map(td => td.textContent.trim()))
    }))
))()"#;

/// Headless Chromium over the DevTools protocol. Reads tables after the
/// page's scripts have rendered them.
pub struct BrowserTableFetcher {
    chrome_bin: Option<PathBuf>,
    wait: Duration,
}

impl BrowserTableFetcher {
    pub fn new(chrome_bin: Option<PathBuf>, wait: Duration) -> Self {
        Self { chrome_bin, wait }
    }

    /// CHROME_BIN points at the browser binary; unset lets the driver search.
    pub fn from_env() -> Self {
        let chrome_bin = std::env::var("CHROME_BIN").ok().map(PathBuf::from);
        Self::new(chrome_bin, Duration::from_secs(20))
    }

    fn fetch_blocking(
        chrome_bin: Option<PathBuf>,
        wait: Duration,
        url: &str,
    ) -> Result<Option<Vec<Table>>> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .window_size(Some((1920, 1080)))
            .path(chrome_bin)
            .args(vec![
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-background-networking"),
                OsStr::new("--no-first-run"),
            ])
            .build()
            .map_err(|e| anyhow!("browser launch options: {e}"))?;

        let browser = Browser::new(options)?;
        let tab = browser.new_tab()?;
        tab.set_default_timeout(Duration::from_secs(45));
        tab.set_user_agent(BROWSER_USER_AGENT, None, None)?;

        info!(url, "browser navigating");
        tab.navigate_to(url)?;
        tab.wait_until_navigated()?;

        let title = tab.get_title()?;
        debug!(url, title = %title, "page title");
        if is_not_found_title(&title) {
            return Ok(None);
        }

        if let Err(e) = tab.wait_for_element_with_custom_timeout(TABLE_SELECTOR, wait) {
            warn!(url, error = ?e, "no table rendered");
            return Ok(Some(Vec::new()));
        }

        // Let late DataTables redraws settle.
        sleep(Duration::from_secs(2));

        let result = tab.evaluate(EXTRACT_TABLES_JS, false)?;
        let tables = match result.value {
            Some(Value::String(json)) => serde_json::from_str::<Vec<Table>>(&json)?,
            _ => Vec::new(),
        };

        info!(url, tables = tables.len(), "browser tables extracted");
        Ok(Some(tables))
    }
}

#[async_trait]
impl TableFetcher for BrowserTableFetcher {
    async fn fetch_tables(&self, url: &str) -> Result<Option<Vec<Table>>> {
        let chrome_bin = self.chrome_bin.clone();
        let wait = self.wait;
        let url = url.to_string();

        tokio::task::spawn_blocking(move || Self::fetch_blocking(chrome_bin, wait, &url)).await?
    }
}

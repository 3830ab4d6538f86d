use std::{sync::LazyLock, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::http::browser_client;

static TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<table\b.*?</table>").expect("valid regex"));
static THEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<thead\b.*?</thead>").expect("valid regex"));
static TBODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tbody\b.*?</tbody>").expect("valid regex"));
static TH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<th\b[^>]*>(.*?)</th>").expect("valid regex"));
static TR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").expect("valid regex"));
static TD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td\b[^>]*>(.*?)</td>").expect("valid regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));

/// Text content of one rendered HTML table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Index of the header equal to `name`, case-insensitive.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    }

    pub fn has_columns(&self, names: &[&str]) -> bool {
        names.iter().all(|n| self.column(n).is_some())
    }
}

/// Source of rendered page tables. `Ok(None)` means the page does not exist.
#[async_trait]
pub trait TableFetcher: Send + Sync {
    async fn fetch_tables(&self, url: &str) -> Result<Option<Vec<Table>>>;
}

pub fn is_not_found_title(title: &str) -> bool {
    title.contains("404") || title.to_lowercase().contains("not found")
}

/// Plain HTTP fetch. Only sees tables present in the server-rendered HTML.
pub struct HttpTableFetcher {
    client: Client,
}

impl HttpTableFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: browser_client(timeout)?,
        })
    }
}

#[async_trait]
impl TableFetcher for HttpTableFetcher {
    async fn fetch_tables(&self, url: &str) -> Result<Option<Vec<Table>>> {
        let resp = self.client.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let html = resp.error_for_status()?.text().await?;
        let title = TITLE
            .captures(&html)
            .map(|c| cell_text(&c[1]))
            .unwrap_or_default();
        if is_not_found_title(&title) {
            return Ok(None);
        }

        let tables = parse_html_tables(&html);
        debug!(url, tables = tables.len(), "html tables parsed");
        Ok(Some(tables))
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

fn cell_text(fragment: &str) -> String {
    let stripped = TAG.replace_all(fragment, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn parse_html_tables(html: &str) -> Vec<Table> {
    TABLE
        .find_iter(html)
        .map(|m| {
            let table = m.as_str();

            let header_src = THEAD.find(table).map_or(table, |h| h.as_str());
            let headers = TH
                .captures_iter(header_src)
                .map(|c| cell_text(&c[1]))
                .collect();

            let body_src = TBODY.find(table).map_or(table, |b| b.as_str());
            let rows = TR
                .captures_iter(body_src)
                .map(|tr| {
                    TD.captures_iter(&tr[1])
                        .map(|c| cell_text(&c[1]))
                        .collect::<Vec<_>>()
                })
                .filter(|cells| !cells.is_empty())
                .collect();

            Table { headers, rows }
        })
        .collect()
}

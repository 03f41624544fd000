//! TradingView: rendered indicator values from a page, or the scanner API.

use super::cleaner::{clean_values, format_json_value, normalise_symbol, pad_values};
use super::http_client::HttpClient;
use super::{parsers, resolve_url, QuoteSource};
use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::models::ScrapeTarget;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

// ── Page scrape ───────────────────────────────────────────────────────────────

pub struct TradingViewPage {
    client: HttpClient,
    base_url: String,
    selector: String,
    width: usize,
}

impl TradingViewPage {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: config.tradingview_base_url.clone(),
            selector: config.tradingview_value_selector.clone(),
            width: config.tradingview_value_count,
        })
    }
}

#[async_trait]
impl QuoteSource for TradingViewPage {
    fn name(&self) -> &'static str {
        "tradingview"
    }

    fn width(&self) -> usize {
        self.width
    }

    fn needs_url(&self) -> bool {
        true
    }

    async fn fetch(&self, target: &ScrapeTarget) -> Result<Vec<String>, ScrapeError> {
        let raw_url = target.url.as_deref().ok_or(ScrapeError::MissingUrl)?;
        let url = resolve_url(&self.base_url, raw_url)
            .map_err(|e| ScrapeError::Parse(format!("{:#}", e)))?;

        let html = self.client.get_text(&url).await?;
        let raw = parsers::select_texts(&html, &self.selector)
            .map_err(|e| ScrapeError::Parse(e.to_string()))?;

        let values = clean_values(raw);
        debug!("{}: {} values on page", target.symbol, values.len());

        if values.is_empty() {
            return Err(ScrapeError::NoData(target.symbol.clone()));
        }
        Ok(values)
    }
}

// ── Scanner API ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ScanResponse {
    #[serde(rename = "totalCount", default)]
    pub total_count: usize,
    #[serde(default)]
    pub data: Vec<ScanRow>,
}

#[derive(Debug, Deserialize)]
pub struct ScanRow {
    /// "NSE:RELIANCE"
    pub s: String,
    #[serde(default)]
    pub d: Vec<Value>,
}

pub struct TradingViewScanner {
    client: HttpClient,
    endpoint: String,
    columns: Vec<String>,
}

impl TradingViewScanner {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            endpoint: format!(
                "{}/{}/scan",
                config.scanner_url.trim_end_matches('/'),
                config.scanner_market
            ),
            columns: config.scanner_columns.clone(),
        })
    }
}

/// Scan body for one symbol. "NSE:TCS" is looked up as a ticker, a bare
/// "TCS" through a name filter.
pub fn build_scan_request(columns: &[String], symbol: &str) -> Value {
    let symbol = normalise_symbol(symbol);
    let mut body = json!({
        "columns": columns,
        "options": { "lang": "en" },
        "range": [0, 5],
    });
    if symbol.contains(':') {
        body["symbols"] = json!({ "tickers": [symbol] });
    } else {
        body["filter"] = json!([{ "left": "name", "operation": "equal", "right": symbol }]);
    }
    body
}

/// Exact ticker match first, then the NSE listing, then whatever came back.
pub fn pick_row<'a>(rows: &'a [ScanRow], symbol: &str) -> Option<&'a ScanRow> {
    let symbol = normalise_symbol(symbol);
    let nse = format!("NSE:{}", symbol);
    rows.iter()
        .find(|r| r.s == symbol)
        .or_else(|| rows.iter().find(|r| r.s == nse))
        .or_else(|| rows.first())
}

#[async_trait]
impl QuoteSource for TradingViewScanner {
    fn name(&self) -> &'static str {
        "scanner"
    }

    fn width(&self) -> usize {
        self.columns.len()
    }

    async fn fetch(&self, target: &ScrapeTarget) -> Result<Vec<String>, ScrapeError> {
        let body = build_scan_request(&self.columns, &target.symbol);
        let resp: ScanResponse = self.client.post_json(&self.endpoint, &[], &body).await?;
        debug!("{}: scanner returned {} rows", target.symbol, resp.total_count);

        let row = pick_row(&resp.data, &target.symbol)
            .ok_or_else(|| ScrapeError::NoData(target.symbol.clone()))?;
        let values = row.d.iter().map(format_json_value).collect();
        Ok(pad_values(values, self.columns.len()))
    }
}

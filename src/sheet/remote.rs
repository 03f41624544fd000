//! Read-only stock list served as CSV over HTTP, e.g. a published sheet export.

use super::csv_sheet::parse_grid;
use super::{Grid, RowSource};
use crate::config::ScraperConfig;
use crate::scraper::http_client::HttpClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

pub struct HttpCsvSource {
    client: HttpClient,
    url: String,
}

impl HttpCsvSource {
    pub fn new(url: &str, config: &ScraperConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl RowSource for HttpCsvSource {
    async fn all_values(&self) -> Result<Grid> {
        info!("Fetching stock list from {}", self.url);
        let body = self
            .client
            .get_text(&self.url)
            .await
            .with_context(|| format!("Failed to fetch stock list {}", self.url))?;
        let grid = parse_grid(body.as_bytes())?;
        info!("Loaded {} rows", grid.len());
        Ok(grid)
    }
}

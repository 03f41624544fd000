//! ET Money stock pages: sector text.

use super::cleaner::{looks_like_sector, scan_labelled_phrase};
use super::http_client::HttpClient;
use super::{parsers, resolve_url, QuoteSource};
use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::models::ScrapeTarget;
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

/// Sector from a stock page. Tries, in order: the value next to a "Sector"
/// label, a sector-like link in `#page-container`, then a scan of the page
/// text for "Sector"/"Industry" followed by a capitalised phrase.
pub fn extract_sector(html: &str) -> Result<Option<String>> {
    if let Some(sector) = parsers::find_labelled_value(html, "Sector")? {
        return Ok(Some(sector));
    }

    if let Some(link) = parsers::anchor_texts(html, "#page-container")?
        .into_iter()
        .find(|t| looks_like_sector(t))
    {
        return Ok(Some(link));
    }

    let text = parsers::page_text(html);
    Ok(scan_labelled_phrase(&text, "Sector").or_else(|| scan_labelled_phrase(&text, "Industry")))
}

pub struct EtMoneySector {
    client: HttpClient,
    base_url: String,
}

impl EtMoneySector {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: config.etmoney_base_url.clone(),
        })
    }
}

#[async_trait]
impl QuoteSource for EtMoneySector {
    fn name(&self) -> &'static str {
        "etmoney"
    }

    fn width(&self) -> usize {
        1
    }

    fn needs_url(&self) -> bool {
        true
    }

    async fn fetch(&self, target: &ScrapeTarget) -> Result<Vec<String>, ScrapeError> {
        let raw_url = target.url.as_deref().ok_or(ScrapeError::MissingUrl)?;
        let url = resolve_url(&self.base_url, raw_url)
            .map_err(|e| ScrapeError::Parse(format!("{:#}", e)))?;
        let html = self.client.get_text(&url).await?;

        let sector = extract_sector(&html)
            .map_err(|e| ScrapeError::Parse(e.to_string()))?
            .ok_or_else(|| ScrapeError::NoData(target.symbol.clone()))?;

        debug!("[{}] {}: sector {:?}", target.index, target.symbol, sector);
        Ok(vec![sector])
    }
}

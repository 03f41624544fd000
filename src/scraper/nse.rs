//! NSE quote-equity API: industry classification per symbol.

use super::cleaner::normalise_symbol;
use super::http_client::HttpClient;
use super::QuoteSource;
use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::models::{placeholder, ScrapeTarget};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Default, Deserialize)]
pub struct QuoteEquity {
    #[serde(default)]
    pub info: Option<QuoteInfo>,
    #[serde(rename = "industryInfo", default)]
    pub industry_info: Option<IndustryInfo>,
    #[serde(default)]
    pub metadata: Option<QuoteMetadata>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuoteInfo {
    #[serde(rename = "companyName", default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IndustryInfo {
    #[serde(rename = "macro", default)]
    pub macro_sector: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(rename = "basicIndustry", default)]
    pub basic_industry: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuoteMetadata {
    #[serde(default)]
    pub industry: Option<String>,
}

fn non_blank(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "-")
        .map(str::to_string)
}

/// `[macro, sector, industry, basic industry]`; `None` when the quote carries
/// no classification at all.
pub fn sector_values(quote: &QuoteEquity) -> Option<Vec<String>> {
    let info = quote.industry_info.as_ref();
    let fallback_industry = quote
        .info
        .as_ref()
        .and_then(|i| non_blank(&i.industry))
        .or_else(|| quote.metadata.as_ref().and_then(|m| non_blank(&m.industry)));

    let fields = [
        info.and_then(|i| non_blank(&i.macro_sector)),
        info.and_then(|i| non_blank(&i.sector)),
        info.and_then(|i| non_blank(&i.industry)).or(fallback_industry),
        info.and_then(|i| non_blank(&i.basic_industry)),
    ];

    if fields.iter().all(Option::is_none) {
        return None;
    }
    Some(
        fields
            .into_iter()
            .map(|f| f.unwrap_or_else(|| placeholder::NOT_AVAILABLE.to_string()))
            .collect(),
    )
}

pub struct NseQuote {
    client: HttpClient,
    base_url: String,
    warmed_up: OnceCell<()>,
}

impl NseQuote {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: config.nse_base_url.trim_end_matches('/').to_string(),
            warmed_up: OnceCell::new(),
        })
    }

    pub fn quote_url(&self, symbol: &str) -> Result<String, ScrapeError> {
        let url = Url::parse_with_params(
            &format!("{}/api/quote-equity", self.base_url),
            &[("symbol", normalise_symbol(symbol))],
        )
        .map_err(|e| ScrapeError::Parse(e.to_string()))?;
        Ok(url.to_string())
    }

    /// The API answers 401 until the home page has set its session cookies.
    async fn warm_up(&self) {
        self.warmed_up
            .get_or_init(|| async {
                if let Err(e) = self.client.get_text(&self.base_url).await {
                    warn!("NSE cookie warm-up failed: {}", e);
                }
            })
            .await;
    }
}

#[async_trait]
impl QuoteSource for NseQuote {
    fn name(&self) -> &'static str {
        "nse"
    }

    fn width(&self) -> usize {
        4
    }

    async fn fetch(&self, target: &ScrapeTarget) -> Result<Vec<String>, ScrapeError> {
        self.warm_up().await;

        let url = self.quote_url(&target.symbol)?;
        let referer = format!(
            "{}/get-quotes/equity?symbol={}",
            self.base_url,
            normalise_symbol(&target.symbol)
        );
        let headers = [
            ("Accept", "application/json, text/plain, */*"),
            ("Accept-Language", "en-US,en;q=0.9"),
            ("Referer", referer.as_str()),
        ];

        let quote: QuoteEquity = self.client.get_json(&url, &headers).await?;
        debug!(
            "{}: {:?}",
            target.symbol,
            quote.info.as_ref().and_then(|i| i.company_name.as_deref())
        );

        sector_values(&quote).ok_or_else(|| ScrapeError::NoData(target.symbol.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_industry_info() {
        let quote: QuoteEquity = serde_json::from_str(
            r#"{"info":{"symbol":"TCS","companyName":"Tata Consultancy Services Limited","industry":"Computers - Software & Consulting"},
                "industryInfo":{"macro":"Information Technology","sector":"Information Technology",
                                "industry":"IT - Software","basicIndustry":"Computers - Software & Consulting"},
                "priceInfo":{"lastPrice":3901.5}}"#,
        )
        .unwrap();
        assert_eq!(
            sector_values(&quote).unwrap(),
            vec![
                "Information Technology",
                "Information Technology",
                "IT - Software",
                "Computers - Software & Consulting"
            ]
        );
    }

    #[test]
    fn falls_back_to_info_industry() {
        let quote: QuoteEquity =
            serde_json::from_str(r#"{"info":{"industry":"BANKS"},"industryInfo":{"sector":"-"}}"#).unwrap();
        assert_eq!(sector_values(&quote).unwrap(), vec!["N/A", "N/A", "BANKS", "N/A"]);

        let quote: QuoteEquity = serde_json::from_str(r#"{"metadata":{"industry":"PHARMA"}}"#).unwrap();
        assert_eq!(sector_values(&quote).unwrap()[2], "PHARMA");
    }

    #[test]
    fn unknown_symbol_has_no_values() {
        let quote: QuoteEquity = serde_json::from_str("{}").unwrap();
        assert!(sector_values(&quote).is_none());
    }

    #[test]
    fn quote_url_encodes_symbol() {
        let nse = NseQuote::new(&ScraperConfig::default()).unwrap();
        assert_eq!(
            nse.quote_url("m&m").unwrap(),
            "https://www.nseindia.com/api/quote-equity?symbol=M%26M"
        );
    }
}

pub mod cleaner;
pub mod etmoney;
pub mod http_client;
pub mod nse;
pub mod parsers;
pub mod tradingview;

use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::models::ScrapeTarget;
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::ValueEnum;

use self::etmoney::EtMoneySector;
use self::nse::NseQuote;
use self::tradingview::{TradingViewPage, TradingViewScanner};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable per-symbol data source.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of value cells each output row carries.
    fn width(&self) -> usize;

    /// Rows without a URL column value are skipped when true.
    fn needs_url(&self) -> bool {
        false
    }

    async fn fetch(&self, target: &ScrapeTarget) -> Result<Vec<String>, ScrapeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Indicator values from the row's TradingView page (column D)
    Tradingview,
    /// Indicator columns from the TradingView scanner API
    Scanner,
    /// Sector fields from the NSE quote-equity API
    Nse,
    /// Sector text from the row's ET Money page (column D)
    Etmoney,
}

pub fn build_source(kind: SourceKind, config: &ScraperConfig) -> Result<Box<dyn QuoteSource>> {
    let source: Box<dyn QuoteSource> = match kind {
        SourceKind::Tradingview => Box::new(TradingViewPage::new(config)?),
        SourceKind::Scanner => Box::new(TradingViewScanner::new(config)?),
        SourceKind::Nse => Box::new(NseQuote::new(config)?),
        SourceKind::Etmoney => Box::new(EtMoneySector::new(config)?),
    };
    Ok(source)
}

/// Resolve a row URL against a site root; absolute URLs pass through.
pub fn resolve_url(base: &str, raw: &str) -> Result<String> {
    let base = url::Url::parse(base).with_context(|| format!("Bad base URL {}", base))?;
    let joined = base
        .join(raw.trim())
        .with_context(|| format!("Bad page URL {}", raw))?;
    Ok(joined.to_string())
}

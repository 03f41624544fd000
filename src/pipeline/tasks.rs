//! What happens to one source row.

use crate::llm::SectorClassifier;
use crate::models::{placeholder, RowOutcome, ScrapeTarget, SourceRow};
use crate::scraper::cleaner::pad_values;
use crate::scraper::QuoteSource;
use async_trait::async_trait;
use tracing::{debug, warn};

#[async_trait]
pub trait RowTask: Send + Sync {
    /// Short name used in logs and the run table, e.g. `scrape:nse`.
    fn label(&self) -> String;

    /// Zero-based destination column the output row starts at.
    fn anchor_column(&self) -> usize {
        0
    }

    async fn process(&self, row: &SourceRow) -> RowOutcome;
}

// ── Scrape ────────────────────────────────────────────────────────────────────

/// `[symbol, date, value…]` from a quote source, one row per stock.
pub struct ScrapeTask {
    source: Box<dyn QuoteSource>,
    symbol_column: usize,
    url_column: usize,
    uppercase: bool,
    date: String,
}

impl ScrapeTask {
    pub fn new(source: Box<dyn QuoteSource>, date: impl Into<String>) -> Self {
        Self {
            source,
            symbol_column: 0,
            url_column: 3,
            uppercase: false,
            date: date.into(),
        }
    }

    pub fn with_columns(mut self, symbol_column: usize, url_column: usize) -> Self {
        self.symbol_column = symbol_column;
        self.url_column = url_column;
        self
    }

    pub fn uppercase_symbols(mut self, yes: bool) -> Self {
        self.uppercase = yes;
        self
    }
}

#[async_trait]
impl RowTask for ScrapeTask {
    fn label(&self) -> String {
        format!("scrape:{}", self.source.name())
    }

    async fn process(&self, row: &SourceRow) -> RowOutcome {
        let Some(symbol) = row.cell(self.symbol_column) else {
            return RowOutcome::Skip("no symbol".into());
        };
        let symbol = if self.uppercase {
            symbol.to_uppercase()
        } else {
            symbol.to_string()
        };

        let url = row.cell(self.url_column).map(str::to_string);
        if self.source.needs_url() && url.is_none() {
            return RowOutcome::Skip(format!("{}: no URL", symbol));
        }

        let width = self.source.width();
        let target = ScrapeTarget {
            index: row.index,
            symbol: symbol.clone(),
            url,
        };

        let (values, placeholders) = match self.source.fetch(&target).await {
            Ok(values) => {
                let real = values.len().min(width);
                debug!("[{}] {}: {} values", row.index, symbol, real);
                (pad_values(values, width), width - real)
            }
            Err(e) => {
                warn!("[{}] {}: {}", row.index, symbol, e);
                (pad_values(vec![e.placeholder().to_string()], width), width)
            }
        };

        let mut cells = Vec::with_capacity(width + 2);
        cells.push(symbol);
        cells.push(self.date.clone());
        cells.extend(values);
        RowOutcome::Row { cells, placeholders }
    }
}

// ── Classify ──────────────────────────────────────────────────────────────────

/// Reads A (symbol) plus the B/C hints and fills sector and scope into two
/// adjacent cells, D:E unless told otherwise.
pub struct ClassifyTask {
    classifier: Box<dyn SectorClassifier>,
    output_column: usize,
}

impl ClassifyTask {
    pub const SYMBOL_COLUMN: usize = 0;

    pub fn new(classifier: Box<dyn SectorClassifier>) -> Self {
        Self {
            classifier,
            output_column: 3,
        }
    }

    pub fn with_output_column(mut self, col: usize) -> Self {
        self.output_column = col;
        self
    }
}

#[async_trait]
impl RowTask for ClassifyTask {
    fn label(&self) -> String {
        "classify".to_string()
    }

    fn anchor_column(&self) -> usize {
        self.output_column
    }

    async fn process(&self, row: &SourceRow) -> RowOutcome {
        let Some(symbol) = row.cell(Self::SYMBOL_COLUMN) else {
            return RowOutcome::Skip("no symbol".into());
        };

        let verdict = self
            .classifier
            .classify(symbol, row.cell_or_empty(1), row.cell_or_empty(2))
            .await;
        let placeholders = if verdict.sector == placeholder::RETRY_NEEDED { 2 } else { 0 };
        debug!("[{}] {} → {}", row.index, symbol, verdict.sector);

        RowOutcome::Row {
            cells: verdict.into_cells(),
            placeholders,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScrapeError;
    use crate::llm::SectorVerdict;

    struct FixedSource {
        needs_url: bool,
        result: fn(&ScrapeTarget) -> Result<Vec<String>, ScrapeError>,
    }

    #[async_trait]
    impl QuoteSource for FixedSource {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn width(&self) -> usize {
            3
        }
        fn needs_url(&self) -> bool {
            self.needs_url
        }
        async fn fetch(&self, target: &ScrapeTarget) -> Result<Vec<String>, ScrapeError> {
            (self.result)(target)
        }
    }

    fn row(index: usize, cells: &[&str]) -> SourceRow {
        SourceRow::new(index, cells.iter().map(|c| c.to_string()).collect())
    }

    fn task(needs_url: bool, result: fn(&ScrapeTarget) -> Result<Vec<String>, ScrapeError>) -> ScrapeTask {
        ScrapeTask::new(Box::new(FixedSource { needs_url, result }), "10/18/2026")
    }

    #[tokio::test]
    async fn scrape_row_is_symbol_date_then_padded_values() {
        let t = task(false, |target| Ok(vec![target.symbol.to_lowercase(), "1.5".into()]));
        assert_eq!(t.label(), "scrape:fixed");

        let out = t.process(&row(4, &["TCS", "Tata"])).await;
        assert_eq!(
            out,
            RowOutcome::Row {
                cells: vec!["TCS".into(), "10/18/2026".into(), "tcs".into(), "1.5".into(), "N/A".into()],
                placeholders: 1,
            }
        );
    }

    #[tokio::test]
    async fn scrape_errors_become_placeholders() {
        let t = task(false, |_| Err(ScrapeError::NoData("empty page".into())));
        let RowOutcome::Row { cells, placeholders } = t.process(&row(0, &["INFY"])).await else {
            panic!("expected a row");
        };
        assert_eq!(&cells[2..], &["NO_DATA", "N/A", "N/A"]);
        assert_eq!(placeholders, 3);
    }

    #[tokio::test]
    async fn rows_without_symbol_or_url_are_skipped() {
        let t = task(true, |_| Ok(vec![]));
        assert!(matches!(t.process(&row(0, &["  "])).await, RowOutcome::Skip(_)));
        assert!(matches!(t.process(&row(1, &["TCS", "", "", ""])).await, RowOutcome::Skip(_)));

        let out = t.process(&row(2, &["TCS", "", "", "https://x/tcs"])).await;
        assert!(matches!(out, RowOutcome::Row { .. }));
    }

    #[tokio::test]
    async fn uppercase_option_normalises_symbol() {
        let t = task(false, |_| Ok(vec![])).uppercase_symbols(true);
        let RowOutcome::Row { cells, .. } = t.process(&row(0, &["reliance"])).await else {
            panic!("expected a row");
        };
        assert_eq!(cells[0], "RELIANCE");
    }

    struct Echo;

    #[async_trait]
    impl SectorClassifier for Echo {
        async fn classify(&self, symbol: &str, hint_b: &str, _hint_c: &str) -> SectorVerdict {
            if symbol == "FAIL" {
                return SectorVerdict::retry_needed();
            }
            SectorVerdict {
                sector: hint_b.to_string(),
                scope: format!("{} grows", symbol),
            }
        }
    }

    #[tokio::test]
    async fn classify_writes_sector_and_scope() {
        let t = ClassifyTask::new(Box::new(Echo));
        assert_eq!(t.anchor_column(), 3);

        let out = t.process(&row(0, &["TCS", "IT", "Software"])).await;
        assert_eq!(
            out,
            RowOutcome::Row { cells: vec!["IT".into(), "TCS grows".into()], placeholders: 0 }
        );

        let RowOutcome::Row { cells, placeholders } = t.process(&row(1, &["FAIL"])).await else {
            panic!("expected a row");
        };
        assert_eq!(cells[0], "RETRY NEEDED");
        assert_eq!(placeholders, 2);

        let moved = ClassifyTask::new(Box::new(Echo)).with_output_column(5);
        assert_eq!(moved.anchor_column(), 5);
    }
}

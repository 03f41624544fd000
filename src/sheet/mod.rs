//! Spreadsheet seam: where stock lists are read from and result rows go.
//!
//! `RowSource::all_values` returns every row including the header, the same
//! shape a worksheet dump has. `Worksheet` adds range writes anchored at a
//! cell, several of them in one call, and appends after the last used row.

pub mod a1;
pub mod csv_sheet;
pub mod remote;

use crate::config::{ScraperConfig, SinkConfig, SinkKind, SourceConfig};
use crate::storage::{DuckSheet, Repository};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub use self::a1::{CellRange, CellRef};
pub use self::csv_sheet::CsvSheet;
pub use self::remote::HttpCsvSource;

pub type Grid = Vec<Vec<String>>;

#[async_trait]
pub trait RowSource: Send + Sync {
    async fn all_values(&self) -> Result<Grid>;
}

/// A block of rows and the cell its top-left corner goes to.
pub type RangeWrite = (CellRef, Grid);

#[async_trait]
pub trait Worksheet: RowSource {
    /// Write every range in one round trip. All land or none do.
    async fn batch_update(&self, ranges: &[RangeWrite]) -> Result<()>;

    /// Overwrite the rectangle `rows` covers, starting at `start`.
    async fn update(&self, start: CellRef, rows: &[Vec<String>]) -> Result<()> {
        self.batch_update(&[(start, rows.to_vec())]).await
    }

    /// Write `rows` below the last non-empty row.
    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<()>;

    fn title(&self) -> &str;
}

/// Reads a worksheet back as a row source, for tasks that rewrite their own input.
pub struct SheetReader(pub Arc<dyn Worksheet>);

#[async_trait]
impl RowSource for SheetReader {
    async fn all_values(&self) -> Result<Grid> {
        self.0.all_values().await
    }
}

/// Stock list: local CSV or an http(s) URL serving CSV.
pub fn open_source(source: &SourceConfig, scraper: &ScraperConfig) -> Result<Box<dyn RowSource>> {
    let location = source.location.trim();
    if location.starts_with("http://") || location.starts_with("https://") {
        let remote = HttpCsvSource::new(location, scraper)
            .with_context(|| format!("Failed to set up remote source {}", location))?;
        Ok(Box::new(remote))
    } else {
        Ok(Box::new(CsvSheet::new(location)))
    }
}

/// Destination sheet, plus the DuckDB run log when the sheet lives there.
pub struct Destination {
    pub sheet: Arc<dyn Worksheet>,
    pub run_log: Option<Arc<Repository>>,
}

pub fn open_sink(sink: &SinkConfig) -> Result<Destination> {
    match sink.kind {
        SinkKind::Csv => Ok(Destination {
            sheet: Arc::new(CsvSheet::new(&sink.path)),
            run_log: None,
        }),
        SinkKind::Duckdb => {
            let repo = Repository::open(&sink.path)
                .with_context(|| format!("Failed to open DuckDB sheet at {:?}", sink.path))?;
            repo.run_migrations()?;
            let repo = Arc::new(repo);
            Ok(Destination {
                sheet: Arc::new(DuckSheet::new(Arc::clone(&repo), &sink.sheet)),
                run_log: Some(repo),
            })
        }
    }
}

/// Index of the last row with any non-blank cell.
pub fn last_used_row(grid: &Grid) -> Option<usize> {
    grid.iter()
        .rposition(|row| row.iter().any(|c| !c.trim().is_empty()))
}

/// Write `rows` into `grid` at `start`, growing it as needed.
pub fn paste(grid: &mut Grid, start: CellRef, rows: &[Vec<String>]) {
    let first = start.row.saturating_sub(1);
    let needed = first + rows.len();
    if grid.len() < needed {
        grid.resize_with(needed, Vec::new);
    }
    for (offset, cells) in rows.iter().enumerate() {
        let target = &mut grid[first + offset];
        let width = start.col + cells.len();
        if target.len() < width {
            target.resize(width, String::new());
        }
        for (c, value) in cells.iter().enumerate() {
            target[start.col + c] = value.clone();
        }
    }
}

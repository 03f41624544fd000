//! CSV file treated as a worksheet grid.
//!
//! Writes are read-modify-write under an advisory lock on a `.lock` sibling,
//! so shard processes sharing one output file never drop each other's rows.

use super::{last_used_row, paste, CellRange, CellRef, Grid, RangeWrite, RowSource, Worksheet};
use anyhow::{Context, Result};
use async_trait::async_trait;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct CsvSheet {
    path: PathBuf,
    lock_path: PathBuf,
    title: String,
}

impl CsvSheet {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("sheet")
            .to_string();
        let lock_path = path.with_extension("csv.lock");
        Self { path, lock_path, title }
    }

    fn read_grid(&self) -> Result<Grid> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {:?}", self.path))?;
        parse_grid(file).with_context(|| format!("Failed to parse {:?}", self.path))
    }

    /// Write to a sibling temp file, then rename over the original.
    fn write_grid(&self, grid: &Grid) -> Result<()> {
        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::WriterBuilder::new()
                .flexible(true)
                .from_path(&tmp)
                .with_context(|| format!("Failed to create {:?}", tmp))?;
            for row in grid {
                // csv refuses to write a zero-field record
                if row.is_empty() {
                    writer.write_record([""])?;
                } else {
                    writer.write_record(row)?;
                }
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {:?}", self.path))?;
        Ok(())
    }

    /// Read, edit and rewrite the grid while holding the exclusive file lock.
    /// Blocks until other writers, in this process or another, are done.
    fn edit<T>(&self, change: impl FnOnce(&mut Grid) -> T) -> Result<T> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .with_context(|| format!("Failed to open {:?}", self.lock_path))?;
        let mut lock = RwLock::new(file);
        let _guard = lock
            .write()
            .with_context(|| format!("Failed to lock {:?}", self.lock_path))?;

        let mut grid = self.read_grid()?;
        let out = change(&mut grid);
        self.write_grid(&grid)?;
        Ok(out)
    }
}

/// Every record of a header-less, ragged CSV document.
pub fn parse_grid<R: Read>(reader: R) -> Result<Grid> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut grid = Vec::new();
    for record in rdr.records() {
        let record = record?;
        grid.push(record.iter().map(|c| c.to_string()).collect());
    }
    Ok(grid)
}

// Readers skip the lock: the rename swaps whole files.
#[async_trait]
impl RowSource for CsvSheet {
    async fn all_values(&self) -> Result<Grid> {
        self.read_grid()
    }
}

#[async_trait]
impl Worksheet for CsvSheet {
    async fn batch_update(&self, ranges: &[RangeWrite]) -> Result<()> {
        if ranges.iter().all(|(_, rows)| rows.is_empty()) {
            return Ok(());
        }
        self.edit(|grid| {
            for (start, rows) in ranges {
                paste(grid, *start, rows);
            }
        })?;
        for (start, rows) in ranges {
            debug!("{}: wrote {}", self.title, CellRange::for_rows(*start, rows));
        }
        Ok(())
    }

    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let start = self.edit(|grid| {
            let next_row = last_used_row(grid).map(|r| r + 2).unwrap_or(1);
            let start = CellRef::new(next_row, 0);
            paste(grid, start, rows);
            start
        })?;
        debug!("{}: appended {}", self.title, CellRange::for_rows(start, rows));
        Ok(())
    }

    fn title(&self) -> &str {
        &self.title
    }
}

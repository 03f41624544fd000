//! Pipeline orchestrator: source rows → task → destination sheet.
//!
//! ## Run loop
//!
//! 1. Read every source row, drop the header rows. Source index `i` is the
//!    i-th data row; its output lands at destination row `i + header_rows + 1`.
//! 2. Resume at `max(start, checkpoint)` and walk to `min(end, rows - 1)`,
//!    visiting only the indices this shard owns.
//! 3. Buffer output rows; every `batch_size` rows, flush them and advance the
//!    checkpoint past the highest index handled so far. A flush is one sheet
//!    call: each run of consecutive indices becomes one range of it.
//!
//! A failed flush keeps its rows buffered and the checkpoint where it was, so
//! a crash or an API limit never skips a row. Re-running redoes at most one
//! batch; range writes make that idempotent.

pub mod batch;
pub mod checkpoint;
pub mod shard;
pub mod tasks;

pub use self::batch::Batch;
pub use self::checkpoint::Checkpoint;
pub use self::shard::{Shard, Window};
pub use self::tasks::{ClassifyTask, RowTask, ScrapeTask};

use crate::config::{AppConfig, WriteMode};
use crate::error::PipelineError;
use crate::models::{RowOutcome, SourceRow};
use crate::sheet::{CellRef, RangeWrite, RowSource, Worksheet};
use crate::storage::Repository;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// ── Plan ──────────────────────────────────────────────────────────────────────

/// Validated run settings.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub window: Window,
    pub shard: Shard,
    pub batch_size: usize,
    pub header_rows: usize,
    pub write_mode: WriteMode,
    pub flush_delay: Duration,
}

impl RunPlan {
    pub fn from_config(config: &AppConfig) -> Result<Self, PipelineError> {
        if config.run.batch_size == 0 {
            return Err(PipelineError::ZeroBatchSize);
        }
        Ok(Self {
            window: Window::new(config.run.start_index, config.run.end_index)?,
            shard: Shard::new(config.run.shard_index, config.run.shard_step)?,
            batch_size: config.run.batch_size,
            header_rows: config.source.header_rows,
            write_mode: config.sink.write_mode,
            flush_delay: Duration::from_millis(config.sink.flush_delay_ms),
        })
    }

    /// One-based destination row for source index `index`.
    pub fn target_row(&self, index: usize) -> usize {
        index + self.header_rows + 1
    }
}

// ── Stats ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Indices in window and shard.
    pub considered: usize,
    pub processed: usize,
    pub skipped: usize,
    pub written: usize,
    pub placeholders: usize,
    pub write_errors: usize,
    /// Rows still buffered when the run ended.
    pub unwritten: usize,
    pub checkpoint: Option<usize>,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn log_summary(&self, task: &str) {
        info!(
            task = task,
            considered = self.considered,
            processed = self.processed,
            skipped = self.skipped,
            written = self.written,
            placeholders = self.placeholders,
            write_errors = self.write_errors,
            unwritten = self.unwritten,
            checkpoint = ?self.checkpoint,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "Run finished"
        );
    }

    fn error_summary(&self) -> Option<String> {
        match (self.write_errors, self.unwritten) {
            (0, 0) => None,
            (e, 0) => Some(format!("{} failed writes", e)),
            (e, u) => Some(format!("{} failed writes, {} rows unwritten", e, u)),
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    plan: RunPlan,
    checkpoint: Checkpoint,
    run_log: Option<Arc<Repository>>,
}

impl Pipeline {
    pub fn new(plan: RunPlan, checkpoint: Checkpoint) -> Self {
        Self {
            plan,
            checkpoint,
            run_log: None,
        }
    }

    /// Record each run in the DuckDB `scrape_runs` table.
    pub fn with_run_log(mut self, repo: Option<Arc<Repository>>) -> Self {
        self.run_log = repo;
        self
    }

    #[cfg(test)]
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub async fn run(
        &self,
        source: &dyn RowSource,
        sink: &dyn Worksheet,
        task: &dyn RowTask,
    ) -> Result<RunStats> {
        let label = task.label();
        let shard = self.plan.shard;

        let run_id = match &self.run_log {
            Some(repo) => repo
                .begin_scrape_run(&label, shard.index, shard.step)
                .map_err(|e| warn!("Could not record run start: {:#}", e))
                .ok(),
            None => None,
        };

        let started = Instant::now();
        let result = self.run_rows(source, sink, task).await;

        if let (Some(repo), Some(id)) = (&self.run_log, run_id) {
            let recorded = match &result {
                Ok(stats) => repo.finish_scrape_run(
                    id,
                    stats.processed,
                    stats.written,
                    stats.write_errors,
                    stats.error_summary().as_deref(),
                ),
                Err(e) => repo.finish_scrape_run(id, 0, 0, 1, Some(&format!("{:#}", e))),
            };
            if let Err(e) = recorded {
                warn!("Could not record run finish: {:#}", e);
            }
        }

        let mut stats = result?;
        stats.elapsed = started.elapsed();
        stats.log_summary(&label);
        Ok(stats)
    }

    async fn run_rows(
        &self,
        source: &dyn RowSource,
        sink: &dyn Worksheet,
        task: &dyn RowTask,
    ) -> Result<RunStats> {
        let plan = &self.plan;
        let values = source.all_values().await.context("Failed to read source rows")?;
        let rows: Vec<SourceRow> = values
            .into_iter()
            .skip(plan.header_rows)
            .enumerate()
            .map(|(i, cells)| SourceRow::new(i, cells))
            .collect();

        let resume = self.checkpoint.load(plan.window.start)?;
        let mut stats = RunStats {
            checkpoint: self.checkpoint.peek()?,
            ..RunStats::default()
        };

        let Some(range) = plan.window.remaining(resume, rows.len()) else {
            info!(
                "Nothing to do: {} rows, window {}..={}, checkpoint {}",
                rows.len(),
                plan.window.start,
                plan.window.end,
                resume
            );
            return Ok(stats);
        };

        info!(
            "{}: {} rows, {} ({}..={}), batch {} → {}",
            task.label(),
            rows.len(),
            plan.shard,
            range.start(),
            range.end(),
            plan.batch_size,
            sink.title()
        );

        let mut batch = Batch::new();
        let mut handled: Option<usize> = None;

        for i in range {
            if !plan.shard.owns(i) {
                continue;
            }
            stats.considered += 1;

            match task.process(&rows[i]).await {
                RowOutcome::Row { cells, placeholders } => {
                    stats.processed += 1;
                    stats.placeholders += placeholders;
                    batch.push(i, cells);
                }
                RowOutcome::Skip(reason) => {
                    stats.skipped += 1;
                    debug!("[{}] skipped: {}", i, reason);
                }
            }
            handled = Some(i);

            if batch.is_full(plan.batch_size) {
                self.flush(sink, task.anchor_column(), &mut batch, handled, &mut stats)
                    .await?;
            }
        }

        if !batch.is_empty() {
            self.flush(sink, task.anchor_column(), &mut batch, handled, &mut stats)
                .await?;
        } else if let Some(last) = handled {
            self.advance(last, &mut stats)?;
        }

        if !batch.is_empty() {
            stats.unwritten = batch.len();
            error!(
                "{} rows ({:?}..={:?}) were not written; the next run redoes them",
                batch.len(),
                batch.first_index(),
                batch.last_index()
            );
        }
        Ok(stats)
    }

    /// Write the buffered rows. Only a checkpoint I/O failure is an error; a
    /// failed sheet write is logged and the rows stay in `batch`.
    async fn flush(
        &self,
        sink: &dyn Worksheet,
        anchor: usize,
        batch: &mut Batch,
        handled: Option<usize>,
        stats: &mut RunStats,
    ) -> Result<()> {
        let written = match self.plan.write_mode {
            WriteMode::Range => self.write_runs(sink, anchor, batch).await,
            WriteMode::Append => sink.append_rows(&batch.rows()).await,
        };

        if let Err(e) = written {
            stats.write_errors += 1;
            error!(
                "Write of {} rows ({:?}..={:?}) failed, keeping them buffered: {:#}",
                batch.len(),
                batch.first_index(),
                batch.last_index(),
                e
            );
            return Ok(());
        }

        info!(
            "Saved {} rows ({:?}..={:?})",
            batch.len(),
            batch.first_index(),
            batch.last_index()
        );
        stats.written += batch.len();
        batch.clear();

        if !self.plan.flush_delay.is_zero() {
            tokio::time::sleep(self.plan.flush_delay).await;
        }
        if let Some(last) = handled {
            self.advance(last, stats)?;
        }
        Ok(())
    }

    async fn write_runs(&self, sink: &dyn Worksheet, anchor: usize, batch: &Batch) -> Result<()> {
        let ranges: Vec<RangeWrite> = batch
            .runs()
            .into_iter()
            .map(|run| (CellRef::new(self.plan.target_row(run.first_index), anchor), run.rows))
            .collect();
        sink.batch_update(&ranges)
            .await
            .with_context(|| format!("batch update of {} ranges", ranges.len()))
    }

    fn advance(&self, last: usize, stats: &mut RunStats) -> Result<()> {
        let next = last + 1;
        self.checkpoint.save(next)?;
        stats.checkpoint = Some(stats.checkpoint.map_or(next, |c| c.max(next)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::{paste, Grid};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory worksheet; the first `fail_writes` writes return an error.
    #[derive(Default)]
    struct MemorySheet {
        grid: Mutex<Grid>,
        fail_writes: AtomicUsize,
        writes: AtomicUsize,
    }

    impl MemorySheet {
        fn with_rows(rows: Grid) -> Self {
            Self {
                grid: Mutex::new(rows),
                ..Self::default()
            }
        }

        fn failing(times: usize) -> Self {
            let sheet = Self::default();
            sheet.fail_writes.store(times, Ordering::SeqCst);
            sheet
        }

        fn grid(&self) -> Grid {
            self.grid.lock().unwrap().clone()
        }

        fn check_failure(&self) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let left = self.fail_writes.load(Ordering::SeqCst);
            if left > 0 {
                self.fail_writes.store(left - 1, Ordering::SeqCst);
                anyhow::bail!("quota exceeded");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RowSource for MemorySheet {
        async fn all_values(&self) -> Result<Grid> {
            Ok(self.grid())
        }
    }

    #[async_trait]
    impl Worksheet for MemorySheet {
        async fn batch_update(&self, ranges: &[RangeWrite]) -> Result<()> {
            self.check_failure()?;
            let mut grid = self.grid.lock().unwrap();
            for (start, rows) in ranges {
                paste(&mut grid, *start, rows);
            }
            Ok(())
        }

        async fn append_rows(&self, rows: &[Vec<String>]) -> Result<()> {
            self.check_failure()?;
            let mut grid = self.grid.lock().unwrap();
            let next = crate::sheet::last_used_row(&grid).map_or(1, |r| r + 2);
            paste(&mut grid, CellRef::new(next, 0), rows);
            Ok(())
        }

        fn title(&self) -> &str {
            "memory"
        }
    }

    /// Echoes the symbol with a marker; symbols starting with `-` are skipped.
    struct Upper;

    #[async_trait]
    impl RowTask for Upper {
        fn label(&self) -> String {
            "upper".into()
        }

        async fn process(&self, row: &SourceRow) -> RowOutcome {
            match row.cell(0) {
                Some(s) if s.starts_with('-') => RowOutcome::Skip("dash".into()),
                Some(s) => RowOutcome::Row {
                    cells: vec![s.to_uppercase(), row.index.to_string()],
                    placeholders: 0,
                },
                None => RowOutcome::Skip("blank".into()),
            }
        }
    }

    fn stock_list(n: usize) -> MemorySheet {
        let mut rows = vec![vec!["Symbol".to_string()]];
        rows.extend((0..n).map(|i| vec![format!("s{}", i)]));
        MemorySheet::with_rows(rows)
    }

    fn plan(start: usize, end: usize, shard: Shard, batch_size: usize) -> RunPlan {
        RunPlan {
            window: Window::new(start, end).unwrap(),
            shard,
            batch_size,
            header_rows: 1,
            write_mode: WriteMode::Range,
            flush_delay: Duration::ZERO,
        }
    }

    fn pipeline(dir: &tempfile::TempDir, plan: RunPlan) -> Pipeline {
        Pipeline::new(plan, Checkpoint::new(dir.path().join("checkpoint.txt")))
    }

    #[tokio::test]
    async fn row_for_index_lands_two_rows_down() {
        let dir = tempfile::tempdir().unwrap();
        let source = stock_list(7);
        let sink = MemorySheet::default();

        let stats = pipeline(&dir, plan(0, 2500, Shard::single(), 3))
            .run(&source, &sink, &Upper)
            .await
            .unwrap();

        let grid = sink.grid();
        for i in 0..7 {
            assert_eq!(grid[i + 1], vec![format!("S{}", i), i.to_string()], "index {}", i);
        }
        assert_eq!(stats.written, 7);
        assert_eq!(stats.checkpoint, Some(7));
        // batches of 3, 3, 1
        assert_eq!(sink.writes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn shard_only_touches_owned_rows() {
        let dir = tempfile::tempdir().unwrap();
        let source = stock_list(10);
        let sink = MemorySheet::default();

        let stats = pipeline(&dir, plan(0, 2500, Shard::new(1, 3).unwrap(), 2))
            .run(&source, &sink, &Upper)
            .await
            .unwrap();

        assert_eq!(stats.considered, 3);
        let grid = sink.grid();
        for i in 0..10 {
            let row = grid.get(i + 1).cloned().unwrap_or_default();
            if i % 3 == 1 {
                assert_eq!(row[0], format!("S{}", i));
            } else {
                assert!(row.iter().all(|c| c.is_empty()), "index {} written", i);
            }
        }
        // [1, 4] then [7]: one sheet call per flush, gaps or not
        assert_eq!(sink.writes.load(Ordering::SeqCst), 2);
        assert_eq!(stats.checkpoint, Some(8));
    }

    #[tokio::test]
    async fn resumes_from_checkpoint_and_respects_window_end() {
        let dir = tempfile::tempdir().unwrap();
        let source = stock_list(20);
        let sink = MemorySheet::default();
        let p = pipeline(&dir, plan(2, 9, Shard::single(), 4));
        p.checkpoint().save(6).unwrap();

        let stats = p.run(&source, &sink, &Upper).await.unwrap();

        assert_eq!(stats.considered, 4);
        let grid = sink.grid();
        assert!(grid.get(3).map_or(true, |r| r.is_empty()));
        assert_eq!(grid[7][0], "S6");
        assert_eq!(grid[10][0], "S9");
        assert_eq!(grid.len(), 11);
        assert_eq!(p.checkpoint().peek().unwrap(), Some(10));

        // a second run has nothing left
        let again = p.run(&source, &sink, &Upper).await.unwrap();
        assert_eq!(again.considered, 0);
        assert_eq!(p.checkpoint().peek().unwrap(), Some(10));
    }

    #[tokio::test]
    async fn failed_write_keeps_rows_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let source = stock_list(5);
        let sink = MemorySheet::failing(1);
        let p = pipeline(&dir, plan(0, 2500, Shard::single(), 2));

        let stats = p.run(&source, &sink, &Upper).await.unwrap();

        // first flush failed; its rows went out with the second one
        assert_eq!(stats.write_errors, 1);
        assert_eq!(stats.written, 5);
        assert_eq!(stats.unwritten, 0);
        assert_eq!(sink.grid()[1][0], "S0");
        assert_eq!(p.checkpoint().peek().unwrap(), Some(5));
    }

    #[tokio::test]
    async fn unwritten_tail_does_not_advance_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let source = stock_list(5);
        let p = pipeline(&dir, plan(0, 2500, Shard::single(), 2));

        // batches [0,1] [2,3] land, then [4] fails
        let flaky = FailAfter { inner: MemorySheet::default(), ok_writes: 2 };

        let stats = p.run(&source, &flaky, &Upper).await.unwrap();
        assert_eq!(stats.written, 4);
        assert_eq!(stats.unwritten, 1);
        assert_eq!(p.checkpoint().peek().unwrap(), Some(4));

        // rerun picks up exactly the missing row
        let stats = p.run(&source, &flaky.inner, &Upper).await.unwrap();
        assert_eq!(stats.considered, 1);
        assert_eq!(flaky.inner.grid()[5][0], "S4");
        assert_eq!(p.checkpoint().peek().unwrap(), Some(5));
    }

    /// Succeeds `ok_writes` times, then fails forever.
    struct FailAfter {
        inner: MemorySheet,
        ok_writes: usize,
    }

    #[async_trait]
    impl RowSource for FailAfter {
        async fn all_values(&self) -> Result<Grid> {
            self.inner.all_values().await
        }
    }

    #[async_trait]
    impl Worksheet for FailAfter {
        async fn batch_update(&self, ranges: &[RangeWrite]) -> Result<()> {
            if self.inner.writes.load(Ordering::SeqCst) >= self.ok_writes {
                anyhow::bail!("rate limited");
            }
            self.inner.batch_update(ranges).await
        }

        async fn append_rows(&self, rows: &[Vec<String>]) -> Result<()> {
            self.inner.append_rows(rows).await
        }

        fn title(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn skipped_rows_still_advance_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySheet::with_rows(vec![
            vec!["Symbol".into()],
            vec!["a".into()],
            vec!["-b".into()],
            vec!["".into()],
        ]);
        let sink = MemorySheet::default();
        let p = pipeline(&dir, plan(0, 2500, Shard::single(), 5));

        let stats = p.run(&source, &sink, &Upper).await.unwrap();
        assert_eq!((stats.processed, stats.skipped), (1, 2));
        assert_eq!(p.checkpoint().peek().unwrap(), Some(3));
    }

    #[tokio::test]
    async fn append_mode_stacks_rows_after_existing_data() {
        let dir = tempfile::tempdir().unwrap();
        let source = stock_list(3);
        let sink = MemorySheet::with_rows(vec![vec!["Symbol".into(), "Index".into()]]);
        let mut plan = plan(0, 2500, Shard::new(0, 2).unwrap(), 1);
        plan.write_mode = WriteMode::Append;

        pipeline(&dir, plan).run(&source, &sink, &Upper).await.unwrap();

        let grid = sink.grid();
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[1][0], "S0");
        assert_eq!(grid[2][0], "S2");
    }

    #[tokio::test]
    async fn run_is_recorded_in_duckdb() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        repo.run_migrations().unwrap();
        let source = stock_list(4);
        let sink = MemorySheet::default();

        pipeline(&dir, plan(0, 2500, Shard::single(), 10))
            .with_run_log(Some(Arc::clone(&repo)))
            .run(&source, &sink, &Upper)
            .await
            .unwrap();

        let runs = repo.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].task, "upper");
        assert_eq!(runs[0].rows_written, 4);
    }

    #[test]
    fn plan_rejects_bad_settings() {
        let mut config = AppConfig::default();
        config.run.batch_size = 0;
        assert!(matches!(RunPlan::from_config(&config), Err(PipelineError::ZeroBatchSize)));

        let mut config = AppConfig::default();
        config.run.shard_index = 2;
        config.run.shard_step = 2;
        assert!(RunPlan::from_config(&config).is_err());

        let config = AppConfig::default();
        let plan = RunPlan::from_config(&config).unwrap();
        assert_eq!(plan.target_row(0), 2);
        assert_eq!(plan.target_row(41), 43);
    }
}

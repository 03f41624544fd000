use crate::sheet::{paste, CellRef, Grid, RangeWrite, RowSource, Worksheet};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use duckdb::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS scrape_run_id START 1;

CREATE TABLE IF NOT EXISTS sheet_cells (
    sheet       VARCHAR   NOT NULL,
    row_num     BIGINT    NOT NULL,   -- 1-based, like the sheet
    col         BIGINT    NOT NULL,   -- 0-based, A = 0
    value       VARCHAR   NOT NULL DEFAULT '',
    updated_at  TIMESTAMP NOT NULL,
    PRIMARY KEY (sheet, row_num, col)
);

CREATE TABLE IF NOT EXISTS scrape_runs (
    id              BIGINT PRIMARY KEY DEFAULT nextval('scrape_run_id'),
    task            VARCHAR NOT NULL,
    shard_index     BIGINT  NOT NULL DEFAULT 0,
    shard_step      BIGINT  NOT NULL DEFAULT 1,
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    rows_processed  BIGINT  DEFAULT 0,
    rows_written    BIGINT  DEFAULT 0,
    errors          BIGINT  DEFAULT 0,
    error_msg       VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_cells_sheet ON sheet_cells (sheet);
CREATE INDEX IF NOT EXISTS idx_runs_started ON scrape_runs (started_at);
"#;

/// One row of the run log.
#[derive(Debug, Clone)]
pub struct ScrapeRun {
    pub id: i64,
    pub task: String,
    pub shard_index: i64,
    pub shard_step: i64,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub status: String,
    pub rows_processed: i64,
    pub rows_written: i64,
    pub errors: i64,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("DuckDB connection lock poisoned"))
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES).context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Sheet cells ───────────────────────────────────────────────────────────

    /// Overwrite the cells each range covers, all in one transaction.
    /// Idempotent.
    pub fn upsert_ranges(&self, sheet: &str, ranges: &[RangeWrite]) -> Result<usize> {
        if ranges.iter().all(|(_, rows)| rows.is_empty()) {
            return Ok(0);
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now().naive_utc();
        let sql = r#"
            INSERT INTO sheet_cells (sheet, row_num, col, value, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (sheet, row_num, col) DO UPDATE SET
                value      = excluded.value,
                updated_at = excluded.updated_at
        "#;

        let mut written = 0usize;
        for (start, rows) in ranges {
            for (r, cells) in rows.iter().enumerate() {
                let row_num = start.row + r;
                for (c, value) in cells.iter().enumerate() {
                    let col = start.col + c;
                    tx.execute(sql, params![sheet, row_num as i64, col as i64, value, now])
                        .with_context(|| format!("upsert {}!{}", sheet, CellRef::new(row_num, col)))?;
                    written += 1;
                }
            }
        }

        tx.commit()?;
        Ok(written)
    }

    /// Whole sheet as a grid, row 1 first. Gaps read as empty strings.
    pub fn sheet_values(&self, sheet: &str) -> Result<Grid> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT row_num, col, value FROM sheet_cells WHERE sheet = ? ORDER BY row_num, col",
        )?;
        let cells: Vec<(i64, i64, String)> = stmt
            .query_map(params![sheet], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<std::result::Result<_, _>>()?;

        let mut grid = Grid::new();
        for (row_num, col, value) in cells {
            paste(&mut grid, CellRef::new(row_num as usize, col as usize), &[vec![value]]);
        }
        Ok(grid)
    }

    /// Last row holding a non-empty value.
    pub fn max_row(&self, sheet: &str) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT MAX(row_num) FROM sheet_cells WHERE sheet = ? AND value <> ''")?;
        Ok(stmt.query_row(params![sheet], |r| r.get(0))?)
    }

    pub fn sheet_names(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT sheet FROM sheet_cells ORDER BY sheet")?;
        let names: Vec<String> = stmt
            .query_map([], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(names)
    }

    pub fn cell_count(&self, sheet: &str) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM sheet_cells WHERE sheet = ? AND value <> ''")?;
        Ok(s.query_row(params![sheet], |r| r.get(0))?)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self, task: &str, shard_index: usize, shard_step: usize) -> Result<i64> {
        let conn = self.conn()?;
        let id: i64 = conn.query_row(
            r#"INSERT INTO scrape_runs (task, shard_index, shard_step, started_at, status)
               VALUES (?, ?, ?, ?, 'running') RETURNING id"#,
            params![task, shard_index as i64, shard_step as i64, Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(
        &self,
        run_id: i64,
        processed: usize,
        written: usize,
        errors: usize,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               rows_processed = ?, rows_written = ?, errors = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                processed as i64,
                written as i64,
                errors as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<ScrapeRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT id, task, shard_index, shard_step, started_at, finished_at, status,
                      rows_processed, rows_written, errors
               FROM scrape_runs ORDER BY id DESC LIMIT ?"#,
        )?;
        let runs = stmt
            .query_map(params![limit as i64], |r| {
                Ok(ScrapeRun {
                    id: r.get(0)?,
                    task: r.get(1)?,
                    shard_index: r.get(2)?,
                    shard_step: r.get(3)?,
                    started_at: r.get(4)?,
                    finished_at: r.get(5)?,
                    status: r.get(6)?,
                    rows_processed: r.get(7)?,
                    rows_written: r.get(8)?,
                    errors: r.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

// ── DuckDB-backed worksheet ───────────────────────────────────────────────────

pub struct DuckSheet {
    repo: Arc<Repository>,
    title: String,
}

impl DuckSheet {
    pub fn new(repo: Arc<Repository>, title: &str) -> Self {
        Self { repo, title: title.to_string() }
    }
}

#[async_trait]
impl RowSource for DuckSheet {
    async fn all_values(&self) -> Result<Grid> {
        self.repo.sheet_values(&self.title)
    }
}

#[async_trait]
impl Worksheet for DuckSheet {
    async fn batch_update(&self, ranges: &[RangeWrite]) -> Result<()> {
        let n = self.repo.upsert_ranges(&self.title, ranges)?;
        debug!("{}: {} cells in {} ranges", self.title, n, ranges.len());
        Ok(())
    }

    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<()> {
        let next = self.repo.max_row(&self.title)?.map(|r| r as usize + 1).unwrap_or(1);
        self.update(CellRef::new(next, 0), rows).await
    }

    fn title(&self) -> &str {
        &self.title
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> Arc<Repository> {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        Arc::new(repo)
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn migrations_are_idempotent() {
        let repo = repo();
        repo.run_migrations().unwrap();
        assert!(repo.sheet_names().unwrap().is_empty());
    }

    #[test]
    fn upsert_overwrites_and_reads_back_as_grid() {
        let repo = repo();
        repo.upsert_ranges("Sheet5", &[(CellRef::new(3, 0), vec![row(&["INFY", "d", "1"])])]).unwrap();
        repo.upsert_ranges("Sheet5", &[(CellRef::new(3, 2), vec![row(&["2"])])]).unwrap();
        repo.upsert_ranges("Other", &[(CellRef::new(1, 0), vec![row(&["x"])])]).unwrap();

        let grid = repo.sheet_values("Sheet5").unwrap();
        assert_eq!(grid.len(), 3);
        assert!(grid[0].is_empty());
        assert_eq!(grid[2], row(&["INFY", "d", "2"]));
        assert_eq!(repo.max_row("Sheet5").unwrap(), Some(3));
        assert_eq!(repo.cell_count("Sheet5").unwrap(), 3);
        assert_eq!(repo.sheet_names().unwrap(), vec!["Other", "Sheet5"]);
    }

    #[tokio::test]
    async fn duck_sheet_appends_after_last_row() {
        let repo = repo();
        let sheet = DuckSheet::new(Arc::clone(&repo), "Sheet7");
        sheet.update(CellRef::new(1, 0), &[row(&["Name", "Sector"])]).await.unwrap();
        sheet.append_rows(&[row(&["TCS", "IT"]), row(&["SUN", "Pharma"])]).await.unwrap();

        let grid = sheet.all_values().await.unwrap();
        assert_eq!(grid, vec![row(&["Name", "Sector"]), row(&["TCS", "IT"]), row(&["SUN", "Pharma"])]);
    }

    #[tokio::test]
    async fn duck_sheet_batch_update_writes_every_range() {
        let repo = repo();
        let sheet = DuckSheet::new(Arc::clone(&repo), "Sheet5");
        sheet
            .batch_update(&[
                (CellRef::new(2, 0), vec![row(&["TCS", "d"])]),
                (CellRef::new(5, 0), vec![row(&["SUN", "d"]), row(&["HDFC", "d"])]),
            ])
            .await
            .unwrap();

        let grid = sheet.all_values().await.unwrap();
        assert_eq!(grid.len(), 6);
        assert_eq!(grid[1], row(&["TCS", "d"]));
        assert!(grid[2].is_empty());
        assert_eq!(grid[5], row(&["HDFC", "d"]));
        assert_eq!(repo.cell_count("Sheet5").unwrap(), 6);
    }

    #[test]
    fn run_log_round_trip() {
        let repo = repo();
        let first = repo.begin_scrape_run("scrape:nse", 1, 4).unwrap();
        let second = repo.begin_scrape_run("classify", 0, 1).unwrap();
        assert!(second > first);

        repo.finish_scrape_run(first, 10, 9, 1, Some("1 write error")).unwrap();

        let runs = repo.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second);
        assert_eq!(runs[0].status, "running");
        assert_eq!(runs[1].status, "error");
        assert_eq!(runs[1].rows_written, 9);
        assert_eq!((runs[1].shard_index, runs[1].shard_step), (1, 4));
        assert!(runs[1].finished_at.is_some());
    }
}

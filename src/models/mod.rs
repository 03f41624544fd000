// ── Placeholders ──────────────────────────────────────────────────────────────

/// Cell values written in place of data that could not be scraped.
pub mod placeholder {
    pub const NOT_AVAILABLE: &str = "N/A";
    pub const NO_DATA: &str = "NO_DATA";
    pub const ERROR: &str = "Error";
    pub const RETRY_NEEDED: &str = "RETRY NEEDED";
}

// ── Source rows ───────────────────────────────────────────────────────────────

/// One data row of the stock list, header rows already removed.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    /// 0-based position after the header.
    pub index: usize,
    pub cells: Vec<String>,
}

impl SourceRow {
    pub fn new(index: usize, cells: Vec<String>) -> Self {
        Self { index, cells }
    }

    /// Trimmed cell text, `None` when the column is missing or blank.
    pub fn cell(&self, col: usize) -> Option<&str> {
        self.cells
            .get(col)
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
    }

    /// Cell text or an empty string.
    pub fn cell_or_empty(&self, col: usize) -> &str {
        self.cell(col).unwrap_or("")
    }
}

/// What a task needs to fetch one row.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeTarget {
    pub index: usize,
    pub symbol: String,
    pub url: Option<String>,
}

// ── Row outcome ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    /// Cells to write, plus how many of them are placeholders.
    Row { cells: Vec<String>, placeholders: usize },
    /// Nothing to write for this index.
    Skip(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_cells_read_as_none() {
        let row = SourceRow::new(0, vec!["  TCS ".into(), "".into(), "   ".into()]);
        assert_eq!(row.cell(0), Some("TCS"));
        assert_eq!(row.cell(1), None);
        assert_eq!(row.cell(2), None);
        assert_eq!(row.cell(7), None);
        assert_eq!(row.cell_or_empty(3), "");
    }
}

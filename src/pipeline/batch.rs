//! Output rows waiting to be written.

/// Consecutive source indices, written as one range.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub first_index: usize,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
pub struct Batch {
    rows: Vec<(usize, Vec<String>)>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: usize, cells: Vec<String>) {
        self.rows.push((index, cells));
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_full(&self, batch_size: usize) -> bool {
        self.rows.len() >= batch_size
    }

    pub fn first_index(&self) -> Option<usize> {
        self.rows.first().map(|(i, _)| *i)
    }

    pub fn last_index(&self) -> Option<usize> {
        self.rows.last().map(|(i, _)| *i)
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Rows in push order, indices dropped.
    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows.iter().map(|(_, cells)| cells.clone()).collect()
    }

    /// Split into runs of consecutive indices. Rows are pushed in increasing
    /// index order, so a gap always starts a new run.
    pub fn runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = Vec::new();
        for (index, cells) in &self.rows {
            match runs.last_mut() {
                Some(run) if run.first_index + run.rows.len() == *index => {
                    run.rows.push(cells.clone());
                }
                _ => runs.push(Run {
                    first_index: *index,
                    rows: vec![cells.clone()],
                }),
            }
        }
        runs
    }
}

//! Modulo sharding of the row index space, plus the inclusive row window.

use crate::error::PipelineError;
use std::fmt;
use std::ops::RangeInclusive;

/// Worker `index` of `step` owns every row with `i % step == index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    pub index: usize,
    pub step: usize,
}

impl Shard {
    pub fn new(index: usize, step: usize) -> Result<Self, PipelineError> {
        if step == 0 {
            return Err(PipelineError::ZeroShardStep);
        }
        if index >= step {
            return Err(PipelineError::ShardOutOfRange { index, step });
        }
        Ok(Self { index, step })
    }

    #[cfg(test)]
    pub fn single() -> Self {
        Self { index: 0, step: 1 }
    }

    pub fn owns(&self, row: usize) -> bool {
        row % self.step == self.index
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard {}/{}", self.index, self.step)
    }
}

/// Inclusive `[start, end]` range of source indices a run may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

impl Window {
    pub fn new(start: usize, end: usize) -> Result<Self, PipelineError> {
        if start > end {
            return Err(PipelineError::EmptyWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn resume_from(&self, checkpoint: usize) -> usize {
        self.start.max(checkpoint)
    }

    /// Indices still to visit given a checkpoint and the number of rows.
    pub fn remaining(&self, checkpoint: usize, rows: usize) -> Option<RangeInclusive<usize>> {
        if rows == 0 {
            return None;
        }
        let from = self.resume_from(checkpoint);
        let last = self.end.min(rows - 1);
        (from <= last).then_some(from..=last)
    }
}

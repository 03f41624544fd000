//! Resume point: the next source index to process, as plain text.

use super::shard::Shard;
use crate::error::PipelineError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Explicit path if given, otherwise `{stem}.txt`, or one file per shard
    /// so parallel workers never overwrite each other.
    pub fn for_shard(explicit: Option<&Path>, stem: &str, shard: Shard) -> Self {
        match explicit {
            Some(path) => Self::new(path),
            None if shard.step == 1 => Self::new(format!("{}.txt", stem)),
            None => Self::new(format!("{}_shard{}of{}.txt", stem, shard.index, shard.step)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PipelineError {
        PipelineError::Checkpoint {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// Stored value. A missing file is `None`; so is garbage, with a warning.
    pub fn peek(&self) -> Result<Option<usize>, PipelineError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        match text.trim().parse::<usize>() {
            Ok(n) => Ok(Some(n)),
            Err(_) => {
                warn!("Ignoring unreadable checkpoint {:?}: {:?}", self.path, text.trim());
                Ok(None)
            }
        }
    }

    pub fn load(&self, default: usize) -> Result<usize, PipelineError> {
        Ok(self.peek()?.unwrap_or(default))
    }

    /// Persist `next`. Never moves backwards; returns whether the file changed.
    pub fn save(&self, next: usize) -> Result<bool, PipelineError> {
        if let Some(current) = self.peek()? {
            if next <= current {
                debug!("Checkpoint stays at {} (offered {})", current, next);
                return Ok(false);
            }
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, next.to_string()).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        debug!("Checkpoint {:?} → {}", self.path, next);
        Ok(true)
    }

    /// Delete the file; the next run starts from the window start.
    pub fn reset(&self) -> Result<bool, PipelineError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Removed checkpoint {:?}", self.path);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

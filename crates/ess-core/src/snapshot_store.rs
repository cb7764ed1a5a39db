//! File-backed snapshot store.
//!
//! One writer (the capture daemon) replaces the file on every tick; readers
//! (the gate) only read it. Writes go to a sibling temp file that is then
//! renamed over the target, so a reader sees either the previous complete
//! record or the new one.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use ess_types::Snapshot;

use crate::error::PipelineError;

/// Handle to the snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl SnapshotStore {
    /// Create a store for `path`. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        Self {
            path,
            tmp_path: PathBuf::from(tmp),
        }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the snapshot file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SnapshotIo`] if serialization, the temp-file
    /// write, or the rename fails.
    pub fn write(&self, snapshot: &Snapshot) -> Result<(), PipelineError> {
        let bytes = serde_json::to_vec(snapshot).map_err(|e| self.io_error(&e))?;
        let mut file = fs::File::create(&self.tmp_path).map_err(|e| self.io_error(&e))?;
        file.write_all(&bytes).map_err(|e| self.io_error(&e))?;
        file.sync_all().map_err(|e| self.io_error(&e))?;
        drop(file);
        fs::rename(&self.tmp_path, &self.path).map_err(|e| self.io_error(&e))?;
        Ok(())
    }

    /// Read the latest snapshot.
    ///
    /// Returns `Ok(None)` if no snapshot has been written yet.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SnapshotIo`] if the file exists but cannot
    /// be read or parsed.
    pub fn read(&self) -> Result<Option<Snapshot>, PipelineError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(&e)),
        };
        Snapshot::from_json_slice(&bytes)
            .map(Some)
            .map_err(|e| self.io_error(&e))
    }

    fn io_error(&self, err: &dyn std::fmt::Display) -> PipelineError {
        PipelineError::SnapshotIo {
            path: self.path.clone(),
            reason: err.to_string(),
        }
    }
}

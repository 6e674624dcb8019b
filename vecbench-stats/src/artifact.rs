//! Artifact Location
//!
//! Metric snapshots are written as one JSON document per metric. The target
//! directory is validated once at startup so that an unusable location is a
//! startup failure instead of a surprise at shutdown.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while writing metric artifacts
#[derive(Debug, Error)]
pub enum PersistError {
    /// Filesystem operation failed
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being written
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Snapshot could not be encoded
    #[error("Failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A directory known to accept artifact writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDir {
    path: PathBuf,
}

impl ArtifactDir {
    /// Create the directory if needed and check that it is writable
    pub fn prepare(path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let path = path.into();
        std::fs::create_dir_all(&path).map_err(|source| PersistError::Io {
            path: path.clone(),
            source,
        })?;

        // Writability check with an anonymous file, removed on drop
        tempfile::tempfile_in(&path).map_err(|source| PersistError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(Self { path })
    }

    /// Directory path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

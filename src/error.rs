// ===============================
// src/error.rs
// ===============================
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode event record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl EventLogError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EventLogError::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, EventLogError>;

//! Typed error hierarchy for the session core.
//!
//! Two top-level enums cover the two subsystems:
//! - `StoreError`: on-disk persistence failures
//! - `SessionError`: lifecycle-level failures (wraps `StoreError`)
//!
//! `NotFound` is deliberately not part of the error surface for reads that
//! callers are expected to branch on: `load`, `load_metadata_only` and
//! `resume_session` return `Ok(None)` for a missing session, and `delete`
//! returns `Ok(false)`. `StoreError::NotFound` exists for `append`, where
//! writing to a session that was never saved is a caller bug.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the on-disk persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No session file for session {session_id} under {path}")]
    NotFound { session_id: String, path: PathBuf },

    #[error("Corrupt session header in {path}: {source}")]
    CorruptHeader {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize session record: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl StoreError {
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Errors from the session lifecycle layer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No active session; create or resume one first")]
    NoActiveSession,

    #[error("Fork source session {session_id} not found")]
    ForkSourceNotFound { session_id: String },

    #[error("Compaction failed: {0}")]
    Compaction(#[source] anyhow::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

//! Error taxonomy shared by every boundary of the sync engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by fetch, download, state and orchestration calls.
///
/// Only [`SyncError::Configuration`], [`SyncError::StateLocked`] and state-load
/// [`SyncError::Io`] are fatal to a batch; everything else is contained at the
/// target or asset level by the orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("malformed state document: {0}")]
    StateParse(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("state file {0} is locked by another run")]
    StateLocked(PathBuf),

    #[error("asset name {0:?} is not a single path segment")]
    UnsafeAssetName(String),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn transport(url: &str, err: reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            format!("timed out: {err}")
        } else {
            err.to_string()
        };
        SyncError::Transport {
            url: url.to_string(),
            reason,
        }
    }

    /// Whether this error must abort the whole batch rather than one target or asset.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Configuration(_) | SyncError::StateLocked(_) | SyncError::Io { .. }
        )
    }
}

#![forbid(unsafe_code)]

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error type shared by every stage of an ingest run.
///
/// Only `Auth`, `Config` and `Io` abort a run; `TransientFetch` stays local to
/// one page or one download, and `MalformedStore` is downgraded to an empty
/// store by the loader.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("authentication failed for {origin}: {reason}")]
    Auth { origin: String, reason: String },
    #[error("request to {target} failed: {reason}")]
    TransientFetch { target: String, reason: String },
    #[error("metadata store {} is unreadable: {reason}", path.display())]
    MalformedStore { path: PathBuf, reason: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl IngestError {
    pub(crate) fn transient(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::TransientFetch {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn auth(origin: &str, reason: impl Into<String>) -> Self {
        Self::Auth {
            origin: origin.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

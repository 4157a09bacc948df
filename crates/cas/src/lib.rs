//! Content-addressed storage for Veritas.
//!
//! Parsed artifacts (symbol indexes, fetched documents, tool outputs) are
//! stored under `sha256(content) ⊕ parser_version` so they can be reused
//! across turns and sessions:
//!
//! - keys are a pure function of their inputs
//! - writes are idempotent and never rewrite an existing entry
//! - a miss is `Ok(None)`, never an error
//! - invalidation is a parser-version bump

pub mod key;
pub mod store;

pub use key::{CasKey, content_hash};
pub use store::{CasEntry, CasMetadata, ContentStore, FileStore, MemoryStore};

use std::path::Path;

/// Errors from the content store.
#[derive(Debug, thiserror::Error)]
pub enum CasError {
    #[error("I/O error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("invalid CAS key: {0}")]
    InvalidKey(String),

    #[error("invalid parser version: {0:?}")]
    InvalidVersion(String),

    #[error("stored blob does not match its key: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CasError {
    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

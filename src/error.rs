//! Error handling utilities shared across the crate.

use std::path::PathBuf;

use thiserror::Error;

/// Convenient result type used throughout the crate.
pub type Result<T, E = WikitokError> = std::result::Result<T, E>;

/// Domain-specific error describing failures while indexing, tokenizing, or streaming.
#[derive(Debug, Error)]
pub enum WikitokError {
    /// Pipeline configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Filesystem IO error with optional context path.
    #[error("io error while processing {path:?}: {source}")]
    Io {
        /// Underlying IO error returned by the standard library.
        source: std::io::Error,
        /// Target path associated with the IO failure if available.
        path: Option<PathBuf>,
    },
    /// The block index was malformed or contained no offsets.
    #[error("malformed block index: {0}")]
    Format(String),
    /// The token cache contained a record that could not be decoded.
    #[error("corrupt token cache at byte {offset}: {reason}")]
    CorruptCache {
        /// Byte offset of the offending record header.
        offset: u64,
        /// Human readable description of the problem.
        reason: String,
    },
    /// A checkpoint was written by an incompatible schema version.
    #[error("checkpoint {path:?} has schema version {found}, expected {expected}")]
    SchemaMismatch {
        /// Checkpoint file that was rejected.
        path: PathBuf,
        /// Version recorded in the file.
        found: u32,
        /// Version this build reads and writes.
        expected: u32,
    },
    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for WikitokError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl WikitokError {
    /// Helper constructor that attaches an optional path when wrapping IO errors.
    pub fn io(source: std::io::Error, path: Option<PathBuf>) -> Self {
        Self::Io { source, path }
    }
}

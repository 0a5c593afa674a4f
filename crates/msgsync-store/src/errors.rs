//! Error types for store access.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading the message store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be opened (missing file, no read permission).
    #[error("cannot open message store at {path}: {source}")]
    Unavailable {
        /// Path of the store that failed to open.
        path: PathBuf,
        /// Underlying `SQLite` error.
        source: rusqlite::Error,
    },

    /// A query against an open store failed.
    #[error("store query error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

//! Structured error types for storage operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the connection-scoped stores.
///
/// Validation variants are returned before any identifier reaches a SQL
/// string, so a caller holding one of them knows nothing was executed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is not open: {path}")]
    NotOpen { path: PathBuf },

    #[error("exchange must be alphabetic: '{0}'")]
    InvalidExchange(String),

    #[error("symbol must be alphanumeric and non-empty: '{0}'")]
    InvalidSymbol(String),

    #[error("date must be in the format yyyy-mm-dd: '{0}'")]
    InvalidDateFormat(String),

    #[error("invalid table or column name: '{0}'")]
    InvalidIdentifier(String),

    #[error("no table '{table}' in {path}")]
    TableNotFound { table: String, path: PathBuf },

    #[error("failed to create directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

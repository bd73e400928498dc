use thiserror::Error;

/// Errors produced by the SQLite layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A column name that the table does not have.
    #[error("Unknown column {table}.{column}")]
    UnknownColumn { table: &'static str, column: String },

    /// A value that cannot be stored in its column.
    #[error("Invalid value for {table}.{column}: {reason}")]
    InvalidValue {
        table: &'static str,
        column: String,
        reason: String,
    },

    /// A required column was absent from an inserted row.
    #[error("Missing required column {table}.{column}")]
    MissingColumn { table: &'static str, column: String },

    /// The connection mutex was poisoned by a panicking writer.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Errors reported by a [`Backend`](crate::Backend) implementation.
///
/// Every backend call reports structured success or failure; callers log
/// the failure and treat the operation as not-happened.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The service refused the request (permission, constraint, policy).
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The service could not be reached or answered garbage.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

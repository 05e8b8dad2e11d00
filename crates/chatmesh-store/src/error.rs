use chatmesh_shared::ProtocolError;
use thiserror::Error;

/// Errors produced by the store layer.
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

    /// A write collided with an existing row in a way the caller must resolve.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The operation is not allowed in the current state.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A stored enum or timestamp could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

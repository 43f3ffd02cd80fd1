//! Custom error types for the common library
//!
//! This module defines the record-store error taxonomy shared across the
//! services. `NotFound` is an expected outcome, not a failure; everything
//! else carries enough context for the caller to log.

use thiserror::Error;

/// Custom error type for record store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested record (or the whole table) does not exist
    #[error("record not found")]
    NotFound,

    /// Failed to open the backing file
    #[error("store open error: path '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: redb::DatabaseError,
    },

    /// Failed to begin a transaction
    #[error("store transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Failed to open the user table inside a transaction
    #[error("store table error: {0}")]
    Table(redb::TableError),

    /// Read or write inside a transaction failed
    #[error("store access error: {0}")]
    Storage(#[from] redb::StorageError),

    /// Commit failed; the transaction was rolled back
    #[error("store commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// A stored value could not be encoded or decoded
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Write attempted through a read-only handle
    #[error("store opened read-only")]
    ReadOnly,
}

/// Type alias for Result with StoreError
pub type StoreResult<T> = Result<T, StoreError>;

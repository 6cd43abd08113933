//! Crate-wide error taxonomy (spec §7).
//!
//! Every fallible operation in the core returns [`StoreError`]. Variants map
//! 1:1 onto the "Kind" column of the error-handling table: `NotFound` never
//! masks an underlying I/O failure, `IncompleteFile` is fatal to the caller
//! and not retryable without finishing ingest, `Corrupt` surfaces a failed
//! decrypt/decompress, and so on.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("hash not found: {0}")]
    HashNotFound(String),

    #[error("evidence file is incomplete (ingest never finished): {0}")]
    IncompleteFile(String),

    #[error("incompatible filesystem in partition at offset {offset}: {reason}")]
    IncompatibleFilesystem { offset: u64, reason: String },

    #[error("corrupt chunk {hash}: {reason}")]
    Corrupt { hash: String, reason: String },

    #[error("search query too short (minimum 2 bytes)")]
    SmallQuery,

    #[error("internal range {start}..{end} is not contained in the parent artifact's span")]
    InternalRangeViolation { start: u64, end: u64 },

    #[error("encryption key is required for this operation but none was provided")]
    MissingKey,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("record encoding error: {0}")]
    Encoding(#[from] rmp_serde::encode::Error),

    #[error("record decoding error: {0}")]
    Decoding(#[from] rmp_serde::decode::Error),

    #[error("kv store error: {0}")]
    Kv(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<redb::Error> for StoreError {
    fn from(e: redb::Error) -> Self {
        StoreError::Kv(e.to_string())
    }
}

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        StoreError::Kv(e.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        StoreError::Kv(e.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        StoreError::Kv(e.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        StoreError::Kv(e.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        StoreError::Kv(e.to_string())
    }
}

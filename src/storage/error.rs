//! Storage layer error types.

use crate::catalog::TableId;
use crate::storage::page::PageId;
use thiserror::Error;

/// Errors that can occur in the storage and concurrency layers.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The transaction would complete a wait-for cycle and must abort.
    /// Recoverable: the caller is expected to abort via
    /// `transaction_complete(tid, false)` and may retry the transaction.
    #[error("transaction {0} aborted: deadlock detected")]
    TransactionAborted(crate::transaction::TransactionId),

    /// Every cached page is dirty, so none can be evicted under NO-STEAL.
    #[error("buffer pool is full: all cached pages are dirty")]
    BufferPoolFull,

    #[error("no such table: {0:?}")]
    NoSuchTable(TableId),

    #[error("no such table: {0}")]
    NoSuchTableName(String),

    #[error("page {0} does not exist")]
    PageNotFound(PageId),

    #[error("invalid slot {slot} (page has {num_slots} slots)")]
    InvalidSlot { slot: u16, num_slots: u16 },

    #[error("slot {0} is empty")]
    SlotEmpty(u16),

    #[error("page is full: no empty slot")]
    PageFull,

    #[error("tuple schema does not match table schema")]
    SchemaMismatch,

    #[error("tuple has no stored location")]
    TupleNotStored,

    #[error("text value of {len} bytes exceeds the {max} byte maximum")]
    TextTooLong { len: usize, max: usize },

    #[error("invalid page encoding: {0}")]
    Corrupted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

//! Storage layer error types.

use crate::storage::page::PageId;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Buffer pool is full: every frame is pinned")]
    BufferPoolFull,

    #[error("Out of disk space: all {max_extents} extents are full")]
    OutOfSpace { max_extents: usize },

    #[error("Corrupted storage metadata: {0}")]
    Corrupted(String),

    #[error("Page type mismatch for page {page_id}: expected {expected}, found tag {found}")]
    PageTypeMismatch {
        page_id: PageId,
        expected: &'static str,
        found: u8,
    },

    #[error("Page overflow: requires {required} bytes but a page holds {available}")]
    PageOverflow { required: usize, available: usize },

    #[error("Invalid buffer size: expected {expected}, got {actual}")]
    InvalidBufferSize { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

//! Error types for Kestrel.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using KestrelError.
pub type Result<T> = std::result::Result<T, KestrelError>;

/// Errors that can occur in Kestrel operations.
#[derive(Debug, Error)]
pub enum KestrelError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid page: {page_id}")]
    InvalidPage { page_id: PageId },

    #[error("File is open: {0}")]
    FileOpen(String),

    // Buffer manager errors
    #[error("Page not found in buffer pool: {page_id}")]
    PageNotFound { page_id: PageId },

    #[error("Duplicate page table entry: {page_id}")]
    DuplicateKey { page_id: PageId },

    #[error("Page not pinned: {page_id}")]
    PageNotPinned { page_id: PageId },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page still pinned: {page_id}")]
    PagePinned { page_id: PageId },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KestrelError {
    /// Returns true for failures raised by a file rather than by the buffer manager.
    pub fn is_io(&self) -> bool {
        matches!(self, KestrelError::Io(_) | KestrelError::InvalidPage { .. })
    }
}

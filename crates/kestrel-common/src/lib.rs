//! Kestrel common types, errors, and configuration.
//!
//! This crate provides shared definitions used by the storage and buffer crates.

pub mod config;
pub mod error;
pub mod page;

pub use config::StorageConfig;
pub use error::{KestrelError, Result};
pub use page::{FileId, PageBuf, PageId, PageNum, PAGE_SIZE};

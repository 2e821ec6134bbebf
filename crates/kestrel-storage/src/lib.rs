//! Page file storage for Kestrel.
//!
//! This crate provides:
//! - The `PageFile` trait the buffer manager reads and writes through
//! - `DiskFile`, a page file backed by one OS file
//! - `DiskManager` for opening, closing and destroying named files
//! - `MemoryFile`, an instrumented in-memory page file

mod disk;
mod file;
mod memory;

pub use disk::{DiskFile, DiskManager, DiskManagerConfig};
pub use file::PageFile;
pub use memory::MemoryFile;

//! Buffer pool for Kestrel.
//!
//! This crate provides:
//! - Fixed-size frame storage with per-frame descriptors
//! - A chained page table mapping cached pages to frames
//! - Clock (second-chance) victim selection
//! - `BufferManager`, which pins, loads, writes back and evicts pages
//!   of any `PageFile`

mod frame;
mod manager;
mod page_table;
mod replacer;

pub use frame::{FrameDescriptor, FrameId, FrameInfo};
pub use manager::{BufferManager, BufferPoolConfig, BufferPoolStats, PageHandle};
pub use page_table::{bucket_count_for, PageTable};
pub use replacer::{ClockReplacer, Replacer};

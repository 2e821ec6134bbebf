//! Page identity types shared by the storage and buffer layers.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Page size in bytes. Every file, frame and page buffer uses this size.
pub const PAGE_SIZE: usize = 8 * 1024;

/// Page number within a single file (0-indexed).
pub type PageNum = u32;

/// A fixed-size page buffer.
pub type PageBuf = [u8; PAGE_SIZE];

static NEXT_FILE_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of an open page file.
///
/// File ids are handed out by [`FileId::allocate`] and are unique for the
/// lifetime of the process, so two open handles never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u32);

impl FileId {
    /// Returns a fresh, process-unique file id.
    pub fn allocate() -> Self {
        Self(NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "file:{}", self.0)
    }
}

/// Unique identifier for a cached page: owning file plus page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    /// Owning file.
    pub file_id: FileId,
    /// Page number within the file.
    pub page_num: PageNum,
}

impl PageId {
    /// Creates a new PageId.
    pub fn new(file_id: FileId, page_num: PageNum) -> Self {
        Self { file_id, page_num }
    }

    /// Returns the PageId packed into a single u64.
    /// Layout: upper 32 bits = file id, lower 32 bits = page number.
    pub fn as_u64(&self) -> u64 {
        ((self.file_id.0 as u64) << 32) | (self.page_num as u64)
    }

    /// Creates a PageId from its packed u64 form.
    pub fn from_u64(value: u64) -> Self {
        Self {
            file_id: FileId((value >> 32) as u32),
            page_num: value as u32,
        }
    }

    /// Byte offset of this page inside its file.
    pub fn byte_offset(&self) -> u64 {
        self.page_num as u64 * PAGE_SIZE as u64
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id.0, self.page_num)
    }
}

//! In-memory page files.

use crate::file::PageFile;
use kestrel_common::page::{FileId, PageBuf, PageId, PageNum, PAGE_SIZE};
use kestrel_common::{KestrelError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::io::{Error as IoError, ErrorKind};

/// A page file held entirely in memory.
///
/// Behaves like `DiskFile` (same allocation, disposal and validation rules)
/// and additionally records every read and write, so tests can observe
/// exactly which pages the buffer manager wrote back. Reads and writes can be
/// made to fail to exercise error propagation.
pub struct MemoryFile {
    file_id: FileId,
    inner: Mutex<MemoryFileInner>,
}

#[derive(Default)]
struct MemoryFileInner {
    pages: Vec<Box<PageBuf>>,
    free_pages: BTreeSet<PageNum>,
    reads: u64,
    writes: u64,
    writes_per_page: HashMap<PageNum, u64>,
    fail_reads: bool,
    fail_writes: bool,
}

impl MemoryFile {
    /// Creates an empty file with a fresh identity.
    pub fn new() -> Self {
        Self {
            file_id: FileId::allocate(),
            inner: Mutex::new(MemoryFileInner::default()),
        }
    }

    /// Creates a file with `num_pages` zeroed pages already allocated.
    pub fn with_pages(num_pages: u32) -> Self {
        let file = Self::new();
        {
            let mut inner = file.inner.lock();
            inner.pages = (0..num_pages).map(|_| Box::new([0u8; PAGE_SIZE])).collect();
        }
        file
    }

    /// Number of successful page reads.
    pub fn read_count(&self) -> u64 {
        self.inner.lock().reads
    }

    /// Number of successful page writes.
    pub fn write_count(&self) -> u64 {
        self.inner.lock().writes
    }

    /// Number of successful writes to one page.
    pub fn writes_for(&self, page_num: PageNum) -> u64 {
        self.inner
            .lock()
            .writes_per_page
            .get(&page_num)
            .copied()
            .unwrap_or(0)
    }

    /// Makes subsequent reads fail with an I/O error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.lock().fail_reads = fail;
    }

    /// Makes subsequent writes fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Returns a copy of a page's stored bytes, bypassing the counters.
    pub fn snapshot(&self, page_num: PageNum) -> Option<Box<PageBuf>> {
        let inner = self.inner.lock();
        if inner.free_pages.contains(&page_num) {
            return None;
        }
        inner.pages.get(page_num as usize).cloned()
    }

    fn check_allocated(&self, inner: &MemoryFileInner, page_num: PageNum) -> Result<()> {
        if page_num as usize >= inner.pages.len() || inner.free_pages.contains(&page_num) {
            return Err(KestrelError::InvalidPage {
                page_id: PageId::new(self.file_id, page_num),
            });
        }
        Ok(())
    }
}

impl Default for MemoryFile {
    fn default() -> Self {
        Self::new()
    }
}

impl PageFile for MemoryFile {
    fn file_id(&self) -> FileId {
        self.file_id
    }

    fn read_page(&self, page_num: PageNum, buf: &mut PageBuf) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_reads {
            return Err(IoError::new(ErrorKind::Other, "injected read failure").into());
        }
        self.check_allocated(&inner, page_num)?;

        buf.copy_from_slice(&inner.pages[page_num as usize][..]);
        inner.reads += 1;
        Ok(())
    }

    fn write_page(&self, page_num: PageNum, data: &PageBuf) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(IoError::new(ErrorKind::Other, "injected write failure").into());
        }
        self.check_allocated(&inner, page_num)?;

        inner.pages[page_num as usize].copy_from_slice(data);
        inner.writes += 1;
        *inner.writes_per_page.entry(page_num).or_insert(0) += 1;
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageNum> {
        let mut inner = self.inner.lock();
        if let Some(page_num) = inner.free_pages.pop_first() {
            inner.pages[page_num as usize].fill(0);
            return Ok(page_num);
        }
        let page_num = inner.pages.len() as PageNum;
        inner.pages.push(Box::new([0u8; PAGE_SIZE]));
        Ok(page_num)
    }

    fn dispose_page(&self, page_num: PageNum) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_allocated(&inner, page_num)?;
        inner.free_pages.insert(page_num);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryFile")
            .field("file_id", &self.file_id)
            .field("pages", &inner.pages.len())
            .field("free_pages", &inner.free_pages.len())
            .finish()
    }
}

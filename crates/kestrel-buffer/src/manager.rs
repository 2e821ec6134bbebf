//! Buffer manager.

use crate::frame::{Frame, FrameDescriptor, FrameId, FrameInfo};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use kestrel_common::page::{PageBuf, PageId, PageNum, PAGE_SIZE};
use kestrel_common::{KestrelError, Result, StorageConfig};
use kestrel_storage::PageFile;
use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::fmt::Write as _;
use std::sync::Arc;
use sysinfo::System;
use tracing::{debug, error, trace, warn};

/// Configuration for the buffer manager.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

impl From<&StorageConfig> for BufferPoolConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            num_frames: config.buffer_pool_pages,
        }
    }
}

/// Fixed-capacity page cache between page users and page files.
///
/// Manages `num_frames` frames with:
/// - A frame descriptor table (owner, pin count, dirty/valid/reference bits)
/// - A page table mapping `(file, page number)` to frames
/// - Clock replacement with write-back of dirty victims
///
/// The descriptor table, page table and clock hand sit behind one mutex and
/// every operation holds it from start to finish, storage I/O included.
/// Frame bytes have their own per-frame locks so that `PageHandle`s can be
/// used without the manager lock. Lock order: manager mutex, then frame lock.
/// Callers may hold a frame guard while calling into the manager, so the
/// manager only takes frame locks of unpinned frames. Teardown is the
/// exception and reaches the bytes through `&mut self`.
///
/// A pin is the only guarantee that a frame keeps its page: callers must
/// `unpin_page` once per successful `fetch_page`/`allocate_page`.
pub struct BufferManager {
    /// Configuration.
    config: BufferPoolConfig,
    /// Raw frame storage, indexed by frame id.
    frames: Vec<Frame>,
    /// Everything the coarse lock protects.
    state: Mutex<PoolState>,
}

struct PoolState {
    descriptors: Vec<FrameDescriptor>,
    page_table: PageTable,
    replacer: ClockReplacer,
}

impl PoolState {
    /// Obtains a frame for a new page, evicting if needed.
    ///
    /// A dirty victim is written back first; if that write fails the victim
    /// keeps its page and the error is returned. On success the returned
    /// frame is invalid and unmapped.
    fn allocate_frame(&mut self, frames: &[Frame]) -> Result<FrameId> {
        let frame_id = self
            .replacer
            .pick_victim(&mut self.descriptors)
            .ok_or(KestrelError::BufferPoolFull)?;

        let desc = &mut self.descriptors[frame_id.index()];
        if !desc.is_valid() {
            return Ok(frame_id);
        }

        let page_id = resident_page(desc)?;
        if desc.is_dirty() {
            write_back(desc, &frames[frame_id.index()].data().read())?;
        }
        self.page_table.remove(page_id)?;
        desc.clear();

        trace!(%page_id, %frame_id, "evicted page");
        Ok(frame_id)
    }
}

/// Frame count for a pool using 25% of `available_bytes`, at least 1,000.
fn frames_for_memory(available_bytes: u64) -> usize {
    let target_bytes = available_bytes / 4;
    let frames = (target_bytes / PAGE_SIZE as u64).min(u64::from(u32::MAX));
    usize::try_from(frames).unwrap_or(usize::MAX).max(1_000)
}

/// Clears the dirty bit after a successful write-back, or logs the failure
/// and keeps the first one.
fn record_write_back(
    desc: &mut FrameDescriptor,
    result: Result<()>,
    flushed: &mut usize,
    first_error: &mut Option<KestrelError>,
) {
    match result {
        Ok(()) => {
            desc.clear_dirty();
            *flushed += 1;
        }
        Err(e) => {
            error!(frame_id = %desc.frame_id(), error = %e, "write-back failed");
            first_error.get_or_insert(e);
        }
    }
}

/// Returns the page a valid descriptor holds.
fn resident_page(desc: &FrameDescriptor) -> Result<PageId> {
    desc.page_id().ok_or_else(|| {
        KestrelError::Internal(format!("{} is valid but holds no page", desc.frame_id()))
    })
}

/// Writes a frame's bytes to the file owning its page.
fn write_back(desc: &FrameDescriptor, data: &PageBuf) -> Result<()> {
    let page_id = resident_page(desc)?;
    let owner = desc.owner().ok_or_else(|| {
        KestrelError::Internal(format!("{} is valid but has no owner", desc.frame_id()))
    })?;

    owner.write_page(page_id.page_num, data)?;
    debug!(%page_id, frame_id = %desc.frame_id(), "wrote back dirty page");
    Ok(())
}

impl BufferManager {
    /// Creates a new buffer manager. Fails if `num_frames` is zero.
    pub fn new(config: BufferPoolConfig) -> Result<Self> {
        let num_frames = config.num_frames;
        if num_frames == 0 {
            return Err(KestrelError::ConfigError(
                "buffer pool needs at least one frame".to_string(),
            ));
        }
        if num_frames > u32::MAX as usize {
            return Err(KestrelError::InvalidParameter {
                name: "num_frames".to_string(),
                value: num_frames.to_string(),
            });
        }

        let frames: Vec<_> = (0..num_frames).map(|_| Frame::new()).collect();
        let descriptors: Vec<_> = (0..num_frames)
            .map(|i| FrameDescriptor::new(FrameId(i as u32)))
            .collect();

        debug!(num_frames, "created buffer manager");

        Ok(Self {
            config,
            frames,
            state: Mutex::new(PoolState {
                descriptors,
                page_table: PageTable::new(num_frames),
                replacer: ClockReplacer::new(num_frames),
            }),
        })
    }

    /// Creates a buffer manager sized to 25% of available system RAM.
    ///
    /// Uses at least 1,000 frames.
    pub fn auto_sized() -> Result<Self> {
        let mut sys = System::new();
        sys.refresh_memory();

        Self::new(BufferPoolConfig {
            num_frames: frames_for_memory(sys.available_memory()),
        })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Checks if a page is in the buffer pool.
    pub fn contains<F: PageFile + ?Sized>(&self, file: &F, page_num: PageNum) -> bool {
        let page_id = PageId::new(file.file_id(), page_num);
        self.state.lock().page_table.contains(page_id)
    }

    fn handle(&self, frame_id: FrameId, page_id: PageId) -> PageHandle<'_> {
        PageHandle {
            page_id,
            frame_id,
            frame: &self.frames[frame_id.index()],
        }
    }

    /// Fetches a page, reading it from `file` if it is not cached.
    ///
    /// The page is pinned before being returned.
    pub fn fetch_page<F: PageFile + 'static>(
        &self,
        file: &Arc<F>,
        page_num: PageNum,
    ) -> Result<PageHandle<'_>> {
        self.fetch_with(&**file, || -> Arc<dyn PageFile> { file.clone() }, page_num)
    }

    /// `fetch_page` for a file shared as a trait object.
    pub fn fetch_page_dyn(
        &self,
        file: &Arc<dyn PageFile>,
        page_num: PageNum,
    ) -> Result<PageHandle<'_>> {
        self.fetch_with(&**file, || Arc::clone(file), page_num)
    }

    /// Shared body of the fetch entry points. `owner` is only called on a
    /// miss, to get the handle the frame keeps.
    fn fetch_with(
        &self,
        file: &dyn PageFile,
        owner: impl FnOnce() -> Arc<dyn PageFile>,
        page_num: PageNum,
    ) -> Result<PageHandle<'_>> {
        let page_id = PageId::new(file.file_id(), page_num);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(frame_id) = state.page_table.get(page_id) {
            state.descriptors[frame_id.index()].pin();
            trace!(%page_id, %frame_id, "buffer pool hit");
            return Ok(self.handle(frame_id, page_id));
        }

        debug!(%page_id, "buffer pool miss, reading page");
        let frame_id = state.allocate_frame(&self.frames)?;
        {
            let mut data = self.frames[frame_id.index()].data().write();
            file.read_page(page_num, &mut data)?;
        }

        state.page_table.insert(page_id, frame_id)?;
        state.descriptors[frame_id.index()].set(owner(), page_num);

        Ok(self.handle(frame_id, page_id))
    }

    /// Releases one pin on a cached page, marking it dirty if requested.
    ///
    /// Fails with `PageNotFound` if the page is not cached and with
    /// `PageNotPinned` if it has no pins.
    pub fn unpin_page<F: PageFile + ?Sized>(
        &self,
        file: &F,
        page_num: PageNum,
        is_dirty: bool,
    ) -> Result<()> {
        let page_id = PageId::new(file.file_id(), page_num);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let frame_id = state.page_table.lookup(page_id)?;
        let desc = &mut state.descriptors[frame_id.index()];

        if !desc.unpin() {
            return Err(KestrelError::PageNotPinned { page_id });
        }
        if is_dirty {
            desc.mark_dirty();
        }
        Ok(())
    }

    /// Allocates a new page in `file` and caches it zero-filled.
    ///
    /// The frame is secured before the file reserves a page number, so a
    /// full pool fails without consuming a page of the file. The page is
    /// pinned before being returned.
    pub fn allocate_page<F: PageFile + 'static>(
        &self,
        file: &Arc<F>,
    ) -> Result<(PageNum, PageHandle<'_>)> {
        self.allocate_with(&**file, || -> Arc<dyn PageFile> { file.clone() })
    }

    /// `allocate_page` for a file shared as a trait object.
    pub fn allocate_page_dyn(&self, file: &Arc<dyn PageFile>) -> Result<(PageNum, PageHandle<'_>)> {
        self.allocate_with(&**file, || Arc::clone(file))
    }

    fn allocate_with(
        &self,
        file: &dyn PageFile,
        owner: impl FnOnce() -> Arc<dyn PageFile>,
    ) -> Result<(PageNum, PageHandle<'_>)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // An unused frame stays invalid if the file cannot allocate.
        let frame_id = state.allocate_frame(&self.frames)?;
        let page_num = file.allocate_page()?;
        let page_id = PageId::new(file.file_id(), page_num);

        self.frames[frame_id.index()].data().write().fill(0);
        state.page_table.insert(page_id, frame_id)?;
        state.descriptors[frame_id.index()].set(owner(), page_num);

        debug!(%page_id, %frame_id, "allocated page");
        Ok((page_num, self.handle(frame_id, page_id)))
    }

    /// Drops a page from the pool, if cached, and disposes it in `file`.
    ///
    /// The cached copy is discarded without write-back. Only the file's
    /// failure is reported.
    pub fn dispose_page<F: PageFile + ?Sized>(&self, file: &F, page_num: PageNum) -> Result<()> {
        let page_id = PageId::new(file.file_id(), page_num);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(frame_id) = state.page_table.get(page_id) {
            let desc = &mut state.descriptors[frame_id.index()];
            if desc.is_pinned() {
                warn!(%page_id, pin_count = desc.pin_count(), "disposing pinned page");
            }
            desc.clear();
            state.page_table.remove(page_id)?;
        }

        file.dispose_page(page_num)
    }

    /// Writes back and drops every cached page of `file`.
    ///
    /// Fails with `PagePinned`, changing nothing, if any page of the file is
    /// pinned. A write failure part way leaves the pages already processed
    /// written back and dropped.
    pub fn flush_file<F: PageFile + ?Sized>(&self, file: &F) -> Result<()> {
        let file_id = file.file_id();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let owned = |desc: &FrameDescriptor| {
            desc.is_valid() && desc.page_id().is_some_and(|p| p.file_id == file_id)
        };

        if let Some(desc) = state
            .descriptors
            .iter()
            .find(|&desc| owned(desc) && desc.is_pinned())
        {
            return Err(KestrelError::PagePinned {
                page_id: resident_page(desc)?,
            });
        }

        let mut dropped = 0;
        for (i, desc) in state.descriptors.iter_mut().enumerate() {
            if !owned(&*desc) {
                continue;
            }
            let page_id = resident_page(desc)?;
            if desc.is_dirty() {
                write_back(desc, &self.frames[i].data().read())?;
            }
            state.page_table.remove(page_id)?;
            desc.clear();
            dropped += 1;
        }

        debug!(%file_id, dropped, "flushed file");
        Ok(())
    }

    /// Writes a cached page back to its file if dirty, keeping it cached.
    ///
    /// Returns true if the page was written. Fails with `PagePinned` if the
    /// page is pinned, since its holder may be writing to it.
    pub fn flush_page<F: PageFile + ?Sized>(&self, file: &F, page_num: PageNum) -> Result<bool> {
        let page_id = PageId::new(file.file_id(), page_num);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let frame_id = state.page_table.lookup(page_id)?;
        let desc = &mut state.descriptors[frame_id.index()];
        if desc.is_pinned() {
            return Err(KestrelError::PagePinned { page_id });
        }
        if !desc.is_dirty() {
            return Ok(false);
        }

        write_back(desc, &self.frames[frame_id.index()].data().read())?;
        desc.clear_dirty();
        Ok(true)
    }

    /// Writes back every dirty unpinned page, keeping them cached.
    ///
    /// Pinned pages are skipped and stay dirty. Keeps going past failed
    /// writes. Returns the number of pages written, or the first error.
    pub fn flush_all(&self) -> Result<usize> {
        let mut guard = self.state.lock();
        let mut flushed = 0;
        let mut skipped = 0;
        let mut first_error = None;

        for (i, desc) in guard.descriptors.iter_mut().enumerate() {
            if !desc.is_valid() || !desc.is_dirty() {
                continue;
            }
            if desc.is_pinned() {
                skipped += 1;
                continue;
            }
            let result = write_back(desc, &self.frames[i].data().read());
            record_write_back(desc, result, &mut flushed, &mut first_error);
        }

        if skipped > 0 {
            trace!(skipped, "flush skipped pinned dirty pages");
        }
        first_error.map_or(Ok(flushed), Err)
    }

    /// Writes back every dirty page, pinned or not.
    ///
    /// Takes `&mut self`, so no `PageHandle` is alive and the frame bytes are
    /// read without locking.
    fn write_back_on_teardown(&mut self) -> Result<usize> {
        let state = self.state.get_mut();
        let mut flushed = 0;
        let mut first_error = None;

        for (desc, frame) in state.descriptors.iter_mut().zip(self.frames.iter_mut()) {
            if !desc.is_valid() || !desc.is_dirty() {
                continue;
            }
            let result = write_back(desc, frame.data_mut());
            record_write_back(desc, result, &mut flushed, &mut first_error);
        }

        first_error.map_or(Ok(flushed), Err)
    }

    /// Shuts the manager down, writing back every dirty page regardless of
    /// pins.
    ///
    /// Unlike dropping the manager, this reports a failed write-back.
    pub fn close(mut self) -> Result<()> {
        self.write_back_on_teardown().map(|_| ())
    }

    /// Returns a snapshot of one frame's descriptor.
    pub fn frame_info(&self, frame_id: FrameId) -> Option<FrameInfo> {
        self.state
            .lock()
            .descriptors
            .get(frame_id.index())
            .map(FrameDescriptor::info)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock();
        let mut stats = BufferPoolStats {
            total_frames: self.config.num_frames,
            valid_frames: 0,
            pinned_frames: 0,
            dirty_frames: 0,
        };

        for desc in state.descriptors.iter().filter(|d| d.is_valid()) {
            stats.valid_frames += 1;
            if desc.is_pinned() {
                stats.pinned_frames += 1;
            }
            if desc.is_dirty() {
                stats.dirty_frames += 1;
            }
        }
        stats
    }

    /// Renders the frame table, one line per frame, for debugging.
    pub fn dump(&self) -> String {
        let state = self.state.lock();
        let mut out = String::from("Print buffer...\n");
        for desc in &state.descriptors {
            let _ = writeln!(out, "{}", desc.info());
        }
        out
    }

    /// Verifies the frame table and page table agree.
    ///
    /// Checks that invalid frames are unpinned, clean and unmapped, that
    /// pinned frames are valid, and that the page table maps exactly the
    /// valid frames to themselves.
    pub fn check_invariants(&self) -> Result<()> {
        let state = self.state.lock();
        let fail = |msg: String| Err(KestrelError::Internal(msg));

        let mut valid = 0;
        for desc in &state.descriptors {
            let frame_id = desc.frame_id();
            if !desc.is_valid() {
                if desc.is_pinned() || desc.is_dirty() || desc.page_id().is_some() {
                    return fail(format!("{} is invalid but not empty: {:?}", frame_id, desc));
                }
                continue;
            }

            valid += 1;
            let page_id = resident_page(desc)?;
            match state.page_table.get(page_id) {
                Some(mapped) if mapped == frame_id => {}
                Some(mapped) => {
                    return fail(format!(
                        "{} holds {} but table maps it to {}",
                        frame_id, page_id, mapped
                    ))
                }
                None => return fail(format!("{} holds unmapped page {}", frame_id, page_id)),
            }
        }

        if valid != state.page_table.len() {
            return fail(format!(
                "{} valid frames but {} page table entries",
                valid,
                state.page_table.len()
            ));
        }

        let mut result = Ok(());
        state.page_table.for_each(|page_id, frame_id| {
            let holds = state
                .descriptors
                .get(frame_id.index())
                .filter(|d| d.is_valid())
                .and_then(FrameDescriptor::page_id);
            if holds != Some(page_id) {
                result = fail(format!(
                    "table maps {} to {} holding {:?}",
                    page_id, frame_id, holds
                ));
                return false;
            }
            true
        });
        result
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        // Failures are already logged.
        let _ = self.write_back_on_teardown();
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("num_frames", &self.config.num_frames)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of frames holding a page.
    pub valid_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// Reference to a pinned page's bytes.
///
/// Dropping a handle does not unpin the page; call
/// `BufferManager::unpin_page`. Do not hold a `read`/`write` guard across
/// the unpin: once unpinned, the frame may be chosen for eviction, which
/// needs to read it.
pub struct PageHandle<'a> {
    page_id: PageId,
    frame_id: FrameId,
    frame: &'a Frame,
}

impl<'a> PageHandle<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page number within its file.
    pub fn page_num(&self) -> PageNum {
        self.page_id.page_num
    }

    /// Returns the frame holding the page.
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page data.
    pub fn read(&self) -> RwLockReadGuard<'a, Box<PageBuf>> {
        self.frame.data().read()
    }

    /// Returns mutable access to page data. Unpin with `is_dirty = true`
    /// after modifying it.
    pub fn write(&self) -> RwLockWriteGuard<'a, Box<PageBuf>> {
        self.frame.data().write()
    }
}

impl std::fmt::Debug for PageHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageHandle")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_storage::MemoryFile;

    fn create_test_pool(num_frames: usize) -> BufferManager {
        BufferManager::new(BufferPoolConfig { num_frames }).unwrap()
    }

    #[test]
    fn test_buffer_manager_new() {
        let pool = create_test_pool(10);

        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.page_count(), 0);
        assert_eq!(
            pool.stats(),
            BufferPoolStats {
                total_frames: 10,
                valid_frames: 0,
                pinned_frames: 0,
                dirty_frames: 0,
            }
        );
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_buffer_manager_zero_frames() {
        let result = BufferManager::new(BufferPoolConfig { num_frames: 0 });
        assert!(matches!(result, Err(KestrelError::ConfigError(_))));
    }

    #[test]
    fn test_config_from_storage_config() {
        let storage = StorageConfig {
            buffer_pool_pages: 77,
            ..Default::default()
        };
        assert_eq!(BufferPoolConfig::from(&storage).num_frames, 77);
    }

    #[test]
    fn test_fetch_miss_then_hit() {
        let pool = create_test_pool(4);
        let file = Arc::new(MemoryFile::with_pages(4));

        let first = pool.fetch_page(&file, 2).unwrap();
        let second = pool.fetch_page(&file, 2).unwrap();

        assert_eq!(first.frame_id(), second.frame_id());
        assert_eq!(first.page_num(), 2);
        assert_eq!(file.read_count(), 1);

        let info = pool.frame_info(first.frame_id()).unwrap();
        assert_eq!(info.pin_count, 2);
        assert!(info.valid);
        assert!(info.referenced);
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_fetch_reads_file_content() {
        let pool = create_test_pool(2);
        let file = Arc::new(MemoryFile::with_pages(1));
        let mut data = [0u8; PAGE_SIZE];
        data[10] = 0x5A;
        file.write_page(0, &data).unwrap();

        let page = pool.fetch_page(&file, 0).unwrap();
        assert_eq!(page.read()[10], 0x5A);
    }

    #[test]
    fn test_fetch_read_failure_leaves_frame_free() {
        let pool = create_test_pool(2);
        let file = Arc::new(MemoryFile::with_pages(1));

        let result = pool.fetch_page(&file, 5);
        assert!(matches!(result, Err(KestrelError::InvalidPage { .. })));
        assert!(!pool.contains(&*file, 5));
        assert_eq!(pool.stats().valid_frames, 0);
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_unpin_errors() {
        let pool = create_test_pool(2);
        let file = Arc::new(MemoryFile::with_pages(2));

        assert!(matches!(
            pool.unpin_page(&*file, 0, false),
            Err(KestrelError::PageNotFound { .. })
        ));

        pool.fetch_page(&file, 0).unwrap();
        pool.unpin_page(&*file, 0, false).unwrap();
        assert!(matches!(
            pool.unpin_page(&*file, 0, false),
            Err(KestrelError::PageNotPinned { .. })
        ));
    }

    #[test]
    fn test_unpin_dirty_is_sticky() {
        let pool = create_test_pool(2);
        let file = Arc::new(MemoryFile::with_pages(1));

        let frame_id = pool.fetch_page(&file, 0).unwrap().frame_id();
        pool.fetch_page(&file, 0).unwrap();
        pool.unpin_page(&*file, 0, true).unwrap();
        pool.unpin_page(&*file, 0, false).unwrap();

        assert!(pool.frame_info(frame_id).unwrap().dirty);
    }

    #[test]
    fn test_allocate_page_zeroed_and_pinned() {
        let pool = create_test_pool(2);
        let file = Arc::new(MemoryFile::new());

        let (page_num, page) = pool.allocate_page(&file).unwrap();
        assert_eq!(page_num, 0);
        assert!(page.read().iter().all(|&b| b == 0));

        let info = pool.frame_info(page.frame_id()).unwrap();
        assert_eq!(info.pin_count, 1);
        assert!(!info.dirty);
        assert!(info.referenced);
        assert_eq!(info.page_id, Some(PageId::new(file.file_id(), 0)));
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_allocate_page_reused_frame_is_zeroed() {
        let pool = create_test_pool(1);
        let file = Arc::new(MemoryFile::new());

        let (first, page) = pool.allocate_page(&file).unwrap();
        page.write().fill(0xEE);
        pool.unpin_page(&*file, first, false).unwrap();

        let (_, page) = pool.allocate_page(&file).unwrap();
        assert!(page.read().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_allocate_when_full_keeps_file_untouched() {
        let pool = create_test_pool(1);
        let file = Arc::new(MemoryFile::new());

        pool.allocate_page(&file).unwrap();
        let result = pool.allocate_page(&file);
        assert!(matches!(result, Err(KestrelError::BufferPoolFull)));

        // The failed attempt did not consume page number 1
        pool.unpin_page(&*file, 0, false).unwrap();
        let (page_num, _) = pool.allocate_page(&file).unwrap();
        assert_eq!(page_num, 1);
    }

    #[test]
    fn test_dispose_page() {
        let pool = create_test_pool(2);
        let file = Arc::new(MemoryFile::new());

        let (page_num, _) = pool.allocate_page(&file).unwrap();
        pool.unpin_page(&*file, page_num, true).unwrap();
        pool.dispose_page(&*file, page_num).unwrap();

        assert!(!pool.contains(&*file, page_num));
        assert_eq!(file.write_count(), 0);
        assert!(file.snapshot(page_num).is_none());
        pool.check_invariants().unwrap();

        // Not cached: only the file is asked, and its error surfaces
        let result = pool.dispose_page(&*file, page_num);
        assert!(matches!(result, Err(KestrelError::InvalidPage { .. })));
    }

    #[test]
    fn test_flush_page_keeps_page_cached() {
        let pool = create_test_pool(2);
        let file = Arc::new(MemoryFile::with_pages(1));

        let page = pool.fetch_page(&file, 0).unwrap();
        page.write()[0] = 0x42;
        pool.unpin_page(&*file, 0, true).unwrap();

        assert!(pool.flush_page(&*file, 0).unwrap());
        assert!(!pool.flush_page(&*file, 0).unwrap());
        assert_eq!(file.writes_for(0), 1);
        assert_eq!(file.snapshot(0).unwrap()[0], 0x42);
        assert!(pool.contains(&*file, 0));
        assert!(!pool.frame_info(page.frame_id()).unwrap().dirty);
    }

    #[test]
    fn test_flush_page_refuses_pinned_page() {
        let pool = create_test_pool(2);
        let file = Arc::new(MemoryFile::with_pages(1));

        pool.fetch_page(&file, 0).unwrap();
        pool.fetch_page(&file, 0).unwrap();
        pool.unpin_page(&*file, 0, true).unwrap();

        let result = pool.flush_page(&*file, 0);
        assert!(matches!(result, Err(KestrelError::PagePinned { .. })));
        assert_eq!(file.write_count(), 0);
        assert_eq!(pool.stats().dirty_frames, 1);

        pool.unpin_page(&*file, 0, false).unwrap();
        assert!(pool.flush_page(&*file, 0).unwrap());
    }

    #[test]
    fn test_flush_all_skips_pinned_pages() {
        let pool = create_test_pool(4);
        let file = Arc::new(MemoryFile::with_pages(3));

        for page_num in 0..3 {
            pool.fetch_page(&file, page_num).unwrap();
        }
        pool.unpin_page(&*file, 0, true).unwrap();
        pool.unpin_page(&*file, 1, false).unwrap();
        // Page 2 stays pinned but was modified
        pool.fetch_page(&file, 2).unwrap();
        pool.unpin_page(&*file, 2, true).unwrap();

        assert_eq!(pool.flush_all().unwrap(), 1);
        assert_eq!(file.writes_for(0), 1);
        assert_eq!(file.writes_for(2), 0);
        assert_eq!(pool.stats().dirty_frames, 1);
        assert_eq!(pool.page_count(), 3);

        pool.unpin_page(&*file, 2, false).unwrap();
        assert_eq!(pool.flush_all().unwrap(), 1);
        assert_eq!(file.writes_for(2), 1);
        assert_eq!(pool.stats().dirty_frames, 0);
    }

    #[test]
    fn test_close_writes_pinned_dirty_pages() {
        let file = Arc::new(MemoryFile::with_pages(2));
        let pool = create_test_pool(2);

        let page = pool.fetch_page(&file, 0).unwrap();
        page.write()[0] = 0x21;
        pool.fetch_page(&file, 0).unwrap();
        pool.unpin_page(&*file, 0, true).unwrap();

        pool.close().unwrap();
        assert_eq!(file.writes_for(0), 1);
        assert_eq!(file.snapshot(0).unwrap()[0], 0x21);
    }

    #[test]
    fn test_dyn_file_entry_points() {
        let pool = create_test_pool(4);
        let mem = Arc::new(MemoryFile::with_pages(1));
        let file: Arc<dyn PageFile> = mem.clone();

        let by_dyn = pool.fetch_page_dyn(&file, 0).unwrap();
        let by_concrete = pool.fetch_page(&mem, 0).unwrap();
        assert_eq!(by_dyn.frame_id(), by_concrete.frame_id());
        assert_eq!(pool.frame_info(by_dyn.frame_id()).unwrap().pin_count, 2);
        assert_eq!(mem.read_count(), 1);

        let (page_num, page) = pool.allocate_page_dyn(&file).unwrap();
        assert_eq!(page_num, 1);
        assert_eq!(page.page_id(), PageId::new(mem.file_id(), 1));
        pool.unpin_page(&*file, page_num, true).unwrap();
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_drop_writes_back_dirty_pages() {
        let file = Arc::new(MemoryFile::with_pages(2));
        {
            let pool = create_test_pool(2);
            let page = pool.fetch_page(&file, 1).unwrap();
            page.write()[0] = 0x99;
            pool.unpin_page(&*file, 1, true).unwrap();
            pool.fetch_page(&file, 0).unwrap();
        }
        assert_eq!(file.write_count(), 1);
        assert_eq!(file.snapshot(1).unwrap()[0], 0x99);
    }

    #[test]
    fn test_close_reports_write_failure() {
        let file = Arc::new(MemoryFile::with_pages(1));
        let pool = create_test_pool(1);
        pool.fetch_page(&file, 0).unwrap();
        pool.unpin_page(&*file, 0, true).unwrap();

        file.set_fail_writes(true);
        let result = pool.close();
        assert!(matches!(result, Err(KestrelError::Io(_))));
    }

    #[test]
    fn test_dump_lists_every_frame() {
        let pool = create_test_pool(3);
        let file = Arc::new(MemoryFile::with_pages(1));
        pool.fetch_page(&file, 0).unwrap();

        let dump = pool.dump();
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Print buffer...");
        assert!(lines[1].starts_with("0\tpage "));
        assert!(lines[1].contains("pinCnt: 1"));
        assert!(lines[1].contains("valid"));
        assert_eq!(lines[2], "1\t-\tpinCnt: 0");
    }

    #[test]
    fn test_auto_size_frame_count() {
        assert_eq!(frames_for_memory(0), 1_000);
        assert_eq!(frames_for_memory(1 << 20), 1_000);
        // 4 GiB available gives 1 GiB of 8 KiB pages
        assert_eq!(frames_for_memory(4 << 30), 131_072);
        // Capped at the largest frame count a pool accepts
        assert_eq!(frames_for_memory(u64::MAX), u32::MAX as usize);
    }

    #[test]
    fn test_manager_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BufferManager>();
    }
}

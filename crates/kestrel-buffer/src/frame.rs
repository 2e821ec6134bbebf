//! Buffer frames and their descriptors.

use kestrel_common::page::{PageBuf, PageId, PageNum, PAGE_SIZE};
use kestrel_storage::PageFile;
use parking_lot::RwLock;
use std::sync::Arc;

/// Unique identifier for a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    /// Returns the frame id as a table index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// Raw storage for one frame: a page-sized byte block.
///
/// The bytes are behind their own lock so page handles can read and write
/// them without holding the buffer manager's lock.
pub(crate) struct Frame {
    data: RwLock<Box<PageBuf>>,
}

impl Frame {
    pub(crate) fn new() -> Self {
        Self {
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    #[inline]
    pub(crate) fn data(&self) -> &RwLock<Box<PageBuf>> {
        &self.data
    }

    /// Direct access to the bytes when no handle can exist.
    #[inline]
    pub(crate) fn data_mut(&mut self) -> &mut PageBuf {
        self.data.get_mut()
    }
}

/// Bookkeeping for one frame.
///
/// A descriptor is either invalid (holds nothing, unpinned, clean) or valid
/// and tied to exactly one `(file, page number)`. While valid it keeps a
/// shared handle to the owning file, so the file outlives every frame that
/// caches one of its pages.
pub struct FrameDescriptor {
    frame_id: FrameId,
    owner: Option<Arc<dyn PageFile>>,
    page_num: Option<PageNum>,
    pin_count: u32,
    dirty: bool,
    valid: bool,
    referenced: bool,
}

impl FrameDescriptor {
    /// Creates an invalid descriptor.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            owner: None,
            page_num: None,
            pin_count: 0,
            dirty: false,
            valid: false,
            referenced: false,
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the file owning the cached page.
    #[inline]
    pub fn owner(&self) -> Option<&Arc<dyn PageFile>> {
        self.owner.as_ref()
    }

    /// Returns the identity of the cached page, if any.
    pub fn page_id(&self) -> Option<PageId> {
        match (&self.owner, self.page_num) {
            (Some(owner), Some(page_num)) => Some(PageId::new(owner.file_id(), page_num)),
            _ => None,
        }
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    /// Returns true if this frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    /// Returns true if this frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns true if this frame holds a cached page.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Returns the reference bit used by the clock algorithm.
    #[inline]
    pub fn is_referenced(&self) -> bool {
        self.referenced
    }

    /// Sets or clears the reference bit.
    #[inline]
    pub fn set_referenced(&mut self, referenced: bool) {
        self.referenced = referenced;
    }

    /// Marks the frame dirty. Dirtiness is only cleared by write-back or reset.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clears the dirty flag after a successful write-back.
    #[inline]
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Adds one pin and sets the reference bit.
    #[inline]
    pub fn pin(&mut self) {
        self.pin_count += 1;
        self.referenced = true;
    }

    /// Removes one pin. Returns false, changing nothing, if none is held.
    #[inline]
    pub fn unpin(&mut self) -> bool {
        if self.pin_count == 0 {
            return false;
        }
        self.pin_count -= 1;
        true
    }

    /// Binds the frame to a freshly loaded page: valid, pinned once,
    /// referenced and clean.
    pub fn set(&mut self, owner: Arc<dyn PageFile>, page_num: PageNum) {
        self.owner = Some(owner);
        self.page_num = Some(page_num);
        self.pin_count = 1;
        self.dirty = false;
        self.referenced = true;
        self.valid = true;
    }

    /// Returns the frame to the invalid state and drops the file handle.
    pub fn clear(&mut self) {
        self.owner = None;
        self.page_num = None;
        self.pin_count = 0;
        self.dirty = false;
        self.referenced = false;
        self.valid = false;
    }

    /// Returns a point-in-time copy of this descriptor's state.
    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            frame_id: self.frame_id,
            page_id: self.page_id(),
            pin_count: self.pin_count,
            dirty: self.dirty,
            valid: self.valid,
            referenced: self.referenced,
        }
    }
}

impl std::fmt::Debug for FrameDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDescriptor")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count)
            .field("dirty", &self.dirty)
            .field("valid", &self.valid)
            .field("referenced", &self.referenced)
            .finish()
    }
}

/// Snapshot of a frame descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    pub page_id: Option<PageId>,
    pub pin_count: u32,
    pub dirty: bool,
    pub valid: bool,
    pub referenced: bool,
}

impl std::fmt::Display for FrameInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.page_id {
            Some(page_id) => write!(f, "{}\tpage {}", self.frame_id.0, page_id)?,
            None => write!(f, "{}\t-", self.frame_id.0)?,
        }
        write!(f, "\tpinCnt: {}", self.pin_count)?;
        if self.dirty {
            write!(f, "\tdirty")?;
        }
        if self.valid {
            write!(f, "\tvalid")?;
        }
        if self.referenced {
            write!(f, "\tref")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_storage::MemoryFile;

    fn owner() -> Arc<dyn PageFile> {
        Arc::new(MemoryFile::new())
    }

    #[test]
    fn test_frame_id_display() {
        assert_eq!(FrameId(42).to_string(), "frame:42");
        assert_eq!(FrameId(7).index(), 7);
    }

    #[test]
    fn test_descriptor_new_is_invalid() {
        let desc = FrameDescriptor::new(FrameId(0));

        assert_eq!(desc.frame_id(), FrameId(0));
        assert!(desc.page_id().is_none());
        assert!(desc.owner().is_none());
        assert_eq!(desc.pin_count(), 0);
        assert!(!desc.is_dirty());
        assert!(!desc.is_valid());
        assert!(!desc.is_referenced());
    }

    #[test]
    fn test_descriptor_set() {
        let file = owner();
        let file_id = file.file_id();
        let mut desc = FrameDescriptor::new(FrameId(3));

        desc.set(file, 11);

        assert_eq!(desc.page_id(), Some(PageId::new(file_id, 11)));
        assert_eq!(desc.pin_count(), 1);
        assert!(desc.is_valid());
        assert!(desc.is_referenced());
        assert!(!desc.is_dirty());
    }

    #[test]
    fn test_descriptor_pin_unpin() {
        let mut desc = FrameDescriptor::new(FrameId(0));
        desc.set(owner(), 0);
        desc.set_referenced(false);

        desc.pin();
        assert_eq!(desc.pin_count(), 2);
        assert!(desc.is_referenced());

        assert!(desc.unpin());
        assert!(desc.unpin());
        assert_eq!(desc.pin_count(), 0);
        assert!(!desc.is_pinned());

        // Unpinning at zero is refused and leaves the count alone
        assert!(!desc.unpin());
        assert_eq!(desc.pin_count(), 0);
    }

    #[test]
    fn test_descriptor_clear_releases_owner() {
        let file = owner();
        let mut desc = FrameDescriptor::new(FrameId(0));
        desc.set(Arc::clone(&file), 5);
        desc.mark_dirty();
        assert_eq!(Arc::strong_count(&file), 2);

        desc.clear();

        assert_eq!(Arc::strong_count(&file), 1);
        assert!(desc.page_id().is_none());
        assert_eq!(desc.pin_count(), 0);
        assert!(!desc.is_dirty());
        assert!(!desc.is_valid());
        assert!(!desc.is_referenced());
    }

    #[test]
    fn test_frame_info_display() {
        let mut desc = FrameDescriptor::new(FrameId(2));
        assert_eq!(desc.info().to_string(), "2\t-\tpinCnt: 0");

        let file = owner();
        let file_id = file.file_id();
        desc.set(file, 4);
        desc.mark_dirty();
        let line = desc.info().to_string();
        assert_eq!(
            line,
            format!("2\tpage {}:4\tpinCnt: 1\tdirty\tvalid\tref", file_id.0)
        );
    }

    #[test]
    fn test_frame_data_access() {
        let frame = Frame::new();
        frame.data().write()[0] = 0xAB;
        assert_eq!(frame.data().read()[0], 0xAB);
        assert_eq!(frame.data().read().len(), PAGE_SIZE);
    }

    #[test]
    fn test_frame_data_mut_sees_locked_writes() {
        let mut frame = Frame::new();
        frame.data().write()[7] = 0x3C;
        assert_eq!(frame.data_mut()[7], 0x3C);
        frame.data_mut()[8] = 0x4D;
        assert_eq!(frame.data().read()[8], 0x4D);
    }

    #[test]
    fn test_descriptor_debug() {
        let desc = FrameDescriptor::new(FrameId(5));
        let debug_str = format!("{:?}", desc);
        assert!(debug_str.contains("FrameDescriptor"));
        assert!(debug_str.contains("pin_count"));
    }
}

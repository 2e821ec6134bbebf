//! Page table mapping cached pages to the frames that hold them.

use crate::frame::FrameId;
use kestrel_common::page::PageId;
use kestrel_common::{KestrelError, Result};

/// Chained hash table from `PageId` to `FrameId`.
///
/// Buckets hold the head of a singly linked chain; chain nodes live in an
/// arena and link by slot index, with removed slots recycled through a free
/// list. New entries go to the front of their chain. The number of live
/// entries never exceeds the frame count, so the bucket array is sized once
/// and never resized.
pub struct PageTable {
    /// Head slot of each bucket's chain.
    buckets: Vec<Option<u32>>,
    /// Chain nodes.
    slots: Vec<Slot>,
    /// Arena slots available for reuse.
    free_slots: Vec<u32>,
    /// Number of live entries.
    len: usize,
}

struct Slot {
    page_id: PageId,
    frame_id: FrameId,
    next: Option<u32>,
}

/// Number of buckets for a pool of `num_frames` frames: about 1.2x the frame
/// count, rounded up to an odd number.
pub fn bucket_count_for(num_frames: usize) -> usize {
    (num_frames * 6).div_ceil(5) | 1
}

impl PageTable {
    /// Creates a page table for a pool with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            buckets: vec![None; bucket_count_for(num_frames)],
            slots: Vec::with_capacity(num_frames),
            free_slots: Vec::new(),
            len: 0,
        }
    }

    /// Computes the bucket for a key.
    #[inline]
    fn bucket(&self, page_id: PageId) -> usize {
        // FxHash-style multiply for distribution
        let hash = page_id.as_u64().wrapping_mul(0x517cc1b727220a95);
        (hash % self.buckets.len() as u64) as usize
    }

    /// Adds a mapping. Fails with `DuplicateKey` if the page is already mapped.
    pub fn insert(&mut self, page_id: PageId, frame_id: FrameId) -> Result<()> {
        if self.get(page_id).is_some() {
            return Err(KestrelError::DuplicateKey { page_id });
        }

        let bucket = self.bucket(page_id);
        let slot = Slot {
            page_id,
            frame_id,
            next: self.buckets[bucket],
        };

        let index = match self.free_slots.pop() {
            Some(index) => {
                self.slots[index as usize] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                (self.slots.len() - 1) as u32
            }
        };

        self.buckets[bucket] = Some(index);
        self.len += 1;
        Ok(())
    }

    /// Looks up a page, returning its frame if present.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        let mut cursor = self.buckets[self.bucket(page_id)];
        while let Some(index) = cursor {
            let slot = &self.slots[index as usize];
            if slot.page_id == page_id {
                return Some(slot.frame_id);
            }
            cursor = slot.next;
        }
        None
    }

    /// Looks up a page. Fails with `PageNotFound` if it is not mapped.
    pub fn lookup(&self, page_id: PageId) -> Result<FrameId> {
        self.get(page_id).ok_or(KestrelError::PageNotFound { page_id })
    }

    /// Removes a mapping and returns the frame it pointed to.
    /// Fails with `PageNotFound` if the page is not mapped.
    pub fn remove(&mut self, page_id: PageId) -> Result<FrameId> {
        let bucket = self.bucket(page_id);
        let mut prev: Option<u32> = None;
        let mut cursor = self.buckets[bucket];

        while let Some(index) = cursor {
            let (slot_page_id, frame_id, next) = {
                let slot = &self.slots[index as usize];
                (slot.page_id, slot.frame_id, slot.next)
            };

            if slot_page_id == page_id {
                match prev {
                    Some(prev) => self.slots[prev as usize].next = next,
                    None => self.buckets[bucket] = next,
                }
                self.free_slots.push(index);
                self.len -= 1;
                return Ok(frame_id);
            }

            prev = Some(index);
            cursor = next;
        }

        Err(KestrelError::PageNotFound { page_id })
    }

    /// Returns true if the page is in the table.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.get(page_id).is_some()
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of hash buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Iterates over all entries, calling the provided function for each.
    /// Returns early if the function returns false.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(PageId, FrameId) -> bool,
    {
        for head in &self.buckets {
            let mut cursor = *head;
            while let Some(index) = cursor {
                let slot = &self.slots[index as usize];
                if !f(slot.page_id, slot.frame_id) {
                    return;
                }
                cursor = slot.next;
            }
        }
    }
}

//! Page replacement policies for the buffer pool.

use crate::frame::{FrameDescriptor, FrameId};
use tracing::trace;

/// Trait for page replacement algorithms.
///
/// A replacer only chooses the frame; the buffer manager writes back and
/// unmaps the page that frame held.
pub trait Replacer: Send {
    /// Selects a frame to reuse.
    ///
    /// Returns None if every frame is pinned.
    fn pick_victim(&mut self, frames: &mut [FrameDescriptor]) -> Option<FrameId>;
}

/// Clock (second-chance) replacement.
///
/// The clock hand sweeps the frames in a circle. When selecting a victim:
/// 1. Advance the hand by one frame
/// 2. An invalid frame is taken at once
/// 3. A pinned frame is skipped
/// 4. A referenced frame has its reference bit cleared and is skipped
/// 5. Otherwise the frame is the victim
///
/// The sweep gives up after two full rotations, which brings the hand back
/// to where it started.
pub struct ClockReplacer {
    /// Total number of frames.
    num_frames: usize,
    /// Current clock hand position.
    clock_hand: usize,
}

impl ClockReplacer {
    /// Creates a clock over `num_frames` frames. The hand starts on the last
    /// frame, so the first sweep begins at frame 0.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            clock_hand: num_frames.saturating_sub(1),
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.num_frames
    }

    /// Returns the frame the hand currently points at.
    pub fn hand(&self) -> FrameId {
        FrameId(self.clock_hand as u32)
    }

    #[inline]
    fn advance(&mut self) {
        self.clock_hand = (self.clock_hand + 1) % self.num_frames;
    }
}

impl Replacer for ClockReplacer {
    fn pick_victim(&mut self, frames: &mut [FrameDescriptor]) -> Option<FrameId> {
        debug_assert_eq!(frames.len(), self.num_frames);
        if self.num_frames == 0 {
            return None;
        }

        for _ in 0..(2 * self.num_frames) {
            self.advance();
            let desc = &mut frames[self.clock_hand];

            if !desc.is_valid() {
                trace!(frame = self.clock_hand, "clock: free frame");
                return Some(desc.frame_id());
            }
            if desc.is_pinned() {
                continue;
            }
            if desc.is_referenced() {
                desc.set_referenced(false);
                continue;
            }

            trace!(frame = self.clock_hand, "clock: victim");
            return Some(desc.frame_id());
        }

        None
    }
}

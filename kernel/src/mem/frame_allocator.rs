// Frame ids index a core map whose length is checked against the 20-bit
// page-frame field at construction, so the casts below are exact.
#![allow(clippy::cast_possible_truncation)]

use crate::sync::{SpinLock, SpinLockGuard};
use alloc::boxed::Box;
use alloc::vec::Vec;
use bitbybit::bitfield;
use bitflags::bitflags;
use medulla_shared::mem::PAGE_FRAME_SIZE;

/// Index of a physical frame within the allocator's arena.
pub type FrameId = u32;

/// One frame's worth of memory.
pub type PageBytes = [u8; PAGE_FRAME_SIZE];

bitflags! {
    /// Options for [`FrameAllocator::get_page`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Zero the frame before handing it out.
        const ZERO = 1 << 0;
    }
}

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
}

struct CoreMap {
    entries: Box<[CoreMapEntry]>,
    /// Next-fit scan position.
    position: usize,
    allocated: usize,
}

impl CoreMap {
    /// Returns the first free frame at or after `position`, wrapping around.
    fn scan(&self) -> Option<usize> {
        let total_frames = self.entries.len();
        (0..total_frames)
            .map(|i| (self.position + i) % total_frames)
            .find(|&index| !self.entries[index].allocated())
    }
}

/// Owner of the physical frames handed to user pages.
///
/// Each frame's bytes sit behind their own spin lock, so a pinned frame can
/// be filled or drained without holding the core-map lock.
pub struct FrameAllocator {
    arena: Box<[SpinLock<PageBytes>]>,
    core_map: SpinLock<CoreMap>,
}

impl FrameAllocator {
    /// Create an allocator owning `capacity` zeroed frames.
    pub fn new(capacity: usize) -> FrameAllocator {
        assert!(capacity > 0, "frame arena cannot be empty");
        // Frame numbers must fit the page-table entry's 20-bit frame field.
        assert!(capacity <= 1 << 20, "frame arena too large");

        let arena: Vec<SpinLock<PageBytes>> = (0..capacity)
            .map(|_| SpinLock::new([0; PAGE_FRAME_SIZE]))
            .collect();
        let entries: Vec<CoreMapEntry> = (0..capacity).map(|_| CoreMapEntry::DEFAULT).collect();
        FrameAllocator {
            arena: arena.into_boxed_slice(),
            core_map: SpinLock::new(CoreMap {
                entries: entries.into_boxed_slice(),
                position: 0,
                allocated: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    /// Number of frames currently allocated.
    pub fn allocated_count(&self) -> usize {
        self.core_map.lock().allocated
    }

    /// Claim a free frame, next-fit from the last allocation. Returns `None`
    /// when every frame is taken.
    pub fn get_page(&self, flags: AllocFlags) -> Option<FrameId> {
        let mut core_map = self.core_map.lock();
        let index = core_map.scan()?;
        core_map.entries[index] = core_map.entries[index].with_allocated(true);
        core_map.position = (index + 1) % core_map.entries.len();
        core_map.allocated += 1;
        drop(core_map);

        if flags.contains(AllocFlags::ZERO) {
            self.arena[index].lock().fill(0);
        }
        Some(index as FrameId)
    }

    /// Return a frame to the pool.
    ///
    /// Panics if the frame is not currently allocated.
    pub fn free_page(&self, frame: FrameId) {
        let mut core_map = self.core_map.lock();
        let index = frame as usize;
        assert!(
            core_map.entries[index].allocated(),
            "free of unallocated frame {}",
            frame
        );
        core_map.entries[index] = core_map.entries[index].with_allocated(false);
        core_map.allocated -= 1;
    }

    /// Lock and expose the bytes of `frame`.
    pub fn bytes(&self, frame: FrameId) -> SpinLockGuard<'_, PageBytes> {
        self.arena[frame as usize].lock()
    }
}

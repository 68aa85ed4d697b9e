// Slot indices are bounded by the device's u32 sector count, so the sector
// casts below are exact.
#![allow(clippy::cast_possible_truncation)]

use crate::block::block_core::{Block, BlockSector, BLOCK_SECTOR_SIZE};
use crate::mem::frame_allocator::{FrameAllocator, FrameId};
use crate::mem::{Result, VmError};
use crate::sync::mutex::Mutex;
use alloc::vec;
use alloc::vec::Vec;
use log::debug;
use medulla_shared::mem::PAGE_FRAME_SIZE;

/// Sectors making up one page-sized swap slot.
pub const SECTORS_PER_PAGE: usize = PAGE_FRAME_SIZE / BLOCK_SECTOR_SIZE;

/// Index of a page-sized slot within the swap area.
pub type SwapSlot = usize;

/// Used-slot bitmap. Each byte covers 8 slots (1 bit per slot).
struct Bitmap {
    bits: Vec<u8>,
}

impl Bitmap {
    fn new(num_bits: usize) -> Self {
        let num_bytes = (num_bits + 7) / 8; // Calculate how many bytes are needed.
        Self {
            bits: vec![0; num_bytes],
        }
    }

    fn is_allocated(&self, index: usize) -> bool {
        self.bits[index / 8] & (1 << (index % 8)) != 0
    }

    fn allocate(&mut self, index: usize) {
        self.bits[index / 8] |= 1 << (index % 8);
    }

    fn deallocate(&mut self, index: usize) {
        self.bits[index / 8] &= !(1 << (index % 8));
    }
}

struct SwapInner {
    device: Block,
    used: Bitmap,
    slots_used: usize,
}

/// Page-granularity allocator over the swap block device.
///
/// One mutex serializes the bitmap scan-and-mark together with the paired
/// sector transfer, so a slot's contents are settled before anyone else can
/// claim or read it.
pub struct SwapAllocator {
    inner: Mutex<SwapInner>,
    slots: usize,
}

impl SwapAllocator {
    /// Wrap `device` as the swap area. Its capacity, rounded down to whole
    /// pages, becomes the slot count.
    pub fn new(device: Block) -> SwapAllocator {
        let slots = device.get_size() as usize / SECTORS_PER_PAGE;
        SwapAllocator {
            inner: Mutex::new(SwapInner {
                device,
                used: Bitmap::new(slots),
                slots_used: 0,
            }),
            slots,
        }
    }

    /// Total slot count of the swap area.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Slots currently holding an evicted page.
    pub fn slots_used(&self) -> usize {
        self.inner.lock().slots_used
    }

    /// Copy `frame`'s bytes out to a free slot and mark it used.
    pub fn swap_out(&self, frames: &FrameAllocator, frame: FrameId) -> Result<SwapSlot> {
        let mut inner = self.inner.lock();
        let slot = (0..self.slots)
            .find(|&slot| !inner.used.is_allocated(slot))
            .ok_or(VmError::ResourceExhausted)?;
        inner.used.allocate(slot);
        inner.slots_used += 1;

        debug!("swap out: frame {} -> slot {}", frame, slot);
        let bytes = frames.bytes(frame);
        for i in 0..SECTORS_PER_PAGE {
            inner.device.write(
                slot_sector(slot, i),
                &bytes[i * BLOCK_SECTOR_SIZE..(i + 1) * BLOCK_SECTOR_SIZE],
            );
        }
        Ok(slot)
    }

    /// Fill `frame` from `slot`'s sectors; the slot becomes free again.
    pub fn swap_in(&self, frames: &FrameAllocator, slot: SwapSlot, frame: FrameId) -> Result<()> {
        let mut inner = self.inner.lock();
        if slot >= self.slots || !inner.used.is_allocated(slot) {
            return Err(VmError::InvalidState);
        }

        debug!("swap in: slot {} -> frame {}", slot, frame);
        let mut bytes = frames.bytes(frame);
        for i in 0..SECTORS_PER_PAGE {
            inner.device.read(
                slot_sector(slot, i),
                &mut bytes[i * BLOCK_SECTOR_SIZE..(i + 1) * BLOCK_SECTOR_SIZE],
            );
        }
        inner.used.deallocate(slot);
        inner.slots_used -= 1;
        Ok(())
    }

    /// Mark a used slot free without touching the device.
    pub fn release(&self, slot: SwapSlot) -> Result<()> {
        let mut inner = self.inner.lock();
        if slot >= self.slots || !inner.used.is_allocated(slot) {
            return Err(VmError::InvalidState);
        }
        inner.used.deallocate(slot);
        inner.slots_used -= 1;
        debug!("swap release: slot {}", slot);
        Ok(())
    }
}

fn slot_sector(slot: SwapSlot, index: usize) -> BlockSector {
    (slot * SECTORS_PER_PAGE + index) as BlockSector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::block_core::BlockType;
    use crate::block::ram_disk::RamDisk;
    use crate::mem::frame_allocator::AllocFlags;

    fn swap_with_slots(slots: usize) -> SwapAllocator {
        let sectors = (slots * SECTORS_PER_PAGE) as BlockSector;
        let device = Block::new(
            BlockType::Swap,
            "swap",
            sectors,
            crate::block::block_core::BlockDriver::Ram(RamDisk::new(sectors)),
        );
        SwapAllocator::new(device)
    }

    #[test]
    fn round_trip_restores_bytes_and_frees_slot() {
        let frames = FrameAllocator::new(2);
        let swap = swap_with_slots(4);
        let src = frames.get_page(AllocFlags::empty()).expect("fresh arena has frames");
        let dst = frames.get_page(AllocFlags::empty()).expect("fresh arena has frames");
        frames.bytes(src).copy_from_slice(&[0x5au8; PAGE_FRAME_SIZE]);

        let slot = swap.swap_out(&frames, src).expect("swap has free slots");
        assert_eq!(swap.slots_used(), 1);

        swap.swap_in(&frames, slot, dst).expect("slot is in use");
        assert_eq!(&*frames.bytes(dst), &[0x5au8; PAGE_FRAME_SIZE]);
        assert_eq!(swap.slots_used(), 0);
    }

    #[test]
    fn swap_in_of_free_slot_fails() {
        let frames = FrameAllocator::new(1);
        let swap = swap_with_slots(2);
        let frame = frames.get_page(AllocFlags::empty()).expect("fresh arena has frames");
        assert_eq!(swap.swap_in(&frames, 0, frame), Err(VmError::InvalidState));
    }

    #[test]
    fn release_frees_without_io() {
        let frames = FrameAllocator::new(1);
        let swap = swap_with_slots(1);
        let frame = frames.get_page(AllocFlags::empty()).expect("fresh arena has frames");
        let slot = swap.swap_out(&frames, frame).expect("swap has free slots");

        swap.release(slot).expect("slot is in use");
        assert_eq!(swap.release(slot), Err(VmError::InvalidState));
        assert_eq!(swap.slots_used(), 0);
    }

    #[test]
    fn exhaustion_is_reported() {
        let frames = FrameAllocator::new(1);
        let swap = swap_with_slots(1);
        let frame = frames.get_page(AllocFlags::empty()).expect("fresh arena has frames");
        swap.swap_out(&frames, frame).expect("swap has free slots");
        assert_eq!(
            swap.swap_out(&frames, frame),
            Err(VmError::ResourceExhausted)
        );
    }

    #[test]
    fn slots_allocate_lowest_free_first() {
        let frames = FrameAllocator::new(1);
        let swap = swap_with_slots(3);
        let frame = frames.get_page(AllocFlags::empty()).expect("fresh arena has frames");

        assert_eq!(swap.swap_out(&frames, frame), Ok(0));
        assert_eq!(swap.swap_out(&frames, frame), Ok(1));
        swap.release(0).expect("slot is in use");
        assert_eq!(swap.swap_out(&frames, frame), Ok(0));
    }
}

use crate::block::block_core::Block;
use crate::mem::frame::FrameTable;
use crate::mem::frame_allocator::FrameAllocator;
use crate::mem::swap::SwapAllocator;
use crate::threading::process::PidAllocator;
use alloc::sync::Arc;

/// The wired-together virtual-memory services.
///
/// Nothing here is global state; tests build as many independent
/// instances as they need.
pub struct System {
    pub frames: Arc<FrameAllocator>,
    pub frame_table: FrameTable,
    pub swap: Arc<SwapAllocator>,
    pub pids: PidAllocator,
}

impl System {
    /// Wire an arena of `frame_capacity` frames to `swap_device`.
    pub fn new(frame_capacity: usize, swap_device: Block) -> System {
        let frames = Arc::new(FrameAllocator::new(frame_capacity));
        let swap = Arc::new(SwapAllocator::new(swap_device));
        System {
            frame_table: FrameTable::new(Arc::clone(&frames), Arc::clone(&swap)),
            frames,
            swap,
            pids: PidAllocator::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::cast_possible_truncation)]

    use super::*;
    use crate::block::block_core::{BlockDriver, BlockType};
    use crate::block::ram_disk::RamDisk;
    use crate::mem::page::PageEntry;
    use crate::mem::swap::SECTORS_PER_PAGE;
    use crate::mem::{fault, mmap, user};
    use crate::threading::process::Process;
    use crate::vfs::tempfs::TempFile;
    use crate::vfs::{File, FileRef};
    use alloc::vec::Vec;
    use medulla_shared::mem::PAGE_FRAME_SIZE;

    const SP: usize = 0xbfff_f000;

    fn system(frame_capacity: usize, swap_slots: usize) -> System {
        let sectors = (swap_slots * SECTORS_PER_PAGE) as u32;
        System::new(
            frame_capacity,
            Block::new(
                BlockType::Swap,
                "swap",
                sectors,
                BlockDriver::Ram(RamDisk::new(sectors)),
            ),
        )
    }

    #[test]
    fn exit_releases_every_resource() {
        let system = system(2, 8);
        let process = Process::new(system.pids.allocate());

        let file = Arc::new(TempFile::with_bytes(&[5u8; 2 * PAGE_FRAME_SIZE]));
        let fd = process.fds.open(Arc::clone(&file) as FileRef);
        mmap::mmap(&process, fd, 0x8000, 2 * PAGE_FRAME_SIZE).expect("valid mapping");
        user::copy_out(&system, &process, 0x8000, b"written").expect("writable");

        // Stack pages on top push the working set past the arena.
        fault::handle_page_fault(&system, &process, SP - 4, true, SP).expect("grows the stack");
        fault::handle_page_fault(&system, &process, SP - 0x2000, true, SP - 0x2000)
            .expect("grows the stack");
        assert!(system.swap.slots_used() > 0);

        process.exit(&system);

        assert_eq!(system.frames.allocated_count(), 0);
        assert_eq!(system.swap.slots_used(), 0);
        assert_eq!(system.frame_table.resident_count(), 0);
        assert!(process.pages.is_empty());
        assert!(process.mmap.is_empty());
        assert!(process.fds.is_empty());

        // The dirty mapped page made it back to the file on the way out.
        let mut head = [0u8; 7];
        file.read_at(&mut head, 0);
        assert_eq!(&head, b"written");
    }

    #[test]
    fn processes_share_the_arena_without_interfering() {
        let system = system(2, 8);
        let a = Process::new(system.pids.allocate());
        let b = Process::new(system.pids.allocate());

        // The same virtual page in two processes are distinct pages.
        a.pages.register(PageEntry::new_zero(0x8000, true));
        b.pages.register(PageEntry::new_zero(0x8000, true));
        b.pages.register(PageEntry::new_zero(0x9000, true));

        user::copy_out(&system, &a, 0x8000, b"aaaa").expect("writable");
        user::copy_out(&system, &b, 0x8000, b"bbbb").expect("writable");
        user::copy_out(&system, &b, 0x9000, b"cccc").expect("writable");

        let mut back = [0u8; 4];
        user::copy_in(&system, &a, 0x8000, &mut back).expect("mapped");
        assert_eq!(&back, b"aaaa");
        user::copy_in(&system, &b, 0x8000, &mut back).expect("mapped");
        assert_eq!(&back, b"bbbb");

        a.exit(&system);

        user::copy_in(&system, &b, 0x9000, &mut back).expect("mapped");
        assert_eq!(&back, b"cccc");
        b.exit(&system);

        assert_eq!(system.frames.allocated_count(), 0);
        assert_eq!(system.swap.slots_used(), 0);
    }

    #[test]
    fn concurrent_faults_keep_every_process_consistent() {
        let system = Arc::new(system(4, 16));

        let mut handles = Vec::new();
        for t in 0..4u8 {
            let system = Arc::clone(&system);
            handles.push(std::thread::spawn(move || {
                let process = Process::new(system.pids.allocate());
                for i in 0..3u8 {
                    let addr = 0x8000 + usize::from(i) * PAGE_FRAME_SIZE;
                    process.pages.register(PageEntry::new_zero(addr, true));
                    let fill = [16 * t + i; 64];
                    user::copy_out(&system, &process, addr, &fill).expect("writable");
                }
                for i in 0..3u8 {
                    let addr = 0x8000 + usize::from(i) * PAGE_FRAME_SIZE;
                    let mut back = [0u8; 64];
                    user::copy_in(&system, &process, addr, &mut back).expect("mapped");
                    assert_eq!(back, [16 * t + i; 64]);
                }
                process.exit(&system);
            }));
        }
        for handle in handles {
            handle.join().expect("worker thread panicked");
        }

        assert_eq!(system.frames.allocated_count(), 0);
        assert_eq!(system.swap.slots_used(), 0);
        assert_eq!(system.frame_table.resident_count(), 0);
    }
}

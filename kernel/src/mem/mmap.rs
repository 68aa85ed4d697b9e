use crate::mem::page::{PageEntry, PageRef};
use crate::mem::{Result, VmError};
use crate::sync::mutex::Mutex;
use crate::system::System;
use crate::threading::process::{FileDescriptor, Process, STDIN_FD, STDOUT_FD};
use crate::vfs::FileRef;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cmp::min;
use log::{debug, warn};
use medulla_shared::mem::{is_page_aligned, PAGE_FRAME_SIZE};

pub type MapId = u32;

/// One page of a mapped region.
struct MappedPage {
    upage: usize,
    /// Offset of this page's first byte in the backing file.
    offset: usize,
    page: PageRef,
}

struct MmapRegion {
    file: FileRef,
    pages: Vec<MappedPage>,
}

struct MmapTableInner {
    regions: BTreeMap<MapId, MmapRegion>,
    next_id: MapId,
}

/// Per-process registry of mapped regions.
///
/// The table's lock is a leaf: regions are taken out before any
/// frame-table work happens on their pages.
pub struct MmapTable {
    inner: Mutex<MmapTableInner>,
}

impl MmapTable {
    pub fn new() -> MmapTable {
        MmapTable {
            inner: Mutex::new(MmapTableInner {
                regions: BTreeMap::new(),
                next_id: 0,
            }),
        }
    }

    fn insert(&self, region: MmapRegion) -> MapId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.regions.insert(id, region);
        inner.next_id += 1;
        id
    }

    fn take(&self, id: MapId) -> Option<MmapRegion> {
        self.inner.lock().regions.remove(&id)
    }

    fn take_all(&self) -> Vec<(MapId, MmapRegion)> {
        let mut inner = self.inner.lock();
        let drained = core::mem::take(&mut inner.regions);
        drained.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().regions.is_empty()
    }
}

impl Default for MmapTable {
    fn default() -> MmapTable {
        MmapTable::new()
    }
}

/// Map the open file `fd` at `addr`, demand-paged. The first `length`
/// bytes of the range mirror the file from offset 0; the tail of the last
/// page reads as zeros. Returns the region's id.
pub fn mmap(
    process: &Process,
    fd: FileDescriptor,
    addr: usize,
    length: usize,
) -> Result<MapId> {
    if addr == 0 || !is_page_aligned(addr) || length == 0 {
        return Err(VmError::InvalidArgument);
    }
    if fd == STDIN_FD || fd == STDOUT_FD {
        return Err(VmError::InvalidArgument);
    }
    let Some(file) = process.fds.get(fd) else {
        return Err(VmError::InvalidArgument);
    };
    let file_len = file.length();
    if file_len == 0 {
        return Err(VmError::InvalidArgument);
    }
    if addr.checked_add(length).is_none() {
        return Err(VmError::InvalidArgument);
    }

    let page_count = length.div_ceil(PAGE_FRAME_SIZE);
    let mut pages: Vec<MappedPage> = Vec::with_capacity(page_count);
    for index in 0..page_count {
        let offset = index * PAGE_FRAME_SIZE;
        let upage = addr + offset;
        let read_bytes = min(PAGE_FRAME_SIZE, file_len.saturating_sub(offset));
        let entry = PageEntry::new_file(
            upage,
            Arc::clone(&file),
            offset,
            read_bytes,
            PAGE_FRAME_SIZE - read_bytes,
            true,
        );
        let Some(page) = process.pages.try_register(entry) else {
            // An earlier registration owns this page. Undo ours; none of
            // them has been faulted in yet, so removal releases nothing.
            for undone in &pages {
                process.pages.remove(undone.upage);
            }
            return Err(VmError::Overlap);
        };
        pages.push(MappedPage { upage, offset, page });
    }

    let id = process.mmap.insert(MmapRegion { file, pages });
    debug!(
        "mmap: pid {} fd {} at {:#x}, {} pages -> map {}",
        process.pid, fd, addr, page_count, id
    );
    Ok(id)
}

/// Unmap region `id`, writing dirty pages back to the file. Unknown ids
/// are ignored.
pub fn munmap(system: &System, process: &Process, id: MapId) -> Result<()> {
    let Some(region) = process.mmap.take(id) else {
        return Ok(());
    };
    debug!("munmap: pid {} map {}", process.pid, id);
    release_region(system, process, region)
}

/// Unmap every live region. Called on process exit; failures are logged
/// and the remaining regions still go away.
pub fn munmap_all(system: &System, process: &Process) {
    for (id, region) in process.mmap.take_all() {
        if let Err(err) = release_region(system, process, region) {
            warn!("pid {}: unmap of region {} failed: {}", process.pid, id, err);
        }
    }
}

fn release_region(system: &System, process: &Process, region: MmapRegion) -> Result<()> {
    for mapped in region.pages {
        // Force residency before reading the dirty state: once a page has
        // been evicted its hardware dirty bit is gone and the swap copy may
        // hold writes the file does not. Fault-in leaves the frame pinned
        // so eviction cannot undo this; destroy drops the pin with the
        // registration.
        let frame = system
            .frame_table
            .fault_in(process.pid, &process.pagedir, &mapped.page, true)?;
        let dirty = {
            let entry = mapped.page.lock();
            entry.dirty || process.pagedir.lock().is_dirty(mapped.upage)
        };
        if dirty {
            let bytes = system.frames.bytes(frame);
            let len = min(PAGE_FRAME_SIZE, region.file.length().saturating_sub(mapped.offset));
            region.file.write_at(&bytes[..len], mapped.offset);
        }
        process.pages.remove(mapped.upage);
        system.frame_table.destroy_page(process.pid, &mapped.page)?;
    }
    Ok(())
}

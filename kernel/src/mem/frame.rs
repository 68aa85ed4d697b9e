use crate::mem::frame_allocator::{AllocFlags, FrameAllocator, FrameId};
use crate::mem::page::{PageRef, PageStatus};
use crate::mem::swap::SwapAllocator;
use crate::mem::{Result, VmError};
use crate::sync::mutex::Mutex;
use crate::threading::process::Pid;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use log::debug;
use medulla_shared::paging::PageDirectory;

/// One resident physical frame.
struct Fte {
    pid: Pid,
    upage: usize,
    /// Non-owning back-reference; the owning one stays in the process's
    /// supplemental page table.
    page: PageRef,
    pagedir: Arc<Mutex<PageDirectory>>,
    pinned: bool,
}

struct FrameTableInner {
    /// Resident frames in insertion order; the eviction scan walks front to
    /// back.
    fifo: VecDeque<FrameId>,
    entries: BTreeMap<FrameId, Fte>,
    /// (pid, upage) -> frame, so per-page operations skip the scan.
    index: BTreeMap<(Pid, usize), FrameId>,
}

impl FrameTableInner {
    fn link(&mut self, frame: FrameId, fte: Fte) {
        self.index.insert((fte.pid, fte.upage), frame);
        self.fifo.push_back(frame);
        self.entries.insert(frame, fte);
    }

    fn unlink(&mut self, frame: FrameId) -> Option<Fte> {
        let fte = self.entries.remove(&frame)?;
        self.index.remove(&(fte.pid, fte.upage));
        if let Some(pos) = self.fifo.iter().position(|&f| f == frame) {
            self.fifo.remove(pos);
        }
        Some(fte)
    }

    fn fte_mut(&mut self, frame: FrameId) -> &mut Fte {
        self.entries
            .get_mut(&frame)
            .expect("no frame table entry for resident frame")
    }
}

/// Global registry of resident frames and the eviction engine.
///
/// The table mutex is the outermost lock of the subsystem: it covers the
/// whole claim-evict-populate-install sequence, and under it the table may
/// take a descriptor's lock, then a page directory's, then the swap
/// allocator's. Callers must never hold a descriptor lock when calling in.
pub struct FrameTable {
    frames: Arc<FrameAllocator>,
    swap: Arc<SwapAllocator>,
    inner: Mutex<FrameTableInner>,
}

impl FrameTable {
    pub fn new(frames: Arc<FrameAllocator>, swap: Arc<SwapAllocator>) -> FrameTable {
        FrameTable {
            frames,
            swap,
            inner: Mutex::new(FrameTableInner {
                fifo: VecDeque::new(),
                entries: BTreeMap::new(),
                index: BTreeMap::new(),
            }),
        }
    }

    /// Make `page` resident for `pid`: claim a frame (evicting one when the
    /// arena is full), fill it from the page's backing, and install the
    /// mapping in `pagedir`. Returns the frame now backing the page.
    ///
    /// With `pin` the frame is left pinned; the caller must unpin it, or
    /// destroy the page, when done with the bytes.
    pub fn fault_in(
        &self,
        pid: Pid,
        pagedir: &Arc<Mutex<PageDirectory>>,
        page: &PageRef,
        pin: bool,
    ) -> Result<FrameId> {
        let mut inner = self.inner.lock();

        // The page may have become resident after the caller looked it up.
        // Every transition to Resident happens under the table lock, so this
        // re-check settles it.
        let upage = {
            let entry = page.lock();
            if let PageStatus::Resident(frame) = entry.status {
                if pin {
                    inner.fte_mut(frame).pinned = true;
                }
                return Ok(frame);
            }
            entry.upage
        };

        let frame = match self.frames.get_page(AllocFlags::empty()) {
            Some(frame) => frame,
            None => self.evict(&mut inner)?,
        };

        // Register the frame pinned before filling it, so the eviction scan
        // cannot pick it while its content is in flight.
        inner.link(
            frame,
            Fte {
                pid,
                upage,
                page: Arc::clone(page),
                pagedir: Arc::clone(pagedir),
                pinned: true,
            },
        );

        if let Err(err) = self.populate(page, frame) {
            inner.unlink(frame);
            self.frames.free_page(frame);
            return Err(err);
        }

        {
            let mut entry = page.lock();
            if !pagedir.lock().install(upage, frame, entry.writable) {
                drop(entry);
                inner.unlink(frame);
                self.frames.free_page(frame);
                return Err(VmError::InstallFailure);
            }
            entry.status = PageStatus::Resident(frame);
        }

        if !pin {
            inner.fte_mut(frame).pinned = false;
        }
        debug!("fault in: pid {} page {:#x} -> frame {}", pid, upage, frame);
        Ok(frame)
    }

    /// Fill `frame` with the content `page`'s status calls for.
    fn populate(&self, page: &PageRef, frame: FrameId) -> Result<()> {
        let entry = page.lock();
        match entry.status {
            PageStatus::ZeroFill => {
                self.frames.bytes(frame).fill(0);
            }
            PageStatus::FileBacked => {
                let Some(mapping) = &entry.file else {
                    return Err(VmError::InvalidState);
                };
                let mut bytes = self.frames.bytes(frame);
                let got = mapping
                    .file
                    .read_at(&mut bytes[..mapping.read_bytes], mapping.offset);
                if got != mapping.read_bytes {
                    return Err(VmError::ShortRead);
                }
                bytes[mapping.read_bytes..].fill(0);
            }
            PageStatus::SwapBacked(slot) => {
                self.swap.swap_in(&self.frames, slot, frame)?;
            }
            PageStatus::Resident(_) => return Err(VmError::InvalidState),
        }
        Ok(())
    }

    /// Evict the first unpinned frame in FIFO order and hand it back for
    /// reuse. Runs under the table lock.
    fn evict(&self, inner: &mut FrameTableInner) -> Result<FrameId> {
        let Some(frame) = inner
            .fifo
            .iter()
            .copied()
            .find(|frame| !inner.entries[frame].pinned)
        else {
            return Err(VmError::ResourceExhausted);
        };
        let (page, pagedir, pid, upage) = {
            let fte = &inner.entries[&frame];
            (
                Arc::clone(&fte.page),
                Arc::clone(&fte.pagedir),
                fte.pid,
                fte.upage,
            )
        };

        // The victim's descriptor and page table change only under the table
        // lock, so its owner never sees a half-torn-down page. Swap-out goes
        // first: if it fails, the victim is still intact.
        let mut entry = page.lock();
        let slot = self.swap.swap_out(&self.frames, frame)?;
        {
            let mut pd = pagedir.lock();
            entry.dirty |= pd.is_dirty(upage);
            pd.clear(upage);
        }
        entry.status = PageStatus::SwapBacked(slot);
        drop(entry);

        inner.unlink(frame);
        debug!(
            "evict: pid {} page {:#x}, frame {} -> slot {}",
            pid, upage, frame, slot
        );
        Ok(frame)
    }

    /// Release whatever `page`'s status holds and drop its registration: a
    /// resident frame (clearing the owner's page-table mapping) or a swap
    /// slot. ZeroFill and FileBacked pages hold nothing.
    ///
    /// The registration is dropped even for pinned frames, so teardown paths
    /// that pinned the page first need not unpin it.
    pub fn destroy_page(&self, pid: Pid, page: &PageRef) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = page.lock();
        match entry.status {
            PageStatus::Resident(frame) => {
                let Some(fte) = inner.entries.get(&frame) else {
                    return Err(VmError::InvalidState);
                };
                if fte.pid != pid || fte.upage != entry.upage {
                    return Err(VmError::InvalidState);
                }
                fte.pagedir.lock().clear(entry.upage);
                inner.unlink(frame);
                self.frames.free_page(frame);
                debug!("destroy: pid {} page {:#x} frame {}", pid, entry.upage, frame);
            }
            PageStatus::SwapBacked(slot) => {
                self.swap.release(slot)?;
                debug!("destroy: pid {} page {:#x} slot {}", pid, entry.upage, slot);
            }
            PageStatus::ZeroFill | PageStatus::FileBacked => {}
        }
        Ok(())
    }

    /// Drop the pin left by `fault_in(..., pin: true)`.
    ///
    /// Panics if `(pid, upage)` is not resident; a pinned page cannot have
    /// gone away.
    pub fn unpin(&self, pid: Pid, upage: usize) {
        let mut inner = self.inner.lock();
        let Some(frame) = inner.index.get(&(pid, upage)).copied() else {
            panic!("unpin of non-resident page {:#x}", upage);
        };
        inner.fte_mut(frame).pinned = false;
    }

    /// Whether `(pid, upage)`'s frame is currently pinned.
    pub fn is_pinned(&self, pid: Pid, upage: usize) -> bool {
        let inner = self.inner.lock();
        inner
            .index
            .get(&(pid, upage))
            .is_some_and(|frame| inner.entries[frame].pinned)
    }

    /// Frame currently backing `(pid, upage)`, if any.
    pub fn frame_of(&self, pid: Pid, upage: usize) -> Option<FrameId> {
        self.inner.lock().index.get(&(pid, upage)).copied()
    }

    /// Number of resident frames.
    pub fn resident_count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

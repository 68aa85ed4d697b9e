use crate::mem::frame_allocator::FrameId;
use crate::mem::swap::SwapSlot;
use crate::sync::mutex::Mutex;
use crate::vfs::FileRef;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use medulla_shared::mem::{is_page_aligned, page_round_down, PAGE_FRAME_SIZE};

/// Where a virtual page's content lives right now.
pub enum PageStatus {
    /// Never materialized; the first touch gets a zeroed frame.
    ZeroFill,
    /// Content comes from the descriptor's backing file.
    FileBacked,
    /// Evicted to the given swap slot.
    SwapBacked(SwapSlot),
    /// Mapped into a physical frame.
    Resident(FrameId),
}

/// Backing-file geometry for a page that ever had file backing.
pub struct FileMapping {
    pub file: FileRef,
    /// Byte offset of this page's data within the file.
    pub offset: usize,
    /// Bytes to read from the file; the rest of the page is zeroed.
    pub read_bytes: usize,
    pub zero_bytes: usize,
}

/// Everything the kernel knows about one virtual page of one process.
pub struct PageEntry {
    /// Page-aligned user virtual address.
    pub upage: usize,
    pub status: PageStatus,
    /// Present only for pages that ever had file backing.
    pub file: Option<FileMapping>,
    pub writable: bool,
    /// Sticky dirty flag. Eviction folds the hardware dirty bit in here
    /// before the mapping is torn down, so the information survives.
    pub dirty: bool,
}

impl PageEntry {
    /// Descriptor for a page whose first `read_bytes` come from `file` at
    /// `offset` and whose remaining `zero_bytes` are zero-filled.
    pub fn new_file(
        upage: usize,
        file: FileRef,
        offset: usize,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> PageEntry {
        assert!(is_page_aligned(upage), "upage {:#x} is not page-aligned", upage);
        assert_eq!(read_bytes + zero_bytes, PAGE_FRAME_SIZE);
        PageEntry {
            upage,
            status: PageStatus::FileBacked,
            file: Some(FileMapping {
                file,
                offset,
                read_bytes,
                zero_bytes,
            }),
            writable,
            dirty: false,
        }
    }

    /// Descriptor for a zero-filled page (fresh stack growth).
    pub fn new_zero(upage: usize, writable: bool) -> PageEntry {
        assert!(is_page_aligned(upage), "upage {:#x} is not page-aligned", upage);
        PageEntry {
            upage,
            status: PageStatus::ZeroFill,
            file: None,
            writable,
            dirty: false,
        }
    }
}

/// Shared handle to a page descriptor.
///
/// The owning reference lives in the process's [`SupplementalPageTable`];
/// the frame table holds a non-owning back-reference while the page is
/// resident.
pub type PageRef = Arc<Mutex<PageEntry>>;

/// Per-process map from virtual page to its descriptor.
///
/// The map's own lock is a leaf: it is never held across calls into the
/// frame table.
pub struct SupplementalPageTable {
    pages: Mutex<BTreeMap<usize, PageRef>>,
}

impl SupplementalPageTable {
    pub fn new() -> SupplementalPageTable {
        SupplementalPageTable {
            pages: Mutex::new(BTreeMap::new()),
        }
    }

    /// Insert a descriptor for a page that has none.
    ///
    /// Panics if the page already has one; racing callers that may lose the
    /// race use [`Self::try_register`] instead.
    pub fn register(&self, entry: PageEntry) -> PageRef {
        let upage = entry.upage;
        match self.try_register(entry) {
            Some(page) => page,
            None => panic!("page {:#x} already registered", upage),
        }
    }

    /// Insert a descriptor unless the page already has one.
    pub fn try_register(&self, entry: PageEntry) -> Option<PageRef> {
        let mut pages = self.pages.lock();
        if pages.contains_key(&entry.upage) {
            return None;
        }
        let upage = entry.upage;
        let page = Arc::new(Mutex::new(entry));
        pages.insert(upage, Arc::clone(&page));
        Some(page)
    }

    /// Find the descriptor covering `addr` (any address within the page).
    pub fn lookup(&self, addr: usize) -> Option<PageRef> {
        self.pages.lock().get(&page_round_down(addr)).cloned()
    }

    /// Remove and return the descriptor for the page containing `addr`.
    pub fn remove(&self, addr: usize) -> Option<PageRef> {
        self.pages.lock().remove(&page_round_down(addr))
    }

    /// Drain every descriptor, leaving the table empty.
    pub fn take_all(&self) -> Vec<PageRef> {
        let mut pages = self.pages.lock();
        let drained = core::mem::take(&mut *pages);
        drained.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.lock().is_empty()
    }
}

impl Default for SupplementalPageTable {
    fn default() -> Self {
        Self::new()
    }
}

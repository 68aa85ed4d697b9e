use crate::mem::mmap::{self, MmapTable};
use crate::mem::page::SupplementalPageTable;
use crate::sync::mutex::Mutex;
use crate::system::System;
use crate::vfs::FileRef;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU16, Ordering};
use log::warn;
use medulla_shared::paging::PageDirectory;

pub type Pid = u16;
pub type AtomicPid = AtomicU16;

pub type FileDescriptor = i16;

/// Descriptors 0 and 1 belong to the console and never appear in a
/// process's file table.
pub const STDIN_FD: FileDescriptor = 0;
pub const STDOUT_FD: FileDescriptor = 1;
const FIRST_USER_FD: FileDescriptor = 2;

pub struct PidAllocator {
    next_pid: AtomicPid,
}

impl PidAllocator {
    pub const fn new() -> PidAllocator {
        PidAllocator {
            next_pid: AtomicPid::new(1),
        }
    }

    pub fn allocate(&self) -> Pid {
        // SAFETY: Atomically accesses a shared variable.
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        if pid == 0 {
            panic!("PID overflow"); // TODO: handle overflow properly
        }
        pid
    }
}

impl Default for PidAllocator {
    fn default() -> PidAllocator {
        PidAllocator::new()
    }
}

struct FdTableInner {
    files: BTreeMap<FileDescriptor, FileRef>,
    next_fd: FileDescriptor,
}

impl Default for FdTableInner {
    fn default() -> FdTableInner {
        FdTableInner {
            files: BTreeMap::new(),
            next_fd: FIRST_USER_FD,
        }
    }
}

/// Per-process table of open files, keyed by descriptor.
#[derive(Default)]
pub struct FdTable {
    inner: Mutex<FdTableInner>,
}

impl FdTable {
    pub fn new() -> FdTable {
        FdTable::default()
    }

    pub fn open(&self, file: FileRef) -> FileDescriptor {
        let mut inner = self.inner.lock();
        let fd = inner.next_fd;
        inner.files.insert(fd, file);
        inner.next_fd += 1; // TODO: reuse closed descriptors
        fd
    }

    /// Look up an open file. The stdio descriptors have no file behind
    /// them, so they resolve to `None` like any unknown descriptor.
    pub fn get(&self, fd: FileDescriptor) -> Option<FileRef> {
        self.inner.lock().files.get(&fd).cloned()
    }

    pub fn close(&self, fd: FileDescriptor) -> Option<FileRef> {
        self.inner.lock().files.remove(&fd)
    }

    pub fn close_all(&self) {
        self.inner.lock().files.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().files.is_empty()
    }
}

/// Everything the kernel keeps for one user process. Scheduling and
/// program loading live elsewhere; this record owns the process's
/// virtual-memory state and open files.
pub struct Process {
    pub pid: Pid,
    pub pagedir: Arc<Mutex<PageDirectory>>,
    pub pages: SupplementalPageTable,
    pub mmap: MmapTable,
    pub fds: FdTable,
}

impl Process {
    pub fn new(pid: Pid) -> Process {
        Process {
            pid,
            pagedir: Arc::new(Mutex::new(PageDirectory::new())),
            pages: SupplementalPageTable::new(),
            mmap: MmapTable::new(),
            fds: FdTable::new(),
        }
    }

    /// Release the process's address space: write back and drop every
    /// mapped region, destroy every remaining page, close every file.
    pub fn exit(&self, system: &System) {
        mmap::munmap_all(system, self);
        for page in self.pages.take_all() {
            if let Err(err) = system.frame_table.destroy_page(self.pid, &page) {
                warn!("pid {}: leaked a page on exit: {}", self.pid, err);
            }
        }
        self.fds.close_all();
    }
}

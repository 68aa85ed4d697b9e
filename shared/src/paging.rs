// https://wiki.osdev.org/Paging
// https://wiki.osdev.org/Setting_Up_Paging

// Avoids lots of warnings about casting usize to u32 which cannot result in
// truncation on a 32-bit platform, which is all we support. It would be nice if
// you could tell clippy that you were only dealing with 32-bit usizes...
#![allow(clippy::cast_possible_truncation)]

use crate::mem::PAGE_FRAME_SIZE;
use alloc::{boxed::Box, collections::BTreeMap};
use arbitrary_int::{u10, u12, u20};
use bitbybit::bitfield;
use core::{
    mem::size_of,
    ops::{Deref, DerefMut},
};

const PAGE_DIRECTORY_LEN: usize = PAGE_FRAME_SIZE / size_of::<PageDirectoryEntry>();

#[bitfield(u32, default = 0)]
pub struct PageDirectoryEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(3, rw)]
    write_through: bool,
    #[bit(4, rw)]
    cache_disable: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(7, rw)]
    page_size: bool,
    #[bits(12..=31, rw)]
    page_table_address: u20,
}

const PAGE_TABLE_LEN: usize = PAGE_FRAME_SIZE / size_of::<PageTableEntry>();

#[repr(align(4096))]
pub struct PageTable(pub [PageTableEntry; PAGE_TABLE_LEN]);

impl Default for PageTable {
    fn default() -> Self {
        Self([PageTableEntry::default(); PAGE_TABLE_LEN])
    }
}

impl Deref for PageTable {
    type Target = [PageTableEntry; PAGE_TABLE_LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PageTable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(3, rw)]
    write_through: bool,
    #[bit(4, rw)]
    cache_disable: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bit(7, rw)]
    page_attribute_table: bool,
    #[bit(8, rw)]
    global: bool,
    #[bits(12..=31, rw)]
    page_frame_address: u20,
}

#[bitfield(u32)]
pub struct VirtualAddress {
    #[bits(22..=31, r)]
    page_directory_index: u10,
    #[bits(12..=21, r)]
    page_table_index: u10,
    #[bits(0..=11, r)]
    offset: u12,
}

/// A software-walked two-level page directory with the x86 layout: the top
/// level holds [`PageDirectoryEntry`]s, the second level [`PageTableEntry`]s.
/// Page tables live on the heap, keyed by directory index, instead of in
/// physical frames.
///
/// The walk faithfully models the MMU's view of a user address space,
/// including the accessed and dirty bits, which callers performing memory
/// accesses on behalf of a process must set via [`PageDirectory::mark_access`].
pub struct PageDirectory {
    entries: [PageDirectoryEntry; PAGE_DIRECTORY_LEN],
    tables: BTreeMap<u16, Box<PageTable>>,
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PageDirectory {
    pub fn new() -> Self {
        Self {
            entries: [PageDirectoryEntry::DEFAULT; PAGE_DIRECTORY_LEN],
            tables: BTreeMap::new(),
        }
    }

    fn split(vaddr: usize) -> (u16, usize) {
        let vaddr = VirtualAddress::new_with_raw_value(vaddr as u32);
        (
            vaddr.page_directory_index().value(),
            vaddr.page_table_index().value() as usize,
        )
    }

    /// Maps the page containing `vaddr` to `frame`. Returns false if the page
    /// is already mapped; the caller decides whether that is fatal.
    #[must_use]
    pub fn install(&mut self, vaddr: usize, frame: u32, writable: bool) -> bool {
        let (di, ti) = Self::split(vaddr);
        if !self.entries[di as usize].present() {
            self.entries[di as usize] = PageDirectoryEntry::DEFAULT
                .with_present(true)
                .with_read_write(true)
                .with_user_supervisor(true);
            self.tables.insert(di, Box::default());
        }
        let table = self
            .tables
            .get_mut(&di)
            .expect("present directory entry without a page table");
        if table[ti].present() {
            return false;
        }
        table[ti] = PageTableEntry::DEFAULT
            .with_present(true)
            .with_read_write(writable)
            .with_user_supervisor(true)
            .with_page_frame_address(u20::new(frame));
        true
    }

    /// Unmaps the page containing `vaddr`. Clearing an absent mapping is a
    /// no-op.
    pub fn clear(&mut self, vaddr: usize) {
        let (di, ti) = Self::split(vaddr);
        if let Some(table) = self.tables.get_mut(&di) {
            table[ti] = PageTableEntry::DEFAULT;
        }
    }

    fn entry(&self, vaddr: usize) -> Option<PageTableEntry> {
        let (di, ti) = Self::split(vaddr);
        if !self.entries[di as usize].present() {
            return None;
        }
        let entry = self.tables.get(&di)?[ti];
        entry.present().then_some(entry)
    }

    fn update(&mut self, vaddr: usize, f: impl FnOnce(PageTableEntry) -> PageTableEntry) {
        let (di, ti) = Self::split(vaddr);
        if let Some(table) = self.tables.get_mut(&di) {
            if table[ti].present() {
                table[ti] = f(table[ti]);
            }
        }
    }

    /// The frame backing `vaddr`, if its page is mapped.
    pub fn translate(&self, vaddr: usize) -> Option<u32> {
        self.entry(vaddr).map(|e| e.page_frame_address().value())
    }

    pub fn is_mapped(&self, vaddr: usize) -> bool {
        self.entry(vaddr).is_some()
    }

    pub fn is_writable(&self, vaddr: usize) -> bool {
        self.entry(vaddr).is_some_and(|e| e.read_write())
    }

    pub fn is_dirty(&self, vaddr: usize) -> bool {
        self.entry(vaddr).is_some_and(|e| e.dirty())
    }

    pub fn is_accessed(&self, vaddr: usize) -> bool {
        self.entry(vaddr).is_some_and(|e| e.accessed())
    }

    /// Records an access the way the MMU would: sets the accessed bit, plus
    /// the dirty bit for writes.
    pub fn mark_access(&mut self, vaddr: usize, write: bool) {
        self.update(vaddr, |e| {
            let e = e.with_accessed(true);
            if write {
                e.with_dirty(true)
            } else {
                e
            }
        });
    }

    pub fn clear_dirty(&mut self, vaddr: usize) {
        self.update(vaddr, |e| e.with_dirty(false));
    }

    pub fn set_accessed(&mut self, vaddr: usize, accessed: bool) {
        self.update(vaddr, |e| e.with_accessed(accessed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_address_split() {
        let vaddr = VirtualAddress::new_with_raw_value(0xc0a8_1123);
        assert_eq!(vaddr.page_directory_index().value(), 0x302);
        assert_eq!(vaddr.page_table_index().value(), 0x281);
        assert_eq!(vaddr.offset().value(), 0x123);
    }

    #[test]
    fn install_translate_clear() {
        let mut pd = PageDirectory::new();
        assert!(!pd.is_mapped(0x8048_0000));
        assert!(pd.install(0x8048_0000, 7, true));
        assert_eq!(pd.translate(0x8048_0000), Some(7));
        assert_eq!(pd.translate(0x8048_0abc), Some(7));
        assert!(pd.is_writable(0x8048_0000));
        pd.clear(0x8048_0000);
        assert!(!pd.is_mapped(0x8048_0000));
        assert_eq!(pd.translate(0x8048_0000), None);
    }

    #[test]
    fn install_twice_fails() {
        let mut pd = PageDirectory::new();
        assert!(pd.install(0x1000, 1, true));
        assert!(!pd.install(0x1000, 2, true));
        assert!(!pd.install(0x1234, 2, true));
        assert_eq!(pd.translate(0x1000), Some(1));
    }

    #[test]
    fn pages_in_distinct_tables() {
        let mut pd = PageDirectory::new();
        assert!(pd.install(0x0040_0000, 1, false));
        assert!(pd.install(0x0080_0000, 2, true));
        assert!(pd.install(0x0040_1000, 3, true));
        assert_eq!(pd.translate(0x0040_0000), Some(1));
        assert_eq!(pd.translate(0x0080_0000), Some(2));
        assert_eq!(pd.translate(0x0040_1000), Some(3));
        assert!(!pd.is_writable(0x0040_0000));
    }

    #[test]
    fn accessed_and_dirty_bits() {
        let mut pd = PageDirectory::new();
        assert!(pd.install(0x2000, 4, true));
        assert!(!pd.is_accessed(0x2000));
        assert!(!pd.is_dirty(0x2000));

        pd.mark_access(0x2345, false);
        assert!(pd.is_accessed(0x2000));
        assert!(!pd.is_dirty(0x2000));

        pd.mark_access(0x2fff, true);
        assert!(pd.is_dirty(0x2000));

        pd.clear_dirty(0x2000);
        assert!(!pd.is_dirty(0x2000));
        pd.set_accessed(0x2000, false);
        assert!(!pd.is_accessed(0x2000));
    }

    #[test]
    fn dirty_bit_does_not_survive_remap() {
        let mut pd = PageDirectory::new();
        assert!(pd.install(0x5000, 9, true));
        pd.mark_access(0x5000, true);
        assert!(pd.is_dirty(0x5000));
        pd.clear(0x5000);
        assert!(pd.install(0x5000, 9, true));
        assert!(!pd.is_dirty(0x5000));
    }
}

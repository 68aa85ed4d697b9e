use crate::mem::frame_allocator::PageBytes;
use crate::mem::{Result, VmError};
use crate::system::System;
use crate::threading::process::Process;
use core::cmp::min;
use medulla_shared::mem::{page_offset, page_round_down, PAGE_FRAME_SIZE};

/// Copy kernel bytes into a process's user range.
///
/// Each covered page is faulted in if needed and pinned for the duration
/// of its copy, then marked accessed and dirty the way the MMU would.
/// Writing through a read-only page fails with `BadAccess`.
pub fn copy_out(system: &System, process: &Process, addr: usize, buf: &[u8]) -> Result<()> {
    walk_pages(
        system,
        process,
        addr,
        buf.len(),
        true,
        |bytes, page_off, buf_off, count| {
            bytes[page_off..page_off + count].copy_from_slice(&buf[buf_off..buf_off + count]);
        },
    )
}

/// Copy a process's user range into a kernel buffer. Faults pages in as
/// needed; each page is pinned while its bytes move and marked accessed
/// afterwards.
pub fn copy_in(system: &System, process: &Process, addr: usize, buf: &mut [u8]) -> Result<()> {
    let len = buf.len();
    walk_pages(
        system,
        process,
        addr,
        len,
        false,
        |bytes, page_off, buf_off, count| {
            buf[buf_off..buf_off + count].copy_from_slice(&bytes[page_off..page_off + count]);
        },
    )
}

/// Walk `addr..addr + len` one page at a time: fault the page in pinned,
/// run `copy` against the frame's bytes, update the page-table bits, drop
/// the pin. A failure partway leaves the earlier pages' bytes in place.
fn walk_pages(
    system: &System,
    process: &Process,
    addr: usize,
    len: usize,
    write: bool,
    mut copy: impl FnMut(&mut PageBytes, usize, usize, usize),
) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    if addr.checked_add(len).is_none() {
        return Err(VmError::BadAccess);
    }

    let mut buf_off = 0;
    while buf_off < len {
        let cur = addr + buf_off;
        let upage = page_round_down(cur);
        let page_off = page_offset(cur);
        let count = min(len - buf_off, PAGE_FRAME_SIZE - page_off);

        let Some(page) = process.pages.lookup(upage) else {
            return Err(VmError::BadAccess);
        };
        if write && !page.lock().writable {
            return Err(VmError::BadAccess);
        }

        let frame = system
            .frame_table
            .fault_in(process.pid, &process.pagedir, &page, true)?;
        {
            let mut bytes = system.frames.bytes(frame);
            copy(&mut bytes, page_off, buf_off, count);
        }
        process.pagedir.lock().mark_access(upage, write);
        system.frame_table.unpin(process.pid, upage);

        buf_off += count;
    }
    Ok(())
}

use crate::mem::page::PageEntry;
use crate::mem::{Result, VmError};
use crate::system::System;
use crate::threading::process::Process;
use log::debug;
use medulla_shared::mem::{page_round_down, MAX_STACK_SIZE, USER_STACK_TOP};

/// Resolve a user page fault: make the faulting page resident, growing
/// the stack when the access looks like a push below the stack pointer.
///
/// `BadAccess` means the access itself was illegal; other errors mean the
/// page could not be brought in. Either way the caller decides the
/// process's fate.
pub fn handle_page_fault(
    system: &System,
    process: &Process,
    fault_addr: usize,
    write: bool,
    user_sp: usize,
) -> Result<()> {
    if fault_addr >= USER_STACK_TOP {
        return Err(VmError::BadAccess);
    }

    if let Some(page) = process.pages.lookup(fault_addr) {
        if write && !page.lock().writable {
            return Err(VmError::BadAccess);
        }
        system
            .frame_table
            .fault_in(process.pid, &process.pagedir, &page, false)?;
        return Ok(());
    }

    if !is_stack_growth(fault_addr, user_sp) {
        return Err(VmError::BadAccess);
    }
    let upage = page_round_down(fault_addr);
    debug!("stack growth: pid {} page {:#x}", process.pid, upage);
    // Losing the registration race to another thread growing the same
    // page is fine; fault in whichever entry won.
    let page = process
        .pages
        .try_register(PageEntry::new_zero(upage, true))
        .or_else(|| process.pages.lookup(upage))
        .ok_or(VmError::BadAccess)?;
    system
        .frame_table
        .fault_in(process.pid, &process.pagedir, &page, false)?;
    Ok(())
}

/// PUSHA touches up to 32 bytes below the stack pointer, so a fault in
/// that window counts as stack growth, provided the address lies inside
/// the stack band.
fn is_stack_growth(fault_addr: usize, user_sp: usize) -> bool {
    let stack_bottom = USER_STACK_TOP - MAX_STACK_SIZE;
    fault_addr >= user_sp.saturating_sub(32) && (stack_bottom..USER_STACK_TOP).contains(&fault_addr)
}

use crate::sizes::{KB, MB};

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

// User stacks sit at the top of the user address range and grow downward.
pub const USER_STACK_TOP: usize = 0xc000_0000;
pub const MAX_STACK_SIZE: usize = 8 * MB;

pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_FRAME_SIZE - 1)
}

pub const fn page_round_up(addr: usize) -> usize {
    page_round_down(addr + PAGE_FRAME_SIZE - 1)
}

pub const fn page_offset(addr: usize) -> usize {
    addr & (PAGE_FRAME_SIZE - 1)
}

pub const fn is_page_aligned(addr: usize) -> bool {
    page_offset(addr) == 0
}

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod block;
pub mod mem;
pub mod sync;
pub mod system;
pub mod threading;
pub mod vfs;

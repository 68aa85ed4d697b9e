pub mod block_core;
pub mod ram_disk;

use crate::block::block_core::{BlockOp, BlockSector, BLOCK_SECTOR_SIZE};
use alloc::vec;
use alloc::vec::Vec;

/// A block device driver backed by memory, zero-filled at creation.
pub struct RamDisk {
    data: Vec<u8>,
}

impl RamDisk {
    pub fn new(sectors: BlockSector) -> Self {
        Self {
            data: vec![0; sectors as usize * BLOCK_SECTOR_SIZE],
        }
    }

    fn range(sector: BlockSector) -> core::ops::Range<usize> {
        let start = sector as usize * BLOCK_SECTOR_SIZE;
        start..start + BLOCK_SECTOR_SIZE
    }
}

impl BlockOp for RamDisk {
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) {
        buf.copy_from_slice(&self.data[Self::range(sector)]);
    }

    fn write(&mut self, sector: BlockSector, buf: &[u8]) {
        self.data[Self::range(sector)].copy_from_slice(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sectors_are_independent() {
        let mut disk = RamDisk::new(3);
        disk.write(1, &[7u8; BLOCK_SECTOR_SIZE]);

        let mut buf = [0xffu8; BLOCK_SECTOR_SIZE];
        disk.read(0, &mut buf);
        assert_eq!(buf, [0u8; BLOCK_SECTOR_SIZE]);
        disk.read(1, &mut buf);
        assert_eq!(buf, [7u8; BLOCK_SECTOR_SIZE]);
        disk.read(2, &mut buf);
        assert_eq!(buf, [0u8; BLOCK_SECTOR_SIZE]);
    }
}

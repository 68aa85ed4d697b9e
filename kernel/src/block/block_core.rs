use crate::block::ram_disk::RamDisk;
use alloc::string::String;
use core::fmt;

/// Size of a block device sector in bytes.
///
/// All IDE disks use this sector size, as do most USB and SCSI disks.
pub const BLOCK_SECTOR_SIZE: usize = 512;

/// Index of a block device sector.
///
/// Good enough for devices up to 2 TB.
pub type BlockSector = u32;

/// Types of blocks
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BlockType {
    /// OS Kernel
    Kernel,
    /// File system
    FileSystem,
    /// Scratch
    Scratch,
    /// Swap
    Swap,
    /// "Raw" device with unidentified contents
    Raw,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockType::Kernel => write!(f, "Kernel"),
            BlockType::FileSystem => write!(f, "File System"),
            BlockType::Scratch => write!(f, "Scratch"),
            BlockType::Swap => write!(f, "Swap"),
            BlockType::Raw => write!(f, "Raw"),
        }
    }
}

/// Lower-level interface to block device drivers
pub trait BlockOp {
    /// Read a block sector
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]);
    /// Write a block sector
    fn write(&mut self, sector: BlockSector, buf: &[u8]);
}

/// Supported block drivers
pub enum BlockDriver {
    Ram(RamDisk),
}

impl BlockDriver {
    /// Unwrap the block driver to get the underlying block operation
    fn unwrap(&mut self) -> &mut dyn BlockOp {
        match self {
            BlockDriver::Ram(driver) => driver,
        }
    }

    /// Read a block sector
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) {
        self.unwrap().read(sector, buf);
    }

    /// Write a block sector
    fn write(&mut self, sector: BlockSector, buf: &[u8]) {
        self.unwrap().write(sector, buf);
    }
}

/// A block device
pub struct Block {
    /// Tha name of the block device
    block_name: String,

    /// The type of block
    block_type: BlockType,
    /// The block driver
    driver: BlockDriver,

    /// The size of the block device in sectors
    block_size: BlockSector,

    /// The read count
    read_count: u32,
    /// The write count
    write_count: u32,
}

impl Block {
    /// Create a block device named `block_name`, `block_size` sectors long, backed by `driver`.
    pub fn new(
        block_type: BlockType,
        block_name: &str,
        block_size: BlockSector,
        driver: BlockDriver,
    ) -> Block {
        Block {
            block_name: String::from(block_name),
            block_type,
            driver,
            block_size,
            read_count: 0,
            write_count: 0,
        }
    }

    /// Verifies that `buf` is a valid buffer for reading or writing a block sector.
    ///
    /// Panics if the buffer is not the correct size (i.e., `BLOCK_SECTOR_SIZE` bytes).
    fn verify_buffer(buf: &[u8]) {
        if buf.len() != BLOCK_SECTOR_SIZE {
            panic!("Invalid buffer size {}", buf.len());
        }
    }

    /// Verifies that `sector` is a valid offset within the block device.
    ///
    /// Panics if the sector is out of bounds.
    fn check_sector(&self, sector: BlockSector) {
        if sector >= self.block_size {
            panic!(
                "{}: Invalid sector {} (block size: {})",
                self.block_name, sector, self.block_size
            );
        }
    }

    /// Reads sector `sector` from the block device into `buf`, which must have room for
    /// `BLOCK_SECTOR_SIZE` bytes.
    pub fn read(&mut self, sector: BlockSector, buf: &mut [u8]) {
        self.check_sector(sector);
        Self::verify_buffer(buf);

        self.driver.read(sector, buf);
        self.read_count += 1;
    }

    /// Writes sector `sector` from `buf`, which must contain `BLOCK_SECTOR_SIZE` bytes. Returns
    /// after the block device has acknowledged receiving the data.
    pub fn write(&mut self, sector: BlockSector, buf: &[u8]) {
        self.check_sector(sector);
        Self::verify_buffer(buf);

        self.driver.write(sector, buf);
        self.write_count += 1;
    }

    // Block getters -----------------------------------------------------------

    pub fn get_type(&self) -> BlockType {
        self.block_type
    }
    pub fn get_size(&self) -> BlockSector {
        self.block_size
    }
    pub fn get_name(&self) -> &str {
        &self.block_name
    }
    pub fn get_read_count(&self) -> u32 {
        self.read_count
    }
    pub fn get_write_count(&self) -> u32 {
        self.write_count
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "\"{}\" ({}): {:04} sectors, {:04} read, {:04} write",
            self.block_name, self.block_type, self.block_size, self.read_count, self.write_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_block(sectors: BlockSector) -> Block {
        Block::new(
            BlockType::Scratch,
            "scratch",
            sectors,
            BlockDriver::Ram(RamDisk::new(sectors)),
        )
    }

    #[test]
    fn write_then_read_sector() {
        let mut block = scratch_block(4);
        let data = [0xabu8; BLOCK_SECTOR_SIZE];
        block.write(2, &data);

        let mut buf = [0u8; BLOCK_SECTOR_SIZE];
        block.read(2, &mut buf);
        assert_eq!(buf, data);
    }

    #[test]
    fn sectors_start_zeroed() {
        let mut block = scratch_block(1);
        let mut buf = [0xffu8; BLOCK_SECTOR_SIZE];
        block.read(0, &mut buf);
        assert_eq!(buf, [0u8; BLOCK_SECTOR_SIZE]);
    }

    #[test]
    fn counts_track_operations() {
        let mut block = scratch_block(2);
        let buf = [0u8; BLOCK_SECTOR_SIZE];
        block.write(0, &buf);
        block.write(1, &buf);

        let mut out = [0u8; BLOCK_SECTOR_SIZE];
        block.read(0, &mut out);
        assert_eq!(block.get_write_count(), 2);
        assert_eq!(block.get_read_count(), 1);
    }

    #[test]
    #[should_panic(expected = "Invalid sector")]
    fn read_past_end_panics() {
        let mut block = scratch_block(2);
        let mut buf = [0u8; BLOCK_SECTOR_SIZE];
        block.read(2, &mut buf);
    }

    #[test]
    #[should_panic(expected = "Invalid buffer size")]
    fn short_buffer_panics() {
        let mut block = scratch_block(2);
        let mut buf = [0u8; BLOCK_SECTOR_SIZE / 2];
        block.read(0, &mut buf);
    }
}

use crate::sync::SpinLock;
use crate::vfs::File;
use alloc::vec::Vec;
use core::cmp::min;

/// An in-memory file.
pub struct TempFile {
    data: SpinLock<Vec<u8>>,
}

impl TempFile {
    pub fn new() -> TempFile {
        TempFile {
            data: SpinLock::new(Vec::new()),
        }
    }

    /// Create a file whose initial contents are a copy of `bytes`.
    pub fn with_bytes(bytes: &[u8]) -> TempFile {
        TempFile {
            data: SpinLock::new(bytes.to_vec()),
        }
    }
}

impl Default for TempFile {
    fn default() -> Self {
        Self::new()
    }
}

impl File for TempFile {
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let data = self.data.lock();
        if offset >= data.len() {
            // can't read any data
            return 0;
        }
        let read_len = min(buf.len(), data.len() - offset);
        buf[..read_len].copy_from_slice(&data[offset..offset + read_len]);
        read_len
    }

    fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        let mut data = self.data.lock();
        let end = offset + buf.len();
        if end > data.len() {
            // NOTE: files with holes will not perform well.
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        buf.len()
    }

    fn length(&self) -> usize {
        self.data.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_is_clipped_at_end_of_file() {
        let file = TempFile::with_bytes(b"hello");
        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(&mut buf, 0), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(file.read_at(&mut buf, 5), 0);
        assert_eq!(file.read_at(&mut buf, 100), 0);
    }

    #[test]
    fn read_from_offset() {
        let file = TempFile::with_bytes(b"abcdef");
        let mut buf = [0u8; 3];
        assert_eq!(file.read_at(&mut buf, 2), 3);
        assert_eq!(&buf, b"cde");
    }

    #[test]
    fn write_extends_file() {
        let file = TempFile::new();
        assert_eq!(file.write_at(b"abc", 0), 3);
        assert_eq!(file.length(), 3);

        // A write past the end zero-fills the gap.
        assert_eq!(file.write_at(b"xy", 5), 2);
        assert_eq!(file.length(), 7);
        let mut buf = [0xffu8; 7];
        assert_eq!(file.read_at(&mut buf, 0), 7);
        assert_eq!(&buf, b"abc\0\0xy");
    }

    #[test]
    fn write_overwrites_in_place() {
        let file = TempFile::with_bytes(b"abcdef");
        assert_eq!(file.write_at(b"XY", 2), 2);
        let mut buf = [0u8; 6];
        assert_eq!(file.read_at(&mut buf, 0), 6);
        assert_eq!(&buf, b"abXYef");
        assert_eq!(file.length(), 6);
    }
}

pub mod tempfs;

use alloc::sync::Arc;

/// An open file, shared between every context that may need it.
///
/// Offsets are explicit in every call so that concurrent users never share a
/// cursor. Reads past the end of the file are clipped; the returned count
/// says how many bytes were actually transferred.
pub trait File: Send + Sync {
    /// Read from the file at `offset` into `buf`. Returns the number of bytes
    /// read, which is less than `buf.len()` only at end of file.
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize;
    /// Write `buf` to the file at `offset`, growing the file if it ends past
    /// the current length. Returns the number of bytes written.
    fn write_at(&self, buf: &[u8], offset: usize) -> usize;
    /// Current file length in bytes.
    fn length(&self) -> usize;
}

/// A counted reference to an open file.
///
/// Cloning reopens the file; dropping the last clone closes it.
pub type FileRef = Arc<dyn File>;

pub mod fault;
pub mod frame;
pub mod frame_allocator;
pub mod mmap;
pub mod page;
pub mod swap;
pub mod user;

use core::fmt;

/// Errors surfaced by the virtual-memory subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No evictable frame, or no free swap slot.
    ResourceExhausted,
    /// A descriptor or swap slot was in a state the transition forbids.
    InvalidState,
    /// The backing file delivered fewer bytes than the descriptor asked for.
    ShortRead,
    /// The page-table layer refused the mapping.
    InstallFailure,
    /// A caller-supplied argument was rejected.
    InvalidArgument,
    /// The requested range collides with pages that already have descriptors.
    Overlap,
    /// The access touched memory the process may not use.
    BadAccess,
}

impl VmError {
    /// Whether the owning process must be terminated.
    ///
    /// Argument errors go back to the caller; everything else means the
    /// faulting operation cannot be completed.
    pub fn is_fatal(self) -> bool {
        !matches!(self, VmError::InvalidArgument | VmError::Overlap)
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted => write!(f, "out of frames or swap slots"),
            Self::InvalidState => write!(f, "descriptor in an unexpected state"),
            Self::ShortRead => write!(f, "backing file delivered too few bytes"),
            Self::InstallFailure => write!(f, "page-table mapping refused"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Overlap => write!(f, "overlaps an existing mapping"),
            Self::BadAccess => write!(f, "illegal memory access"),
        }
    }
}

impl core::error::Error for VmError {}

pub type Result<T> = core::result::Result<T, VmError>;

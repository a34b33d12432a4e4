use std::io::Result;

use crate::util::address::Address;

/// Raw virtual memory operations.
///
/// A client first reserves a range of address space, then commits and uncommits parts of it as
/// it grows and shrinks.  Reserved but uncommitted memory must not be accessed.  Committed memory
/// reads as zero the first time it is touched after a commit.
///
/// Implementations must be thread-safe, but callers serialise operations on the same range.
pub trait VirtualMemory: Send + Sync {
    /// Reserve `bytes` of address space aligned to `align` (a power of two).
    fn reserve(&self, bytes: usize, align: usize) -> Result<Address>;

    /// Make `[start, start + bytes)` readable and writable.  The range must be inside a
    /// reservation.
    fn commit(&self, start: Address, bytes: usize) -> Result<()>;

    /// Return the physical memory behind `[start, start + bytes)` to the OS.  The range stays
    /// reserved.
    fn uncommit(&self, start: Address, bytes: usize) -> Result<()>;

    /// Change the protection of a committed range.
    fn protect(&self, start: Address, bytes: usize, prot: MmapProtection) -> Result<()>;

    /// Release a whole reservation.  `start` and `bytes` must be what `reserve` returned and was
    /// given.
    fn release(&self, start: Address, bytes: usize) -> Result<()>;
}

/// The protection flags for committed memory.
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MmapProtection {
    /// Allow read + write
    ReadWrite,
    /// Allow reading only
    ReadOnly,
    /// Do not allow any access
    NoAccess,
}

/// Annotation for a mapping, used to name the mapping in `/proc/self/maps` on Linux.  This is for
/// debugging only.
#[derive(Debug, Copy, Clone)]
pub enum MmapAnnotation {
    /// The managed heap.
    Heap,
    /// The mark stack space.
    MarkStack,
    /// For tests.
    Test,
}

impl std::fmt::Display for MmapAnnotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MmapAnnotation::Heap => write!(f, "rgc:heap"),
            MmapAnnotation::MarkStack => write!(f, "rgc:markstack"),
            MmapAnnotation::Test => write!(f, "rgc:test"),
        }
    }
}

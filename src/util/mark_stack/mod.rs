//! Mark stack memory.
//!
//! Marking keeps gray objects in [`Magazine`]s: fixed-size stacks carved out of one reserved
//! [`MarkStackSpace`] by the [`MarkStackAllocator`].  The space has a hard limit.  Running into it
//! is reported as [`crate::util::error::MarkStackExhausted`].

mod allocator;
mod magazine;
mod space;

pub use allocator::MarkStackAllocator;
pub use magazine::{EntryKind, Magazine, MarkStackEntry};
pub use space::MarkStackSpace;

use crate::util::constants::{BYTES_IN_KBYTE, BYTES_IN_MBYTE};

/// Size of one magazine.
pub const MAGAZINE_BYTES: usize = 2 * BYTES_IN_KBYTE;
/// The mark stack space is committed in steps of this size.
pub const EXPAND_BYTES: usize = 32 * BYTES_IN_MBYTE;

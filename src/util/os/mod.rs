//! Platform abstraction for raw virtual memory.
//!
//! Everything in the collector that maps memory (the heap reservation and the mark stack space)
//! goes through [`VirtualMemory`], so the allocator logic is platform independent and can be
//! tested with [`InMemory`].

mod memory;
pub use memory::*;

#[cfg(unix)]
mod posix;
#[cfg(unix)]
pub use posix::*;

mod in_memory;
pub use in_memory::InMemory;

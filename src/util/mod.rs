//! Utilities shared by the collector: addresses, options, memory providers, the mark stack
//! allocator and the per-worker mark cache.

// Macros go first so that every module can use them.
#[macro_use]
pub mod macros;

pub mod address;
pub mod constants;
pub mod conversions;
pub mod error;
pub mod heap;
pub mod logger;
pub mod mark_cache;
pub mod mark_stack;
pub mod metronome;
pub mod options;
pub mod os;

/// Test helpers, including a fake VM binding.  Also available to integration tests and
/// benchmarks with the `test_private` feature.
#[cfg(any(test, feature = "test_private"))]
pub mod test_util;

pub use self::address::{Address, ObjectReference};

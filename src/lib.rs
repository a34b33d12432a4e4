//! RGC is a concurrent, region-based garbage collector core for managed runtimes.
//!
//! The heap is split into fixed-size regions.  A dedicated driver thread runs collection cycles:
//! a short pause marks the roots, GC workers trace the object graph concurrently using
//! mark stacks carved out of a bounded, lazily committed space, a second short pause confirms
//! that marking is complete, and the sparsest regions are then relocated concurrently, with
//! mutators copying objects themselves when they get there first.
//!
//! A VM plugs in by implementing [`vm::VMBinding`] and creating a [`Collector`].
//! Logging goes through the `log` crate; see [`util::logger`].

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

#[macro_use]
pub mod util;

mod build_info;
mod collector;
mod global_state;
pub mod plan;
pub mod policy;
pub mod scheduler;
pub mod vm;

pub use crate::collector::Collector;
pub use crate::global_state::GlobalState;
pub use crate::plan::driver::{CycleStats, DriverPhase, GcCause, GcRequest};
pub use crate::util::error::GcError;
pub use crate::util::options::Options;

#[cfg(test)]
mod tests;

//! Worker threads.
//!
//! A collector owns two [`WorkerPool`]s: the GC workers that mark and relocate concurrently with
//! mutators, and the runtime workers that do parallel work inside pauses.

mod worker_monitor;
mod worker_pool;

pub use worker_pool::{WorkerPool, WorkerTask};

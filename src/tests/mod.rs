//! End-to-end tests: full cycles against the fake VM.

use std::sync::Arc;

use crate::collector::Collector;
use crate::util::os::InMemory;
use crate::util::test_util::{fake_collector, small_heap_options, FakeVM};

mod abort;
mod cycle;
mod references;

// The driver, the director and every worker task share the collector state.
static_assertions::assert_impl_all!(crate::GlobalState<FakeVM>: Send, Sync);

/// A collector on a heap of `nregions` 64K regions.
fn collector(nregions: usize) -> Collector<FakeVM> {
    fake_collector(small_heap_options(nregions), Arc::new(InMemory::new()))
}

/// Allocate `n` unreachable objects with one field each.
fn garbage(collector: &Collector<FakeVM>, n: usize) {
    for i in 0..n {
        FakeVM::new_object(collector, usize::MAX - i, 1);
    }
}

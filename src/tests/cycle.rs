use super::*;
use crate::plan::driver::DriverPhase::{self, *};
use crate::plan::driver::{GcCause, GcRequest};

const FULL_CYCLE: [DriverPhase; 8] = [
    PauseMarkStart,
    ConcurrentMark,
    PauseMarkEnd,
    ConcurrentProcessReferences,
    ConcurrentRelocateSetSelect,
    PauseRelocateStart,
    ConcurrentRelocate,
    Done,
];

/// A linked list of `n` objects with ids `0..n`, rooted at its head.
fn rooted_list(collector: &Collector<FakeVM>, n: usize) {
    let mut next = None;
    for id in (0..n).rev() {
        let object = FakeVM::new_object(collector, id, 1);
        FakeVM::set_field(object, 0, next);
        next = Some(object);
    }
    collector.binding().add_root(next.unwrap());
}

fn list_ids(collector: &Collector<FakeVM>) -> Vec<usize> {
    let mut ids = vec![];
    let mut current = Some(collector.binding().root(0));
    while let Some(object) = current {
        ids.push(FakeVM::id_of(object));
        current = FakeVM::field(collector, object, 0);
    }
    ids
}

#[test]
fn phases_run_in_order() {
    let collector = collector(16);
    rooted_list(&collector, 100);

    let stats = collector.collect(GcCause::Test).unwrap();
    assert_eq!(stats.trace, FULL_CYCLE.to_vec());
    assert!(!stats.aborted);
    assert_eq!(stats.mark_end_retries, 0);
    assert_eq!(stats.marked_objects, 100);
    assert_eq!(stats.marked_bytes, 100 * FakeVM::object_bytes(1));
    assert_eq!(stats.unflushed_cache_entries, 0);

    let vm = collector.binding();
    assert_eq!(vm.pauses(), 3);
    assert_eq!(vm.epochs(), vec![1]);
    let mut expected = FULL_CYCLE.to_vec();
    expected.push(Idle);
    assert_eq!(vm.phases(), expected);
    assert_eq!(collector.phase(), Idle);
    assert_eq!(list_ids(&collector), (0..100).collect::<Vec<_>>());
}

#[test]
fn every_cycle_starts_a_new_epoch() {
    let collector = collector(16);
    rooted_list(&collector, 10);
    for _ in 0..3 {
        let stats = collector.collect(GcCause::SystemGc).unwrap();
        assert_eq!(stats.trace, FULL_CYCLE.to_vec());
    }
    assert_eq!(collector.binding().epochs(), vec![1, 2, 3]);
    assert_eq!(collector.last_cycle().unwrap().id, 3);
    assert_eq!(list_ids(&collector), (0..10).collect::<Vec<_>>());
}

#[test]
fn mark_end_retries_when_mutators_found_more() {
    let collector = collector(16);
    rooted_list(&collector, 5);
    let hidden = FakeVM::new_object(&collector, 1000, 1);
    let child = FakeVM::new_object(&collector, 1001, 0);
    FakeVM::set_field(hidden, 0, Some(child));
    collector.binding().resurrect_at_mark_end(hidden);

    let stats = collector.collect(GcCause::Test).unwrap();
    assert_eq!(stats.mark_end_retries, 1);
    assert_eq!(
        stats.trace,
        vec![
            PauseMarkStart,
            ConcurrentMark,
            PauseMarkEnd,
            ConcurrentMark,
            PauseMarkEnd,
            ConcurrentProcessReferences,
            ConcurrentRelocateSetSelect,
            PauseRelocateStart,
            ConcurrentRelocate,
            Done,
        ]
    );
    assert_eq!(stats.marked_objects, 7);
    assert!(collector.is_live(hidden));
    assert!(collector.is_live(child));

    let roots = collector.binding().roots();
    assert_eq!(roots.len(), 2);
    assert_eq!(FakeVM::id_of(roots[1]), 1000);
    let child = FakeVM::field(&collector, roots[1], 0).unwrap();
    assert_eq!(FakeVM::id_of(child), 1001);
}

#[test]
fn unreachable_objects_are_not_live() {
    let collector = collector(16);
    rooted_list(&collector, 3);
    let lost = FakeVM::new_object(&collector, 42, 0);
    collector.collect(GcCause::Test).unwrap();
    assert!(!collector.is_live(lost));
    assert!(collector.is_live(collector.binding().root(0)));
}

#[test]
fn objects_allocated_during_a_cycle_are_live() {
    let collector = collector(16);
    collector.collect(GcCause::Test).unwrap();
    let fresh = FakeVM::new_object(&collector, 7, 0);
    assert!(collector.is_live(fresh));
}

#[test]
fn worker_count_is_clamped() {
    let collector = collector(16);
    rooted_list(&collector, 10);
    let stats = collector
        .collect_with(GcRequest::new(GcCause::Test, 64))
        .unwrap();
    assert_eq!(stats.workers, collector.options().conc_threads);
    let stats = collector
        .collect_with(GcRequest::new(GcCause::Test, 0))
        .unwrap();
    assert_eq!(stats.workers, 1);
    assert_eq!(stats.marked_objects, 10);
}

#[test]
fn barriers_do_nothing_while_idle() {
    let collector = collector(16);
    let object = FakeVM::new_object(&collector, 1, 0);
    assert_eq!(collector.remap(object), object);
    assert_eq!(collector.mark_barrier(object), object);
    assert_eq!(collector.phase(), Idle);
}

#[test]
fn shutdown_is_idempotent() {
    let collector = collector(16);
    collector.collect(GcCause::Test).unwrap();
    collector.shutdown();
    collector.shutdown();
    assert!(collector.collect(GcCause::Test).is_none());
    // Requests after shutdown are dropped.
    collector.request_collection(GcCause::Test);
}

#[test]
fn panicking_worker_stops_the_driver() {
    let collector = collector(16);
    rooted_list(&collector, 3);
    collector.binding().break_object_scanning();
    // The requester is released instead of waiting for a cycle that never completes.
    assert!(collector.collect(GcCause::Test).is_none());
    assert!(collector.collect(GcCause::Test).is_none());
    assert!(collector.last_cycle().is_none());
}

use super::*;
use crate::plan::driver::DriverPhase::*;
use crate::plan::driver::GcCause;

#[test]
fn out_of_mark_stack_aborts_the_cycle() {
    let mark_stack_memory = Arc::new(InMemory::new());
    let collector = fake_collector(small_heap_options(16), mark_stack_memory.clone());
    let root = FakeVM::new_object(&collector, 1, 1);
    let child = FakeVM::new_object(&collector, 2, 0);
    FakeVM::set_field(root, 0, Some(child));
    collector.binding().add_root(root);
    garbage(&collector, 3000);
    let used = collector.heap().used_regions();

    mark_stack_memory.fail_commits_after(0);
    let stats = collector.collect(GcCause::Test).unwrap();
    assert!(stats.aborted);
    assert_eq!(stats.trace, vec![PauseMarkStart, ConcurrentMark, Done]);
    assert_eq!(stats.freed_regions, 0);
    assert_eq!(stats.relocated_regions, 0);
    assert_eq!(collector.phase(), Idle);
    // Nothing was reclaimed and nothing moved.
    assert_eq!(collector.heap().used_regions(), used);
    assert_eq!(collector.binding().root(0), root);
    assert!(collector.binding().relocation_sets().is_empty());
    assert_eq!(mark_stack_memory.committed_bytes(), 0);

    // With memory back, the next cycle completes and collects the garbage.
    mark_stack_memory.fail_commits_after(usize::MAX);
    let stats = collector.collect(GcCause::Test).unwrap();
    assert!(!stats.aborted);
    assert_eq!(stats.marked_objects, 2);
    assert!(stats.freed_regions >= 1);
    let root = collector.binding().root(0);
    let child = FakeVM::field(&collector, root, 0).unwrap();
    assert_eq!(FakeVM::id_of(child), 2);
    assert_eq!(mark_stack_memory.committed_bytes(), 0);
}

#[test]
fn aborted_cycle_keeps_the_previous_relocation_set() {
    let mark_stack_memory = Arc::new(InMemory::new());
    let collector = fake_collector(small_heap_options(16), mark_stack_memory.clone());
    let root = FakeVM::new_object(&collector, 1, 1);
    collector.binding().add_root(root);
    garbage(&collector, 100);

    let first = collector.collect(GcCause::Test).unwrap();
    assert_eq!(first.relocated_objects, 1);
    let moved = collector.binding().root(0);
    assert_ne!(moved, root);

    mark_stack_memory.fail_commits_after(0);
    assert!(collector.collect(GcCause::Test).unwrap().aborted);
    // The stale reference can still be healed.
    assert_eq!(collector.remap(root), moved);

    mark_stack_memory.fail_commits_after(usize::MAX);
    let third = collector.collect(GcCause::Test).unwrap();
    assert!(!third.aborted);
    assert!(third.freed_regions >= first.relocated_regions);
}

#[test]
fn out_of_mark_stack_while_keeping_objects_alive_aborts() {
    let mark_stack_memory = Arc::new(InMemory::new());
    let collector = fake_collector(small_heap_options(16), mark_stack_memory.clone());
    let vm = collector.binding();
    let finalizable = FakeVM::new_object(&collector, 10, 1);
    let child = FakeVM::new_object(&collector, 11, 0);
    FakeVM::set_field(finalizable, 0, Some(child));
    vm.add_finalizable(finalizable);
    let used = collector.heap().used_regions();

    // Nothing is reachable, so the first mark stack memory is needed by reference processing.
    mark_stack_memory.fail_commits_after(0);
    let stats = collector.collect(GcCause::Test).unwrap();
    assert!(stats.aborted);
    assert_eq!(
        stats.trace,
        vec![
            PauseMarkStart,
            ConcurrentMark,
            PauseMarkEnd,
            ConcurrentProcessReferences,
            Done
        ]
    );
    assert_eq!(stats.freed_regions, 0);
    assert_eq!(collector.heap().used_regions(), used);
    assert_eq!(mark_stack_memory.committed_bytes(), 0);
    // Partial marks do not count.
    assert!(collector.is_live(finalizable));
    assert!(collector.is_live(child));

    // The object handed to the VM for finalization is a root now, and survives the next cycle.
    mark_stack_memory.fail_commits_after(usize::MAX);
    let stats = collector.collect(GcCause::Test).unwrap();
    assert!(!stats.aborted);
    assert_eq!(stats.marked_objects, 2);
    let finalized = vm.take_finalized();
    assert_eq!(finalized.len(), 1);
    assert_eq!(FakeVM::id_of(finalized[0]), 10);
    let child = FakeVM::field(&collector, finalized[0], 0).unwrap();
    assert_eq!(FakeVM::id_of(child), 11);
}

#[test]
fn out_of_mark_stack_while_tracing_aborts() {
    const LEVELS: usize = 2600;
    const WIDTH: usize = 2000;
    let mut options = small_heap_options(1024);
    options.conc_threads = 1;
    let mark_stack_memory = Arc::new(InMemory::new());
    let collector = fake_collector(options, mark_stack_memory.clone());

    // Every field of a level points to the next level.  Tracing pushes the next level once per
    // field and only the top entry is new, so the mark stack grows by about WIDTH entries per
    // level and outgrows its space long before the chain ends.
    let chain: Vec<_> = (0..LEVELS)
        .map(|id| FakeVM::new_object(&collector, id, WIDTH))
        .collect();
    for pair in chain.windows(2) {
        for field in 0..WIDTH {
            FakeVM::set_field(pair[0], field, Some(pair[1]));
        }
    }
    collector.binding().add_root(chain[0]);
    let used = collector.heap().used_regions();

    let stats = collector.collect(GcCause::Test).unwrap();
    assert!(stats.aborted);
    assert_eq!(stats.trace, vec![PauseMarkStart, ConcurrentMark, Done]);
    assert_eq!(stats.freed_regions, 0);
    assert_eq!(collector.heap().used_regions(), used);
    assert_eq!(collector.global().mark_stack.outstanding(), 0);
    assert_eq!(mark_stack_memory.committed_bytes(), 0);
    assert!(collector.is_live(chain[LEVELS - 1]));

    // Cut the chain short.  The next cycle fits in the mark stack and frees the rest.
    for field in 0..WIDTH {
        FakeVM::set_field(chain[9], field, None);
    }
    let stats = collector.collect(GcCause::Test).unwrap();
    assert!(!stats.aborted);
    assert_eq!(stats.marked_objects, 10);
    assert!(stats.freed_regions > 0);
    assert!(collector.heap().used_regions() < used);
    assert_eq!(collector.binding().root(0), chain[0]);
}

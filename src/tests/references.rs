use super::*;
use crate::plan::driver::GcCause;

#[test]
fn weak_references_are_cleared() {
    let collector = collector(16);
    let vm = collector.binding();
    let strong = FakeVM::new_object(&collector, 1, 0);
    vm.add_root(strong);
    let to_live = vm.add_weak(strong);
    let to_dead = vm.add_weak(FakeVM::new_object(&collector, 2, 0));

    let stats = collector.collect(GcCause::Test).unwrap();
    assert_eq!(stats.kept_alive, 0);
    assert_eq!(vm.weak(to_dead), None);
    // Weak references were processed before relocation, so the slot holds the old copy.
    let live = vm.weak(to_live).unwrap();
    assert_eq!(FakeVM::id_of(collector.remap(live)), 1);
    assert_eq!(collector.remap(live), vm.root(0));
}

#[test]
fn finalizable_objects_are_kept_alive() {
    let collector = collector(16);
    let vm = collector.binding();
    vm.add_root(FakeVM::new_object(&collector, 1, 0));
    let finalizable = FakeVM::new_object(&collector, 10, 1);
    let child = FakeVM::new_object(&collector, 11, 0);
    FakeVM::set_field(finalizable, 0, Some(child));
    vm.add_finalizable(finalizable);
    let weak = vm.add_weak(finalizable);

    let stats = collector.collect(GcCause::Test).unwrap();
    assert!(!stats.aborted);
    assert_eq!(stats.kept_alive, 2);
    assert_eq!(stats.marked_objects, 3);
    // Weak references to an object awaiting finalization are cleared.
    assert_eq!(vm.weak(weak), None);

    let finalized = vm.take_finalized();
    assert_eq!(finalized.len(), 1);
    assert_eq!(FakeVM::id_of(finalized[0]), 10);
    let child = FakeVM::field(&collector, finalized[0], 0).unwrap();
    assert_eq!(FakeVM::id_of(child), 11);
    assert!(collector.is_live(finalized[0]));

    // Once finalized and dropped, the object is garbage.
    let stats = collector.collect(GcCause::Test).unwrap();
    assert_eq!(stats.kept_alive, 0);
    assert_eq!(stats.marked_objects, 1);
}

#[test]
fn reachable_finalizable_objects_wait() {
    let collector = collector(16);
    let vm = collector.binding();
    let object = FakeVM::new_object(&collector, 5, 0);
    vm.add_root(object);
    vm.add_finalizable(object);

    let stats = collector.collect(GcCause::Test).unwrap();
    assert_eq!(stats.kept_alive, 0);
    assert!(vm.take_finalized().is_empty());

    vm.clear_roots();
    let stats = collector.collect(GcCause::Test).unwrap();
    assert_eq!(stats.kept_alive, 1);
    let finalized = vm.take_finalized();
    assert_eq!(finalized.len(), 1);
    assert_eq!(FakeVM::id_of(finalized[0]), 5);
}

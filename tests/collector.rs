//! A collector on real OS memory.
#![cfg(all(unix, feature = "test_private"))]

use rgc::util::test_util::FakeVM;
use rgc::{Collector, GcCause, Options};

#[test]
fn collect_on_anonymous_memory() {
    let mut options = Options::without_env();
    options.heap_size = 8 << 20;
    options.threads = 2;
    options.conc_threads = 2;
    options.use_director = false;
    let collector = Collector::new(options, FakeVM::new()).unwrap();
    collector.binding().attach(&collector);

    let root = FakeVM::new_object(&collector, 1, 1);
    let child = FakeVM::new_object(&collector, 2, 0);
    FakeVM::set_field(root, 0, Some(child));
    collector.binding().add_root(root);
    for i in 0..10_000 {
        FakeVM::new_object(&collector, 100 + i, 1);
    }

    let stats = collector.collect(GcCause::SystemGc).unwrap();
    assert!(!stats.aborted);
    assert_eq!(stats.marked_objects, 2);
    let root = collector.binding().root(0);
    let child = FakeVM::field(&collector, root, 0).unwrap();
    assert_eq!(FakeVM::id_of(child), 2);
    collector.shutdown();
}

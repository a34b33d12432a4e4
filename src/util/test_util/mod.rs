use std::panic;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::collector::Collector;
use crate::util::constants::{MIN_MARK_STACK_SPACE_LIMIT, MIN_REGION_SIZE};
use crate::util::os::{InMemory, VirtualMemory};
use crate::util::options::Options;

mod fake_vm;
pub use fake_vm::FakeVM;

// https://github.com/rust-lang/rfcs/issues/2798#issuecomment-552949300
pub fn panic_after<T, F>(millis: u64, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T,
    F: Send + 'static,
{
    let (done_tx, done_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let val = f();
        done_tx.send(()).expect("Unable to send completion signal");
        val
    });

    match done_rx.recv_timeout(Duration::from_millis(millis)) {
        Ok(_) => handle.join().expect("Thread panicked"),
        Err(e) => panic!("Thread took too long: {}", e),
    }
}

lazy_static! {
    // A global lock to make tests serial.
    static ref SERIAL_TEST_LOCK: Mutex<()> = Mutex::default();
}

// Force some tests to be executed serially.
pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // If one test fails, the lock will become poisoned. We would want to continue for other tests anyway.
    let _guard = SERIAL_TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

// Always execute a cleanup closure no matter the test panics or not.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce() + panic::UnwindSafe,
    C: FnOnce(),
{
    let res = panic::catch_unwind(test);
    cleanup();
    if let Err(e) = res {
        panic::resume_unwind(e);
    }
}

/// Options for a small heap of `nregions` 64K regions.  The director is off, so cycles only run
/// when a test asks for them.
pub fn small_heap_options(nregions: usize) -> Options {
    let mut options = Options::without_env();
    options.region_size = MIN_REGION_SIZE;
    options.heap_size = nregions * MIN_REGION_SIZE;
    options.mark_stack_space_limit = MIN_MARK_STACK_SPACE_LIMIT;
    options.threads = 2;
    options.conc_threads = 2;
    options.use_numa = false;
    options.use_director = false;
    options
}

/// A collector for a [`FakeVM`] on in-memory heap and mark stack memory.
pub fn fake_collector(options: Options, mark_stack_memory: Arc<InMemory>) -> Collector<FakeVM> {
    let _ = crate::util::logger::try_init();
    let heap_memory: Arc<dyn VirtualMemory> = Arc::new(InMemory::new());
    let collector = Collector::with_memory(options, FakeVM::new(), heap_memory, mark_stack_memory)
        .expect("Failed to create a collector");
    collector.binding().attach(&collector);
    collector
}

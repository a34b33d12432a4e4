//! Parallel sorting on a worker pool: each worker sorts the chunks it claims, then the driver
//! merges them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rgc::scheduler::{WorkerPool, WorkerTask};

const CHUNK: usize = 1000;

struct SortChunks {
    chunks: Vec<Mutex<Vec<u64>>>,
    cursor: AtomicUsize,
    sorted_by: Vec<AtomicUsize>,
}

impl WorkerTask for SortChunks {
    fn execute(&self, ordinal: usize) {
        loop {
            let i = self.cursor.fetch_add(1, Ordering::Relaxed);
            let Some(chunk) = self.chunks.get(i) else {
                return;
            };
            chunk.lock().unwrap().sort_unstable();
            self.sorted_by[i].store(ordinal, Ordering::Relaxed);
        }
    }
}

#[test]
fn parallel_sort() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let data: Vec<u64> = (0..50 * CHUNK).map(|_| rng.random()).collect();
    let pool = WorkerPool::new("Sort", 4).unwrap();
    let task = Arc::new(SortChunks {
        chunks: data.chunks(CHUNK).map(|c| Mutex::new(c.to_vec())).collect(),
        cursor: AtomicUsize::new(0),
        sorted_by: (0..50).map(|_| AtomicUsize::new(usize::MAX)).collect(),
    });
    pool.run(task.clone(), 4);

    assert!(task
        .sorted_by
        .iter()
        .all(|o| o.load(Ordering::Relaxed) < 4));
    let mut merged: Vec<u64> = task
        .chunks
        .iter()
        .flat_map(|c| c.lock().unwrap().clone())
        .collect();
    merged.sort();
    let mut expected = data;
    expected.sort();
    assert_eq!(merged, expected);
}

#[test]
fn runs_on_the_requested_number_of_workers() {
    let pool = WorkerPool::new("Count", 4).unwrap();
    assert_eq!(pool.nworkers(), 4);
    for nactive in [1, 2, 4, 9] {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        pool.run(
            Arc::new(move |_ordinal: usize| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            nactive,
        );
        assert_eq!(seen.load(Ordering::SeqCst), nactive.min(4));
    }
}

#[test]
fn empty_pool_is_refused() {
    assert!(WorkerPool::new("Empty", 0).is_err());
}

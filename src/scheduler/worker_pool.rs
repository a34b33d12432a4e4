use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;

use super::worker_monitor::WorkerMonitor;
use crate::util::error::GcError;

/// A unit of work run by every active worker of a pool.
///
/// The same task object is shared by all active workers; each calls [`WorkerTask::execute`] once
/// with its own ordinal.
pub trait WorkerTask: Send + Sync + 'static {
    fn execute(&self, ordinal: usize);

    /// Get the compile-time static type name for the task.
    fn get_type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<F: Fn(usize) + Send + Sync + 'static> WorkerTask for F {
    fn execute(&self, ordinal: usize) {
        self(ordinal)
    }
}

/// Blocks every worker on a barrier until all of them are running.
struct WarmUp {
    barrier: Barrier,
}

impl WorkerTask for WarmUp {
    fn execute(&self, ordinal: usize) {
        trace!("Worker {} checked in", ordinal);
        self.barrier.wait();
    }
}

/// A fixed-size pool of named worker threads.
///
/// Construction does not return before every worker thread has started and run a warm-up task.
/// Dropping the pool stops and joins its threads.
pub struct WorkerPool {
    name: String,
    monitor: Arc<WorkerMonitor>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(name: &str, nworkers: usize) -> Result<Self, GcError> {
        if nworkers == 0 {
            error!("{} pool: at least one worker is required", name);
            return Err(GcError::InvalidOption {
                name: "workers",
                reason: format!("{} pool needs at least one worker", name),
            });
        }

        let mut pool = WorkerPool {
            name: name.to_string(),
            monitor: Arc::new(WorkerMonitor::new(nworkers)),
            handles: Vec::with_capacity(nworkers),
        };
        for ordinal in 0..nworkers {
            let monitor = pool.monitor.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("{} Worker #{}", name, ordinal))
                .spawn(move || worker_loop(monitor, ordinal));
            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(source) => {
                    let started = pool.handles.len();
                    error!(
                        "{} pool: failed to start worker {} of {}: {}",
                        name, ordinal, nworkers, source
                    );
                    // Dropping the pool joins the workers that did start.
                    drop(pool);
                    return Err(GcError::WorkerStartup {
                        pool: name.to_string(),
                        requested: nworkers,
                        started,
                        source,
                    });
                }
            }
        }

        pool.run(
            Arc::new(WarmUp {
                barrier: Barrier::new(nworkers),
            }),
            nworkers,
        );
        debug!("{} pool: {} workers started", name, nworkers);
        Ok(pool)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nworkers(&self) -> usize {
        self.handles.len()
    }

    /// Run `task` on `nactive` workers (at least one, at most all of them) and return when they
    /// have all finished.
    pub fn run(&self, task: Arc<dyn WorkerTask>, nactive: usize) {
        let nactive = nactive.clamp(1, self.nworkers());
        trace!(
            "{} pool: run {} on {} workers",
            self.name,
            task.get_type_name(),
            nactive
        );
        let name = task.get_type_name();
        if let Some(payload) = self.monitor.dispatch_and_wait(task, nactive) {
            error!("{} pool: a worker panicked running {}", self.name, name);
            panic::resume_unwind(payload);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.monitor.request_exit();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("{} pool: a worker panicked", self.name);
            }
        }
    }
}

fn worker_loop(monitor: Arc<WorkerMonitor>, ordinal: usize) {
    let mut last_generation = 0;
    while let Ok(dispatch) = monitor.park_and_wait(ordinal, last_generation) {
        last_generation = dispatch.generation;
        // A panic is handed to the dispatcher, which would otherwise wait for this worker forever.
        let result = panic::catch_unwind(AssertUnwindSafe(|| dispatch.task.execute(ordinal)));
        // Release the task before reporting in.  The last reference must stay with the dispatcher.
        drop(dispatch);
        monitor.on_task_finished(result.err());
    }
    trace!("Worker {} exited", ordinal);
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn zero_workers_rejected() {
        assert!(matches!(
            WorkerPool::new("Empty", 0),
            Err(GcError::InvalidOption { .. })
        ));
    }

    #[test]
    fn every_worker_runs_on_its_own_thread() {
        let pool = WorkerPool::new("Test", 4).unwrap();
        assert_eq!(pool.nworkers(), 4);

        let names: Arc<Mutex<HashSet<String>>> = Default::default();
        let task = {
            let names = names.clone();
            Arc::new(move |_ordinal: usize| {
                let name = std::thread::current().name().unwrap().to_string();
                names.lock().unwrap().insert(name);
            })
        };
        pool.run(task, 4);
        let names = names.lock().unwrap();
        assert_eq!(names.len(), 4);
        assert!(names.contains("Test Worker #0"));
        assert!(names.contains("Test Worker #3"));
    }

    #[test]
    fn nactive_is_clamped() {
        let pool = WorkerPool::new("Clamp", 2).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let task = {
            let count = count.clone();
            Arc::new(move |_: usize| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        pool.run(task.clone(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        pool.run(task, 10);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panics_reach_the_dispatcher() {
        let pool = WorkerPool::new("Panic", 2).unwrap();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pool.run(
                Arc::new(|ordinal: usize| {
                    if ordinal == 1 {
                        panic!("worker {} failed", ordinal);
                    }
                }),
                2,
            )
        }));
        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<String>().unwrap(), "worker 1 failed");

        // The pool is still usable.
        let count = Arc::new(AtomicUsize::new(0));
        let task = {
            let count = count.clone();
            Arc::new(move |_: usize| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        pool.run(task, 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn workers_rendezvous_in_one_run() {
        // A barrier task only completes if all workers run it at the same time.
        let pool = WorkerPool::new("Barrier", 3).unwrap();
        pool.run(
            Arc::new(WarmUp {
                barrier: Barrier::new(3),
            }),
            3,
        );
    }
}

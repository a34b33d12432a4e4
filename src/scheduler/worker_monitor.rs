//! This module contains `WorkerMonitor` and related types.  Its purposes include:
//!
//! -   allowing idle workers to park until a task is dispatched,
//! -   letting the dispatching thread wait until every active worker has finished, and
//! -   telling workers to exit when the pool shuts down.

use std::any::Any;
use std::sync::{Arc, Condvar, Mutex};

use super::worker_pool::WorkerTask;

/// Returned to a worker that should leave its loop and let its thread finish.
#[derive(Debug)]
pub(crate) struct WorkerShouldExit;

/// A task dispatched to a pool, run by the workers whose ordinal is below `nactive`.
#[derive(Clone)]
pub(crate) struct Dispatch {
    pub task: Arc<dyn WorkerTask>,
    pub nactive: usize,
    pub generation: u64,
}

/// A data structure for synchronizing the workers of one pool with the thread that dispatches
/// tasks to them.  There is one instance per pool.
pub(crate) struct WorkerMonitor {
    /// The synchronized part.
    sync: Mutex<WorkerMonitorSync>,
    /// Workers wait on this when idle.  Notified when a task is dispatched or the pool exits.
    workers_have_anything_to_do: Condvar,
    /// The dispatcher waits on this until all active workers are done.  Also notified when the
    /// current dispatch is cleared, for the next dispatcher.
    dispatch_finished: Condvar,
}

/// The synchronized part of `WorkerMonitor`.
struct WorkerMonitorSync {
    /// Count parked workers.
    parker: WorkerParker,
    /// The current dispatch, if any.
    current: Option<Dispatch>,
    /// Incremented for every dispatch.
    generation: u64,
    /// Active workers that finished the current dispatch.
    finished: usize,
    /// The payload of the first panic of a worker running the current dispatch.
    panic: Option<Box<dyn Any + Send>>,
    /// Set once.  Workers exit when they see it.
    exiting: bool,
}

/// This struct counts the number of workers parked.
struct WorkerParker {
    /// The total number of workers.
    worker_count: usize,
    /// Number of parked workers.
    parked_workers: usize,
}

impl WorkerParker {
    fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            parked_workers: 0,
        }
    }

    /// Called before a worker is parked.
    fn inc_parked_workers(&mut self) {
        debug_assert!(self.parked_workers < self.worker_count);
        self.parked_workers += 1;
    }

    /// Called after a worker is resumed from the parked state.
    fn dec_parked_workers(&mut self) {
        debug_assert!(self.parked_workers > 0);
        self.parked_workers -= 1;
    }
}

impl WorkerMonitor {
    pub fn new(worker_count: usize) -> Self {
        Self {
            sync: Mutex::new(WorkerMonitorSync {
                parker: WorkerParker::new(worker_count),
                current: None,
                generation: 0,
                finished: 0,
                panic: None,
                exiting: false,
            }),
            workers_have_anything_to_do: Default::default(),
            dispatch_finished: Default::default(),
        }
    }

    /// Run `task` on the first `nactive` workers and block until all of them have finished.
    /// Concurrent dispatchers are served one after another.  If a worker panicked, return the
    /// panic payload.
    pub fn dispatch_and_wait(
        &self,
        task: Arc<dyn WorkerTask>,
        nactive: usize,
    ) -> Option<Box<dyn Any + Send>> {
        let mut sync = self.sync.lock().unwrap();
        while sync.current.is_some() {
            sync = self.dispatch_finished.wait(sync).unwrap();
        }

        sync.generation += 1;
        sync.finished = 0;
        sync.panic = None;
        sync.current = Some(Dispatch {
            task,
            nactive,
            generation: sync.generation,
        });
        trace!(
            "Dispatch #{} to {} workers.  parked/total: {}/{}",
            sync.generation,
            nactive,
            sync.parker.parked_workers,
            sync.parker.worker_count
        );
        self.workers_have_anything_to_do.notify_all();

        while sync.finished < nactive {
            sync = self.dispatch_finished.wait(sync).unwrap();
        }
        sync.current = None;
        // Wake the next dispatcher, if any.
        self.dispatch_finished.notify_all();
        sync.panic.take()
    }

    /// Park a worker until there is a dispatch it has not run yet and is active in.
    ///
    /// This function returns `Ok(dispatch)` if the current worker should run the dispatched task,
    /// or `Err(WorkerShouldExit)` if the current worker should exit now.
    pub fn park_and_wait(
        &self,
        ordinal: usize,
        last_generation: u64,
    ) -> Result<Dispatch, WorkerShouldExit> {
        let mut sync = self.sync.lock().unwrap();
        sync.parker.inc_parked_workers();
        trace!(
            "Worker {} parked.  parked/total: {}/{}.",
            ordinal,
            sync.parker.parked_workers,
            sync.parker.worker_count,
        );

        // Spurious wake-ups only cause another check of the same conditions.
        let result = loop {
            if sync.exiting {
                break Err(WorkerShouldExit);
            }
            if let Some(dispatch) = &sync.current {
                if dispatch.generation != last_generation && ordinal < dispatch.nactive {
                    break Ok(dispatch.clone());
                }
            }
            sync = self.workers_have_anything_to_do.wait(sync).unwrap();
        };

        sync.parker.dec_parked_workers();
        trace!(
            "Worker {} unparked.  parked/total: {}/{}.",
            ordinal,
            sync.parker.parked_workers,
            sync.parker.worker_count,
        );
        result
    }

    /// Called by an active worker after it has run the task of the current dispatch, with the
    /// panic payload if the task panicked.
    pub fn on_task_finished(&self, panic: Option<Box<dyn Any + Send>>) {
        let mut sync = self.sync.lock().unwrap();
        sync.finished += 1;
        if sync.panic.is_none() {
            sync.panic = panic;
        }
        let nactive = sync.current.as_ref().map_or(0, |d| d.nactive);
        if sync.finished >= nactive {
            self.dispatch_finished.notify_all();
        }
    }

    /// Tell every worker to exit once it is idle.
    pub fn request_exit(&self) {
        let mut sync = self.sync.lock().unwrap();
        sync.exiting = true;
        self.workers_have_anything_to_do.notify_all();
    }
}

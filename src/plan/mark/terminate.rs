use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam::utils::Backoff;

/// Distributed termination of a parallel mark.
///
/// A worker that runs out of work registers as idle and spins.  It leaves the idle set again if
/// work shows up.  Marking is over when every participating worker is idle at once: by then
/// every worker has published what it had, so there is nothing left to steal.
pub struct MarkTerminate {
    nworkers: AtomicUsize,
    idle: AtomicUsize,
}

impl MarkTerminate {
    pub fn new() -> Self {
        Self {
            nworkers: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
        }
    }

    /// Prepare for a mark with `nworkers` workers.
    pub fn reset(&self, nworkers: usize) {
        self.nworkers.store(nworkers, Ordering::SeqCst);
        self.idle.store(0, Ordering::SeqCst);
    }

    /// Workers currently waiting for work.  Busy workers give work away when this is not zero.
    pub fn idle_workers(&self) -> usize {
        self.idle.load(Ordering::Relaxed)
    }

    /// Called by a worker with no local work.  Return true if marking is over, or false if
    /// `has_work` turned true and the worker should go back to work.  `should_abort` ends the
    /// wait early without waiting for the others.
    pub fn try_terminate(&self, has_work: impl Fn() -> bool, should_abort: impl Fn() -> bool) -> bool {
        let nworkers = self.nworkers.load(Ordering::SeqCst);
        self.idle.fetch_add(1, Ordering::SeqCst);
        let backoff = Backoff::new();
        loop {
            // Read before checking for work: once everybody is idle nobody publishes any more.
            let all_idle = self.idle.load(Ordering::SeqCst) >= nworkers;
            if has_work() {
                self.idle.fetch_sub(1, Ordering::SeqCst);
                return false;
            }
            if all_idle || should_abort() {
                // Stay counted as idle, so the others see everybody idle too.
                return true;
            }
            if backoff.is_completed() {
                std::thread::sleep(Duration::from_micros(100));
            } else {
                backoff.snooze();
            }
        }
    }
}

impl Default for MarkTerminate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    #[test]
    fn single_worker_terminates_at_once() {
        let terminate = MarkTerminate::new();
        terminate.reset(1);
        assert!(terminate.try_terminate(|| false, || false));
    }

    #[test]
    fn work_brings_a_worker_back() {
        let terminate = MarkTerminate::new();
        terminate.reset(2);
        assert!(!terminate.try_terminate(|| true, || false));
        assert_eq!(terminate.idle_workers(), 0);
    }

    #[test]
    fn everybody_leaves_together() {
        const NWORKERS: usize = 4;
        let terminate = MarkTerminate::new();
        terminate.reset(NWORKERS);
        let work = AtomicUsize::new(1000);
        let done = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..NWORKERS {
                s.spawn(|| loop {
                    while work
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| w.checked_sub(1))
                        .is_ok()
                    {}
                    if terminate.try_terminate(|| work.load(Ordering::SeqCst) > 0, || false) {
                        done.fetch_add(1, Ordering::SeqCst);
                        break;
                    }
                });
            }
        });
        assert_eq!(work.load(Ordering::SeqCst), 0);
        assert_eq!(done.load(Ordering::SeqCst), NWORKERS);
    }

    #[test]
    fn abort_does_not_wait_for_the_others() {
        let terminate = MarkTerminate::new();
        terminate.reset(3);
        let abort = AtomicBool::new(true);
        assert!(terminate.try_terminate(|| false, || abort.load(Ordering::SeqCst)));
    }
}

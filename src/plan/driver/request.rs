//! GC requests and the port the driver receives them through.

use std::sync::{Condvar, Mutex};
use std::time::Instant;

use strum_macros::{Display, EnumIter};

/// Why a collection was requested.  Later variants take priority over earlier ones when
/// requests are merged.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
pub enum GcCause {
    /// The director's periodic timer.
    Timer,
    /// The director's warm-up rule, for the first cycles of a process.
    Warmup,
    /// The director saw heap occupancy above the trigger.
    HighOccupancy,
    /// Requested by a test.
    Test,
    /// Explicitly requested by the VM.
    SystemGc,
    /// A mutator could not allocate.
    AllocationStall,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GcRequest {
    pub cause: GcCause,
    /// Number of GC workers to use for concurrent phases.
    pub worker_count: usize,
}

impl GcRequest {
    pub fn new(cause: GcCause, worker_count: usize) -> Self {
        Self {
            cause,
            worker_count,
        }
    }

    /// Fold two requests into one cycle: the more urgent cause and the larger worker count win.
    pub fn merge(self, other: GcRequest) -> GcRequest {
        GcRequest {
            cause: std::cmp::max(self.cause, other.cause),
            worker_count: std::cmp::max(self.worker_count, other.worker_count),
        }
    }
}

/// The mailbox between requesters and the driver thread.
///
/// There is a single pending slot.  A request arriving while another one is pending is merged
/// into it.  A request arriving while a cycle runs is not merged into that cycle; it waits in the
/// pending slot for the next one.
pub struct DriverPort {
    sync: Mutex<PortSync>,
    /// Notified when a request arrives or the port shuts down.
    request_posted: Condvar,
    /// Notified when a cycle completes or the port shuts down.
    cycle_completed: Condvar,
}

struct PortSync {
    pending: Option<GcRequest>,
    /// Id of the last cycle started.  Cycle ids start from 1.
    started: u64,
    /// Id of the last cycle completed.
    completed: u64,
    /// When the last cycle completed, or when the port was created.
    last_completion: Instant,
    shutdown: bool,
}

impl Default for DriverPort {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverPort {
    pub fn new() -> Self {
        Self {
            sync: Mutex::new(PortSync {
                pending: None,
                started: 0,
                completed: 0,
                last_completion: Instant::now(),
                shutdown: false,
            }),
            request_posted: Condvar::new(),
            cycle_completed: Condvar::new(),
        }
    }

    /// Post a request and return the id of the cycle that will serve it.
    fn post(&self, sync: &mut PortSync, request: GcRequest) -> u64 {
        sync.pending = Some(match sync.pending {
            Some(pending) => {
                let merged = pending.merge(request);
                debug!("Merged GC request {:?} into {:?}", request, merged);
                merged
            }
            None => request,
        });
        self.request_posted.notify_all();
        sync.started + 1
    }

    /// Post a request without waiting for it to be served.
    pub fn send_async(&self, request: GcRequest) {
        let mut sync = self.sync.lock().unwrap();
        if sync.shutdown {
            return;
        }
        self.post(&mut sync, request);
    }

    /// Post a request and wait until a cycle that started after it has completed.  Return the
    /// id of that cycle, or `None` if the port shut down first.
    pub fn send_sync(&self, request: GcRequest) -> Option<u64> {
        let mut sync = self.sync.lock().unwrap();
        if sync.shutdown {
            return None;
        }
        let target = self.post(&mut sync, request);
        while sync.completed < target {
            if sync.shutdown {
                return None;
            }
            sync = self.cycle_completed.wait(sync).unwrap();
        }
        Some(target)
    }

    /// Called by the driver.  Wait for a request and start a cycle for it.  Return the cycle id
    /// and the request, or `None` once the port is shut down.
    pub fn receive(&self) -> Option<(u64, GcRequest)> {
        let mut sync = self.sync.lock().unwrap();
        loop {
            if sync.shutdown {
                return None;
            }
            if let Some(request) = sync.pending.take() {
                sync.started += 1;
                return Some((sync.started, request));
            }
            sync = self.request_posted.wait(sync).unwrap();
        }
    }

    /// Called by the driver when cycle `id` is complete.
    pub fn ack(&self, id: u64) {
        let mut sync = self.sync.lock().unwrap();
        debug_assert_eq!(id, sync.started);
        sync.completed = id;
        sync.last_completion = Instant::now();
        self.cycle_completed.notify_all();
    }

    /// Wake everyone.  Pending requests are dropped and waiting senders return `None`.
    pub fn shutdown(&self) {
        let mut sync = self.sync.lock().unwrap();
        sync.shutdown = true;
        sync.pending = None;
        self.request_posted.notify_all();
        self.cycle_completed.notify_all();
    }

    /// True if no cycle is running or pending.
    pub fn is_idle(&self) -> bool {
        let sync = self.sync.lock().unwrap();
        sync.pending.is_none() && sync.started == sync.completed
    }

    pub fn completed_cycles(&self) -> u64 {
        self.sync.lock().unwrap().completed
    }

    pub fn last_completion(&self) -> Instant {
        self.sync.lock().unwrap().last_completion
    }
}

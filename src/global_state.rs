use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use atomic::Atomic;

use crate::plan::driver::{CycleStats, DriverPhase, DriverPort};
use crate::plan::mark::Marker;
use crate::plan::relocate::Relocation;
use crate::policy::{Heap, RegionState};
use crate::scheduler::WorkerPool;
use crate::util::address::{Address, ObjectReference};
use crate::util::mark_stack::MarkStackAllocator;
use crate::util::options::Options;
use crate::vm::{Barriers, VMBinding};

/// Number of cycles whose statistics are kept.
const STATS_HISTORY: usize = 16;

/// Everything a collector instance owns.  The driver thread, the director and every worker task
/// hold an `Arc` to it.
pub struct GlobalState<VM: VMBinding> {
    pub(crate) options: Arc<Options>,
    pub(crate) binding: VM,
    pub(crate) heap: Heap,
    pub(crate) mark_stack: MarkStackAllocator,
    pub(crate) marker: Marker,
    pub(crate) relocation: Relocation,
    /// Runs marking and relocation.
    pub(crate) gc_workers: WorkerPool,
    /// Builds forwarding tables.
    pub(crate) runtime_workers: WorkerPool,
    pub(crate) port: DriverPort,
    phase: Atomic<DriverPhase>,
    history: Mutex<VecDeque<CycleStats>>,
}

impl<VM: VMBinding> GlobalState<VM> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        options: Arc<Options>,
        binding: VM,
        heap: Heap,
        mark_stack: MarkStackAllocator,
        marker: Marker,
        relocation: Relocation,
        gc_workers: WorkerPool,
        runtime_workers: WorkerPool,
    ) -> Self {
        Self {
            options,
            binding,
            heap,
            mark_stack,
            marker,
            relocation,
            gc_workers,
            runtime_workers,
            port: DriverPort::new(),
            phase: Atomic::new(DriverPhase::Idle),
            history: Mutex::new(VecDeque::with_capacity(STATS_HISTORY)),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn binding(&self) -> &VM {
        &self.binding
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The phase the driver is in.
    pub fn phase(&self) -> DriverPhase {
        self.phase.load(Ordering::Acquire)
    }

    pub(crate) fn set_phase(&self, phase: DriverPhase) {
        self.phase.store(phase, Ordering::Release);
        self.binding.on_phase(phase);
    }

    /// The current location of `object`.  References into regions being relocated, or relocated
    /// in the last cycle, are forwarded; everything else is returned as is.  While relocation
    /// runs, this copies the object if no one has yet.
    pub fn remap(&self, object: ObjectReference) -> ObjectReference {
        match self.heap.table().region_of_object(object) {
            Some(region)
                if matches!(
                    region.state(),
                    RegionState::Relocating | RegionState::Detached
                ) =>
            {
                self.relocation.remap(self, region, object)
            }
            _ => object,
        }
    }

    /// Barrier for a reference a mutator loaded: heal it, and while marking is on, make sure the
    /// object gets marked.  Return the reference to use and store back.
    pub fn mark_barrier(&self, object: ObjectReference) -> ObjectReference {
        let healed = self.remap(object);
        if self.marker.is_active() && !self.heap.is_marked(healed) {
            self.marker.push_from_mutator(healed);
        }
        healed
    }

    pub fn alloc(&self, bytes: usize) -> Option<Address> {
        self.heap.alloc(bytes)
    }

    /// Did the last marking find `object` (or its new copy) reachable?  Objects outside the heap
    /// are always live.  While marking runs, or after a cycle was aborted, the marks are partial
    /// and every object is reported live, as an aborted cycle reclaims nothing.
    pub fn is_live(&self, object: ObjectReference) -> bool {
        if !self.heap.is_marking_complete() {
            return true;
        }
        self.heap.is_marked(self.remap(object))
    }

    pub(crate) fn record_cycle(&self, stats: CycleStats) {
        let mut history = self.history.lock().unwrap();
        if history.len() == STATS_HISTORY {
            history.pop_front();
        }
        history.push_back(stats);
    }

    /// Statistics of cycle `id`, if it is recent enough.
    pub fn cycle(&self, id: u64) -> Option<CycleStats> {
        let history = self.history.lock().unwrap();
        history.iter().find(|s| s.id == id).cloned()
    }

    pub fn last_cycle(&self) -> Option<CycleStats> {
        self.history.lock().unwrap().back().cloned()
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use atomic_refcell::{AtomicRefCell, AtomicRefMut};
use crossbeam::queue::SegQueue;

use super::stripe::MarkStripeSet;
use super::terminate::MarkTerminate;
use crate::global_state::GlobalState;
use crate::policy::RegionTable;
use crate::scheduler::WorkerTask;
use crate::util::address::ObjectReference;
use crate::util::error::MarkStackExhausted;
use crate::util::mark_cache::MarkCache;
use crate::util::mark_stack::{EntryKind, Magazine, MarkStackAllocator, MarkStackEntry};
use crate::vm::{ObjectModel, Scanning, VMBinding};

/// Check for idle workers to feed every this many entries.
const SHARE_CHECK_INTERVAL: usize = 64;

/// Totals of one mark, summed over all workers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MarkCounts {
    pub marked_objects: usize,
    pub marked_bytes: usize,
    pub kept_alive: usize,
}

/// What one worker owns while marking.
pub struct MarkWorker {
    /// One magazine per stripe, filled with objects of that stripe.
    locals: Vec<Option<Magazine>>,
    cache: MarkCache,
    counts: MarkCounts,
}

impl MarkWorker {
    fn new(log_region_size: usize, nstripes: usize) -> Self {
        Self {
            locals: (0..nstripes).map(|_| None).collect(),
            cache: MarkCache::new(log_region_size, nstripes),
            counts: MarkCounts::default(),
        }
    }

    fn push(&mut self, marker: &Marker, allocator: &MarkStackAllocator, entry: MarkStackEntry) {
        let stripe = marker.stripes.stripe_of(entry.object());
        let slot = &mut self.locals[stripe];
        loop {
            match slot {
                None => match allocator.alloc_magazine() {
                    Ok(magazine) => *slot = Some(magazine),
                    Err(e) => {
                        marker.overflow(e);
                        return;
                    }
                },
                Some(magazine) => {
                    if magazine.push(entry).is_ok() {
                        return;
                    }
                    if let Some(full) = slot.take() {
                        marker.stripes.publish(stripe, full);
                    }
                }
            }
        }
    }

    fn pop(
        &mut self,
        marker: &Marker,
        allocator: &MarkStackAllocator,
        home: usize,
    ) -> Option<MarkStackEntry> {
        if let Some(entry) = self.locals[home].as_mut().and_then(|m| m.pop()) {
            return Some(entry);
        }

        let nstripes = marker.stripes.nstripes();
        for i in 0..nstripes {
            let stripe = (home + i) & (nstripes - 1);
            if let Some(mut published) = marker.stripes.take(stripe) {
                let entry = published.pop();
                if let Some(empty) = self.locals[home].replace(published) {
                    allocator.free_magazine(empty);
                }
                return entry;
            }
        }

        for local in self.locals.iter_mut().flatten() {
            if let Some(entry) = local.pop() {
                return Some(entry);
            }
        }

        marker
            .mutator_queue
            .pop()
            .map(|object| MarkStackEntry::new(object, EntryKind::Strong))
    }

    /// Publish every non-empty magazine except the one of `keep`.
    fn publish(&mut self, marker: &Marker, keep: Option<usize>) {
        for (stripe, slot) in self.locals.iter_mut().enumerate() {
            if Some(stripe) == keep {
                continue;
            }
            if slot.as_ref().map_or(false, |m| !m.is_empty()) {
                if let Some(magazine) = slot.take() {
                    marker.stripes.publish(stripe, magazine);
                }
            }
        }
    }

    fn has_local_work(&self) -> bool {
        self.locals.iter().flatten().any(|m| !m.is_empty())
    }

    /// Return all magazines.  Return the number of entries dropped.
    fn release(&mut self, allocator: &MarkStackAllocator) -> usize {
        let mut dropped = 0;
        for magazine in self.locals.iter_mut().filter_map(Option::take) {
            dropped += magazine.len();
            allocator.free_magazine(magazine);
        }
        dropped
    }
}

/// Parallel marking state shared by the GC workers.
///
/// There is one [`MarkWorker`] per GC worker, plus one more used by the driver thread to push
/// roots and objects kept alive by reference processing while the workers are parked.
pub struct Marker {
    log_region_size: usize,
    stripes: MarkStripeSet,
    workers: Box<[AtomicRefCell<MarkWorker>]>,
    terminate: MarkTerminate,
    /// Objects marked by mutator barriers.
    mutator_queue: SegQueue<ObjectReference>,
    /// Set when the mark stack space ran out.  Marking stops as soon as workers notice.
    overflow: AtomicBool,
    /// Mutator barriers push to `mutator_queue` while this is set.
    active: AtomicBool,
}

impl Marker {
    pub fn new(log_region_size: usize, nworkers: usize) -> Self {
        Self {
            log_region_size,
            stripes: MarkStripeSet::new(log_region_size),
            workers: (0..=nworkers)
                .map(|_| AtomicRefCell::new(MarkWorker::new(log_region_size, 1)))
                .collect(),
            terminate: MarkTerminate::new(),
            mutator_queue: SegQueue::new(),
            overflow: AtomicBool::new(false),
            active: AtomicBool::new(false),
        }
    }

    /// Start a mark with up to `nworkers` workers.  Called in a pause.
    pub fn prepare(&self, nworkers: usize) {
        self.stripes.reset(nworkers);
        let nstripes = self.stripes.nstripes();
        for worker in self.workers.iter() {
            let mut worker = worker.borrow_mut();
            debug_assert!(!worker.has_local_work());
            *worker = MarkWorker::new(self.log_region_size, nstripes);
        }
        self.overflow.store(false, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        debug!("Marking with {} stripes", nstripes);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn has_overflowed(&self) -> bool {
        self.overflow.load(Ordering::Acquire)
    }

    fn overflow(&self, e: MarkStackExhausted) {
        if !self.overflow.swap(true, Ordering::AcqRel) {
            warn!("{}. Marking stops.", e);
        }
    }

    /// Called from mutator barriers.
    pub fn push_from_mutator(&self, object: ObjectReference) {
        self.mutator_queue.push(object);
    }

    /// The worker state of the driver thread.
    pub(crate) fn driver_context(&self) -> AtomicRefMut<'_, MarkWorker> {
        self.workers[self.workers.len() - 1].borrow_mut()
    }

    /// Push an entry from the driver context.  It stays there until published.
    pub(crate) fn push_from_driver(
        &self,
        context: &mut MarkWorker,
        allocator: &MarkStackAllocator,
        entry: MarkStackEntry,
    ) {
        context.push(self, allocator, entry);
    }

    pub(crate) fn publish_driver_context(&self, context: &mut MarkWorker) {
        context.publish(self, None);
    }

    /// Is there mark work anywhere?  Only meaningful while the GC workers are parked.
    pub fn has_work(&self) -> bool {
        !self.stripes.is_empty()
            || !self.mutator_queue.is_empty()
            || self.workers.iter().any(|w| w.borrow().has_local_work())
    }

    fn has_shared_work(&self) -> bool {
        !self.stripes.is_empty() || !self.mutator_queue.is_empty()
    }

    /// Trace from the current work until marking terminates or overflows.
    pub fn drain<VM: VMBinding>(&self, global: &GlobalState<VM>, ordinal: usize) {
        let allocator = &global.mark_stack;
        let mut worker = self.workers[ordinal].borrow_mut();
        let home = self.stripes.home_of(ordinal);
        loop {
            let mut processed = 0;
            while !self.has_overflowed() {
                let Some(entry) = worker.pop(self, allocator, home) else {
                    break;
                };
                self.mark_entry(global, &mut worker, entry);
                processed += 1;
                if processed % SHARE_CHECK_INTERVAL == 0 && self.terminate.idle_workers() > 0 {
                    worker.publish(self, Some(home));
                }
            }
            worker.publish(self, None);
            if self
                .terminate
                .try_terminate(|| self.has_shared_work(), || self.has_overflowed())
            {
                break;
            }
        }
        trace!("Mark worker {} terminated", ordinal);
    }

    fn mark_entry<VM: VMBinding>(
        &self,
        global: &GlobalState<VM>,
        worker: &mut MarkWorker,
        entry: MarkStackEntry,
    ) {
        let object = entry.object();
        let heap = &global.heap;
        let epoch = heap.epoch();
        let Some(region) = heap.table().region_of_object(object) else {
            return;
        };
        if region.is_allocated_in(epoch) || !region.mark(object, epoch) {
            return;
        }

        let bytes = global.binding.object_size(object);
        worker.cache.inc_live(heap.table(), region, bytes);
        worker.counts.marked_objects += 1;
        worker.counts.marked_bytes += bytes;
        let kind = entry.kind();
        if kind == EntryKind::KeepAlive {
            worker.counts.kept_alive += 1;
        }

        global
            .binding
            .scan_object(object, &mut |child: ObjectReference| {
                let healed = global.remap(child);
                if !heap.is_marked(healed) {
                    worker.push(self, &global.mark_stack, MarkStackEntry::new(healed, kind));
                }
                healed
            });
    }

    /// Prepare termination for a run of the mark task on `nworkers` workers.
    pub fn start_workers(&self, nworkers: usize) {
        self.terminate.reset(nworkers);
    }

    /// Fold every worker's mark cache into the regions.
    pub fn flush_caches(&self, regions: &RegionTable) {
        for worker in self.workers.iter() {
            worker.borrow_mut().cache.flush(regions);
        }
    }

    /// Mark cache slots not yet folded into regions.
    pub fn pending_cache_entries(&self) -> usize {
        self.workers
            .iter()
            .map(|w| w.borrow().cache.pending())
            .sum()
    }

    pub fn counts(&self) -> MarkCounts {
        self.workers
            .iter()
            .fold(MarkCounts::default(), |total, worker| {
                let counts = worker.borrow().counts;
                MarkCounts {
                    marked_objects: total.marked_objects + counts.marked_objects,
                    marked_bytes: total.marked_bytes + counts.marked_bytes,
                    kept_alive: total.kept_alive + counts.kept_alive,
                }
            })
    }

    /// Give every magazine back to `allocator`, and forget mutator pushes.  Return the number of
    /// entries dropped, which is zero unless marking was cut short.
    pub fn release_magazines(&self, allocator: &MarkStackAllocator) -> usize {
        let mut dropped = self.stripes.drain(allocator);
        for worker in self.workers.iter() {
            dropped += worker.borrow_mut().release(allocator);
        }
        while self.mutator_queue.pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}

/// Runs [`Marker::drain`] on every active GC worker.
pub struct MarkTask<VM: VMBinding> {
    global: Arc<GlobalState<VM>>,
}

impl<VM: VMBinding> MarkTask<VM> {
    pub fn new(global: Arc<GlobalState<VM>>) -> Self {
        Self { global }
    }
}

impl<VM: VMBinding> WorkerTask for MarkTask<VM> {
    fn execute(&self, ordinal: usize) {
        self.global.marker.drain(&self.global, ordinal);
    }
}

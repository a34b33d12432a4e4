//! The GC driver thread.
//!
//! The driver waits for requests on the [`DriverPort`](super::DriverPort) and runs one full cycle
//! per request.  A cycle is a sequence of phases.  Each phase is a method returning the phase to
//! run next; [`Cycle::run`] dispatches them, records the trace and timing, and keeps the current
//! phase visible to everyone through [`GlobalState::phase`].

use std::sync::Arc;
use std::time::Instant;

use super::phase::DriverPhase;
use super::request::{DriverPort, GcRequest};
use super::stats::CycleStats;
use crate::global_state::GlobalState;
use crate::plan::mark::MarkTask;
use crate::plan::relocate::selector::{self, RegionLiveness};
use crate::plan::relocate::{build_relocation_set, ForwardingRequest, RelocateTask};
use crate::policy::RegionState;
use crate::util::address::ObjectReference;
use crate::util::mark_stack::{EntryKind, MarkStackEntry};
use crate::vm::{Barriers, Collection, Scanning, VMBinding, WeakRefProcessor};

/// Shuts the port down if the driver thread unwinds, so requesters do not wait for a cycle that
/// never completes.
struct ShutdownOnPanic<'a>(&'a DriverPort);

impl Drop for ShutdownOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("The GC driver panicked.  No more cycles will run.");
            self.0.shutdown();
        }
    }
}

/// The driver thread's loop.  Returns when the port shuts down.
pub(crate) fn driver_loop<VM: VMBinding>(global: Arc<GlobalState<VM>>) {
    debug!("Driver started");
    let _guard = ShutdownOnPanic(&global.port);
    while let Some((id, request)) = global.port.receive() {
        let stats = Cycle::new(&global, id, request).run();
        global.record_cycle(stats);
        global.port.ack(id);
    }
    debug!("Driver stopped");
}

/// One collection cycle.
pub(crate) struct Cycle<'a, VM: VMBinding> {
    global: &'a Arc<GlobalState<VM>>,
    stats: CycleStats,
    /// Regions selected for relocation, waiting for `PauseRelocateStart`.
    selected: Vec<ForwardingRequest>,
}

impl<'a, VM: VMBinding> Cycle<'a, VM> {
    pub fn new(global: &'a Arc<GlobalState<VM>>, id: u64, request: GcRequest) -> Self {
        let workers = request
            .worker_count
            .clamp(1, global.gc_workers.nworkers());
        Self {
            global,
            stats: CycleStats::new(id, request, workers),
            selected: vec![],
        }
    }

    pub fn run(mut self) -> CycleStats {
        info!(
            "GC({}) Start: {} with {} workers, {} regions in use",
            self.stats.id,
            self.stats.request.cause,
            self.stats.workers,
            self.global.heap.used_regions()
        );
        let mut phase = DriverPhase::PauseMarkStart;
        loop {
            self.global.set_phase(phase);
            let start = Instant::now();
            if phase == DriverPhase::Done {
                self.stats.record(phase, start.elapsed());
                break;
            }
            let next = if phase.is_pause() {
                self.in_pause(|cycle| cycle.run_phase(phase))
            } else {
                self.run_phase(phase)
            };
            let elapsed = start.elapsed();
            debug!(
                "GC({}) {}: {:.3}ms",
                self.stats.id,
                phase,
                elapsed.as_secs_f64() * 1000.0
            );
            self.stats.record(phase, elapsed);
            phase = next;
        }
        self.global.set_phase(DriverPhase::Idle);
        info!("{}", self.stats.summary());
        debug!("GC({}) Phases: {}", self.stats.id, self.stats.trace_string());
        self.stats
    }

    fn in_pause(&mut self, f: impl FnOnce(&mut Self) -> DriverPhase) -> DriverPhase {
        self.global.binding.stop_mutators();
        let next = f(self);
        self.global.binding.resume_mutators();
        next
    }

    fn run_phase(&mut self, phase: DriverPhase) -> DriverPhase {
        match phase {
            DriverPhase::PauseMarkStart => self.pause_mark_start(),
            DriverPhase::ConcurrentMark => self.concurrent_mark(),
            DriverPhase::PauseMarkEnd => self.pause_mark_end(),
            DriverPhase::ConcurrentProcessReferences => self.concurrent_process_references(),
            DriverPhase::ConcurrentRelocateSetSelect => self.concurrent_relocate_set_select(),
            DriverPhase::PauseRelocateStart => self.pause_relocate_start(),
            DriverPhase::ConcurrentRelocate => self.concurrent_relocate(),
            DriverPhase::Idle | DriverPhase::Done => {
                gc_invariant!(false, "GC({}) {} is not a cycle phase", self.stats.id, phase);
                DriverPhase::Done
            }
        }
    }

    fn pause_mark_start(&mut self) -> DriverPhase {
        let global = self.global;
        gc_invariant!(
            global.mark_stack.outstanding() == 0,
            "GC({}) {} mark stack magazines left from the last cycle",
            self.stats.id,
            global.mark_stack.outstanding()
        );
        let epoch = global.heap.bump_epoch();
        global.heap.retire_mutator_region();
        global.marker.prepare(self.stats.workers);
        global.binding.publish_epoch(epoch);

        let mut roots = 0;
        let mut context = global.marker.driver_context();
        global.binding.scan_roots(&mut |root: ObjectReference| {
            roots += 1;
            let healed = global.remap(root);
            if !global.heap.is_marked(healed) {
                global.marker.push_from_driver(
                    &mut context,
                    &global.mark_stack,
                    MarkStackEntry::new(healed, EntryKind::Strong),
                );
            }
            healed
        });
        global.marker.publish_driver_context(&mut context);
        debug!("GC({}) Epoch {}, {} roots", self.stats.id, epoch, roots);
        DriverPhase::ConcurrentMark
    }

    /// Run the mark task to completion.  Return false if the mark stack overflowed.
    fn mark(&mut self) -> bool {
        let global = self.global;
        if !global.marker.has_overflowed() {
            global.marker.start_workers(self.stats.workers);
            global
                .gc_workers
                .run(Arc::new(MarkTask::new(global.clone())), self.stats.workers);
        }
        !global.marker.has_overflowed()
    }

    fn concurrent_mark(&mut self) -> DriverPhase {
        if self.mark() {
            DriverPhase::PauseMarkEnd
        } else {
            self.abort()
        }
    }

    fn pause_mark_end(&mut self) -> DriverPhase {
        let global = self.global;
        if global.marker.has_work() {
            self.stats.mark_end_retries += 1;
            debug!(
                "GC({}) Mark end found more work (retry {})",
                self.stats.id, self.stats.mark_end_retries
            );
            return DriverPhase::ConcurrentMark;
        }
        global.marker.set_active(false);
        global.marker.flush_caches(global.heap.table());
        DriverPhase::ConcurrentProcessReferences
    }

    fn concurrent_process_references(&mut self) -> DriverPhase {
        let global = self.global;
        {
            let mut processor = KeepAliveProcessor {
                global,
                kept_alive: 0,
            };
            global.binding.process_weak_refs(&mut processor);
            if processor.kept_alive > 0 {
                debug!(
                    "GC({}) Reference processing kept {} objects alive",
                    self.stats.id, processor.kept_alive
                );
            }
        }
        // A keep-alive push that ran out of mark stack was dropped, so there may be no work left
        // even though the object was never marked.
        if global.marker.has_work() {
            self.mark();
        }
        if global.marker.has_overflowed() {
            return self.abort();
        }
        global.marker.flush_caches(global.heap.table());
        global.heap.complete_marking();

        let counts = global.marker.counts();
        self.stats.marked_objects = counts.marked_objects;
        self.stats.marked_bytes = counts.marked_bytes;
        self.stats.kept_alive = counts.kept_alive;
        global.marker.release_magazines(&global.mark_stack);
        global.mark_stack.free();
        DriverPhase::ConcurrentRelocateSetSelect
    }

    fn concurrent_relocate_set_select(&mut self) -> DriverPhase {
        let global = self.global;
        let heap = &global.heap;
        self.stats.unflushed_cache_entries = global.marker.pending_cache_entries();
        gc_invariant!(
            self.stats.unflushed_cache_entries == 0,
            "GC({}) {} mark cache entries not flushed",
            self.stats.id,
            self.stats.unflushed_cache_entries
        );

        // Marking has healed every reference into the previous relocation set.
        if let Some(previous) = global.relocation.take() {
            for forwarding in previous.iter() {
                let region = heap.table().get(forwarding.region());
                match region.state() {
                    RegionState::Detached => {
                        heap.free_region(region);
                        self.stats.freed_regions += 1;
                    }
                    RegionState::Relocating => region.set_state(RegionState::Allocating),
                    state => {
                        gc_invariant!(
                            false,
                            "GC({}) Region {} of the relocation set is {:?}",
                            self.stats.id,
                            region.index(),
                            state
                        );
                    }
                }
            }
        }

        let epoch = heap.epoch();
        let candidates: Vec<RegionLiveness> = heap
            .table()
            .iter()
            .filter(|r| r.state() == RegionState::Allocating && !r.is_allocated_in(epoch))
            .map(|r| RegionLiveness {
                index: r.index(),
                size: r.size(),
                live_bytes: r.live_bytes(epoch),
                live_objects: r.live_objects(epoch),
            })
            .collect();
        let selection = selector::select(&candidates, global.options.fragmentation_limit);
        for &index in &selection.empty {
            heap.free_region(heap.table().get(index));
        }
        self.stats.freed_regions += selection.empty.len();
        debug!(
            "GC({}) {} candidates: {} empty, {} selected for relocation",
            self.stats.id,
            candidates.len(),
            selection.empty.len(),
            selection.selected.len()
        );

        self.selected = selection
            .selected
            .iter()
            .map(|&index| {
                let region = heap.table().get(index);
                (index, region.start(), region.live_objects(epoch) as usize)
            })
            .collect();
        DriverPhase::PauseRelocateStart
    }

    fn pause_relocate_start(&mut self) -> DriverPhase {
        let global = self.global;
        let requests = std::mem::take(&mut self.selected);
        let set = Arc::new(build_relocation_set(&global.runtime_workers, requests));
        self.stats.relocated_regions = set.len();
        global.relocation.install(set.clone());
        for forwarding in set.iter() {
            global
                .heap
                .table()
                .get(forwarding.region())
                .set_state(RegionState::Relocating);
        }
        global.relocation.start();
        global
            .binding
            .publish_relocation_set(&set.ranges(&global.heap));

        global
            .binding
            .scan_roots(&mut |root: ObjectReference| global.remap(root));
        DriverPhase::ConcurrentRelocate
    }

    fn concurrent_relocate(&mut self) -> DriverPhase {
        let global = self.global;
        let Some(set) = global.relocation.current() else {
            gc_invariant!(false, "GC({}) No relocation set", self.stats.id);
            return DriverPhase::Done;
        };
        if !set.is_empty() {
            global.gc_workers.run(
                Arc::new(RelocateTask::new(global.clone(), set.clone())),
                self.stats.workers,
            );
        }
        for forwarding in set.iter() {
            let region = global.heap.table().get(forwarding.region());
            if forwarding.is_retained() {
                debug!(
                    "GC({}) Region {} retained: not everything could be relocated",
                    self.stats.id,
                    region.index()
                );
            } else {
                region.set_state(RegionState::Detached);
            }
        }
        global.relocation.finish();
        self.stats.relocated_objects = set.relocated_objects();
        self.stats.relocated_bytes = set.relocated_bytes();
        DriverPhase::Done
    }

    /// Give up on the cycle after the mark stack ran out.  Nothing is reclaimed: objects still
    /// gray are live as far as this cycle is concerned, and the next cycle starts from scratch.
    fn abort(&mut self) -> DriverPhase {
        let global = self.global;
        let dropped = global.marker.release_magazines(&global.mark_stack);
        global.mark_stack.free();
        global.marker.set_active(false);
        self.stats.aborted = true;
        warn!(
            "GC({}) Aborted: out of mark stack space ({} limit), {} entries dropped",
            self.stats.id,
            crate::util::conversions::bytes_to_formatted_string(
                global.mark_stack.space().reserved()
            ),
            dropped
        );
        DriverPhase::Done
    }
}

/// Reference processing callbacks.  Liveness comes from this cycle's marks.  Objects kept alive
/// are pushed from the driver context and traced afterwards.
struct KeepAliveProcessor<'a, VM: VMBinding> {
    global: &'a GlobalState<VM>,
    kept_alive: usize,
}

impl<VM: VMBinding> WeakRefProcessor for KeepAliveProcessor<'_, VM> {
    fn is_live(&self, object: ObjectReference) -> bool {
        self.global.heap.is_marked(self.global.remap(object))
    }

    fn keep_alive(&mut self, object: ObjectReference) -> ObjectReference {
        let global = self.global;
        let healed = global.remap(object);
        if !global.heap.is_marked(healed) {
            let mut context = global.marker.driver_context();
            global.marker.push_from_driver(
                &mut context,
                &global.mark_stack,
                MarkStackEntry::new(healed, EntryKind::KeepAlive),
            );
            global.marker.publish_driver_context(&mut context);
            self.kept_alive += 1;
        }
        healed
    }

    fn remap(&self, object: ObjectReference) -> ObjectReference {
        self.global.remap(object)
    }
}

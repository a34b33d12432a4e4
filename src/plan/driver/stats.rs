use std::time::Duration;

use enum_map::EnumMap;
use itertools::Itertools;

use super::phase::DriverPhase;
use super::request::GcRequest;
use crate::util::conversions::bytes_to_formatted_string;

/// What happened in one cycle.
#[derive(Clone, Debug)]
pub struct CycleStats {
    pub id: u64,
    pub request: GcRequest,
    /// GC workers used for concurrent phases.
    pub workers: usize,
    /// Phases in the order they ran.  A retried mark shows up more than once.
    pub trace: Vec<DriverPhase>,
    /// Total time spent in each phase.
    pub durations: EnumMap<DriverPhase, Duration>,
    /// Times `PauseMarkEnd` found more marking to do.
    pub mark_end_retries: usize,
    pub marked_objects: usize,
    pub marked_bytes: usize,
    /// Objects kept alive by reference processing.
    pub kept_alive: usize,
    /// Mark cache slots not yet folded into regions when relocation set selection started.
    pub unflushed_cache_entries: usize,
    /// Regions freed because nothing in them was live, plus regions of the previous relocation
    /// set released.
    pub freed_regions: usize,
    pub relocated_regions: usize,
    pub relocated_objects: usize,
    pub relocated_bytes: usize,
    /// The mark stack space ran out and the cycle was abandoned.
    pub aborted: bool,
}

impl CycleStats {
    pub fn new(id: u64, request: GcRequest, workers: usize) -> Self {
        Self {
            id,
            request,
            workers,
            trace: vec![],
            durations: EnumMap::default(),
            mark_end_retries: 0,
            marked_objects: 0,
            marked_bytes: 0,
            kept_alive: 0,
            unflushed_cache_entries: 0,
            freed_regions: 0,
            relocated_regions: 0,
            relocated_objects: 0,
            relocated_bytes: 0,
            aborted: false,
        }
    }

    pub fn record(&mut self, phase: DriverPhase, elapsed: Duration) {
        self.trace.push(phase);
        self.durations[phase] += elapsed;
    }

    /// Total time spent with mutators stopped.
    pub fn pause_time(&self) -> Duration {
        self.durations
            .iter()
            .filter(|(phase, _)| phase.is_pause())
            .map(|(_, d)| *d)
            .sum()
    }

    pub fn total_time(&self) -> Duration {
        self.durations.values().sum()
    }

    /// One line summary for the log.
    pub fn summary(&self) -> String {
        format!(
            "GC({}) {} ({}): marked {} objects ({}), freed {} regions, relocated {} regions \
             ({} objects, {}), pauses {:.3}ms, total {:.3}ms{}",
            self.id,
            self.request.cause,
            self.workers,
            self.marked_objects,
            bytes_to_formatted_string(self.marked_bytes),
            self.freed_regions,
            self.relocated_regions,
            self.relocated_objects,
            bytes_to_formatted_string(self.relocated_bytes),
            self.pause_time().as_secs_f64() * 1000.0,
            self.total_time().as_secs_f64() * 1000.0,
            if self.aborted { ", aborted" } else { "" }
        )
    }

    /// The phase trace, e.g. `PauseMarkStart -> ConcurrentMark -> ...`.
    pub fn trace_string(&self) -> String {
        self.trace.iter().join(" -> ")
    }
}

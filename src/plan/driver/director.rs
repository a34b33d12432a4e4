//! The GC director decides when to start a cycle on its own.
//!
//! It wakes up `director_hz` times per second on a [`Metronome`] and, while no cycle is running
//! or pending, checks its rules against heap occupancy and the time since the last cycle.

use std::sync::Arc;
use std::time::Duration;

use super::request::{GcCause, GcRequest};
use crate::global_state::GlobalState;
use crate::util::metronome::Metronome;
use crate::util::options::Options;
use crate::vm::VMBinding;

/// Number of cycles the warm-up rule applies to.
const WARMUP_CYCLES: u64 = 3;

/// Pick a cause for a new cycle, or `None` if no rule fires.
///
/// * `HighOccupancy` once occupancy reaches `occupancy_trigger` percent.
/// * `Warmup` for the first few cycles of a process, at 10%, 20% and 30% occupancy, so the
///   director learns about the application before the heap fills up.
/// * `Timer` once `collection_interval_ms` has passed since the last cycle, if set.
pub fn evaluate(
    options: &Options,
    completed_cycles: u64,
    occupancy: f64,
    since_last_cycle: Duration,
) -> Option<GcCause> {
    if occupancy >= options.occupancy_trigger {
        return Some(GcCause::HighOccupancy);
    }
    if completed_cycles < WARMUP_CYCLES && occupancy >= (completed_cycles + 1) as f64 * 10.0 {
        return Some(GcCause::Warmup);
    }
    if options.collection_interval_ms > 0
        && since_last_cycle >= Duration::from_millis(options.collection_interval_ms)
    {
        return Some(GcCause::Timer);
    }
    None
}

pub(crate) fn director_loop<VM: VMBinding>(global: Arc<GlobalState<VM>>, metronome: Arc<Metronome>) {
    debug!("Director started at {:?} per tick", metronome.interval());
    while metronome.wait_for_tick() {
        let port = &global.port;
        if !port.is_idle() {
            continue;
        }
        let cause = evaluate(
            &global.options,
            port.completed_cycles(),
            global.heap.occupancy(),
            port.last_completion().elapsed(),
        );
        if let Some(cause) = cause {
            debug!(
                "Director: requesting a cycle ({}, occupancy {:.1}%)",
                cause,
                global.heap.occupancy()
            );
            port.send_async(GcRequest::new(cause, global.options.conc_threads));
        }
    }
    debug!("Director stopped after {} ticks", metronome.nticks());
}

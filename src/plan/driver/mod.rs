//! The cycle driver: request port, phase state machine, director and statistics.

pub mod director;
mod driver;
mod phase;
mod request;
mod stats;

pub(crate) use director::director_loop;
pub(crate) use driver::driver_loop;
pub use phase::DriverPhase;
pub use request::{DriverPort, GcCause, GcRequest};
pub use stats::CycleStats;

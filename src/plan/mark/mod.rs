//! Parallel concurrent marking.
//!
//! GC workers trace the object graph from the roots, keeping gray objects in mark stack
//! magazines.  Work is split into stripes by address ([`stripe`]), and workers agree on when the
//! graph is exhausted through [`terminate`].  Liveness is counted per region through each worker's
//! [`crate::util::mark_cache::MarkCache`].

mod marker;
mod stripe;
mod terminate;

pub use marker::{MarkCounts, MarkTask, Marker};
pub use stripe::{MarkStripeSet, MAX_STRIPES};
pub use terminate::MarkTerminate;

//! Concurrent relocation.
//!
//! After marking, sparse regions are chosen by [`selector`], a forwarding table is built for each
//! of them, and their live objects are copied into fresh regions by GC workers while mutators run.
//! A mutator that touches an object of the set before a worker got to it copies the object
//! itself, through [`Relocation::remap`].

mod forwarding;
mod relocation_set;
pub mod selector;

pub use forwarding::Forwarding;
pub use relocation_set::{
    build_relocation_set, ForwardingRequest, RelocateTask, Relocation, RelocationSet,
};

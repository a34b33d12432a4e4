//! The interface a VM implements to be managed by the collector.
//!
//! The collector never looks inside objects itself.  It asks the VM to enumerate roots and the
//! references of an object, to tell the size of an object and to copy one, and to stop and resume
//! mutator threads around pauses.  The VM's barriers learn about collector state through
//! [`Barriers`].

mod barriers;
mod collection;
mod object_model;
mod scanning;
mod vmbinding;

pub use self::barriers::Barriers;
pub use self::collection::Collection;
pub use self::object_model::ObjectModel;
pub use self::scanning::{ObjectTracer, Scanning, WeakRefProcessor};
pub use self::vmbinding::VMBinding;

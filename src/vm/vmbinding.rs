use super::{Barriers, Collection, ObjectModel, Scanning};

/// Everything the collector needs from a VM.
///
/// A binding is owned by the collector instance and shared by the driver thread, the GC workers
/// and the mutators calling into the collector, hence `Send + Sync`.
pub trait VMBinding
where
    Self: Scanning + ObjectModel + Collection + Barriers + Sized + Send + Sync + 'static,
{
}

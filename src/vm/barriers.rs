use std::ops::Range;

use crate::plan::driver::DriverPhase;
use crate::util::address::Address;

/// Notifications for the VM's barrier code.
///
/// Barriers themselves are generated by the VM.  They consult what is published here and call
/// back into the collector with [`crate::Collector::remap`] and [`crate::Collector::mark_barrier`].
/// All methods are called by the driver thread, inside pauses except for `on_phase`.
pub trait Barriers {
    /// A new mark epoch has started.  Called in the pause that starts marking.
    fn publish_epoch(&self, _epoch: u32) {}

    /// Objects in these address ranges are being relocated.  Called in the pause that starts
    /// relocation.
    fn publish_relocation_set(&self, _regions: &[Range<Address>]) {}

    /// The driver entered `phase`.
    fn on_phase(&self, _phase: DriverPhase) {}
}

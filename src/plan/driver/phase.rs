use bytemuck::NoUninit;
use enum_map::Enum;
use strum_macros::{Display, EnumIter};

/// The phases of a collection cycle, in the order the driver normally runs them.
///
/// `Pause*` phases run with all mutators stopped.  The others run concurrently with mutators.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, NoUninit, Enum, Display, EnumIter)]
pub enum DriverPhase {
    /// No cycle in progress.
    Idle,
    /// Start a mark epoch and mark the roots.
    PauseMarkStart,
    /// Trace the object graph.
    ConcurrentMark,
    /// Check that marking is complete.  Goes back to `ConcurrentMark` if it is not.
    PauseMarkEnd,
    /// Let the VM process weak references against the mark results.
    ConcurrentProcessReferences,
    /// Free empty regions and choose the regions to relocate.
    ConcurrentRelocateSetSelect,
    /// Set up forwarding and relocate the roots.
    PauseRelocateStart,
    /// Relocate the live objects of the relocation set.
    ConcurrentRelocate,
    /// The cycle is over.
    Done,
}

impl DriverPhase {
    pub fn is_pause(self) -> bool {
        matches!(
            self,
            DriverPhase::PauseMarkStart | DriverPhase::PauseMarkEnd | DriverPhase::PauseRelocateStart
        )
    }

    /// Do mutator barriers have to mark in this phase?
    pub fn is_marking(self) -> bool {
        matches!(
            self,
            DriverPhase::PauseMarkStart | DriverPhase::ConcurrentMark | DriverPhase::PauseMarkEnd
        )
    }
}

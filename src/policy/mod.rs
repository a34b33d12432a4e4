//! The heap and its regions.

pub mod heap;
pub mod mark_bitmap;
pub mod region;

pub use heap::{AllocRegion, Heap, RegionTable};
pub use region::{Region, RegionState};

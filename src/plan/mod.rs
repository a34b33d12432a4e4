//! The collection algorithm: the cycle driver and the marking and relocation it sequences.

pub mod driver;
pub mod mark;
pub mod relocate;

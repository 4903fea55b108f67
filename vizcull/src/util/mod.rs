//! Utilities shared by the core and routines.

pub mod atomic;
pub mod frustum;
pub mod math;
pub mod typedefs;

//! Culling routines for vizcull.
//!
//! [`VisbufferRoutine`] owns every per-view GPU buffer and records the whole
//! frame into a [`RenderGraph`](vizcull::graph::RenderGraph): seeding the
//! first pass with what was visible last frame, drawing it, building the HiZ
//! pyramid, culling meshes and meshlets against it, drawing the survivors and
//! finally finding out what ended up visible.
//!
//! The individual stages live in their own modules and can be driven on their
//! own, which is what the tests do.

pub mod analyze;
mod base;
pub mod culling;
pub mod expansion;
pub mod hi_z;
pub mod meshlet_instances;
pub mod prepopulate;
pub mod raster;
pub mod readback;
pub mod visbuffer;
pub mod vsm;

pub use base::*;

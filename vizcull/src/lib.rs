//! Core of the vizcull visibility buffer culling pipeline.
//!
//! This crate provides the substrate the culling routines in
//! `vizcull-routine` run on:
//!
//! - [`device::Device`]: a compute device that runs workgroups of a kernel in
//!   parallel, with direct and indirect dispatches.
//! - [`util::atomic`]: the device memory primitives kernels communicate
//!   through (counters, dispatch arguments, bitfields, record arrays).
//! - [`image`]: single channel images with mip chains.
//! - [`graph`]: a render graph that orders, prunes and fences the nodes of a
//!   frame.
//! - [`scene::GpuScene`]: the read-only per-frame upload of a
//!   [`types::Scene`].
//!
//! The [`Renderer`] ties a device to the current [`types::RenderSettings`].

pub mod device;
mod error;
pub mod graph;
pub mod image;
mod renderer;
pub mod scene;
pub mod util;

pub use error::*;
pub use renderer::Renderer;
/// Reexport of the types crate.
pub use vizcull_types as types;

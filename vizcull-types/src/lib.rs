#![warn(unsafe_op_in_unsafe_fn)]

//! Type declarations for the vizcull visibility buffer culling crates.
//!
//! This is reexported in the vizcull crate proper and includes all the
//! "surface" api arguments: meshes, scenes, cameras and settings, plus the
//! plain-old-data records shared between the host and the culling kernels.

/// Reexport of the glam version vizcull is using.
pub use glam;

mod camera;
mod gpu;
mod mesh;
mod scene;
mod settings;

pub use camera::*;
pub use gpu::*;
pub use mesh::*;
pub use scene::*;
pub use settings::*;

/// Maximum number of mesh instances culled in a single frame.
pub const MAX_MESH_INSTANCES: u32 = 1 << 16;
/// Maximum number of meshlet instances recorded in a single frame.
pub const MAX_MESHLET_INSTANCES: u32 = 1 << 18;
/// Largest amount of unique vertices a meshlet may reference.
pub const MAX_VERTICES_PER_MESHLET: usize = 64;
/// Largest amount of triangles a meshlet may contain.
pub const MAX_TRIANGLES_PER_MESHLET: usize = 128;
/// Amount of low bits of a triangle id holding the triangle index.
pub const TRIANGLE_ID_TRIANGLE_BITS: u32 = 7;
/// Cleared value of the visibility buffer.
pub const INVALID_TRIANGLE_ID: u32 = u32::MAX;
/// Largest meshlet instance count whose triangle ids never alias
/// [`INVALID_TRIANGLE_ID`].
pub const MAX_ENCODABLE_MESHLET_INSTANCES: u32 = u32::MAX >> TRIANGLE_ID_TRIANGLE_BITS;
/// Amount of cascades of the virtual shadow map.
pub const VSM_CLIP_LEVELS: usize = 16;
/// Texels covered by a single page of the virtual shadow map along one axis.
pub const VSM_PAGE_SIZE: u32 = 128;
/// Resolution of one virtual shadow map clip along one axis.
pub const VSM_TEXTURE_RESOLUTION: u32 = 4096;

//! Frustum and HiZ occlusion tests shared by the mesh and meshlet cullers.

use glam::{IVec2, Mat4, UVec2, Vec2, Vec3Swizzles, Vec4Swizzles};
use vizcull::{
    image::{full_mip_count, FloatImage},
    util::{frustum::ShaderFrustum, math::next_power_of_two},
};
use vizcull_types::{Aabb, BoundingSphere, Camera};

mod mesh;
mod meshlet;

pub use mesh::*;
pub use meshlet::*;

/// The most mips a HiZ pyramid has; one dispatch builds all of them.
pub const GEN_HIZ_LEVELS_PER_DISPATCH: u32 = 16;

const MIN_W: f32 = 1.0e-6;

/// Sizes relating the render target to its HiZ pyramid.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CullData {
    pub rt_size: UVec2,
    /// Half the render target, rounded up.
    pub hiz_size: UVec2,
    /// `hiz_size` rounded up to a power of two, the size of mip 0.
    pub physical_hiz_size: UVec2,
    pub mip_count: u32,
}

impl CullData {
    pub fn new(rt_size: UVec2) -> Self {
        let rt_size = rt_size.max(UVec2::ONE);
        let hiz_size = (rt_size + UVec2::ONE) / 2;
        let physical_hiz_size = next_power_of_two(hiz_size);
        Self {
            rt_size,
            hiz_size,
            physical_hiz_size,
            mip_count: full_mip_count(physical_hiz_size).min(GEN_HIZ_LEVELS_PER_DISPATCH),
        }
    }
}

/// Camera matrices of this and the previous frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CameraInfo {
    pub view_proj: Mat4,
    pub prev_view_proj: Mat4,
    pub frustum: ShaderFrustum,
    pub position: glam::Vec3,
}

impl CameraInfo {
    /// Without a previous camera the current one stands in for it.
    pub fn new(camera: &Camera, previous: Option<&Camera>, aspect_ratio: f32) -> Self {
        let view_proj = camera.view_proj(aspect_ratio);
        Self {
            view_proj,
            prev_view_proj: previous.map_or(view_proj, |prev| prev.view_proj(aspect_ratio)),
            frustum: ShaderFrustum::from_matrix(view_proj),
            position: camera.position(),
        }
    }

    /// View-projection matching the pyramid occlusion tests read.
    pub fn occlusion_view_proj(&self, against_last_frame: bool) -> Mat4 {
        if against_last_frame {
            self.prev_view_proj
        } else {
            self.view_proj
        }
    }
}

/// What occlusion culling tests against.
#[derive(Clone, Copy)]
pub struct OcclusionView<'a> {
    pub hiz: &'a FloatImage,
    pub cull_data: CullData,
    /// View-projection the HiZ was rendered with.
    pub view_proj: Mat4,
    /// Test with last frame's transforms, to match a HiZ from last frame.
    pub previous_transforms: bool,
}

/// Everything a culling kernel needs to know about the view.
#[derive(Clone, Copy)]
pub struct CullView<'a> {
    pub frustum: ShaderFrustum,
    pub occlusion: Option<OcclusionView<'a>>,
}

impl<'a> CullView<'a> {
    pub fn frustum_only(frustum: ShaderFrustum) -> Self {
        Self {
            frustum,
            occlusion: None,
        }
    }

    pub fn is_sphere_visible(&self, transform: Mat4, sphere: BoundingSphere) -> bool {
        self.frustum.contains_sphere(sphere.apply_transform(transform))
    }
}

/// Tests a transformed box against the HiZ pyramid. Only returns true when the
/// whole box is behind what the pyramid recorded.
pub fn is_aabb_occluded(occlusion: &OcclusionView<'_>, transform: Mat4, aabb: Aabb) -> bool {
    if aabb.is_empty() {
        return false;
    }

    let model_view_proj = occlusion.view_proj * transform;
    let mut ndc_min = Vec2::splat(f32::INFINITY);
    let mut ndc_max = Vec2::splat(f32::NEG_INFINITY);
    let mut nearest_depth = f32::NEG_INFINITY;
    for corner in aabb.corners() {
        let clip = model_view_proj * corner.extend(1.0);
        // Crossing the camera plane, the projection is meaningless
        if clip.w <= MIN_W {
            return false;
        }
        let ndc = clip.xyz() / clip.w;
        ndc_min = ndc_min.min(ndc.xy());
        ndc_max = ndc_max.max(ndc.xy());
        nearest_depth = nearest_depth.max(ndc.z);
    }

    if ndc_max.x < -1.0 || ndc_max.y < -1.0 || ndc_min.x > 1.0 || ndc_min.y > 1.0 {
        return false;
    }

    let CullData {
        rt_size,
        mip_count,
        ..
    } = occlusion.cull_data;

    // uv y grows downwards
    let uv_min = Vec2::new(ndc_min.x * 0.5 + 0.5, 0.5 - ndc_max.y * 0.5).clamp(Vec2::ZERO, Vec2::ONE);
    let uv_max = Vec2::new(ndc_max.x * 0.5 + 0.5, 0.5 - ndc_min.y * 0.5).clamp(Vec2::ZERO, Vec2::ONE);
    let last_pixel = rt_size.as_ivec2() - IVec2::ONE;
    let pixel_min = (uv_min * rt_size.as_vec2()).floor().as_ivec2().clamp(IVec2::ZERO, last_pixel);
    let pixel_max = (uv_max * rt_size.as_vec2()).floor().as_ivec2().clamp(IVec2::ZERO, last_pixel);

    let texel_min = pixel_min / 2;
    let texel_max = pixel_max / 2;

    let Some(level) = (0..mip_count).find(|&level| {
        let span = (texel_max >> level as i32) - (texel_min >> level as i32);
        span.x <= 1 && span.y <= 1
    }) else {
        return false;
    };

    let farthest = occlusion
        .hiz
        .gather4(level, texel_min >> level as i32, 1.0)
        .into_iter()
        .fold(f32::INFINITY, f32::min);

    nearest_depth < farthest
}

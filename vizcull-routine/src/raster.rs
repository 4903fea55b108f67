//! Half-space triangle rasterizer for the visibility buffer.
//!
//! Coverage is sampled at pixel centers and edges are inclusive. Depth is
//! reverse-Z, so the depth test keeps the greater value. Triangles with a
//! vertex on or behind the camera plane, or in front of the near plane, are
//! dropped whole.

use glam::{Mat4, UVec2, Vec2, Vec3, Vec4, Vec4Swizzles};
use vizcull::image::{AtomicVisbuffer, FloatImage, UintImage};

/// Where fragments go.
#[derive(Clone, Copy)]
pub enum RasterTarget<'a> {
    /// Depth tested in submission order, which makes it sequential.
    Ordered {
        depth: &'a FloatImage,
        visbuffer: &'a UintImage,
    },
    /// Depth and id packed into one 64 bit word; any order gives the same result.
    Atomic(&'a AtomicVisbuffer),
}

impl<'a> RasterTarget<'a> {
    pub fn size(&self) -> UVec2 {
        match self {
            Self::Ordered { visbuffer, .. } => visbuffer.size(),
            Self::Atomic(visbuffer) => visbuffer.size(),
        }
    }

    fn write(&self, pixel: UVec2, depth: f32, triangle_id: u32) {
        match self {
            Self::Ordered { depth: depth_image, visbuffer } => {
                if depth > depth_image.load(0, pixel) {
                    depth_image.store(0, pixel, depth);
                    visbuffer.store(pixel, triangle_id);
                }
            }
            Self::Atomic(visbuffer) => visbuffer.fetch_max(pixel, depth, triangle_id),
        }
    }
}

struct ScreenVertex {
    position: Vec2,
    depth: f32,
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b - a).perp_dot(p - a)
}

fn to_screen(clip: Vec4, size: Vec2) -> Option<ScreenVertex> {
    if clip.w <= 0.0 {
        return None;
    }
    let ndc = clip.xyz() / clip.w;
    if ndc.z > 1.0 {
        return None;
    }
    Some(ScreenVertex {
        position: Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5) * size,
        depth: ndc.z,
    })
}

/// Rasterizes one triangle given in model space.
///
/// With `cull_backfaces` set, triangles that are clockwise in NDC are skipped.
pub fn rasterize_triangle(
    target: &RasterTarget<'_>,
    model_view_proj: Mat4,
    triangle: [Vec3; 3],
    triangle_id: u32,
    cull_backfaces: bool,
) {
    let size = target.size();
    if size.x == 0 || size.y == 0 {
        return;
    }
    let size_f = size.as_vec2();

    let [Some(a), Some(b), Some(c)] = triangle.map(|v| to_screen(model_view_proj * v.extend(1.0), size_f)) else {
        return;
    };

    // Screen space flips y, so counter clockwise in NDC is negative here
    let area = edge(a.position, b.position, c.position);
    if area == 0.0 || (cull_backfaces && area > 0.0) {
        return;
    }

    // pixel centers inside the bounding box
    let min = a.position.min(b.position).min(c.position);
    let max = a.position.max(b.position).max(c.position);
    let first = (min - 0.5).ceil().max(Vec2::ZERO);
    let last = (max - 0.5).floor().min(size_f - 1.0);
    if first.x > last.x || first.y > last.y {
        return;
    }
    let (first, last) = (first.as_uvec2(), last.as_uvec2());

    let sign = area.signum();
    for y in first.y..=last.y {
        for x in first.x..=last.x {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(b.position, c.position, p) * sign;
            let w1 = edge(c.position, a.position, p) * sign;
            let w2 = edge(a.position, b.position, p) * sign;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let depth = a.depth + (w1 * (b.depth - a.depth) + w2 * (c.depth - a.depth)) / (area * sign);
            if depth < 0.0 {
                continue;
            }
            target.write(UVec2::new(x, y), depth, triangle_id);
        }
    }
}

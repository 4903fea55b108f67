//! Single dispatch HiZ pyramid generation.
//!
//! Every workgroup reduces one 64×64 window of the depth buffer into mips
//! 0 through 5 of the pyramid. The last workgroup to finish, detected with an
//! atomic counter, then reduces the remaining mips over the whole image.
//!
//! Each texel keeps the farthest depth of its 2×2 footprint (the minimum,
//! as depth is reverse-Z), so a test against any mip is conservative.
//! Footprints reaching past the depth buffer read 1.0, which never lowers
//! the minimum.

use std::sync::atomic::{fence, Ordering};

use glam::{IVec2, UVec2};
use vizcull::{
    device::Device,
    graph::{ImageHandle, NodeResourceUsage, RenderGraph},
    image::{FloatImage, TextureFormat},
    util::{atomic::AtomicCounter, math::round_up_div_uvec2},
};

use crate::culling::CullData;

/// Mips a workgroup writes before handing off to the last workgroup.
pub const GEN_HIZ_LEVELS_PER_WORKGROUP: u32 = 6;
/// Mip 0 texels per workgroup along each axis.
pub const GEN_HIZ_WINDOW: u32 = 1 << (GEN_HIZ_LEVELS_PER_WORKGROUP - 1);

const OUT_OF_RANGE_DEPTH: f32 = 1.0;

fn reduce(texels: [f32; 4]) -> f32 {
    texels.into_iter().fold(f32::INFINITY, f32::min)
}

/// Creates an image able to hold the pyramid for `cull_data`.
pub fn create_hiz(label: &str, cull_data: &CullData) -> FloatImage {
    FloatImage::new(
        label,
        TextureFormat::R32Float,
        cull_data.physical_hiz_size,
        cull_data.mip_count,
        0.0,
    )
}

pub struct HiZRoutine {
    finished_workgroups: AtomicCounter,
}

impl HiZRoutine {
    pub fn new() -> Self {
        Self {
            finished_workgroups: AtomicCounter::new(u32::MAX),
        }
    }

    /// Writes mip `level` of `hiz` over the texel rectangle `[origin, origin + extent)`.
    fn reduce_level(depth: &FloatImage, hiz: &FloatImage, level: u32, origin: UVec2, extent: UVec2) {
        let end = (origin + extent).min(hiz.mip_size(level));
        for y in origin.y..end.y {
            for x in origin.x..end.x {
                let texel = UVec2::new(x, y);
                let base = (texel * 2).as_ivec2();
                let footprint = match level {
                    0 => depth.gather4(0, base, OUT_OF_RANGE_DEPTH),
                    _ => hiz.gather4(level - 1, base, OUT_OF_RANGE_DEPTH),
                };
                hiz.store(level, texel, reduce(footprint));
            }
        }
    }

    /// Builds every mip of `hiz` from mip 0 of `depth` in one dispatch.
    pub fn generate(&self, device: &Device, depth: &FloatImage, hiz: &FloatImage) {
        profiling::scope!("HiZ generation");

        let mip_count = hiz.mip_count();
        let workgroups = round_up_div_uvec2(hiz.size(), UVec2::splat(GEN_HIZ_WINDOW));
        let workgroup_levels = mip_count.min(GEN_HIZ_LEVELS_PER_WORKGROUP);

        device.dispatch(
            "Gen HiZ",
            workgroups.extend(1),
            UVec2::splat(GEN_HIZ_WINDOW).extend(1),
            |group| {
                let window = group.id.truncate();
                for level in 0..workgroup_levels {
                    let extent = UVec2::splat(GEN_HIZ_WINDOW >> level);
                    Self::reduce_level(depth, hiz, level, window * extent, extent);
                }

                // Publish this window before signalling completion
                fence(Ordering::Release);
                let finished = self.finished_workgroups.fetch_add(1, Ordering::Relaxed);
                if finished + 1 != group.total_workgroups() {
                    return;
                }
                fence(Ordering::Acquire);

                for level in workgroup_levels..mip_count {
                    Self::reduce_level(depth, hiz, level, UVec2::ZERO, hiz.mip_size(level));
                }
                self.finished_workgroups.reset();
            },
        );
    }

    pub fn add_hi_z_to_graph<'node>(
        &'node self,
        graph: &mut RenderGraph<'node>,
        depth: ImageHandle<FloatImage>,
        hiz: ImageHandle<FloatImage>,
    ) {
        let mut node = graph.add_node("Gen HiZ");
        let depth_handle = node.add_image(depth, NodeResourceUsage::Input);
        let hiz_handle = node.add_image(hiz, NodeResourceUsage::Output);

        node.build(move |ctx| {
            let depth = ctx.graph_data.get_image(depth_handle);
            let hiz = ctx.graph_data.get_image(hiz_handle);
            self.generate(ctx.device, depth, hiz);
        });
    }
}

impl Default for HiZRoutine {
    fn default() -> Self {
        Self::new()
    }
}

/// The farthest depth of the depth buffer over a texel rectangle of mip 0,
/// computed the slow way. Useful to check pyramids against.
pub fn reference_farthest(depth: &FloatImage, first: UVec2, last: UVec2) -> f32 {
    let mut farthest = f32::INFINITY;
    for y in first.y * 2..=last.y * 2 + 1 {
        for x in first.x * 2..=last.x * 2 + 1 {
            farthest = farthest.min(depth.load_or(0, IVec2::new(x as i32, y as i32), OUT_OF_RANGE_DEPTH));
        }
    }
    farthest
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    fn setup(rt_size: UVec2) -> (FloatImage, FloatImage) {
        let cull_data = CullData::new(rt_size);
        (
            FloatImage::new("depth", TextureFormat::Depth32Float, rt_size, 1, 0.0),
            create_hiz("hiz", &cull_data),
        )
    }

    #[test]
    fn constant_depth_stays_constant() {
        let device = Device::new(Some(4)).unwrap();
        let (depth, hiz) = setup(UVec2::new(256, 256));
        depth.clear(0.375);
        HiZRoutine::new().generate(&device, &depth, &hiz);

        assert_eq!(hiz.mip_count(), 8);
        for level in 0..hiz.mip_count() {
            assert!(hiz.read_mip(level).iter().all(|&d| d == 0.375), "mip {level}");
        }
    }

    #[test]
    fn idempotent_and_conservative() {
        let device = Device::new(Some(4)).unwrap();
        let rt_size = UVec2::new(301, 77);
        let (depth, hiz) = setup(rt_size);
        let mut rng = StdRng::seed_from_u64(7);
        let data: Vec<f32> = (0..rt_size.x * rt_size.y).map(|_| rng.gen_range(0.0..1.0)).collect();
        depth.write_mip0(&data);

        let routine = HiZRoutine::new();
        routine.generate(&device, &depth, &hiz);
        let first: Vec<Vec<f32>> = (0..hiz.mip_count()).map(|l| hiz.read_mip(l)).collect();
        routine.generate(&device, &depth, &hiz);
        let second: Vec<Vec<f32>> = (0..hiz.mip_count()).map(|l| hiz.read_mip(l)).collect();
        assert_eq!(first, second);

        // every texel equals the farthest depth of the source region it covers
        for level in 0..hiz.mip_count() {
            let size = hiz.mip_size(level);
            for y in 0..size.y {
                for x in 0..size.x {
                    let first = UVec2::new(x, y) << level;
                    let last = ((UVec2::new(x, y) + 1) << level) - 1;
                    let expected = reference_farthest(&depth, first, last);
                    assert_eq!(hiz.load(level, UVec2::new(x, y)), expected, "mip {level} texel {x} {y}");
                }
            }
        }
    }

    #[test]
    fn counter_resets_for_the_next_frame() {
        let device = Device::new(Some(2)).unwrap();
        let (depth, hiz) = setup(UVec2::new(200, 130));
        let routine = HiZRoutine::new();
        depth.clear(0.5);
        routine.generate(&device, &depth, &hiz);
        depth.clear(0.25);
        routine.generate(&device, &depth, &hiz);
        let top = hiz.mip_count() - 1;
        assert_eq!(hiz.read_mip(top), vec![0.25]);
    }
}

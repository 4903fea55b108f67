//! Visibility buffer targets and the draw passes that fill them.

use glam::{Mat4, UVec2, UVec3};
use vizcull::{
    device::Device,
    image::{AtomicVisbuffer, FloatImage, TextureFormat, UintImage},
    scene::GpuScene,
    util::math::round_up_div_uvec2,
};
use vizcull_types::{encode_triangle_id, DrawListType, DrawPass, INVALID_TRIANGLE_ID};

use crate::{
    meshlet_instances::MeshletInstancesBuffer,
    raster::{rasterize_triangle, RasterTarget},
};

pub const SPLIT_ATOMIC_VISBUFFER_WORKGROUP_X: u32 = 8;
pub const SPLIT_ATOMIC_VISBUFFER_WORKGROUP_Y: u32 = 8;

/// Depth and triangle id targets of the main view.
pub struct VisbufferTargets {
    pub depth: FloatImage,
    pub visbuffer: UintImage,
    /// Only present with the atomic visbuffer enabled.
    pub atomic: Option<AtomicVisbuffer>,
}

impl VisbufferTargets {
    pub fn new(size: UVec2, atomic: bool) -> Self {
        Self {
            depth: FloatImage::new("depth", TextureFormat::Depth32Float, size, 1, 0.0),
            visbuffer: UintImage::new("visbuffer", size, INVALID_TRIANGLE_ID),
            atomic: atomic.then(|| AtomicVisbuffer::new("atomic visbuffer", size, Self::atomic_clear_value())),
        }
    }

    pub fn atomic_clear_value() -> u64 {
        AtomicVisbuffer::pack(0.0, INVALID_TRIANGLE_ID)
    }

    pub fn size(&self) -> UVec2 {
        self.visbuffer.size()
    }

    pub fn clear(&self) {
        self.depth.clear(0.0);
        self.visbuffer.clear(INVALID_TRIANGLE_ID);
        if let Some(atomic) = &self.atomic {
            atomic.clear(Self::atomic_clear_value());
        }
    }

    pub fn raster_target(&self) -> RasterTarget<'_> {
        match &self.atomic {
            Some(atomic) => RasterTarget::Atomic(atomic),
            None => RasterTarget::Ordered {
                depth: &self.depth,
                visbuffer: &self.visbuffer,
            },
        }
    }
}

pub struct DrawPassArgs<'a> {
    pub scene: &'a GpuScene,
    pub instances: &'a MeshletInstancesBuffer,
    pub pass: DrawPass,
    pub view_proj: Mat4,
    pub cull_backfaces: bool,
}

fn draw_meshlet_instance(target: &RasterTarget<'_>, args: &DrawPassArgs<'_>, meshlet_instance_index: u32) {
    let Some(instance) = args.instances.get(meshlet_instance_index) else {
        return;
    };
    let Some(global) = args.scene.global_meshlet_index(instance.mesh_index, instance.meshlet_index) else {
        return;
    };
    let model_view_proj = args.view_proj * args.scene.transform(instance.entity_index, false);
    for (triangle_index, triangle) in args.scene.meshlet_triangles(global).enumerate() {
        rasterize_triangle(
            target,
            model_view_proj,
            triangle,
            encode_triangle_id(meshlet_instance_index, triangle_index as u32),
            args.cull_backfaces,
        );
    }
}

/// Draws both draw lists of a pass.
///
/// The ordered target draws in list order from a single invocation. The
/// atomic target draws one meshlet per workgroup.
pub fn draw_pass(device: &Device, label: &str, target: RasterTarget<'_>, args: DrawPassArgs<'_>) {
    profiling::scope!("draw visbuffer", label);

    let indices: Vec<u32> = DrawListType::ALL
        .into_iter()
        .flat_map(|list| args.instances.draw_indices(list, args.pass))
        .collect();

    match target {
        RasterTarget::Ordered { .. } => device.dispatch(label, UVec3::ONE, UVec3::ONE, |_| {
            for &index in &indices {
                draw_meshlet_instance(&target, &args, index);
            }
        }),
        RasterTarget::Atomic(_) => device.dispatch(
            label,
            UVec3::new(indices.len() as u32, 1, 1),
            UVec3::ONE,
            |group| draw_meshlet_instance(&target, &args, indices[group.flat_id() as usize]),
        ),
    }
}

/// Copies the atomic visbuffer into the sampleable depth and id images.
pub fn split_atomic_visbuffer(
    device: &Device,
    label: &str,
    atomic: &AtomicVisbuffer,
    depth: &FloatImage,
    visbuffer: &UintImage,
) {
    profiling::scope!("split atomic visbuffer", label);

    let workgroup_size = UVec2::new(SPLIT_ATOMIC_VISBUFFER_WORKGROUP_X, SPLIT_ATOMIC_VISBUFFER_WORKGROUP_Y);
    let workgroups = round_up_div_uvec2(atomic.size(), workgroup_size);
    device.dispatch(label, workgroups.extend(1), workgroup_size.extend(1), |group| {
        for invocation in group.invocations() {
            let pixel = invocation.global_id.truncate();
            if let Some((pixel_depth, triangle_id)) = atomic.load(pixel) {
                depth.store(0, pixel, pixel_depth);
                visbuffer.store(pixel, triangle_id);
            }
        }
    });
}

//! Virtual shadow map clip levels and their culling.
//!
//! Every clip level is an orthographic view along the sun direction, twice
//! the size of the previous one. The clips follow the camera in whole page
//! steps so texels stay put while the camera moves.
//!
//! Culling runs the mesh culler and a meshlet frustum test per clip level and
//! records how many meshlets each level would draw. Pages are not allocated
//! and nothing is rasterized into the shadow map.

use glam::{IVec2, Mat4, Vec2, Vec3, Vec3Swizzles};
use vizcull::{
    device::Device,
    format_sso,
    graph::{BufferHandle, NodeResourceUsage, RenderGraph},
    scene::GpuScene,
    util::{
        atomic::{AtomicArray, AtomicCounter},
        frustum::ShaderFrustum,
    },
};
use vizcull_types::{DispatchIndirectStruct, DrawListType, VsmSettings, VSM_CLIP_LEVELS, VSM_PAGE_SIZE, VSM_TEXTURE_RESOLUTION};

use crate::{
    culling::{cull_meshes, is_meshlet_visible, CullMeshesArgs, CullView},
    expansion::WorkExpansion,
};

/// Size of one page in NDC units.
pub const VSM_NDC_PAGE_SIZE: f32 = 2.0 * VSM_PAGE_SIZE as f32 / VSM_TEXTURE_RESOLUTION as f32;

/// The view of one clip level.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct VsmClipProjection {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_proj: Mat4,
    /// Pages the clip moved by to follow the camera.
    pub page_offset: IVec2,
    /// Whole world units between the clip's eye and the origin, along the sun direction.
    pub height_offset: i32,
    pub frustum: ShaderFrustum,
}

fn light_up(forward: Vec3) -> Vec3 {
    if forward.cross(Vec3::Z).length_squared() < 1.0e-6 {
        Vec3::Y
    } else {
        Vec3::Z
    }
}

/// Builds the projections of every clip level for a camera at `camera_position`.
pub fn get_vsm_projections(
    camera_position: Vec3,
    sun_direction: Vec3,
    settings: &VsmSettings,
) -> [VsmClipProjection; VSM_CLIP_LEVELS] {
    let sun = sun_direction.normalize();
    let forward = -sun;
    let up = light_up(forward);
    // Rotation only, so light space z runs along the sun direction
    let light_view = Mat4::look_to_rh(Vec3::ZERO, forward, up);
    let camera_light_space = light_view.transform_point3(camera_position);

    std::array::from_fn(|clip| {
        let clip_scale = (1u32 << clip) as f32;
        let half_extent = settings.clip_0_scale * clip_scale;
        let near = settings.clip_0_near * clip_scale;
        let far = settings.clip_0_far * clip_scale;

        // reverse-Z
        let projection = Mat4::orthographic_rh(-half_extent, half_extent, -half_extent, half_extent, far, near);

        let camera_ndc = camera_light_space.xy() / half_extent;
        let aligned = (camera_ndc / VSM_NDC_PAGE_SIZE).ceil();
        let snapped: Vec2 = aligned * VSM_NDC_PAGE_SIZE * half_extent;

        let height_offset = (camera_position.dot(sun) + settings.clip_0_height_offset * clip_scale).floor() as i32;
        let eye = light_view
            .inverse()
            .transform_point3(snapped.extend(height_offset as f32));

        let view = Mat4::look_to_rh(eye, forward, up);
        let view_proj = projection * view;
        VsmClipProjection {
            view,
            projection,
            view_proj,
            page_offset: -aligned.as_ivec2(),
            height_offset,
            frustum: ShaderFrustum::from_matrix_with_far(view_proj),
        }
    })
}

/// Culls the scene against every clip level, one level after another.
pub struct VsmClipCuller {
    expansions: [WorkExpansion; DrawListType::COUNT],
    meshlet_counts: AtomicArray<u32>,
}

impl VsmClipCuller {
    pub fn new(prefix_sum: bool, max_mesh_instances: u32) -> Self {
        Self {
            expansions: [
                WorkExpansion::new(prefix_sum, max_mesh_instances),
                WorkExpansion::new(prefix_sum, max_mesh_instances),
            ],
            meshlet_counts: AtomicArray::new(VSM_CLIP_LEVELS as u32),
        }
    }

    pub fn clear(&self) {
        self.meshlet_counts.fill(0);
    }

    /// Meshlets that survived culling, per clip level.
    pub fn meshlet_counts(&self) -> [u32; VSM_CLIP_LEVELS] {
        std::array::from_fn(|clip| self.meshlet_counts.load(clip as u32))
    }

    /// Culls meshes then meshlets of `scene` against one clip level.
    pub fn cull_clip(
        &self,
        device: &Device,
        scene: &GpuScene,
        clip: usize,
        projection: &VsmClipProjection,
        max_mesh_instances: u32,
    ) {
        profiling::scope!("vsm cull clip");

        for expansion in &self.expansions {
            expansion.clear(DispatchIndirectStruct::CLEAR);
        }
        let view = CullView::frustum_only(projection.frustum);
        cull_meshes(
            device,
            &format_sso!("VSM Cull Meshes {clip}"),
            CullMeshesArgs {
                scene,
                view: &view,
                cull_meshes: true,
                max_mesh_instances,
                expansions: [&self.expansions[0], &self.expansions[1]],
            },
        );

        let survivors = AtomicCounter::new(u32::MAX);
        for expansion in &self.expansions {
            expansion.consume(
                device,
                &format_sso!("VSM Cull Meshlets {clip}"),
                |mesh_instance_index, meshlet_index| {
                    let Some(instance) = scene.mesh_instances.get(mesh_instance_index as usize) else {
                        return;
                    };
                    if is_meshlet_visible(scene, &view, instance, meshlet_index) {
                        survivors.saturating_increment();
                    }
                },
            );
        }
        self.meshlet_counts.store(clip as u32, survivors.load());
    }

    pub fn cull(
        &self,
        device: &Device,
        scene: &GpuScene,
        projections: &[VsmClipProjection; VSM_CLIP_LEVELS],
        max_mesh_instances: u32,
    ) {
        self.clear();
        for (clip, projection) in projections.iter().enumerate() {
            self.cull_clip(device, scene, clip, projection, max_mesh_instances);
        }
    }

    /// Adds one node per clip level. Levels share the expansions, so every
    /// node waits on the previous one.
    pub fn add_vsm_culling_to_graph<'node>(
        &'node self,
        graph: &mut RenderGraph<'node>,
        scene: &'node GpuScene,
        projections: &'node [VsmClipProjection; VSM_CLIP_LEVELS],
        max_mesh_instances: u32,
    ) -> BufferHandle<VsmClipCuller> {
        let handle = graph.add_imported_buffer("vsm clip culler", self);

        let mut node = graph.add_node("VSM Clear Counts");
        let counts = node.add_buffer(handle, NodeResourceUsage::Output);
        node.build(move |ctx| ctx.graph_data.get_buffer(counts).clear());

        for (clip, projection) in projections.iter().enumerate() {
            let mut node = graph.add_node(format_sso!("VSM Cull Clip {clip}"));
            let culler = node.add_buffer(handle, NodeResourceUsage::InputOutput);
            node.build(move |ctx| {
                ctx.graph_data
                    .get_buffer(culler)
                    .cull_clip(ctx.device, scene, clip, projection, max_mesh_instances);
            });
        }

        handle
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4Swizzles;
    use vizcull_types::{Material, MeshBuilder, MeshGroup, Scene};

    use super::*;

    fn ndc(projection: &VsmClipProjection, point: Vec3) -> Vec3 {
        let clip = projection.view_proj * point.extend(1.0);
        clip.xyz() / clip.w
    }

    #[test]
    fn clips_double_and_contain_the_camera() {
        let settings = VsmSettings::default();
        let camera = Vec3::new(13.3, -4.1, 2.7);
        let projections = get_vsm_projections(camera, settings.sun_direction, &settings);

        for clip in 0..VSM_CLIP_LEVELS {
            let p = &projections[clip];
            if clip > 0 {
                let ratio = projections[clip - 1].projection.x_axis.x / p.projection.x_axis.x;
                assert!((ratio - 2.0).abs() < 1.0e-4, "clip {clip}");
            }
            let camera_ndc = ndc(p, camera);
            assert!(camera_ndc.x.abs() <= VSM_NDC_PAGE_SIZE + 1.0e-4, "clip {clip}: {camera_ndc}");
            assert!(camera_ndc.y.abs() <= VSM_NDC_PAGE_SIZE + 1.0e-4, "clip {clip}: {camera_ndc}");
            assert!(camera_ndc.z > 0.0 && camera_ndc.z < 1.0, "clip {clip}: {camera_ndc}");
        }
    }

    #[test]
    fn straight_down_sun_has_a_valid_basis() {
        let settings = VsmSettings::default();
        let projections = get_vsm_projections(Vec3::ONE, Vec3::Z, &settings);
        assert!(projections.iter().all(|p| p.view_proj.is_finite()));
        assert_eq!(projections[0].height_offset, 6);
    }

    #[test]
    fn counts_meshlets_per_clip() {
        let device = Device::new(Some(2)).unwrap();
        let mut scene = Scene::new();
        scene.add_material(Material::default());
        let tri = scene.add_mesh(
            MeshBuilder::new(vec![Vec3::ZERO, Vec3::new(0.1, 0.0, 0.0), Vec3::new(0.0, 0.1, 0.0)])
                .build()
                .unwrap(),
        );
        let group = scene.add_mesh_group(MeshGroup { meshes: vec![tri] });
        scene.add_entity(group, Mat4::IDENTITY);
        // far outside every clip but the largest ones
        scene.add_entity(group, Mat4::from_translation(Vec3::new(5000.0, 0.0, 0.0)));
        let scene = GpuScene::upload(&scene, 16).unwrap();

        let settings = VsmSettings::default();
        let projections = get_vsm_projections(Vec3::ZERO, Vec3::Z, &settings);
        let culler = VsmClipCuller::new(false, 16);
        culler.cull(&device, &scene, &projections, 16);

        let counts = culler.meshlet_counts();
        assert_eq!(counts[0], 1);
        assert_eq!(counts[VSM_CLIP_LEVELS - 1], 2);
        assert!(counts.windows(2).all(|w| w[0] <= w[1]));
    }
}

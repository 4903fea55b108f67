use vizcull::{device::Device, format_sso, scene::GpuScene};
use vizcull_types::{DrawListType, MeshInstance, MeshletInstance};

use crate::{
    culling::{is_aabb_occluded, CullView},
    expansion::WorkExpansion,
    meshlet_instances::MeshletInstancesBuffer,
    prepopulate::FirstPassBitfield,
};

/// Frustum and occlusion test of one meshlet of a mesh instance.
pub fn is_meshlet_visible(scene: &GpuScene, view: &CullView<'_>, instance: &MeshInstance, meshlet_index: u32) -> bool {
    let Some(global) = scene.global_meshlet_index(instance.mesh_index, meshlet_index) else {
        return false;
    };
    let Some(bounds) = scene.meshlet_bounds.get(global as usize) else {
        return false;
    };

    let transform = scene.transform(instance.entity_index, false);
    if !view.is_sphere_visible(transform, bounds.sphere) {
        return false;
    }
    match &view.occlusion {
        Some(occlusion) => {
            let transform = scene.transform(instance.entity_index, occlusion.previous_transforms);
            !is_aabb_occluded(occlusion, transform, bounds.aabb)
        }
        None => true,
    }
}

pub struct CullMeshletsArgs<'a> {
    pub scene: &'a GpuScene,
    pub view: &'a CullView<'a>,
    /// When off, every expanded meshlet is drawn.
    pub cull_meshlets: bool,
    /// Indexed by [`DrawListType::index`].
    pub expansions: [&'a WorkExpansion; 2],
    /// Meshlets already drawn by the first pass.
    pub first_pass: &'a FirstPassBitfield,
    pub instances: &'a MeshletInstancesBuffer,
}

/// Consumes the expansions: every expanded meshlet that was not drawn in the
/// first pass and survives culling becomes a post cull meshlet instance.
pub fn cull_meshlets(device: &Device, label: &str, args: CullMeshletsArgs<'_>) {
    profiling::scope!("cull_meshlets", label);

    let CullMeshletsArgs {
        scene,
        view,
        cull_meshlets,
        expansions,
        first_pass,
        instances,
    } = args;

    for draw_list in DrawListType::ALL {
        expansions[draw_list.index()].consume(
            device,
            &format_sso!("{label} {draw_list:?}"),
            |mesh_instance_index, meshlet_index| {
                let Some(instance) = scene.mesh_instances.get(mesh_instance_index as usize) else {
                    return;
                };
                let in_range = scene
                    .meshes
                    .get(instance.mesh_index as usize)
                    .map_or(false, |mesh| meshlet_index < mesh.meshlet_count);
                if !in_range || first_pass.is_drawn(mesh_instance_index, meshlet_index) {
                    return;
                }
                if cull_meshlets && !is_meshlet_visible(scene, view, instance, meshlet_index) {
                    return;
                }

                instances.push_post_cull(
                    MeshletInstance {
                        entity_index: instance.entity_index,
                        mesh_instance_index,
                        mesh_index: instance.mesh_index,
                        meshlet_index,
                    },
                    draw_list,
                );
            },
        );
    }
}

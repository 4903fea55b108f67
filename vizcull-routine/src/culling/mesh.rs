use vizcull::{device::Device, scene::GpuScene};

use crate::{
    culling::{is_aabb_occluded, CullView},
    expansion::WorkExpansion,
};

pub const CULL_MESHES_WORKGROUP_SIZE: u32 = 128;

pub struct CullMeshesArgs<'a> {
    pub scene: &'a GpuScene,
    pub view: &'a CullView<'a>,
    /// When off, every mesh instance expands.
    pub cull_meshes: bool,
    pub max_mesh_instances: u32,
    /// Indexed by [`DrawListType::index`](vizcull_types::DrawListType::index).
    pub expansions: [&'a WorkExpansion; 2],
}

/// One thread per mesh instance: frustum and occlusion test the mesh bounds
/// and declare the meshlets of the survivors to the expansion of their draw list.
pub fn cull_meshes(device: &Device, label: &str, args: CullMeshesArgs<'_>) {
    profiling::scope!("cull_meshes", label);

    let CullMeshesArgs {
        scene,
        view,
        cull_meshes,
        max_mesh_instances,
        expansions,
    } = args;

    let count = scene.mesh_instance_count().min(max_mesh_instances);
    device.dispatch_threads(label, count, CULL_MESHES_WORKGROUP_SIZE, |mesh_instance_index| {
        let instance = scene.mesh_instances[mesh_instance_index as usize];
        let Some(mesh) = scene.meshes.get(instance.mesh_index as usize) else {
            return;
        };
        if mesh.meshlet_count == 0 {
            return;
        }

        if cull_meshes {
            let transform = scene.transform(instance.entity_index, false);
            if !view.is_sphere_visible(transform, mesh.bounding_sphere) {
                return;
            }
            if let Some(occlusion) = &view.occlusion {
                let transform = scene.transform(instance.entity_index, occlusion.previous_transforms);
                if is_aabb_occluded(occlusion, transform, mesh.aabb) {
                    return;
                }
            }
        }

        expansions[instance.draw_list().index()].append(mesh_instance_index, mesh.meshlet_count);
    });
}

//! Finds the meshlets and mesh instances that ended up covering pixels.

use glam::UVec2;
use vizcull::{
    device::Device,
    image::UintImage,
    util::{
        atomic::{AtomicArray, AtomicBitfield, AtomicCounter},
        math::round_up_div_uvec2,
    },
};
use vizcull_types::decode_triangle_id;

use crate::meshlet_instances::MeshletInstancesBuffer;

pub const ANALYZE_VISBUFFER_WORKGROUP_X: u32 = 8;
pub const ANALYZE_VISBUFFER_WORKGROUP_Y: u32 = 8;

/// A saturating, append only list of indices.
pub struct VisibleList {
    count: AtomicCounter,
    entries: AtomicArray<u32>,
}

impl VisibleList {
    pub fn new(capacity: u32) -> Self {
        Self {
            count: AtomicCounter::new(capacity),
            entries: AtomicArray::new(capacity),
        }
    }

    pub fn clear(&self) {
        self.count.reset();
    }

    pub fn push(&self, value: u32) -> Option<u32> {
        let slot = self.count.saturating_increment()?;
        self.entries.store(slot, value);
        Some(slot)
    }

    pub fn len(&self) -> u32 {
        self.count.load()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u32 {
        self.count.capacity()
    }

    pub fn get(&self, index: u32) -> Option<u32> {
        (index < self.len()).then(|| self.entries.load(index))
    }

    pub fn read(&self) -> Vec<u32> {
        self.entries.read_to_vec(self.len())
    }
}

/// Meshlet instance indices, into the list of the frame they were found in.
pub type VisibleMeshletList = VisibleList;

/// Output of the analyzer. The meshlet list survives into the next frame,
/// where it seeds the first pass.
pub struct VisibilityAnalysis {
    pub meshlet_bits: AtomicBitfield,
    pub mesh_instance_bits: AtomicBitfield,
    pub visible_meshlets: VisibleMeshletList,
    pub visible_mesh_instances: VisibleList,
}

impl VisibilityAnalysis {
    pub fn new(max_mesh_instances: u32, max_meshlet_instances: u32) -> Self {
        Self {
            meshlet_bits: AtomicBitfield::new(max_meshlet_instances),
            mesh_instance_bits: AtomicBitfield::new(max_mesh_instances),
            visible_meshlets: VisibleList::new(max_meshlet_instances),
            visible_mesh_instances: VisibleList::new(max_mesh_instances),
        }
    }

    pub fn clear(&self) {
        self.meshlet_bits.clear();
        self.mesh_instance_bits.clear();
        self.visible_meshlets.clear();
        self.visible_mesh_instances.clear();
    }

    /// One invocation per pixel of the final visbuffer. The invocation that
    /// sets a meshlet's bit first appends it; mesh instances likewise.
    pub fn analyze(&self, device: &Device, visbuffer: &UintImage, instances: &MeshletInstancesBuffer) {
        profiling::scope!("analyze visbuffer");
        self.clear();

        let workgroup_size = UVec2::new(ANALYZE_VISBUFFER_WORKGROUP_X, ANALYZE_VISBUFFER_WORKGROUP_Y);
        let workgroups = round_up_div_uvec2(visbuffer.size(), workgroup_size);
        let instance_count = instances.len();

        device.dispatch(
            "Analyze Visbuffer",
            workgroups.extend(1),
            workgroup_size.extend(1),
            |group| {
                for invocation in group.invocations() {
                    let Some(triangle_id) = visbuffer.load(invocation.global_id.truncate()) else {
                        continue;
                    };
                    let Some((meshlet_instance_index, _)) = decode_triangle_id(triangle_id) else {
                        continue;
                    };
                    if meshlet_instance_index >= instance_count {
                        continue;
                    }
                    if !self.meshlet_bits.set(meshlet_instance_index) {
                        continue;
                    }
                    self.visible_meshlets.push(meshlet_instance_index);

                    if let Some(instance) = instances.get(meshlet_instance_index) {
                        if self.mesh_instance_bits.set(instance.mesh_instance_index) {
                            self.visible_mesh_instances.push(instance.mesh_instance_index);
                        }
                    }
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use vizcull_types::{encode_triangle_id, DrawListType, MeshletInstance, INVALID_TRIANGLE_ID};

    use super::*;

    #[test]
    fn deduplicates_meshlets_and_meshes() {
        let device = Device::new(Some(3)).unwrap();
        let instances = MeshletInstancesBuffer::new(8);
        for (mesh_instance_index, meshlet_index) in [(0, 0), (0, 1), (4, 0)] {
            instances.push_first_pass(
                MeshletInstance {
                    mesh_instance_index,
                    meshlet_index,
                    ..MeshletInstance::default()
                },
                DrawListType::Opaque,
            );
        }

        let visbuffer = UintImage::new("visbuffer", UVec2::new(20, 11), INVALID_TRIANGLE_ID);
        for x in 0..20 {
            for y in 0..11 {
                let id = match (x + y) % 3 {
                    0 => encode_triangle_id(0, 5),
                    1 => encode_triangle_id(1, x % 4),
                    _ => INVALID_TRIANGLE_ID,
                };
                visbuffer.store(UVec2::new(x, y), id);
            }
        }
        // past the end of the instance list
        visbuffer.store(UVec2::new(19, 10), encode_triangle_id(6, 0));

        let analysis = VisibilityAnalysis::new(8, 8);
        analysis.analyze(&device, &visbuffer, &instances);

        let mut meshlets = analysis.visible_meshlets.read();
        meshlets.sort_unstable();
        assert_eq!(meshlets, vec![0, 1]);
        assert_eq!(analysis.visible_mesh_instances.read(), vec![0]);
        assert!(analysis.meshlet_bits.get(1));
        assert!(!analysis.meshlet_bits.get(2));
    }
}

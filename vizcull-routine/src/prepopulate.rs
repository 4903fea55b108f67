//! Seeds the first pass with the meshlets last frame found visible.
//!
//! Three dispatches, each depending on the previous one finishing:
//!
//! 1. Mark every mesh instance that owns at least one visible meshlet which
//!    still describes the current scene.
//! 2. Give every marked mesh instance a run of bitfield words in a shared
//!    arena, one bit per meshlet.
//! 3. Set the bit of every visible meshlet; the invocation that flips a bit
//!    appends the meshlet to this frame's list as a first pass instance.
//!
//! The post cull pass then skips every meshlet whose bit is set, so no
//! meshlet is drawn twice in a frame.

use vizcull::{
    device::Device,
    scene::GpuScene,
    util::{
        atomic::{AtomicArray, AtomicWordArena},
        math::round_up_div,
    },
};

use crate::{analyze::VisibleMeshletList, meshlet_instances::MeshletInstancesBuffer};

pub const PREPOPULATE_WORKGROUP_SIZE: u32 = 128;

const NO_BITFIELD: u32 = u32::MAX;
const MARKED: u32 = u32::MAX - 1;

/// Per mesh instance bitfields of the meshlets drawn in the first pass.
pub struct FirstPassBitfield {
    offsets: AtomicArray<u32>,
    arena: AtomicWordArena,
}

impl FirstPassBitfield {
    pub fn new(max_mesh_instances: u32, max_meshlet_instances: u32) -> Self {
        let offsets = AtomicArray::new(max_mesh_instances);
        offsets.fill(NO_BITFIELD);
        Self {
            offsets,
            // every run can waste up to one word
            arena: AtomicWordArena::new(round_up_div(max_meshlet_instances, 32).saturating_add(max_mesh_instances)),
        }
    }

    pub fn clear(&self) {
        self.offsets.fill(NO_BITFIELD);
        self.arena.clear();
    }

    fn bitfield_offset(&self, mesh_instance_index: u32) -> Option<u32> {
        if mesh_instance_index >= self.offsets.len() {
            return None;
        }
        let offset = self.offsets.load(mesh_instance_index);
        (offset != NO_BITFIELD && offset != MARKED).then_some(offset)
    }

    /// Whether the first pass drew this meshlet.
    pub fn is_drawn(&self, mesh_instance_index: u32, meshlet_index: u32) -> bool {
        self.bitfield_offset(mesh_instance_index)
            .map_or(false, |offset| self.arena.get(offset, meshlet_index))
    }

    pub fn allocated_words(&self) -> u32 {
        self.arena.allocated()
    }
}

pub struct PrepopulateArgs<'a> {
    pub scene: &'a GpuScene,
    /// Meshlets found visible last frame, indexing `last_frame`.
    pub visible: &'a VisibleMeshletList,
    pub last_frame: &'a MeshletInstancesBuffer,
    pub current: &'a MeshletInstancesBuffer,
    pub bitfield: &'a FirstPassBitfield,
}

/// Looks up a visible meshlet of last frame and checks it still matches the scene.
fn visible_instance(args: &PrepopulateArgs<'_>, index: u32) -> Option<vizcull_types::MeshletInstance> {
    let instance = args.last_frame.get(args.visible.get(index)?)?;
    args.scene.is_meshlet_instance_valid(&instance).then_some(instance)
}

pub fn mark(device: &Device, args: &PrepopulateArgs<'_>) {
    profiling::scope!("prepopulate mark");
    args.bitfield.clear();
    device.dispatch_threads(
        "Prepopulate Mark",
        args.visible.len(),
        PREPOPULATE_WORKGROUP_SIZE,
        |index| {
            if let Some(instance) = visible_instance(args, index) {
                args.bitfield.offsets.store(instance.mesh_instance_index, MARKED);
            }
        },
    );
}

pub fn allocate(device: &Device, args: &PrepopulateArgs<'_>) {
    profiling::scope!("prepopulate allocate");
    let count = args.scene.mesh_instance_count().min(args.bitfield.offsets.len());
    device.dispatch_threads(
        "Prepopulate Allocate",
        count,
        PREPOPULATE_WORKGROUP_SIZE,
        |mesh_instance_index| {
            let offsets = &args.bitfield.offsets;
            if offsets.load(mesh_instance_index) != MARKED {
                return;
            }
            let mesh_index = args.scene.mesh_instances[mesh_instance_index as usize].mesh_index;
            let meshlet_count = args
                .scene
                .meshes
                .get(mesh_index as usize)
                .map_or(0, |mesh| mesh.meshlet_count);
            let offset = args
                .bitfield
                .arena
                .allocate(round_up_div(meshlet_count, 32))
                .unwrap_or(NO_BITFIELD);
            offsets.store(mesh_instance_index, offset);
        },
    );
}

pub fn populate(device: &Device, args: &PrepopulateArgs<'_>) {
    profiling::scope!("prepopulate populate");
    device.dispatch_threads(
        "Prepopulate Populate",
        args.visible.len(),
        PREPOPULATE_WORKGROUP_SIZE,
        |index| {
            let Some(instance) = visible_instance(args, index) else {
                return;
            };
            let Some(offset) = args.bitfield.bitfield_offset(instance.mesh_instance_index) else {
                return;
            };
            if args.bitfield.arena.set(offset, instance.meshlet_index) {
                let draw_list = args.scene.mesh_instances[instance.mesh_instance_index as usize].draw_list();
                args.current.push_first_pass(instance, draw_list);
            }
        },
    );
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};
    use vizcull_types::{DrawListType, DrawPass, Material, MeshBuilder, MeshGroup, MeshletInstance, Scene};

    use super::*;

    fn scene() -> GpuScene {
        let mut scene = Scene::new();
        scene.add_material(Material::default());
        let positions: Vec<Vec3> = (0..300).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect();
        let indices: Vec<u32> = (0..100).flat_map(|i| [i * 3, i * 3 + 1, i * 3 + 2]).collect();
        let mesh = scene.add_mesh(MeshBuilder::new(positions).with_indices(indices).build().unwrap());
        let group = scene.add_mesh_group(MeshGroup { meshes: vec![mesh] });
        scene.add_entity(group, Mat4::IDENTITY);
        scene.add_entity(group, Mat4::IDENTITY);
        GpuScene::upload(&scene, 16).unwrap()
    }

    #[test]
    fn seeds_first_pass_once_per_meshlet() {
        let device = Device::new(Some(2)).unwrap();
        let scene = scene();
        assert!(scene.meshes[0].meshlet_count > 1);

        let last_frame = MeshletInstancesBuffer::new(16);
        let current = MeshletInstancesBuffer::new(16);
        let visible = VisibleMeshletList::new(16);
        let bitfield = FirstPassBitfield::new(16, 16);

        let make = |mesh_instance_index, meshlet_index| MeshletInstance {
            entity_index: mesh_instance_index,
            mesh_instance_index,
            mesh_index: 0,
            meshlet_index,
        };
        // entry 1 repeats entry 0, entry 4 names the wrong mesh, entry 9 is past the end
        for instance in [make(0, 1), make(0, 1), make(1, 0), make(1, 0)] {
            last_frame.push_first_pass(instance, DrawListType::Opaque);
        }
        last_frame.push_post_cull(
            MeshletInstance {
                mesh_index: 5,
                ..make(1, 0)
            },
            DrawListType::Opaque,
        );
        for index in [0, 1, 2, 4, 9] {
            visible.push(index);
        }

        let args = PrepopulateArgs {
            scene: &scene,
            visible: &visible,
            last_frame: &last_frame,
            current: &current,
            bitfield: &bitfield,
        };
        mark(&device, &args);
        allocate(&device, &args);
        populate(&device, &args);

        let mut drawn = current.read();
        drawn.sort_by_key(|i| i.mesh_instance_index);
        assert_eq!(drawn, vec![make(0, 1), make(1, 0)]);
        assert_eq!(current.draw_count(DrawListType::Opaque, DrawPass::VisibleLastFrame), 2);
        assert!(bitfield.is_drawn(0, 1));
        assert!(!bitfield.is_drawn(0, 0));
        assert!(bitfield.is_drawn(1, 0));
        assert_eq!(bitfield.allocated_words(), 2);
    }
}

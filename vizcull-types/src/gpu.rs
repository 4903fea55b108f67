use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::{INVALID_TRIANGLE_ID, TRIANGLE_ID_TRIANGLE_BITS};

/// Arguments of an indirect compute dispatch, in workgroups.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchIndirectStruct {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchIndirectStruct {
    /// The value dispatch arguments are reset to before anything appends to
    /// them: no workgroups along x, one along y and z.
    pub const CLEAR: Self = Self { x: 0, y: 1, z: 1 };

    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub const fn workgroup_count(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

bitflags! {
    /// Per mesh instance flags, resolved from the scene when instances are flattened.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct MeshInstanceFlags: u32 {
        /// The mesh's material is alpha masked and goes into the masked draw list.
        const MASKED = 1 << 0;
    }
}

/// One placement of a mesh in the scene: the pair (entity, mesh of the entity's group).
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MeshInstance {
    pub entity_index: u32,
    pub mesh_index: u32,
    pub in_mesh_group_index: u32,
    pub flags: u32,
}

impl MeshInstance {
    pub fn flags(&self) -> MeshInstanceFlags {
        MeshInstanceFlags::from_bits_truncate(self.flags)
    }

    pub fn draw_list(&self) -> DrawListType {
        if self.flags().contains(MeshInstanceFlags::MASKED) {
            DrawListType::Masked
        } else {
            DrawListType::Opaque
        }
    }
}

/// A meshlet that survived culling and got drawn.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MeshletInstance {
    pub entity_index: u32,
    pub mesh_instance_index: u32,
    pub mesh_index: u32,
    pub meshlet_index: u32,
}

/// Material class a meshlet instance is drawn with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DrawListType {
    Opaque = 0,
    Masked = 1,
}

impl DrawListType {
    pub const COUNT: usize = 2;
    pub const ALL: [Self; Self::COUNT] = [Self::Opaque, Self::Masked];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Which of the two temporal draw passes a meshlet instance belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DrawPass {
    /// Meshlets the previous frame found visible, drawn before any culling.
    VisibleLastFrame = 0,
    /// Meshlets that survived culling against the freshly built HiZ.
    PostCull = 1,
}

impl DrawPass {
    pub const COUNT: usize = 2;

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::VisibleLastFrame => "pass 0",
            Self::PostCull => "pass 1",
        }
    }
}

/// Packs a meshlet instance index and a triangle index into a visibility buffer id.
pub const fn encode_triangle_id(meshlet_instance_index: u32, triangle_index: u32) -> u32 {
    (meshlet_instance_index << TRIANGLE_ID_TRIANGLE_BITS) | triangle_index
}

/// Inverse of [`encode_triangle_id`]. Returns `None` for the cleared value.
pub const fn decode_triangle_id(triangle_id: u32) -> Option<(u32, u32)> {
    if triangle_id == INVALID_TRIANGLE_ID {
        return None;
    }
    let mask = (1 << TRIANGLE_ID_TRIANGLE_BITS) - 1;
    Some((triangle_id >> TRIANGLE_ID_TRIANGLE_BITS, triangle_id & mask))
}

/// Diagnostic counters copied back to the host after every frame.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ReadbackValues {
    /// Meshlet instances drawn in the first pass, per draw list.
    pub first_pass_meshlet_count: [u32; DrawListType::COUNT],
    /// Meshlet instances drawn in the post cull pass, per draw list.
    pub second_pass_meshlet_count: [u32; DrawListType::COUNT],
    pub visible_meshlets: u32,
    pub visible_meshes: u32,
}

impl ReadbackValues {
    pub fn total_drawn_meshlets(&self) -> u32 {
        self.first_pass_meshlet_count.iter().sum::<u32>() + self.second_pass_meshlet_count.iter().sum::<u32>()
    }
}

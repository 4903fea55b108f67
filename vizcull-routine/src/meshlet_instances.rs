//! The list of meshlet instances drawn in a frame, and the per draw list
//! index lists the rasterizer walks.
//!
//! The first pass owns slots `[0, first_count)` of the instance array, the
//! post cull pass appends after them. Every append saturates: once a list is
//! full further instances are dropped and no counter moves past capacity.

use std::sync::Arc;

use vizcull::util::atomic::{AtomicArray, AtomicCounter};
use vizcull_types::{DrawListType, DrawPass, MeshletInstance};

struct DrawList {
    counts: [AtomicCounter; DrawPass::COUNT],
    indices: [AtomicArray<u32>; DrawPass::COUNT],
}

impl DrawList {
    fn new(capacity: u32) -> Self {
        Self {
            counts: [AtomicCounter::new(capacity), AtomicCounter::new(capacity)],
            indices: [AtomicArray::new(capacity), AtomicArray::new(capacity)],
        }
    }

    fn push(&self, pass: DrawPass, meshlet_instance_index: u32) {
        if let Some(slot) = self.counts[pass.index()].saturating_increment() {
            self.indices[pass.index()].store(slot, meshlet_instance_index);
        }
    }
}

pub struct MeshletInstancesBuffer {
    first_count: AtomicCounter,
    second_count: AtomicCounter,
    instances: AtomicArray<MeshletInstance>,
    draw_lists: [DrawList; DrawListType::COUNT],
}

impl MeshletInstancesBuffer {
    pub fn new(max_meshlet_instances: u32) -> Self {
        Self {
            first_count: AtomicCounter::new(max_meshlet_instances),
            second_count: AtomicCounter::new(max_meshlet_instances),
            instances: AtomicArray::new(max_meshlet_instances),
            draw_lists: [DrawList::new(max_meshlet_instances), DrawList::new(max_meshlet_instances)],
        }
    }

    pub fn capacity(&self) -> u32 {
        self.instances.len()
    }

    pub fn clear(&self) {
        self.first_count.reset();
        self.second_count.reset();
        for list in &self.draw_lists {
            for count in &list.counts {
                count.reset();
            }
        }
    }

    /// Appends a first pass instance. Must not run concurrently with the post cull pass.
    pub fn push_first_pass(&self, instance: MeshletInstance, draw_list: DrawListType) -> Option<u32> {
        let slot = self.first_count.saturating_increment()?;
        self.instances.store(slot, instance);
        self.draw_lists[draw_list.index()].push(DrawPass::VisibleLastFrame, slot);
        Some(slot)
    }

    /// Appends a post cull instance behind all first pass instances.
    pub fn push_post_cull(&self, instance: MeshletInstance, draw_list: DrawListType) -> Option<u32> {
        let first = self.first_count.load();
        let offset = self
            .second_count
            .saturating_add_within(1, self.capacity().saturating_sub(first))?;
        let slot = first + offset;
        self.instances.store(slot, instance);
        self.draw_lists[draw_list.index()].push(DrawPass::PostCull, slot);
        Some(slot)
    }

    pub fn first_count(&self) -> u32 {
        self.first_count.load()
    }

    pub fn second_count(&self) -> u32 {
        self.second_count.load()
    }

    pub fn len(&self) -> u32 {
        self.first_count() + self.second_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads an instance, `None` past the end of the list.
    pub fn get(&self, index: u32) -> Option<MeshletInstance> {
        (index < self.len()).then(|| self.instances.load(index))
    }

    pub fn draw_count(&self, draw_list: DrawListType, pass: DrawPass) -> u32 {
        self.draw_lists[draw_list.index()].counts[pass.index()].load()
    }

    /// Instance indices a draw list holds for a pass, in append order.
    pub fn draw_indices(&self, draw_list: DrawListType, pass: DrawPass) -> Vec<u32> {
        let list = &self.draw_lists[draw_list.index()];
        list.indices[pass.index()].read_to_vec(list.counts[pass.index()].load())
    }

    /// Every instance of the list, first pass first.
    pub fn read(&self) -> Vec<MeshletInstance> {
        self.instances.read_to_vec(self.len())
    }
}

/// This frame's and last frame's instance lists.
///
/// [`MeshletInstanceLists::swap`] exchanges the handles at the start of a frame, so
/// last frame's list stays readable while this frame's is rebuilt.
pub struct MeshletInstanceLists {
    pub current: Arc<MeshletInstancesBuffer>,
    pub last_frame: Arc<MeshletInstancesBuffer>,
}

impl MeshletInstanceLists {
    pub fn new(max_meshlet_instances: u32) -> Self {
        Self {
            current: Arc::new(MeshletInstancesBuffer::new(max_meshlet_instances)),
            last_frame: Arc::new(MeshletInstancesBuffer::new(max_meshlet_instances)),
        }
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.last_frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(meshlet_index: u32) -> MeshletInstance {
        MeshletInstance {
            meshlet_index,
            ..MeshletInstance::default()
        }
    }

    #[test]
    fn passes_share_one_array() {
        let buffer = MeshletInstancesBuffer::new(8);
        assert_eq!(buffer.push_first_pass(instance(0), DrawListType::Opaque), Some(0));
        assert_eq!(buffer.push_first_pass(instance(1), DrawListType::Masked), Some(1));
        assert_eq!(buffer.push_post_cull(instance(2), DrawListType::Masked), Some(2));

        assert_eq!(buffer.draw_indices(DrawListType::Masked, DrawPass::VisibleLastFrame), vec![1]);
        assert_eq!(buffer.draw_indices(DrawListType::Masked, DrawPass::PostCull), vec![2]);
        assert_eq!(buffer.get(2), Some(instance(2)));
        assert_eq!(buffer.get(3), None);
    }

    #[test]
    fn post_cull_saturates_behind_first_pass() {
        let buffer = MeshletInstancesBuffer::new(4);
        for i in 0..3 {
            buffer.push_first_pass(instance(i), DrawListType::Opaque);
        }
        assert_eq!(buffer.push_post_cull(instance(9), DrawListType::Opaque), Some(3));
        assert_eq!(buffer.push_post_cull(instance(10), DrawListType::Opaque), None);
        assert_eq!(buffer.second_count(), 1);
        assert_eq!(buffer.len(), buffer.capacity());
        assert_eq!(buffer.draw_count(DrawListType::Opaque, DrawPass::PostCull), 1);
    }

    #[test]
    fn swap_exchanges_handles() {
        let mut lists = MeshletInstanceLists::new(4);
        lists.current.push_first_pass(instance(5), DrawListType::Opaque);
        let written = Arc::as_ptr(&lists.current);
        lists.swap();
        assert_eq!(Arc::as_ptr(&lists.last_frame), written);
        assert_eq!(lists.last_frame.get(0), Some(instance(5)));
        assert!(lists.current.is_empty());
    }
}

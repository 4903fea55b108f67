//! Copies the frame's counters back to the host once the frame finished.

use parking_lot::Mutex;
use vizcull::graph::{BufferHandle, NodeResourceUsage, RenderGraph};
use vizcull_types::{DrawListType, DrawPass, ReadbackValues};

use crate::{analyze::VisibilityAnalysis, meshlet_instances::MeshletInstancesBuffer};

/// Gathers the counters of a finished frame.
pub fn capture(instances: &MeshletInstancesBuffer, analysis: &VisibilityAnalysis) -> ReadbackValues {
    let counts = |pass| DrawListType::ALL.map(|list| instances.draw_count(list, pass));
    ReadbackValues {
        first_pass_meshlet_count: counts(DrawPass::VisibleLastFrame),
        second_pass_meshlet_count: counts(DrawPass::PostCull),
        visible_meshlets: analysis.visible_meshlets.len(),
        visible_meshes: analysis.visible_mesh_instances.len(),
    }
}

fn warn_on_overflow(values: &ReadbackValues, instances: &MeshletInstancesBuffer, analysis: &VisibilityAnalysis) {
    if values.total_drawn_meshlets() >= instances.capacity() {
        log::warn!(
            "Meshlet instance list is full ({} instances), meshlets were dropped this frame",
            instances.capacity()
        );
    }
    if values.visible_meshlets >= analysis.visible_meshlets.capacity() {
        log::warn!(
            "Visible meshlet list is full ({} entries), next frame's first pass is incomplete",
            analysis.visible_meshlets.capacity()
        );
    }
}

/// Holds the values of the last frame that finished.
#[derive(Default)]
pub struct Readback {
    latest: Mutex<ReadbackValues>,
}

impl Readback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> ReadbackValues {
        *self.latest.lock()
    }

    pub fn add_readback_to_graph<'node>(
        &'node self,
        graph: &mut RenderGraph<'node>,
        instances: BufferHandle<MeshletInstancesBuffer>,
        analysis: BufferHandle<VisibilityAnalysis>,
    ) {
        let mut node = graph.add_node("Readback");
        let instances_handle = node.add_buffer(instances, NodeResourceUsage::Input);
        let analysis_handle = node.add_buffer(analysis, NodeResourceUsage::Input);
        node.add_side_effect();

        node.build(move |ctx| {
            profiling::scope!("readback");
            let instances = ctx.graph_data.get_buffer(instances_handle);
            let analysis = ctx.graph_data.get_buffer(analysis_handle);

            let values = capture(instances, analysis);
            warn_on_overflow(&values, instances, analysis);
            log::trace!("Readback {values:?}");
            *self.latest.lock() = values;
        });
    }
}

#[cfg(test)]
mod tests {
    use vizcull::device::Device;
    use vizcull_types::MeshletInstance;

    use super::*;

    #[test]
    fn values_survive_the_graph() {
        let device = Device::new(Some(1)).unwrap();
        let instances = MeshletInstancesBuffer::new(4);
        let analysis = VisibilityAnalysis::new(4, 4);
        instances.push_first_pass(MeshletInstance::default(), DrawListType::Masked);
        instances.push_post_cull(MeshletInstance::default(), DrawListType::Opaque);
        instances.push_post_cull(MeshletInstance::default(), DrawListType::Opaque);
        analysis.visible_meshlets.push(2);

        let readback = Readback::new();
        let mut graph = RenderGraph::new();
        let instances_handle = graph.add_imported_buffer("instances", &instances);
        let analysis_handle = graph.add_imported_buffer("analysis", &analysis);
        readback.add_readback_to_graph(&mut graph, instances_handle, analysis_handle);
        let stats = graph.execute(&device);

        assert!(stats.ran("Readback"));
        assert_eq!(
            readback.latest(),
            ReadbackValues {
                first_pass_meshlet_count: [0, 1],
                second_pass_meshlet_count: [2, 0],
                visible_meshlets: 1,
                visible_meshes: 0,
            }
        );
    }
}

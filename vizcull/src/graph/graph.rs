use std::{any::Any, cell::RefCell};

use crate::{
    device::Device,
    graph::{
        BufferHandle, DataHandle, GraphResource, ImageHandle, NodeExecutionContext, RenderGraphDataStore,
        RenderGraphNode, RenderGraphNodeBuilder,
    },
    util::typedefs::{FastHashMap, FastHashSet, SsoString},
};

pub(crate) struct ImportedResource<'node> {
    pub(super) label: SsoString,
    pub(super) inner: &'node (dyn Any + Send + Sync),
}

struct DataContents {
    label: SsoString,
    // Any is RefCell<Option<T>> where T is the stored data
    inner: Box<dyn Any>,
}

/// The hazard a barrier resolves.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BarrierKind {
    ReadAfterWrite,
    WriteAfterWrite,
    WriteAfterRead,
}

/// A dependency between two nodes on one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barrier {
    pub resource: SsoString,
    pub kind: BarrierKind,
    pub producer: SsoString,
    pub consumer: SsoString,
}

/// What a graph did when it executed.
#[derive(Debug, Default, Clone)]
pub struct GraphStatistics {
    /// Labels of the nodes that ran, in order.
    pub executed: Vec<SsoString>,
    /// Labels of the nodes dead node elimination removed.
    pub culled: Vec<SsoString>,
    pub barriers: Vec<Barrier>,
}

impl GraphStatistics {
    pub fn ran(&self, label: &str) -> bool {
        self.executed.iter().any(|l| l == label)
    }

    /// Position of a node in the execution order.
    pub fn position(&self, label: &str) -> Option<usize> {
        self.executed.iter().position(|l| l == label)
    }

    pub fn has_barrier(&self, producer: &str, consumer: &str) -> bool {
        self.barriers.iter().any(|b| b.producer == producer && b.consumer == consumer)
    }
}

/// Implementation of a rendergraph. See module docs for details.
pub struct RenderGraph<'node> {
    pub(super) buffers: Vec<ImportedResource<'node>>,
    pub(super) images: Vec<ImportedResource<'node>>,
    data: Vec<DataContents>,
    pub(super) nodes: Vec<RenderGraphNode<'node>>,
}

impl<'node> RenderGraph<'node> {
    pub fn new() -> Self {
        Self {
            buffers: Vec::with_capacity(32),
            images: Vec::with_capacity(16),
            data: Vec::with_capacity(16),
            nodes: Vec::with_capacity(64),
        }
    }

    pub fn add_node<'a, S>(&'a mut self, label: S) -> RenderGraphNodeBuilder<'a, 'node>
    where
        SsoString: From<S>,
    {
        RenderGraphNodeBuilder {
            label: SsoString::from(label),
            graph: self,
            inputs: Vec::with_capacity(8),
            outputs: Vec::with_capacity(8),
            references: Vec::new(),
        }
    }

    pub fn add_imported_buffer<T, S>(&mut self, label: S, buffer: &'node T) -> BufferHandle<T>
    where
        T: Any + Send + Sync,
        SsoString: From<S>,
    {
        let idx = self.buffers.len();
        self.buffers.push(ImportedResource {
            label: SsoString::from(label),
            inner: buffer,
        });
        BufferHandle::new(GraphResource::ImportedBuffer(idx))
    }

    pub fn add_imported_image<T, S>(&mut self, label: S, image: &'node T) -> ImageHandle<T>
    where
        T: Any + Send + Sync,
        SsoString: From<S>,
    {
        let idx = self.images.len();
        self.images.push(ImportedResource {
            label: SsoString::from(label),
            inner: image,
        });
        ImageHandle::new(GraphResource::ImportedImage(idx))
    }

    pub fn add_data<T: Any, S>(&mut self, label: S) -> DataHandle<T>
    where
        SsoString: From<S>,
    {
        let idx = self.data.len();
        self.data.push(DataContents {
            label: SsoString::from(label),
            inner: Box::new(RefCell::new(None::<T>)),
        });
        DataHandle::new(GraphResource::Data(idx))
    }

    fn resource_label(&self, resource: GraphResource) -> SsoString {
        match resource {
            GraphResource::ImportedBuffer(idx) => self.buffers[idx].label.clone(),
            GraphResource::ImportedImage(idx) => self.images[idx].label.clone(),
            GraphResource::Data(idx) => self.data[idx].label.clone(),
            GraphResource::External => SsoString::from("external"),
        }
    }

    fn compute_barriers(&self, nodes: &[RenderGraphNode<'node>]) -> Vec<Barrier> {
        profiling::scope!("Barrier Derivation");

        let mut last_writer = FastHashMap::<GraphResource, usize>::default();
        let mut readers = FastHashMap::<GraphResource, Vec<usize>>::default();
        let mut emitted = FastHashSet::<(GraphResource, usize, usize)>::default();
        let mut barriers = Vec::new();

        let mut emit = |resource: GraphResource, kind: BarrierKind, producer: usize, consumer: usize| {
            if producer != consumer && emitted.insert((resource, producer, consumer)) {
                barriers.push(Barrier {
                    resource: self.resource_label(resource),
                    kind,
                    producer: nodes[producer].label.clone(),
                    consumer: nodes[consumer].label.clone(),
                });
            }
        };

        for (idx, node) in nodes.iter().enumerate() {
            for &input in node.inputs.iter().filter(|&&r| r != GraphResource::External) {
                if let Some(&writer) = last_writer.get(&input) {
                    emit(input, BarrierKind::ReadAfterWrite, writer, idx);
                }
            }
            for &output in node.outputs.iter().filter(|&&r| r != GraphResource::External) {
                if let Some(&writer) = last_writer.get(&output) {
                    emit(output, BarrierKind::WriteAfterWrite, writer, idx);
                }
                for &reader in readers.get(&output).into_iter().flatten() {
                    emit(output, BarrierKind::WriteAfterRead, reader, idx);
                }
            }

            for &input in &node.inputs {
                readers.entry(input).or_default().push(idx);
            }
            for &output in &node.outputs {
                last_writer.insert(output, idx);
                readers.remove(&output);
            }
        }

        barriers
    }

    pub fn execute(self, device: &Device) -> GraphStatistics {
        profiling::scope!("RenderGraph::execute");

        let mut awaiting_inputs = FastHashSet::default();
        // Imported resources outlive the graph, so they are always used
        for idx in 0..self.buffers.len() {
            awaiting_inputs.insert(GraphResource::ImportedBuffer(idx));
        }
        for idx in 0..self.images.len() {
            awaiting_inputs.insert(GraphResource::ImportedImage(idx));
        }
        // External deps are used externally
        awaiting_inputs.insert(GraphResource::External);

        let Self {
            buffers,
            images,
            data,
            nodes,
        } = self;

        let mut culled = Vec::new();
        let mut pruned_node_list = Vec::with_capacity(nodes.len());
        {
            profiling::scope!("Dead Node Elimination");
            // Iterate the nodes backwards to track dependencies
            for node in nodes.into_iter().rev() {
                // If any of our outputs are used by a later node, we have reason to exist.
                // Imported outputs stay awaited, as later nodes may not be the only consumers.
                let outputs_used = node.outputs.iter().any(|o| match o {
                    GraphResource::Data(_) => awaiting_inputs.remove(o),
                    _ => awaiting_inputs.contains(o),
                });

                if outputs_used {
                    // Add our inputs to be matched up with outputs.
                    awaiting_inputs.extend(node.inputs.iter().chain(&node.references).copied());
                    // Push our node on the new list
                    pruned_node_list.push(node)
                } else {
                    log::trace!("Culling render graph node {}", node.label);
                    culled.push(node.label);
                }
            }
            // We iterated backwards to prune nodes, so flip it back to normal.
            pruned_node_list.reverse();
            culled.reverse();
        }

        let rebuilt = RenderGraph {
            buffers,
            images,
            data,
            nodes: Vec::new(),
        };
        let barriers = rebuilt.compute_barriers(&pruned_node_list);
        for barrier in &barriers {
            log::trace!(
                "Barrier {:?} on {}: {} -> {}",
                barrier.kind,
                barrier.resource,
                barrier.producer,
                barrier.consumer
            );
        }

        let data: Vec<Box<dyn Any>> = rebuilt.data.into_iter().map(|d| d.inner).collect();

        let mut executed = Vec::with_capacity(pruned_node_list.len());
        profiling::scope!("Run Nodes");
        for node in pruned_node_list {
            profiling::scope!("Execute Node", node.label.as_str());
            let store = RenderGraphDataStore {
                buffers: &rebuilt.buffers,
                images: &rebuilt.images,
                data: &data,
            };
            (node.exec)(NodeExecutionContext {
                device,
                label: &node.label,
                graph_data: store,
            });
            executed.push(node.label);
        }

        GraphStatistics {
            executed,
            culled,
            barriers,
        }
    }
}

impl<'node> Default for RenderGraph<'node> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::graph::NodeResourceUsage;

    #[test]
    fn unconsumed_data_nodes_are_culled() {
        let device = Device::new(Some(1)).unwrap();
        let counter = AtomicU32::new(0);

        let mut graph = RenderGraph::new();
        let buffer = graph.add_imported_buffer("counter", &counter);
        let orphan = graph.add_data::<u32, _>("orphan");
        let feed = graph.add_data::<u32, _>("feed");

        let mut builder = graph.add_node("Orphan");
        let orphan_dep = builder.add_data(orphan, NodeResourceUsage::Output);
        builder.build(move |ctx| ctx.graph_data.set_data(orphan_dep, Some(1)));

        let mut builder = graph.add_node("Producer");
        let feed_out = builder.add_data(feed, NodeResourceUsage::Output);
        builder.build(move |ctx| ctx.graph_data.set_data(feed_out, Some(5)));

        let mut builder = graph.add_node("Consumer");
        let feed_in = builder.add_data(feed, NodeResourceUsage::Input);
        let counter_dep = builder.add_buffer(buffer, NodeResourceUsage::Output);
        builder.build(move |ctx| {
            let value = *ctx.graph_data.get_data(feed_in).unwrap();
            ctx.graph_data.get_buffer(counter_dep).store(value, Ordering::Relaxed);
        });

        let stats = graph.execute(&device);
        assert_eq!(stats.executed, vec![SsoString::from("Producer"), SsoString::from("Consumer")]);
        assert_eq!(stats.culled, vec![SsoString::from("Orphan")]);
        assert!(stats.has_barrier("Producer", "Consumer"));
        assert_eq!(counter.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn imported_writers_survive_and_fence() {
        let device = Device::new(Some(1)).unwrap();
        let counter = AtomicU32::new(0);

        let mut graph = RenderGraph::new();
        let buffer = graph.add_imported_buffer("counter", &counter);

        for label in ["A", "B"] {
            let mut builder = graph.add_node(label);
            let dep = builder.add_buffer(buffer, NodeResourceUsage::InputOutput);
            builder.build(move |ctx| {
                ctx.graph_data.get_buffer(dep).fetch_add(1, Ordering::Relaxed);
            });
        }
        let mut builder = graph.add_node("Reader");
        builder.add_buffer(buffer, NodeResourceUsage::Input);
        builder.add_side_effect();
        builder.build(|_| {});

        let stats = graph.execute(&device);
        assert_eq!(stats.executed.len(), 3);
        assert_eq!(counter.load(Ordering::Relaxed), 2);
        let kinds: Vec<_> = stats.barriers.iter().map(|b| (b.producer.as_str(), b.consumer.as_str(), b.kind)).collect();
        assert!(kinds.contains(&("A", "B", BarrierKind::ReadAfterWrite)));
        assert!(kinds.contains(&("B", "Reader", BarrierKind::ReadAfterWrite)));
        assert!(!stats.has_barrier("A", "Reader"));
    }
}

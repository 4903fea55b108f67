use std::any::Any;

use crate::{
    device::Device,
    graph::{BufferHandle, DataHandle, GraphResource, ImageHandle, RenderGraph, RenderGraphDataStore},
    util::typedefs::SsoString,
};

/// Wraps a handle proving you have declared it as a dependency.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DeclaredDependency<Handle> {
    pub(super) handle: Handle,
}

pub struct NodeExecutionContext<'a> {
    /// Device the graph is running on.
    pub device: &'a Device,
    /// Label the node was created with.
    pub label: &'a str,
    /// Store to get resources from.
    pub graph_data: RenderGraphDataStore<'a>,
}

pub(super) struct RenderGraphNode<'node> {
    pub inputs: Vec<GraphResource>,
    pub outputs: Vec<GraphResource>,
    pub references: Vec<GraphResource>,
    pub label: SsoString,
    pub exec: Box<dyn for<'a> FnOnce(NodeExecutionContext<'a>) + 'node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeResourceUsage {
    /// Doesn't access the resource at all, just need access to the resource.
    Reference,
    /// Only reads the resource.
    Input,
    /// Only writes to the resource
    Output,
    /// Reads and writes to the resource.
    InputOutput,
}

/// Builder for a graph node.
///
/// Calling build will automatically add the node to the rendergraph.
pub struct RenderGraphNodeBuilder<'a, 'node> {
    pub(super) graph: &'a mut RenderGraph<'node>,
    pub(super) label: SsoString,
    pub(super) inputs: Vec<GraphResource>,
    pub(super) outputs: Vec<GraphResource>,
    pub(super) references: Vec<GraphResource>,
}

impl<'a, 'node> RenderGraphNodeBuilder<'a, 'node> {
    fn add_resource(&mut self, resource: GraphResource, usage: NodeResourceUsage) {
        match usage {
            NodeResourceUsage::Reference => self.references.push(resource),
            NodeResourceUsage::Input => self.inputs.push(resource),
            NodeResourceUsage::Output => self.outputs.push(resource),
            NodeResourceUsage::InputOutput => {
                self.inputs.push(resource);
                self.outputs.push(resource)
            }
        }
    }

    /// Declares use of an imported buffer.
    pub fn add_buffer<T>(
        &mut self,
        handle: BufferHandle<T>,
        usage: NodeResourceUsage,
    ) -> DeclaredDependency<BufferHandle<T>> {
        self.add_resource(handle.resource, usage);
        DeclaredDependency { handle }
    }

    /// Sugar over [add_buffer] which makes it easy to declare optional buffers.
    ///
    /// [add_buffer]: RenderGraphNodeBuilder::add_buffer
    pub fn add_optional_buffer<T>(
        &mut self,
        handle: Option<BufferHandle<T>>,
        usage: NodeResourceUsage,
    ) -> Option<DeclaredDependency<BufferHandle<T>>> {
        Some(self.add_buffer(handle?, usage))
    }

    /// Declares use of an imported image.
    pub fn add_image<T>(&mut self, handle: ImageHandle<T>, usage: NodeResourceUsage) -> DeclaredDependency<ImageHandle<T>> {
        self.add_resource(handle.resource, usage);
        DeclaredDependency { handle }
    }

    /// Sugar over [add_image] which makes it easy to declare optional images.
    ///
    /// [add_image]: RenderGraphNodeBuilder::add_image
    pub fn add_optional_image<T>(
        &mut self,
        handle: Option<ImageHandle<T>>,
        usage: NodeResourceUsage,
    ) -> Option<DeclaredDependency<ImageHandle<T>>> {
        Some(self.add_image(handle?, usage))
    }

    /// Declares use of a data handle.
    pub fn add_data<T>(&mut self, handle: DataHandle<T>, usage: NodeResourceUsage) -> DeclaredDependency<DataHandle<T>>
    where
        T: Any,
    {
        self.add_resource(handle.resource, usage);
        DeclaredDependency { handle }
    }

    /// Declares that this node has some unknowable side effect, so can't be removed.
    pub fn add_side_effect(&mut self) {
        self.inputs.push(GraphResource::External);
        self.outputs.push(GraphResource::External);
    }

    /// Builds the rendergraph node and adds it into the rendergraph.
    ///
    /// Takes a function that is the body of the node. Nodes will only run if a
    /// following node consumes the output, the output is imported, or the node
    /// has a side effect. See module level docs for more details.
    pub fn build<F>(self, exec: F)
    where
        F: for<'b> FnOnce(NodeExecutionContext<'b>) + 'node,
    {
        self.graph.nodes.push(RenderGraphNode {
            label: self.label,
            inputs: self.inputs,
            outputs: self.outputs,
            references: self.references,
            exec: Box::new(exec),
        });
    }
}

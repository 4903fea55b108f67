//! Render graph that schedules every dispatch of a frame.
//!
//! Start with [`RenderGraph::new`] and add nodes and then
//! [`RenderGraph::execute`] to run everything.
//!
//! # High Level Overview
//!
//! The design consists of a series of nodes which have inputs and outputs.
//! These can be imported buffers and images that outlive the graph, or
//! transient host data that only lives for the duration of the graph. The
//! graph keeps the nodes in the order they were added, prunes the ones whose
//! outputs nobody consumes, derives the barriers between the survivors and
//! runs them.
//!
//! Imported resources are always considered consumed: they outlive the
//! graph, so anything written to them is observable afterwards.
//!
//! # Nodes
//!
//! Nodes are made with [`RenderGraphNodeBuilder`]. The builder is used to
//! declare all the dependencies of the node ("outside" the node), then
//! [`RenderGraphNodeBuilder::build`] is called. This takes a callback that
//! contains all the code that will run as part of the node (the "inside").
//!
//! Declaring a dependency yields a [`DeclaredDependency`], which is the only
//! way to get at the resource inside the node through the
//! [`RenderGraphDataStore`].

use std::{fmt, marker::PhantomData};

#[allow(clippy::module_inception)]
mod graph;
mod node;
mod store;

pub use graph::*;
pub use node::*;
pub use store::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum GraphResource {
    ImportedBuffer(usize),
    ImportedImage(usize),
    Data(usize),
    External,
}

macro_rules! graph_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name<T> {
            pub(super) resource: GraphResource,
            pub(super) _phantom: PhantomData<fn() -> T>,
        }

        impl<T> $name<T> {
            pub(super) fn new(resource: GraphResource) -> Self {
                Self {
                    resource,
                    _phantom: PhantomData,
                }
            }
        }

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name)).field("resource", &self.resource).finish()
            }
        }

        impl<T> Copy for $name<T> {}

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> PartialEq for $name<T> {
            fn eq(&self, other: &Self) -> bool {
                self.resource == other.resource
            }
        }
    };
}

graph_handle!(
    /// Handle to a buffer imported into the graph.
    BufferHandle
);
graph_handle!(
    /// Handle to an image imported into the graph.
    ImageHandle
);
graph_handle!(
    /// Handle to transient host data owned by the graph.
    DataHandle
);

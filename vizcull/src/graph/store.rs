use std::{
    any::Any,
    cell::{Ref, RefCell},
};

use crate::graph::{BufferHandle, DataHandle, DeclaredDependency, GraphResource, ImageHandle, ImportedResource};

/// Resolves declared dependencies into the resources behind them.
pub struct RenderGraphDataStore<'a> {
    pub(super) buffers: &'a [ImportedResource<'a>],
    pub(super) images: &'a [ImportedResource<'a>],
    pub(super) data: &'a [Box<dyn Any>], // Any is RefCell<Option<T>> where T is the stored data
}

fn imported<'a, T: Any>(list: &[ImportedResource<'a>], idx: usize) -> &'a T {
    match list.get(idx).and_then(|resource| resource.inner.downcast_ref::<T>()) {
        Some(inner) => inner,
        None => panic!("internal rendergraph error: imported resource {idx} has the wrong type"),
    }
}

impl<'a> RenderGraphDataStore<'a> {
    pub fn get_buffer<T: Any>(&self, dep: DeclaredDependency<BufferHandle<T>>) -> &'a T {
        match dep.handle.resource {
            GraphResource::ImportedBuffer(idx) => imported(self.buffers, idx),
            r => panic!("internal rendergraph error: tried to get a {r:?} as a buffer"),
        }
    }

    pub fn get_image<T: Any>(&self, dep: DeclaredDependency<ImageHandle<T>>) -> &'a T {
        match dep.handle.resource {
            GraphResource::ImportedImage(idx) => imported(self.images, idx),
            r => panic!("internal rendergraph error: tried to get a {r:?} as an image"),
        }
    }

    fn data_cell<T: Any>(&self, resource: GraphResource) -> &'a RefCell<Option<T>> {
        match resource {
            GraphResource::Data(idx) => match self.data.get(idx).and_then(|d| d.downcast_ref::<RefCell<Option<T>>>()) {
                Some(cell) => cell,
                None => panic!("internal rendergraph error: data {idx} has the wrong type"),
            },
            r => panic!("internal rendergraph error: tried to get a {r:?} as data"),
        }
    }

    pub fn set_data<T: Any>(&self, dep: DeclaredDependency<DataHandle<T>>, data: Option<T>) {
        *self.data_cell::<T>(dep.handle.resource).borrow_mut() = data;
    }

    pub fn get_data<T: Any>(&self, dep: DeclaredDependency<DataHandle<T>>) -> Option<Ref<'a, T>> {
        Ref::filter_map(self.data_cell::<T>(dep.handle.resource).borrow(), Option::as_ref).ok()
    }
}

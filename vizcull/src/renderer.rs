use std::sync::Arc;

use parking_lot::RwLock;
use vizcull_types::{RenderSettings, Scene, SettingsError};

use crate::{device::Device, scene::GpuScene, RendererInitializationError, SceneUploadError};

/// Owns the compute device and the current settings.
///
/// Routines hold on to an `Arc<Renderer>` and read the settings at the start
/// of every frame, so settings changes apply from the next frame on.
pub struct Renderer {
    pub device: Device,
    settings: RwLock<RenderSettings>,
}

impl Renderer {
    /// Validates the settings and brings up a device with `threads` workers
    /// (one per core if `None`).
    pub fn new(settings: RenderSettings, threads: Option<usize>) -> Result<Arc<Self>, RendererInitializationError> {
        profiling::scope!("Renderer::new");

        settings.validate()?;
        let device = Device::new(threads)?;

        log::debug!(
            "Renderer created: {} render target, {} mesh instances, {} meshlet instances",
            settings.render_target_size,
            settings.limits.max_mesh_instances,
            settings.limits.max_meshlet_instances
        );

        Ok(Arc::new(Self {
            device,
            settings: RwLock::new(settings),
        }))
    }

    pub fn settings(&self) -> RenderSettings {
        *self.settings.read()
    }

    /// Replaces the settings. Invalid settings are rejected and the old ones kept.
    pub fn set_settings(&self, settings: RenderSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        *self.settings.write() = settings;
        Ok(())
    }

    /// Packs a scene for the culling routines, honoring the mesh instance limit.
    pub fn upload_scene(&self, scene: &Scene) -> Result<GpuScene, SceneUploadError> {
        GpuScene::upload(scene, self.settings.read().limits.max_mesh_instances)
    }
}

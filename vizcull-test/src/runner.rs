use std::{ops::Deref, sync::Arc};

use anyhow::{Context, Result};
use glam::{Mat4, UVec2};
use vizcull::Renderer;
use vizcull_routine::{FrameOutput, VisbufferRoutine};
use vizcull_types::{Camera, CameraProjection, RenderLimits, RenderSettings, Scene};

#[derive(Debug, Clone)]
pub struct TestRunnerBuilder {
    settings: RenderSettings,
    threads: Option<usize>,
}

impl TestRunnerBuilder {
    pub fn new() -> Self {
        Self {
            settings: RenderSettings {
                render_target_size: UVec2::splat(64),
                limits: RenderLimits {
                    max_mesh_instances: 256,
                    max_meshlet_instances: 4096,
                },
                ..RenderSettings::default()
            },
            threads: Some(4),
        }
    }

    /// Replaces all settings, including the small test sizes.
    pub fn settings(mut self, settings: RenderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn modify_settings(mut self, modify: impl FnOnce(&mut RenderSettings)) -> Self {
        modify(&mut self.settings);
        self
    }

    pub fn render_target_size(mut self, size: UVec2) -> Self {
        self.settings.render_target_size = size;
        self
    }

    pub fn limits(mut self, max_mesh_instances: u32, max_meshlet_instances: u32) -> Self {
        self.settings.limits = RenderLimits {
            max_mesh_instances,
            max_meshlet_instances,
        };
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn build(self) -> Result<TestRunner> {
        crate::init_logging();

        let renderer = Renderer::new(self.settings, self.threads).context("Renderer initialization failed")?;
        let routine = VisbufferRoutine::new(&renderer);

        Ok(TestRunner {
            renderer,
            routine,
            scene: Scene::new(),
            // Model space is NDC unless a test moves the camera
            camera: Camera {
                projection: CameraProjection::Raw(Mat4::IDENTITY),
                view: Mat4::IDENTITY,
            },
        })
    }
}

impl Default for TestRunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TestRunner {
    pub renderer: Arc<Renderer>,
    pub routine: VisbufferRoutine,
    pub scene: Scene,
    pub camera: Camera,
}

impl Deref for TestRunner {
    type Target = Arc<Renderer>;

    fn deref(&self) -> &Self::Target {
        &self.renderer
    }
}

impl TestRunner {
    pub fn builder() -> TestRunnerBuilder {
        TestRunnerBuilder::new()
    }

    /// Uploads the scene, renders a frame and moves the scene on to the next frame.
    pub fn render_frame(&mut self) -> Result<FrameOutput> {
        let gpu_scene = self.renderer.upload_scene(&self.scene).context("Scene upload failed")?;
        let output = self.routine.render_frame(&gpu_scene, &self.camera);
        self.scene.advance_frame();
        Ok(output)
    }

    /// Renders `count` frames, returning the output of each.
    pub fn render_frames(&mut self, count: usize) -> Result<Vec<FrameOutput>> {
        (0..count).map(|_| self.render_frame()).collect()
    }
}

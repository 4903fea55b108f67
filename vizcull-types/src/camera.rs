use glam::{Mat4, Vec3, Vec3A};

/// Describes how the world should be projected into the camera.
///
/// All projections are reverse-Z: the near plane maps to depth 1 and the far
/// plane (or infinity) to depth 0.
#[derive(Debug, Copy, Clone)]
pub enum CameraProjection {
    Orthographic {
        /// Size assumes the location is at the center of the camera area.
        size: Vec3A,
    },
    Perspective {
        /// Vertical field of view in degrees.
        vfov: f32,
        /// Near plane distance. All projection uses a infinite far plane.
        near: f32,
    },
    Raw(Mat4),
}

impl Default for CameraProjection {
    fn default() -> Self {
        Self::Perspective { vfov: 60.0, near: 0.1 }
    }
}

/// Describes how the camera should look at the scene.
#[derive(Debug, Default, Copy, Clone)]
pub struct Camera {
    pub projection: CameraProjection,
    /// View matrix
    pub view: Mat4,
}

impl Camera {
    /// Right handed camera at `eye`, looking at `target` with +Y up.
    pub fn look_at(eye: Vec3, target: Vec3, projection: CameraProjection) -> Self {
        Self {
            projection,
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
        }
    }

    pub fn projection_matrix(&self, aspect_ratio: f32) -> Mat4 {
        match self.projection {
            CameraProjection::Orthographic { size } => {
                let half = size * 0.5;
                Mat4::orthographic_rh(-half.x, half.x, -half.y, half.y, half.z, -half.z)
            }
            CameraProjection::Perspective { vfov, near } => {
                Mat4::perspective_infinite_reverse_rh(vfov.to_radians(), aspect_ratio, near)
            }
            CameraProjection::Raw(proj) => proj,
        }
    }

    pub fn view_proj(&self, aspect_ratio: f32) -> Mat4 {
        self.projection_matrix(aspect_ratio) * self.view
    }

    /// World space position of the camera.
    pub fn position(&self) -> Vec3 {
        self.view.inverse().w_axis.truncate()
    }
}

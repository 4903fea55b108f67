//! Frustum planes, extracted from view-projection matrices.
//!
//! Plane extraction follows <https://www.gamedevs.org/uploads/fast-extraction-viewing-frustum-planes-from-world-view-projection-matrix.pdf>.

use glam::{Mat4, Vec3};
use vizcull_types::BoundingSphere;

/// Represents a plane as a vec4 (or vec3 + f32)
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ShaderPlane {
    pub abc: Vec3,
    pub d: f32,
}

impl ShaderPlane {
    pub fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self {
            abc: Vec3::new(a, b, c),
            d,
        }
    }

    pub fn normalize(mut self) -> Self {
        let mag = self.abc.length();

        self.abc /= mag;
        self.d /= mag;

        self
    }

    pub fn distance(self, point: Vec3) -> f32 {
        self.abc.dot(point) + self.d
    }
}

/// A frustum composed of 5 planes, plus an optional far plane.
///
/// Perspective views use an infinite far plane. Orthographic views, such as
/// shadow clips, have a far plane as well.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ShaderFrustum {
    left: ShaderPlane,
    right: ShaderPlane,
    top: ShaderPlane,
    bottom: ShaderPlane,
    near: ShaderPlane,
    far: Option<ShaderPlane>,
}

impl ShaderFrustum {
    /// Frustum of a reverse-Z view-projection with an infinite far plane.
    pub fn from_matrix(matrix: Mat4) -> Self {
        let mat_arr = matrix.to_cols_array_2d();
        let row = |a: usize, sign: f32, b: usize| {
            ShaderPlane::new(
                mat_arr[0][a] + sign * mat_arr[0][b],
                mat_arr[1][a] + sign * mat_arr[1][b],
                mat_arr[2][a] + sign * mat_arr[2][b],
                mat_arr[3][a] + sign * mat_arr[3][b],
            )
            .normalize()
        };

        // This is the far plane in the algorithm, but we're using inverse Z, so near
        // and far get flipped.
        let near = row(3, -1.0, 2);

        Self {
            left: row(3, 1.0, 0),
            right: row(3, -1.0, 0),
            top: row(3, -1.0, 1),
            bottom: row(3, 1.0, 1),
            near,
            far: None,
        }
    }

    /// Frustum of a view-projection whose depth range is bounded on both ends.
    pub fn from_matrix_with_far(matrix: Mat4) -> Self {
        let mat_arr = matrix.to_cols_array_2d();
        let far = ShaderPlane::new(mat_arr[0][2], mat_arr[1][2], mat_arr[2][2], mat_arr[3][2]).normalize();
        Self {
            far: Some(far),
            ..Self::from_matrix(matrix)
        }
    }

    /// Determins if the sphere is at all inside the frustum.
    pub fn contains_sphere(&self, sphere: BoundingSphere) -> bool {
        let neg_radius = -sphere.radius;

        let array = [self.left, self.right, self.top, self.bottom, self.near];

        array
            .iter()
            .chain(self.far.as_ref())
            .all(|plane| plane.distance(sphere.center) >= neg_radius)
    }
}

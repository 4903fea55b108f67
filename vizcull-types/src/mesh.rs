use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec3A, Vec4Swizzles};
use thiserror::Error;

use crate::{MAX_TRIANGLES_PER_MESHLET, MAX_VERTICES_PER_MESHLET};

/// Axis aligned bounding box.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        points.into_iter().fold(Self::EMPTY, |aabb, &point| Self {
            min: aabb.min.min(point),
            max: aabb.max.max(point),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let Self { min, max } = *self;
        [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(max.x, max.y, max.z),
        ]
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Represents a point in space and a radius from that point.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn from_points(points: &[Vec3]) -> Self {
        let center = Vec3A::from(Aabb::from_points(points).center());
        if points.is_empty() {
            return Self::default();
        }
        let radius = points
            .iter()
            .fold(0.0_f32, |distance, pos| distance.max((Vec3A::from(*pos) - center).length()));

        Self {
            center: Vec3::from(center),
            radius,
        }
    }

    /// Transforms the sphere, growing the radius by the largest axis scale.
    pub fn apply_transform(self, matrix: Mat4) -> Self {
        let max_scale = matrix
            .x_axis
            .xyz()
            .length_squared()
            .max(matrix.y_axis.xyz().length_squared().max(matrix.z_axis.xyz().length_squared()))
            .sqrt();
        let center = matrix * self.center.extend(1.0);

        Self {
            center: center.truncate(),
            radius: max_scale * self.radius,
        }
    }
}

/// A small cluster of triangles, culled as a unit.
///
/// Offsets index into the owning mesh's `meshlet_vertices` and
/// `meshlet_triangles` arrays.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Meshlet {
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub triangle_offset: u32,
    pub triangle_count: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct MeshletBounds {
    pub sphere: BoundingSphere,
    pub aabb: Aabb,
}

#[derive(Debug, Error)]
pub enum MeshValidationError {
    #[error("Mesh has {count} indices which is not a multiple of three. Meshes are always composed of triangles")]
    IndexCountNotMultipleOfThree { count: usize },
    #[error(
        "Index at position {index} has the value {value} which is out of bounds for vertex buffers of {max} length"
    )]
    IndexOutOfBounds { index: usize, value: u32, max: u32 },
    #[error("Mesh has no triangles")]
    Empty,
    #[error("Mesh position {index} is not finite")]
    NonFinitePosition { index: usize },
}

/// Triangle geometry split into meshlets.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    pub meshlets: Vec<Meshlet>,
    pub meshlet_bounds: Vec<MeshletBounds>,
    /// Global vertex index of every meshlet local vertex.
    pub meshlet_vertices: Vec<u32>,
    /// Meshlet local vertex indices of every meshlet triangle.
    pub meshlet_triangles: Vec<[u8; 3]>,
    pub aabb: Aabb,
    pub bounding_sphere: BoundingSphere,
    pub material_index: u32,
}

impl Mesh {
    pub fn meshlet_count(&self) -> u32 {
        self.meshlets.len() as u32
    }

    pub fn triangle_count(&self) -> usize {
        self.meshlet_triangles.len()
    }
}

/// Easy to use builder for a [`Mesh`] that deals with meshlet building and validation.
#[derive(Debug, Default)]
pub struct MeshBuilder {
    positions: Vec<Vec3>,
    indices: Option<Vec<u32>>,
    material_index: u32,
}

impl MeshBuilder {
    /// Create a new [`MeshBuilder`] with a given set of positions.
    pub fn new(positions: Vec<Vec3>) -> Self {
        Self {
            positions,
            ..Self::default()
        }
    }

    /// Add indices to the given mesh.
    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = Some(indices);
        self
    }

    pub fn with_material(mut self, material_index: u32) -> Self {
        self.material_index = material_index;
        self
    }

    /// Build a mesh, validating the indices and splitting the triangles into meshlets.
    ///
    /// If indices were not given, vertices are taken as a triangle list.
    pub fn build(self) -> Result<Mesh, MeshValidationError> {
        let indices = self
            .indices
            .unwrap_or_else(|| (0..self.positions.len() as u32).collect());

        validate(&self.positions, &indices)?;

        let (meshlets, meshlet_vertices, meshlet_triangles) = build_meshlets(&indices);

        let mut scratch = Vec::with_capacity(MAX_VERTICES_PER_MESHLET);
        let meshlet_bounds = meshlets
            .iter()
            .map(|meshlet| {
                let start = meshlet.vertex_offset as usize;
                let end = start + meshlet.vertex_count as usize;
                scratch.clear();
                scratch.extend(meshlet_vertices[start..end].iter().map(|&v| self.positions[v as usize]));
                MeshletBounds {
                    sphere: BoundingSphere::from_points(&scratch),
                    aabb: Aabb::from_points(&scratch),
                }
            })
            .collect();

        let used: Vec<Vec3> = indices.iter().map(|&i| self.positions[i as usize]).collect();

        Ok(Mesh {
            aabb: Aabb::from_points(&used),
            bounding_sphere: BoundingSphere::from_points(&used),
            positions: self.positions,
            meshlets,
            meshlet_bounds,
            meshlet_vertices,
            meshlet_triangles,
            material_index: self.material_index,
        })
    }
}

fn validate(positions: &[Vec3], indices: &[u32]) -> Result<(), MeshValidationError> {
    if indices.len() % 3 != 0 {
        return Err(MeshValidationError::IndexCountNotMultipleOfThree { count: indices.len() });
    }
    if indices.is_empty() {
        return Err(MeshValidationError::Empty);
    }
    for (index, &value) in indices.iter().enumerate() {
        if value as usize >= positions.len() {
            return Err(MeshValidationError::IndexOutOfBounds {
                index,
                value,
                max: positions.len() as u32,
            });
        }
    }
    if let Some(index) = positions.iter().position(|p| !p.is_finite()) {
        return Err(MeshValidationError::NonFinitePosition { index });
    }
    Ok(())
}

/// Greedily packs triangles, in index order, into meshlets bounded by the
/// vertex and triangle limits.
fn build_meshlets(indices: &[u32]) -> (Vec<Meshlet>, Vec<u32>, Vec<[u8; 3]>) {
    let mut meshlets = Vec::new();
    let mut vertices = Vec::new();
    let mut triangles = Vec::with_capacity(indices.len() / 3);

    let mut current = Meshlet::default();
    let mut local: Vec<u32> = Vec::with_capacity(MAX_VERTICES_PER_MESHLET);

    for tri in indices.chunks_exact(3) {
        let mut new_vertices = 0;
        for (i, v) in tri.iter().enumerate() {
            if !local.contains(v) && !tri[..i].contains(v) {
                new_vertices += 1;
            }
        }

        if local.len() + new_vertices > MAX_VERTICES_PER_MESHLET
            || current.triangle_count as usize == MAX_TRIANGLES_PER_MESHLET
        {
            vertices.extend_from_slice(&local);
            meshlets.push(current);
            local.clear();
            current = Meshlet {
                vertex_offset: vertices.len() as u32,
                vertex_count: 0,
                triangle_offset: triangles.len() as u32,
                triangle_count: 0,
            };
        }

        let mut packed = [0_u8; 3];
        for (slot, &v) in packed.iter_mut().zip(tri) {
            let local_index = match local.iter().position(|&l| l == v) {
                Some(idx) => idx,
                None => {
                    local.push(v);
                    local.len() - 1
                }
            };
            *slot = local_index as u8;
        }
        triangles.push(packed);
        current.triangle_count += 1;
        current.vertex_count = local.len() as u32;
    }

    if current.triangle_count != 0 {
        vertices.extend_from_slice(&local);
        meshlets.push(current);
    }

    (meshlets, vertices, triangles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(quads: u32) -> (Vec<Vec3>, Vec<u32>) {
        let mut positions = Vec::new();
        let mut indices = Vec::new();
        for y in 0..=quads {
            for x in 0..=quads {
                positions.push(Vec3::new(x as f32, y as f32, 0.0));
            }
        }
        let stride = quads + 1;
        for y in 0..quads {
            for x in 0..quads {
                let i = y * stride + x;
                indices.extend_from_slice(&[i, i + 1, i + stride + 1, i, i + stride + 1, i + stride]);
            }
        }
        (positions, indices)
    }

    #[test]
    fn single_triangle() {
        let mesh = MeshBuilder::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y]).build().unwrap();
        assert_eq!(mesh.meshlet_count(), 1);
        assert_eq!(mesh.meshlets[0].triangle_count, 1);
        assert_eq!(mesh.meshlets[0].vertex_count, 3);
        assert_eq!(mesh.aabb, Aabb::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0)));
    }

    #[test]
    fn meshlets_respect_limits() {
        let (positions, indices) = grid(32);
        let mesh = MeshBuilder::new(positions.clone()).with_indices(indices.clone()).build().unwrap();

        assert!(mesh.meshlet_count() > 1);
        assert_eq!(mesh.triangle_count(), indices.len() / 3);
        for meshlet in &mesh.meshlets {
            assert!(meshlet.vertex_count as usize <= MAX_VERTICES_PER_MESHLET);
            assert!(meshlet.triangle_count as usize <= MAX_TRIANGLES_PER_MESHLET);
        }

        // Every triangle must round trip back to its original global indices.
        let mut rebuilt = Vec::new();
        for meshlet in &mesh.meshlets {
            let tris = &mesh.meshlet_triangles[meshlet.triangle_offset as usize..][..meshlet.triangle_count as usize];
            for tri in tris {
                for &local in tri {
                    rebuilt.push(mesh.meshlet_vertices[(meshlet.vertex_offset + local as u32) as usize]);
                }
            }
        }
        assert_eq!(rebuilt, indices);
    }

    #[test]
    fn meshlet_bounds_contain_their_vertices() {
        let (positions, indices) = grid(16);
        let mesh = MeshBuilder::new(positions.clone()).with_indices(indices).build().unwrap();
        for (meshlet, bounds) in mesh.meshlets.iter().zip(&mesh.meshlet_bounds) {
            let start = meshlet.vertex_offset as usize;
            for &v in &mesh.meshlet_vertices[start..start + meshlet.vertex_count as usize] {
                let p = positions[v as usize];
                assert!(p.cmpge(bounds.aabb.min).all() && p.cmple(bounds.aabb.max).all());
                assert!((p - bounds.sphere.center).length() <= bounds.sphere.radius + 1e-4);
            }
        }
    }

    #[test]
    fn validation_errors() {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        assert!(matches!(
            MeshBuilder::new(positions.clone()).with_indices(vec![0, 1]).build(),
            Err(MeshValidationError::IndexCountNotMultipleOfThree { count: 2 })
        ));
        assert!(matches!(
            MeshBuilder::new(positions.clone()).with_indices(vec![0, 1, 3]).build(),
            Err(MeshValidationError::IndexOutOfBounds { index: 2, value: 3, max: 3 })
        ));
        assert!(matches!(
            MeshBuilder::new(positions).with_indices(vec![]).build(),
            Err(MeshValidationError::Empty)
        ));
    }

    #[test]
    fn sphere_transform_scales_radius() {
        let sphere = BoundingSphere {
            center: Vec3::X,
            radius: 1.0,
        };
        let moved = sphere.apply_transform(Mat4::from_scale_rotation_translation(
            Vec3::new(1.0, 3.0, 2.0),
            glam::Quat::IDENTITY,
            Vec3::Z,
        ));
        assert_eq!(moved.center, Vec3::new(1.0, 0.0, 1.0));
        assert!((moved.radius - 3.0).abs() < 1e-6);
    }
}

//! The uploaded, read-only view of a [`Scene`] kernels consume.

use glam::{Mat4, Vec3};
use vizcull_types::{
    Aabb, BoundingSphere, Material, MeshInstance, Meshlet, MeshletBounds, MeshletInstance, Scene,
};

use crate::SceneUploadError;

/// Per mesh manifest entry.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GpuMesh {
    /// First meshlet of the mesh in the scene wide meshlet arrays.
    pub meshlet_offset: u32,
    pub meshlet_count: u32,
    pub material_index: u32,
    pub aabb: Aabb,
    pub bounding_sphere: BoundingSphere,
}

/// All geometry of a scene packed into flat arrays, plus the entity
/// transforms and the flattened mesh instances of the frame.
#[derive(Debug, Default, Clone)]
pub struct GpuScene {
    pub meshes: Vec<GpuMesh>,
    /// Meshlets of all meshes. Offsets point into the scene wide arrays.
    pub meshlets: Vec<Meshlet>,
    pub meshlet_bounds: Vec<MeshletBounds>,
    pub meshlet_vertices: Vec<u32>,
    pub meshlet_triangles: Vec<[u8; 3]>,
    pub positions: Vec<Vec3>,
    pub materials: Vec<Material>,
    pub entity_transforms: Vec<Mat4>,
    pub previous_entity_transforms: Vec<Mat4>,
    pub mesh_instances: Vec<MeshInstance>,
}

impl GpuScene {
    /// Validates and packs the scene. Mesh instances beyond
    /// `max_mesh_instances` are dropped with a warning.
    pub fn upload(scene: &Scene, max_mesh_instances: u32) -> Result<Self, SceneUploadError> {
        profiling::scope!("GpuScene::upload");

        scene.validate()?;

        let mut gpu = Self {
            materials: scene.materials.clone(),
            ..Self::default()
        };

        for mesh in &scene.meshes {
            let vertex_base = gpu.positions.len() as u32;
            let meshlet_vertex_base = gpu.meshlet_vertices.len() as u32;
            let triangle_base = gpu.meshlet_triangles.len() as u32;

            gpu.meshes.push(GpuMesh {
                meshlet_offset: gpu.meshlets.len() as u32,
                meshlet_count: mesh.meshlet_count(),
                material_index: mesh.material_index,
                aabb: mesh.aabb,
                bounding_sphere: mesh.bounding_sphere,
            });
            gpu.meshlets.extend(mesh.meshlets.iter().map(|meshlet| Meshlet {
                vertex_offset: meshlet.vertex_offset + meshlet_vertex_base,
                triangle_offset: meshlet.triangle_offset + triangle_base,
                ..*meshlet
            }));
            gpu.meshlet_bounds.extend_from_slice(&mesh.meshlet_bounds);
            gpu.meshlet_vertices
                .extend(mesh.meshlet_vertices.iter().map(|&v| v + vertex_base));
            gpu.meshlet_triangles.extend_from_slice(&mesh.meshlet_triangles);
            gpu.positions.extend_from_slice(&mesh.positions);
        }

        gpu.update_transforms(scene);

        let mut instances = scene.mesh_instances();
        if instances.len() > max_mesh_instances as usize {
            log::warn!(
                "Scene has {} mesh instances, dropping everything past the limit of {max_mesh_instances}",
                instances.len()
            );
            instances.truncate(max_mesh_instances as usize);
        }
        gpu.mesh_instances = instances;

        log::debug!(
            "Uploaded scene: {} meshes, {} meshlets, {} triangles, {} mesh instances",
            gpu.meshes.len(),
            gpu.meshlets.len(),
            gpu.meshlet_triangles.len(),
            gpu.mesh_instances.len()
        );

        Ok(gpu)
    }

    /// Refreshes the current and previous transforms of every entity.
    pub fn update_transforms(&mut self, scene: &Scene) {
        self.entity_transforms = scene.entities.iter().map(|e| e.transform).collect();
        self.previous_entity_transforms = scene.entities.iter().map(|e| e.previous_transform).collect();
    }

    pub fn mesh_instance_count(&self) -> u32 {
        self.mesh_instances.len() as u32
    }

    /// Transform of an entity, either this frame's or the previous frame's.
    pub fn transform(&self, entity_index: u32, previous: bool) -> Mat4 {
        let transforms = if previous {
            &self.previous_entity_transforms
        } else {
            &self.entity_transforms
        };
        transforms.get(entity_index as usize).copied().unwrap_or(Mat4::IDENTITY)
    }

    /// Scene wide index of a mesh's meshlet, if the mesh has that many meshlets.
    pub fn global_meshlet_index(&self, mesh_index: u32, meshlet_index: u32) -> Option<u32> {
        let mesh = self.meshes.get(mesh_index as usize)?;
        (meshlet_index < mesh.meshlet_count).then_some(mesh.meshlet_offset + meshlet_index)
    }

    /// Checks that a meshlet instance still describes the mesh instance it
    /// names, which can change when the scene changes between frames.
    pub fn is_meshlet_instance_valid(&self, instance: &MeshletInstance) -> bool {
        self.mesh_instances
            .get(instance.mesh_instance_index as usize)
            .map_or(false, |mesh_instance| {
                mesh_instance.entity_index == instance.entity_index
                    && mesh_instance.mesh_index == instance.mesh_index
                    && self
                        .global_meshlet_index(instance.mesh_index, instance.meshlet_index)
                        .is_some()
            })
    }

    /// Model space positions of every triangle of a meshlet.
    pub fn meshlet_triangles(&self, global_meshlet: u32) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        let meshlet = self.meshlets.get(global_meshlet as usize).copied().unwrap_or_default();
        let start = meshlet.triangle_offset as usize;
        let end = start + meshlet.triangle_count as usize;
        self.meshlet_triangles.get(start..end).into_iter().flatten().map(move |tri| {
            tri.map(|local| {
                let vertex = self.meshlet_vertices[(meshlet.vertex_offset + local as u32) as usize];
                self.positions[vertex as usize]
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use vizcull_types::{MeshBuilder, MeshGroup};

    use super::*;

    fn scene_with_two_meshes() -> Scene {
        let mut scene = Scene::new();
        let material = scene.add_material(Material::default());
        let tri = MeshBuilder::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y])
            .with_material(material)
            .build()
            .unwrap();
        let quad = MeshBuilder::new(vec![Vec3::ZERO, Vec3::X, Vec3::ONE, Vec3::Y])
            .with_indices(vec![0, 1, 2, 0, 2, 3])
            .with_material(material)
            .build()
            .unwrap();
        let a = scene.add_mesh(tri);
        let b = scene.add_mesh(quad);
        let group = scene.add_mesh_group(MeshGroup { meshes: vec![a, b] });
        scene.add_entity(group, Mat4::from_translation(Vec3::Z));
        scene.add_entity(group, Mat4::IDENTITY);
        scene
    }

    #[test]
    fn packs_meshes() {
        let gpu = GpuScene::upload(&scene_with_two_meshes(), 16).unwrap();
        assert_eq!(gpu.meshes.len(), 2);
        assert_eq!(gpu.meshes[1].meshlet_offset, 1);
        assert_eq!(gpu.mesh_instance_count(), 4);
        assert_eq!(gpu.global_meshlet_index(1, 0), Some(1));
        assert_eq!(gpu.global_meshlet_index(1, 1), None);

        let tris: Vec<_> = gpu.meshlet_triangles(1).collect();
        assert_eq!(tris, vec![[Vec3::ZERO, Vec3::X, Vec3::ONE], [Vec3::ZERO, Vec3::ONE, Vec3::Y]]);
        assert_eq!(gpu.transform(0, false), Mat4::from_translation(Vec3::Z));
    }

    #[test]
    fn truncates_mesh_instances() {
        let gpu = GpuScene::upload(&scene_with_two_meshes(), 3).unwrap();
        assert_eq!(gpu.mesh_instance_count(), 3);
    }

    #[test]
    fn meshlet_instance_validity() {
        let gpu = GpuScene::upload(&scene_with_two_meshes(), 16).unwrap();
        let mut instance = MeshletInstance {
            entity_index: 1,
            mesh_instance_index: 3,
            mesh_index: 1,
            meshlet_index: 0,
        };
        assert!(gpu.is_meshlet_instance_valid(&instance));
        instance.mesh_index = 0;
        assert!(!gpu.is_meshlet_instance_valid(&instance));
        instance.mesh_instance_index = 9;
        assert!(!gpu.is_meshlet_instance_valid(&instance));
    }
}

use glam::Mat4;
use thiserror::Error;

use crate::{Mesh, MeshInstance, MeshInstanceFlags};

/// How the alpha channel of a material is treated.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AlphaMode {
    #[default]
    Opaque,
    Masked,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Material {
    pub alpha_mode: AlphaMode,
}

/// A set of meshes an entity renders together.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MeshGroup {
    pub meshes: Vec<u32>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Entity {
    pub mesh_group: u32,
    pub transform: Mat4,
    /// Transform the entity had during the previous frame.
    pub previous_transform: Mat4,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneValidationError {
    #[error("Mesh {mesh} references material {material} but only {count} materials exist")]
    DanglingMaterial { mesh: u32, material: u32, count: u32 },
    #[error("Mesh group {group} references mesh {mesh} but only {count} meshes exist")]
    DanglingMesh { group: u32, mesh: u32, count: u32 },
    #[error("Entity {entity} references mesh group {group} but only {count} mesh groups exist")]
    DanglingMeshGroup { entity: u32, group: u32, count: u32 },
    #[error("Entity {entity} has a non finite transform")]
    NonFiniteTransform { entity: u32 },
}

/// Scene description the renderer culls. Every object is addressed by its
/// index, which stays stable for the lifetime of the scene.
#[derive(Debug, Default, Clone)]
pub struct Scene {
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub mesh_groups: Vec<MeshGroup>,
    pub entities: Vec<Entity>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_material(&mut self, material: Material) -> u32 {
        self.materials.push(material);
        self.materials.len() as u32 - 1
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> u32 {
        self.meshes.push(mesh);
        self.meshes.len() as u32 - 1
    }

    pub fn add_mesh_group(&mut self, group: MeshGroup) -> u32 {
        self.mesh_groups.push(group);
        self.mesh_groups.len() as u32 - 1
    }

    pub fn add_entity(&mut self, mesh_group: u32, transform: Mat4) -> u32 {
        self.entities.push(Entity {
            mesh_group,
            transform,
            previous_transform: transform,
        });
        self.entities.len() as u32 - 1
    }

    /// Moves an entity. The previous transform is only replaced at the next
    /// [`Scene::advance_frame`].
    pub fn set_transform(&mut self, entity: u32, transform: Mat4) {
        if let Some(entity) = self.entities.get_mut(entity as usize) {
            entity.transform = transform;
        }
    }

    /// Latches every entity's current transform as its previous transform.
    pub fn advance_frame(&mut self) {
        for entity in &mut self.entities {
            entity.previous_transform = entity.transform;
        }
    }

    pub fn validate(&self) -> Result<(), SceneValidationError> {
        let material_count = self.materials.len() as u32;
        for (mesh, data) in self.meshes.iter().enumerate() {
            if data.material_index >= material_count {
                return Err(SceneValidationError::DanglingMaterial {
                    mesh: mesh as u32,
                    material: data.material_index,
                    count: material_count,
                });
            }
        }

        let mesh_count = self.meshes.len() as u32;
        for (group, data) in self.mesh_groups.iter().enumerate() {
            if let Some(&mesh) = data.meshes.iter().find(|&&mesh| mesh >= mesh_count) {
                return Err(SceneValidationError::DanglingMesh {
                    group: group as u32,
                    mesh,
                    count: mesh_count,
                });
            }
        }

        let group_count = self.mesh_groups.len() as u32;
        for (entity, data) in self.entities.iter().enumerate() {
            if data.mesh_group >= group_count {
                return Err(SceneValidationError::DanglingMeshGroup {
                    entity: entity as u32,
                    group: data.mesh_group,
                    count: group_count,
                });
            }
            if !data.transform.is_finite() || !data.previous_transform.is_finite() {
                return Err(SceneValidationError::NonFiniteTransform { entity: entity as u32 });
            }
        }

        Ok(())
    }

    /// Flattens every (entity, mesh of its group) pair, in entity order.
    ///
    /// Assumes the scene validated.
    pub fn mesh_instances(&self) -> Vec<MeshInstance> {
        let mut instances = Vec::with_capacity(self.entities.len());
        for (entity_index, entity) in self.entities.iter().enumerate() {
            let Some(group) = self.mesh_groups.get(entity.mesh_group as usize) else {
                continue;
            };
            for (in_mesh_group_index, &mesh_index) in group.meshes.iter().enumerate() {
                let masked = self
                    .meshes
                    .get(mesh_index as usize)
                    .and_then(|mesh| self.materials.get(mesh.material_index as usize))
                    .map_or(false, |material| material.alpha_mode == AlphaMode::Masked);
                let flags = if masked {
                    MeshInstanceFlags::MASKED
                } else {
                    MeshInstanceFlags::empty()
                };
                instances.push(MeshInstance {
                    entity_index: entity_index as u32,
                    mesh_index,
                    in_mesh_group_index: in_mesh_group_index as u32,
                    flags: flags.bits(),
                });
            }
        }
        instances
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::{DrawListType, MeshBuilder};

    fn triangle(material: u32) -> Mesh {
        MeshBuilder::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y])
            .with_material(material)
            .build()
            .unwrap()
    }

    #[test]
    fn flattens_in_entity_order() {
        let mut scene = Scene::new();
        let opaque = scene.add_material(Material::default());
        let masked = scene.add_material(Material {
            alpha_mode: AlphaMode::Masked,
        });
        let a = scene.add_mesh(triangle(opaque));
        let b = scene.add_mesh(triangle(masked));
        let group = scene.add_mesh_group(MeshGroup { meshes: vec![a, b] });
        let single = scene.add_mesh_group(MeshGroup { meshes: vec![b] });
        scene.add_entity(group, Mat4::IDENTITY);
        scene.add_entity(single, Mat4::IDENTITY);
        scene.validate().unwrap();

        let instances = scene.mesh_instances();
        let pairs: Vec<_> = instances
            .iter()
            .map(|i| (i.entity_index, i.mesh_index, i.in_mesh_group_index))
            .collect();
        assert_eq!(pairs, vec![(0, a, 0), (0, b, 1), (1, b, 0)]);
        assert_eq!(instances[0].draw_list(), DrawListType::Opaque);
        assert_eq!(instances[1].draw_list(), DrawListType::Masked);
    }

    #[test]
    fn dangling_indices() {
        let mut scene = Scene::new();
        scene.add_mesh(triangle(0));
        assert_eq!(
            scene.validate(),
            Err(SceneValidationError::DanglingMaterial {
                mesh: 0,
                material: 0,
                count: 0
            })
        );
        scene.add_material(Material::default());
        scene.add_mesh_group(MeshGroup { meshes: vec![3] });
        assert!(matches!(scene.validate(), Err(SceneValidationError::DanglingMesh { .. })));
        scene.mesh_groups[0].meshes = vec![0];
        scene.add_entity(7, Mat4::IDENTITY);
        assert!(matches!(scene.validate(), Err(SceneValidationError::DanglingMeshGroup { .. })));
    }

    #[test]
    fn previous_transform_latches_on_advance() {
        let mut scene = Scene::new();
        let entity = scene.add_entity(0, Mat4::IDENTITY);
        let moved = Mat4::from_translation(Vec3::X);
        scene.set_transform(entity, moved);
        assert_eq!(scene.entities[0].previous_transform, Mat4::IDENTITY);
        scene.advance_frame();
        assert_eq!(scene.entities[0].previous_transform, moved);
    }
}

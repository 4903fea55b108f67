use anyhow::Result;
use glam::{Mat4, UVec2, Vec2, Vec3};
use vizcull_types::{AlphaMode, Material, MeshBuilder, MeshGroup};

use crate::TestRunner;

/// Triangles of one cell of [`TestRunner::triangle_grid`].
pub const GRID_CELL_PIXELS: UVec2 = UVec2::new(4, 8);

impl TestRunner {
    pub fn add_material(&mut self, alpha_mode: AlphaMode) -> u32 {
        self.scene.add_material(Material { alpha_mode })
    }

    /// Adds an entity rendering a single mesh.
    pub fn add_mesh_entity(&mut self, mesh: vizcull_types::Mesh, transform: Mat4) -> u32 {
        let mesh = self.scene.add_mesh(mesh);
        let group = self.scene.add_mesh_group(MeshGroup { meshes: vec![mesh] });
        self.scene.add_entity(group, transform)
    }

    /// Creates a plane entity that is [-1, 1] in XY, facing +Z.
    pub fn plane(&mut self, material: u32, transform: Mat4) -> Result<u32> {
        let mesh = MeshBuilder::new(vec![
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
        ])
        .with_indices(vec![0, 1, 2, 0, 2, 3])
        .with_material(material)
        .build()?;

        Ok(self.add_mesh_entity(mesh, transform))
    }

    /// Creates a cube entity that is [-0.5, 0.5], with outward facing triangles.
    pub fn cube(&mut self, material: u32, transform: Mat4) -> Result<u32> {
        let positions = (0..8)
            .map(|corner| {
                Vec3::new(
                    if corner & 1 == 0 { -0.5 } else { 0.5 },
                    if corner & 2 == 0 { -0.5 } else { 0.5 },
                    if corner & 4 == 0 { -0.5 } else { 0.5 },
                )
            })
            .collect();
        let indices = vec![
            0, 2, 1, 1, 2, 3, // -z
            4, 5, 6, 5, 7, 6, // +z
            0, 1, 4, 1, 5, 4, // -y
            2, 6, 3, 3, 6, 7, // +y
            0, 4, 2, 2, 4, 6, // -x
            1, 3, 5, 3, 7, 5, // +x
        ];
        let mesh = MeshBuilder::new(positions)
            .with_indices(indices)
            .with_material(material)
            .build()?;

        Ok(self.add_mesh_entity(mesh, transform))
    }

    /// Creates an entity of `triangle_count` disjoint triangles laid out row
    /// by row in a grid of [`GRID_CELL_PIXELS`] cells over the render target,
    /// at NDC depth `depth`. Meant for the identity camera.
    ///
    /// Disjoint triangles bring three vertices each, so every meshlet holds 21
    /// of them.
    pub fn triangle_grid(&mut self, material: u32, triangle_count: u32, depth: f32) -> Result<u32> {
        let size = self.settings().render_target_size;
        let columns = (size.x / GRID_CELL_PIXELS.x).max(1);
        let to_ndc = |pixel: Vec2| Vec2::new(pixel.x / size.x as f32 * 2.0 - 1.0, 1.0 - pixel.y / size.y as f32 * 2.0);
        let cell = GRID_CELL_PIXELS.as_vec2();

        let positions = (0..triangle_count)
            .flat_map(|triangle| {
                let origin = UVec2::new(triangle % columns, triangle / columns).as_vec2() * cell;
                [
                    origin + Vec2::splat(0.25),
                    origin + Vec2::new(cell.x - 0.25, 0.25),
                    origin + Vec2::new(0.25, cell.y - 0.25),
                ]
                .map(|pixel| to_ndc(pixel).extend(depth))
            })
            .collect();
        let mesh = MeshBuilder::new(positions).with_material(material).build()?;

        Ok(self.add_mesh_entity(mesh, Mat4::IDENTITY))
    }
}

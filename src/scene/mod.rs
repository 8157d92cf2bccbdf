//! Deduplicated indexed scene representation.
//!
//! A [`Scene`] is an ordered list of [`Mesh`]es, each with its own local vertex and index
//! arrays. [`aggregate::SceneBuffers`] flattens it into the global buffers that the
//! intersection backend and the shading kernels work with.

pub mod aggregate;
pub mod deduplication;
pub mod lights;
mod obj;

use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::{
    geometry::{TexturePoint, WorldBox, WorldPoint, WorldVector},
    util::Rgb,
};

index_vec::define_index_type! {
    /// Index of a mesh in the scene, equal to the index of its shape descriptor.
    pub struct ShapeIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

index_vec::define_index_type! {
    pub struct LightIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("Scene file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to read file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse file: {0}")]
    Parse(#[from] wavefront_obj::ParseError),

    #[error("Malformed mesh {mesh:?}: {reason}")]
    Malformed { mesh: String, reason: String },
}

impl SceneError {
    pub(crate) fn malformed(mesh: &str, reason: impl Into<String>) -> SceneError {
        SceneError::Malformed {
            mesh: mesh.to_owned(),
            reason: reason.into(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vertex {
    pub position: WorldPoint,
    /// Zero if the source had no normal
    pub normal: WorldVector,
    pub texture_coords: TexturePoint,
    pub color: Rgb,
}

impl Default for Vertex {
    fn default() -> Self {
        Vertex {
            position: WorldPoint::origin(),
            normal: WorldVector::zeros(),
            texture_coords: TexturePoint::origin(),
            color: Rgb::new(0.0, 0.0, 0.0),
        }
    }
}

/// Vertex as laid out in the backend buffers, 12 floats.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PackedVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub texture_coords: [f32; 2],
    pub padding: f32,
    pub color: [f32; 3],
}

impl From<&Vertex> for PackedVertex {
    fn from(v: &Vertex) -> Self {
        PackedVertex {
            position: v.position.coords.into(),
            normal: v.normal.into(),
            texture_coords: v.texture_coords.coords.into(),
            padding: 0.0,
            color: [v.color.r, v.color.g, v.color.b],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    pub diffuse: Rgb,
}

/// Indexed triangle mesh. Indices are local to the mesh's own vertex array.
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    name: String,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    light: Option<LightIdx>,
}

impl Mesh {
    pub const VERTEX_STRIDE: usize = std::mem::size_of::<PackedVertex>();
    pub const INDEX_STRIDE: usize = std::mem::size_of::<u32>();

    /// Creates a mesh, checking that indices form whole triangles and stay inside the
    /// vertex array.
    pub fn new(
        name: impl Into<String>,
        vertices: Vec<Vertex>,
        indices: Vec<u32>,
        light: Option<LightIdx>,
    ) -> Result<Mesh, SceneError> {
        let name = name.into();

        if indices.len() % 3 != 0 {
            return Err(SceneError::malformed(
                &name,
                format!("index count {} is not a multiple of 3", indices.len()),
            ));
        }
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(SceneError::malformed(
                &name,
                format!("index {bad} out of range for {} vertices", vertices.len()),
            ));
        }

        Ok(Mesh {
            name,
            vertices,
            indices,
            light,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn light(&self) -> Option<LightIdx> {
        self.light
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[derive(Clone, Debug, Default)]
pub struct Scene {
    meshes: Vec<Mesh>,
    materials: Vec<Material>,
}

impl Scene {
    pub fn new() -> Scene {
        Scene::default()
    }

    /// Loads a Wavefront OBJ file and its material library, one mesh per object.
    pub fn load_obj(path: impl AsRef<Path>) -> Result<Scene, SceneError> {
        let path = path.as_ref();
        let (groups, materials) = obj::load(path)?;

        let mut scene = Scene {
            meshes: Vec::with_capacity(groups.len()),
            materials,
        };
        for group in &groups {
            let mesh = deduplication::deduplicate(group, &scene.materials)?;
            scene.push_mesh(mesh);
        }

        log::info!(
            "Loaded {}: {} meshes, {} triangles, {} materials",
            path.display(),
            scene.meshes.len(),
            scene.meshes.iter().map(Mesh::triangle_count).sum::<usize>(),
            scene.materials.len()
        );

        Ok(scene)
    }

    /// Appends a mesh and returns the index of its future shape descriptor.
    pub fn push_mesh(&mut self, mesh: Mesh) -> ShapeIdx {
        self.meshes.push(mesh);
        ShapeIdx::from_usize(self.meshes.len() - 1)
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// Bounding box of all vertices, None for a scene without vertices.
    pub fn bounds(&self) -> Option<WorldBox> {
        WorldBox::from_points(
            self.meshes
                .iter()
                .flat_map(|m| m.vertices.iter())
                .map(|v| &v.position),
        )
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use assert2::{assert, let_assert};

    pub(crate) fn vertex(x: f32, y: f32, z: f32) -> Vertex {
        Vertex {
            position: WorldPoint::new(x, y, z),
            ..Vertex::default()
        }
    }

    #[test]
    fn packed_vertex_layout() {
        assert!(Mesh::VERTEX_STRIDE == 48);
        assert!(Mesh::INDEX_STRIDE == 4);
        assert!(std::mem::align_of::<PackedVertex>() == 4);
    }

    #[test]
    fn packed_vertex_fields() {
        let v = Vertex {
            position: WorldPoint::new(1.0, 2.0, 3.0),
            normal: WorldVector::new(0.0, 1.0, 0.0),
            texture_coords: TexturePoint::new(0.5, 0.25),
            color: Rgb::new(0.1, 0.2, 0.3),
        };
        let packed = PackedVertex::from(&v);
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&packed));
        assert!(floats == [1.0, 2.0, 3.0, 0.0, 1.0, 0.0, 0.5, 0.25, 0.0, 0.1, 0.2, 0.3]);
    }

    #[test]
    fn mesh_rejects_partial_triangle() {
        let vertices = vec![vertex(0.0, 0.0, 0.0), vertex(1.0, 0.0, 0.0)];
        let_assert!(Err(SceneError::Malformed { .. }) = Mesh::new("m", vertices, vec![0, 1], None));
    }

    #[test]
    fn mesh_rejects_out_of_range_index() {
        let vertices = vec![vertex(0.0, 0.0, 0.0), vertex(1.0, 0.0, 0.0)];
        let_assert!(
            Err(SceneError::Malformed { mesh, .. }) = Mesh::new("m", vertices, vec![0, 1, 2], None)
        );
        assert!(mesh == "m");
    }

    #[test]
    fn bounds() {
        let mut scene = Scene::new();
        assert!(scene.bounds().is_none());

        let vertices = vec![
            vertex(0.0, 0.0, 0.0),
            vertex(1.0, 0.0, 0.0),
            vertex(0.0, 2.0, -1.0),
        ];
        let_assert!(Ok(mesh) = Mesh::new("tri", vertices, vec![0, 1, 2], None));
        assert!(scene.push_mesh(mesh) == ShapeIdx::from_usize(0));

        let_assert!(Some(b) = scene.bounds());
        assert!(b.min == WorldPoint::new(0.0, 0.0, -1.0));
        assert!(b.max == WorldPoint::new(1.0, 2.0, 0.0));
    }
}

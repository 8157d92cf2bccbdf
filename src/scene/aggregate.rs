//! Global vertex and index buffers for the whole scene.

use bytemuck::{Pod, Zeroable};
use index_vec::IndexVec;

use super::{LightIdx, PackedVertex, Scene, SceneError, ShapeIdx, Vertex};
use crate::geometry::{BarycentricCoordinates, Triangle, WorldPoint};

/// Location of one mesh inside the global buffers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ShapeDescriptor {
    pub index_count: u32,
    pub first_index: u32,
    pub base_vertex: u32,
    pub light: Option<LightIdx>,
}

impl ShapeDescriptor {
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

/// Shape descriptor as laid out in the backend buffers.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct PackedShape {
    pub index_count: u32,
    pub first_index: u32,
    pub base_vertex: u32,
    /// -1 if the shape is not a light
    pub light_id: i32,
}

impl From<&ShapeDescriptor> for PackedShape {
    fn from(shape: &ShapeDescriptor) -> Self {
        PackedShape {
            index_count: shape.index_count,
            first_index: shape.first_index,
            base_vertex: shape.base_vertex,
            light_id: shape.light.map_or(-1, |l| l.raw() as i32),
        }
    }
}

/// Concatenation of all meshes of a scene.
/// Indices are global, shapes partition the index buffer in mesh order.
#[derive(Clone, Debug, Default)]
pub struct SceneBuffers {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    shapes: IndexVec<ShapeIdx, ShapeDescriptor>,
}

impl SceneBuffers {
    pub fn aggregate(scene: &Scene) -> Result<SceneBuffers, SceneError> {
        let vertex_count: usize = scene.meshes().iter().map(|m| m.vertices().len()).sum();
        let index_count: usize = scene.meshes().iter().map(|m| m.indices().len()).sum();

        let mut buffers = SceneBuffers {
            vertices: Vec::with_capacity(vertex_count),
            indices: Vec::with_capacity(index_count),
            shapes: IndexVec::with_capacity(scene.meshes().len()),
        };

        for mesh in scene.meshes() {
            let too_large =
                || SceneError::malformed(mesh.name(), "scene too large for 32 bit indices");
            let base_vertex = u32::try_from(buffers.vertices.len()).map_err(|_| too_large())?;
            let first_index = u32::try_from(buffers.indices.len()).map_err(|_| too_large())?;
            let mesh_index_count = u32::try_from(mesh.indices().len()).map_err(|_| too_large())?;
            base_vertex
                .checked_add(u32::try_from(mesh.vertices().len()).map_err(|_| too_large())?)
                .ok_or_else(too_large)?;

            buffers.vertices.extend_from_slice(mesh.vertices());
            buffers
                .indices
                .extend(mesh.indices().iter().map(|i| i + base_vertex));
            buffers.shapes.push(ShapeDescriptor {
                index_count: mesh_index_count,
                first_index,
                base_vertex,
                light: mesh.light(),
            });
        }

        Ok(buffers)
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn shapes(&self) -> &IndexVec<ShapeIdx, ShapeDescriptor> {
        &self.shapes
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Global vertex indices of a triangle, addressed by shape and shape-local primitive id.
    pub fn triangle_indices(&self, shape: ShapeIdx, primitive: u32) -> Triangle<u32> {
        let start = (self.shapes[shape].first_index + 3 * primitive) as usize;
        Triangle::new(
            self.indices[start],
            self.indices[start + 1],
            self.indices[start + 2],
        )
    }

    pub fn triangle(&self, shape: ShapeIdx, primitive: u32) -> Triangle<WorldPoint> {
        self.triangle_indices(shape, primitive)
            .map(|&i| self.vertices[i as usize].position)
    }

    /// Iterates over all triangles as (shape, primitive, geometry).
    pub fn triangles(&self) -> impl Iterator<Item = (ShapeIdx, u32, Triangle<WorldPoint>)> + '_ {
        self.shapes.iter_enumerated().flat_map(move |(shape, descriptor)| {
            (0..descriptor.triangle_count())
                .map(move |primitive| (shape, primitive, self.triangle(shape, primitive)))
        })
    }

    /// Vertex attributes at a point inside a triangle.
    /// Normal is renormalized, or stays zero if the mesh has no normals.
    pub fn interpolate(
        &self,
        shape: ShapeIdx,
        primitive: u32,
        uv: &BarycentricCoordinates,
    ) -> Vertex {
        let t = self
            .triangle_indices(shape, primitive)
            .map(|&i| self.vertices[i as usize]);

        let normal = uv.interpolate(&t[0].normal, &t[1].normal, &t[2].normal);
        let texture_coords = uv.interpolate(
            &t[0].texture_coords.coords,
            &t[1].texture_coords.coords,
            &t[2].texture_coords.coords,
        );
        let color = uv.interpolate(&t[0].color, &t[1].color, &t[2].color);

        Vertex {
            position: uv.interpolate_triangle(&t.map(|v| v.position.coords)).into(),
            normal: normal.try_normalize(0.0).unwrap_or(normal),
            texture_coords: texture_coords.into(),
            color,
        }
    }

    pub fn packed_vertices(&self) -> Vec<PackedVertex> {
        self.vertices.iter().map(PackedVertex::from).collect()
    }

    pub fn packed_shapes(&self) -> Vec<PackedShape> {
        self.shapes.iter().map(PackedShape::from).collect()
    }

    /// Index buffer as uploaded to a device, `Mesh::INDEX_STRIDE` bytes per index.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

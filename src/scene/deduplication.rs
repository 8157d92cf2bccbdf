//! Conversion of polygon soup into indexed meshes without duplicate vertices.

use indexmap::{IndexMap, map::Entry};

use super::{Material, Mesh, SceneError, Vertex};
use crate::{
    geometry::{TexturePoint, WorldPoint, WorldVector},
    util::Rgb,
};

/// One corner of a face, as indices into the attribute pools of a [`PolygonGroup`].
/// Two face vertices are the same vertex iff all three indices match.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FaceVertex {
    pub position: usize,
    pub normal: Option<usize>,
    pub texture_coords: Option<usize>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Face {
    pub vertices: Vec<FaceVertex>,
    /// Index into the scene material table
    pub material: Option<usize>,
}

/// Unindexed geometry of a single object, as read from the scene file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolygonGroup {
    pub name: String,
    pub positions: Vec<WorldPoint>,
    pub normals: Vec<WorldVector>,
    pub texture_coords: Vec<TexturePoint>,
    pub faces: Vec<Face>,
}

/// Builds an indexed mesh from a polygon group.
///
/// Vertices are emitted in order of first use. Faces that are not triangles are skipped.
pub fn deduplicate(group: &PolygonGroup, materials: &[Material]) -> Result<Mesh, SceneError> {
    let mut vertices = IndexMap::<FaceVertex, Vertex>::new();
    let mut indices = Vec::with_capacity(group.faces.len() * 3);
    let mut skipped = 0usize;

    for face in &group.faces {
        if face.vertices.len() != 3 {
            skipped += 1;
            continue;
        }

        let color = match face.material {
            Some(m) => {
                materials
                    .get(m)
                    .ok_or_else(|| {
                        SceneError::malformed(&group.name, format!("material {m} out of range"))
                    })?
                    .diffuse
            }
            None => Rgb::new(0.0, 0.0, 0.0),
        };

        for face_vertex in &face.vertices {
            let entry = vertices.entry(*face_vertex);
            let index = entry.index();
            if let Entry::Vacant(entry) = entry {
                entry.insert(build_vertex(group, face_vertex, color)?);
            }

            let index = u32::try_from(index).map_err(|_| {
                SceneError::malformed(&group.name, "too many vertices for 32 bit indices")
            })?;
            indices.push(index);
        }
    }

    if skipped > 0 {
        log::debug!(
            "{}: skipped {skipped} non-triangle faces out of {}",
            group.name,
            group.faces.len()
        );
    }

    Mesh::new(
        group.name.clone(),
        vertices.into_values().collect(),
        indices,
        None,
    )
}

fn build_vertex(
    group: &PolygonGroup,
    face_vertex: &FaceVertex,
    color: Rgb,
) -> Result<Vertex, SceneError> {
    let out_of_range = |what: &str, index: usize| {
        SceneError::malformed(&group.name, format!("{what} index {index} out of range"))
    };

    let position = *group
        .positions
        .get(face_vertex.position)
        .ok_or_else(|| out_of_range("position", face_vertex.position))?;
    let normal = match face_vertex.normal {
        Some(i) => *group.normals.get(i).ok_or_else(|| out_of_range("normal", i))?,
        None => WorldVector::zeros(),
    };
    let texture_coords = match face_vertex.texture_coords {
        Some(i) => *group
            .texture_coords
            .get(i)
            .ok_or_else(|| out_of_range("texture coordinate", i))?,
        None => TexturePoint::origin(),
    };

    Ok(Vertex {
        position,
        normal,
        texture_coords,
        color,
    })
}

use std::{fs, io, path::Path};

use wavefront_obj::{mtl, obj};

use super::{
    Material, SceneError,
    deduplication::{Face, FaceVertex, PolygonGroup},
};
use crate::{
    geometry::{TexturePoint, WorldPoint, WorldVector},
    util::Rgb,
};

/// Reads an OBJ file and its material library into polygon groups, one per object.
pub(super) fn load(path: &Path) -> Result<(Vec<PolygonGroup>, Vec<Material>), SceneError> {
    let content = read_to_string(path)?;
    let parsed = obj::parse(content)?;

    let materials = match &parsed.material_library {
        Some(library) => load_materials(&path.with_file_name(library)),
        None => Vec::new(),
    };

    let groups = parsed
        .objects
        .into_iter()
        .map(|o| convert_object(o, &materials))
        .collect();

    Ok((groups, materials))
}

fn read_to_string(path: &Path) -> Result<String, SceneError> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => SceneError::NotFound {
            path: path.to_owned(),
        },
        _ => SceneError::Read(e),
    })
}

/// Missing or broken material libraries leave the scene uncolored rather than failing the load.
fn load_materials(path: &Path) -> Vec<Material> {
    let parsed = read_to_string(path).and_then(|content| Ok(mtl::parse(content)?));

    match parsed {
        Ok(set) => set
            .materials
            .into_iter()
            .map(|m| Material {
                name: m.name,
                diffuse: Rgb::new(
                    m.color_diffuse.r as f32,
                    m.color_diffuse.g as f32,
                    m.color_diffuse.b as f32,
                ),
            })
            .collect(),
        Err(e) => {
            log::warn!("Can't load material library {}: {e}", path.display());
            Vec::new()
        }
    }
}

fn convert_object(o: obj::Object, materials: &[Material]) -> PolygonGroup {
    let mut faces = Vec::new();

    for geometry in &o.geometry {
        let material = geometry.material_name.as_ref().and_then(|name| {
            let found = materials.iter().position(|m| &m.name == name);
            if found.is_none() {
                log::warn!("{}: unknown material {name:?}", o.name);
            }
            found
        });

        faces.extend(geometry.shapes.iter().map(|shape| Face {
            vertices: match shape.primitive {
                obj::Primitive::Point(a) => vec![face_vertex(a)],
                obj::Primitive::Line(a, b) => vec![face_vertex(a), face_vertex(b)],
                obj::Primitive::Triangle(a, b, c) => {
                    vec![face_vertex(a), face_vertex(b), face_vertex(c)]
                }
            },
            material,
        }));
    }

    PolygonGroup {
        positions: o
            .vertices
            .iter()
            .map(|v| WorldPoint::new(v.x as f32, v.y as f32, v.z as f32))
            .collect(),
        normals: o
            .normals
            .iter()
            .map(|v| WorldVector::new(v.x as f32, v.y as f32, v.z as f32))
            .collect(),
        texture_coords: o
            .tex_vertices
            .iter()
            .map(|v| TexturePoint::new(v.u as f32, v.v as f32))
            .collect(),
        name: o.name,
        faces,
    }
}

fn face_vertex((position, texture_coords, normal): obj::VTNIndex) -> FaceVertex {
    FaceVertex {
        position,
        normal,
        texture_coords,
    }
}

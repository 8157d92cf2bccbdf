//! Square area lights, added to the scene as emissive meshes.

use std::num::NonZeroU32;

use index_vec::IndexVec;

use super::{LightIdx, Mesh, Scene, SceneError, ShapeIdx, Vertex};
use crate::{
    geometry::{FloatType, TexturePoint, WorldPoint, WorldVector},
    util::Rgb,
};

/// Horizontal square light facing down (-Y).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AreaLight {
    pub position: WorldPoint,
    pub intensity: Rgb,
    /// Edge length
    pub size: FloatType,
    /// Mesh that represents the light in the scene
    pub shape: ShapeIdx,
}

impl AreaLight {
    pub fn normal(&self) -> WorldVector {
        -WorldVector::y()
    }

    pub fn area(&self) -> FloatType {
        self.size * self.size
    }

    /// Maps a 2D sample from the unit square onto the light surface.
    pub fn sample_point(&self, sample: [FloatType; 2]) -> WorldPoint {
        self.position
            + WorldVector::new(
                (sample[0] - 0.5) * self.size,
                0.0,
                (sample[1] - 0.5) * self.size,
            )
    }
}

/// Row of equally spaced lights along the X axis, centered on `center`.
#[derive(Clone, Debug, bon::Builder)]
pub struct AreaLightRow {
    pub count: NonZeroU32,
    pub center: WorldPoint,
    /// Distance between centers of neighboring lights
    pub spacing: FloatType,
    pub size: FloatType,
    #[builder(default = Rgb::new(100.0, 100.0, 80.0))]
    pub intensity: Rgb,
    /// Vertex color of the light meshes
    #[builder(default = Rgb::new(1.0, 1.0, 0.8))]
    pub color: Rgb,
}

impl AreaLightRow {
    /// Appends one quad mesh per light to the scene.
    pub fn add_to(&self, scene: &mut Scene) -> Result<IndexVec<LightIdx, AreaLight>, SceneError> {
        let mut lights = IndexVec::with_capacity(self.count.get() as usize);
        let first_offset = (self.count.get() - 1) as FloatType / 2.0;

        for i in 0..self.count.get() {
            let light_idx = lights.next_idx();
            let position = self.center
                + WorldVector::x() * ((i as FloatType - first_offset) * self.spacing);

            let mesh = Mesh::new(
                format!("areaLight{i}"),
                self.quad_vertices(&position),
                vec![0, 2, 1, 0, 3, 2],
                Some(light_idx),
            )?;
            let shape = scene.push_mesh(mesh);

            lights.push(AreaLight {
                position,
                intensity: self.intensity,
                size: self.size,
                shape,
            });
        }

        log::info!("Added {} area lights", lights.len());
        Ok(lights)
    }

    fn quad_vertices(&self, position: &WorldPoint) -> Vec<Vertex> {
        let half = self.size / 2.0;
        [(-1.0, -1.0), (-1.0, 1.0), (1.0, 1.0), (1.0, -1.0)]
            .into_iter()
            .map(|(dx, dz)| Vertex {
                position: position + WorldVector::new(dx * half, 0.0, dz * half),
                normal: -WorldVector::y(),
                texture_coords: TexturePoint::new((dx + 1.0) / 2.0, (dz + 1.0) / 2.0),
                color: self.color,
            })
            .collect()
    }
}

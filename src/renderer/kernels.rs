//! Bodies of the per-item kernels. Each function handles one work item of its launch.

use std::f32::consts::PI;

use index_vec::IndexVec;
use nalgebra::Vector2;

use super::{
    Effect, RenderSettings,
    accumulation::AccumulationBuffer,
    queue::{Emitter, SecondaryPayload},
    sampler::{Sampler, map_to_hemisphere},
};
use crate::{
    backend::Hit,
    camera::CameraParams,
    geometry::{Ray, WorldPoint, WorldVector},
    scene::{LightIdx, aggregate::SceneBuffers, lights::AreaLight},
    util::{Rgb, Rgba, modulate, with_alpha},
};

const CAMERA_DIMENSION: u32 = 0;
const SHADING_DIMENSION: u32 = 1;

/// Read-only state shared by the shading kernels.
pub(super) struct ShadingContext<'a> {
    pub buffers: &'a SceneBuffers,
    pub lights: &'a IndexVec<LightIdx, AreaLight>,
    pub settings: &'a RenderSettings,
}

/// Result of the secondary query for one ray.
#[derive(Copy, Clone, Debug)]
pub(super) enum SecondaryOutcome {
    Occluded(bool),
    Intersection(Option<Hit>),
}

/// `GenerateCameraRays`: primary ray of pixel `slot` for this frame.
pub(super) fn generate_camera_ray(
    camera: &CameraParams,
    settings: &RenderSettings,
    frame: u32,
    slot: usize,
) -> Ray {
    let x = (slot % camera.width() as usize) as u32;
    let y = (slot / camera.width() as usize) as u32;

    let jitter = if settings.antialiasing {
        let mut sampler = Sampler::new(settings.seed, frame, slot as u32, CAMERA_DIMENSION);
        Vector2::from(sampler.sample_2d())
    } else {
        Vector2::new(0.5, 0.5)
    };

    camera.primary_ray(x, y, jitter)
}

/// Surface point of a primary hit, as seen by the shading code.
struct SurfacePoint {
    position: WorldPoint,
    /// Unit normal, facing against the incoming ray
    normal: WorldVector,
    albedo: Rgb,
}

impl SurfacePoint {
    fn new(buffers: &SceneBuffers, ray: &Ray, hit: &Hit) -> SurfacePoint {
        let vertex = buffers.interpolate(hit.shape, hit.primitive, &hit.uv);
        let normal = if vertex.normal.norm_squared() > 0.0 {
            vertex.normal
        } else {
            buffers
                .triangle(hit.shape, hit.primitive)
                .normal()
                .try_normalize(0.0)
                .unwrap_or_else(|| -ray.direction)
        };
        let normal = if normal.dot(&ray.direction) > 0.0 {
            -normal
        } else {
            normal
        };

        SurfacePoint {
            position: ray.point_at(hit.t),
            normal,
            albedo: vertex.color,
        }
    }

    fn ray_origin(&self, epsilon: f32) -> WorldPoint {
        self.position + self.normal * epsilon
    }
}

/// `ShadePrimaryRays`: deposits the direct contribution of pixel `slot` and emits its
/// secondary rays.
///
/// Refused emits are ignored here; the overflow is reported when the queue length is read.
pub(super) fn shade_primary(
    context: &ShadingContext,
    accumulation: &AccumulationBuffer,
    emitter: &Emitter,
    frame: u32,
    slot: usize,
    ray: &Ray,
    hit: Option<&Hit>,
) {
    let settings = context.settings;
    let Some(hit) = hit else {
        accumulation.add(slot, with_alpha(settings.background, 1.0));
        return;
    };

    let surface = SurfacePoint::new(context.buffers, ray, hit);

    if context.buffers.shapes()[hit.shape].light.is_some() {
        accumulation.add(slot, with_alpha(surface.albedo, 1.0));
        return;
    }

    let mut sampler = Sampler::new(settings.seed, frame, slot as u32, SHADING_DIMENSION);
    let origin = surface.ray_origin(settings.ray_epsilon);
    let emit = |ray: Ray, weight: Rgba| {
        let _ = emitter.emit(
            ray,
            SecondaryPayload {
                pixel: slot as u32,
                weight,
            },
        );
    };

    match settings.effect {
        Effect::Primary => {
            accumulation.add(slot, with_alpha(surface.albedo, 1.0));
        }
        Effect::AmbientOcclusion {
            rays_per_hit,
            radius,
        } => {
            accumulation.add(slot, Rgba::new(0.0, 0.0, 0.0, 1.0));

            let weight = 1.0 / rays_per_hit.get() as f32;
            for _ in 0..rays_per_hit.get() {
                let direction = map_to_hemisphere(sampler.sample_2d(), &surface.normal, 1.0);
                emit(
                    Ray::new(origin, direction).with_range(0.0, radius),
                    Rgba::new(weight, weight, weight, 0.0),
                );
            }
        }
        Effect::AreaShadows { rays_per_light } => {
            accumulation.add(slot, Rgba::new(0.0, 0.0, 0.0, 1.0));

            for light in context.lights.iter() {
                for _ in 0..rays_per_light.get() {
                    let target = light.sample_point(sampler.sample_2d());
                    let to_light = target - origin;
                    let distance = to_light.norm();
                    if distance <= settings.ray_epsilon {
                        continue;
                    }
                    let direction = to_light / distance;

                    let cos_surface = surface.normal.dot(&direction);
                    let cos_light = light.normal().dot(&-direction);
                    if cos_surface <= 0.0 || cos_light <= 0.0 {
                        continue;
                    }

                    let scale = cos_surface * cos_light * light.area()
                        / (PI * distance * distance * rays_per_light.get() as f32);
                    let value = modulate(surface.albedo, light.intensity) * scale;
                    emit(
                        Ray::new(origin, direction)
                            .with_range(0.0, distance - settings.ray_epsilon),
                        with_alpha(value, 0.0),
                    );
                }
            }
        }
        Effect::GlossyReflection { exponent } => {
            let reflected =
                ray.direction - surface.normal * (2.0 * ray.direction.dot(&surface.normal));
            let direction = map_to_hemisphere(sampler.sample_2d(), &reflected, exponent);
            if direction.dot(&surface.normal) > 0.0 {
                emit(Ray::new(origin, direction), with_alpha(surface.albedo, 1.0));
            }
        }
    }
}

/// `ProcessSecondaryRays`: adds the contribution of one secondary ray to its pixel.
pub(super) fn process_secondary(
    context: &ShadingContext,
    accumulation: &AccumulationBuffer,
    payload: &SecondaryPayload,
    outcome: SecondaryOutcome,
) {
    let weight = payload.weight;
    let contribution = match outcome {
        SecondaryOutcome::Occluded(true) => return,
        SecondaryOutcome::Occluded(false) => weight,
        SecondaryOutcome::Intersection(hit) => {
            let seen = match hit {
                Some(hit) => {
                    context
                        .buffers
                        .interpolate(hit.shape, hit.primitive, &hit.uv)
                        .color
                }
                None => context.settings.background,
            };
            with_alpha(modulate(weight.rgb(), seen), weight.a)
        }
    };

    accumulation.add(payload.pixel as usize, contribution);
}

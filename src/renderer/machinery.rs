use std::{
    fmt::Display,
    num::NonZeroU32,
    time::{Duration, Instant},
};

use index_vec::IndexVec;

use super::{
    OverflowPolicy, RenderError, RenderSettings, SecondaryQuery,
    accumulation::AccumulationBuffer,
    kernels::{self, SecondaryOutcome, ShadingContext},
    queue::SecondaryRayQueue,
};
use crate::{
    backend::{Dispatch, Hit, Intersector},
    camera::CameraParams,
    geometry::Ray,
    resolve::{ResolvedImage, resolve},
    scene::{LightIdx, aggregate::SceneBuffers, lights::AreaLight},
    util::Stats,
};

/// Counters of one rendered frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u32,
    pub primary_rays: usize,
    /// Secondary rays actually traced
    pub secondary_rays: usize,
    /// Secondary rays refused by a full queue, only non-zero with `OverflowPolicy::Drop`
    pub dropped_rays: usize,
}

/// Totals over a whole render.
#[derive(Clone, Debug, Default)]
pub struct RenderReport {
    pub frames: u32,
    pub primary_rays: u64,
    /// Traced secondary rays per frame
    pub secondary: Stats,
    pub dropped: u64,
    /// Time spent inside frames
    pub elapsed: Duration,
}

impl RenderReport {
    pub fn total_rays(&self) -> u64 {
        self.primary_rays + self.secondary.sum
    }

    pub fn mrays_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.total_rays() as f64 / seconds * 1e-6
        } else {
            0.0
        }
    }

    fn add_frame(&mut self, stats: &FrameStats, elapsed: Duration) {
        self.frames += 1;
        self.primary_rays += stats.primary_rays as u64;
        self.secondary.add_sample(stats.secondary_rays);
        self.dropped += stats.dropped_rays as u64;
        self.elapsed += elapsed;
    }
}

impl Display for RenderReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames, {} primary + {} secondary rays in {:.2?} ({:.2} MRays/s); \
             secondary per frame: {}",
            self.frames,
            self.primary_rays,
            self.secondary.sum,
            self.elapsed,
            self.mrays_per_second(),
            self.secondary,
        )?;
        if self.dropped > 0 {
            write!(f, "; {} rays dropped", self.dropped)?;
        }
        Ok(())
    }
}

pub struct RenderOutput {
    pub image: ResolvedImage,
    pub report: RenderReport,
}

/// Progressive renderer that processes all rays of one kind in a single batch.
///
/// Owns every per-frame buffer. The scene, its intersector and the dispatch backend are
/// borrowed read-only for the lifetime of the renderer.
pub struct WavefrontRenderer<'a, D: Dispatch, I: Intersector> {
    camera: CameraParams,
    buffers: &'a SceneBuffers,
    lights: &'a IndexVec<LightIdx, AreaLight>,
    settings: RenderSettings,
    dispatch: &'a D,
    intersector: &'a I,

    primary_rays: Vec<Ray>,
    primary_hits: Vec<Option<Hit>>,
    queue: SecondaryRayQueue,
    occluded: Vec<bool>,
    secondary_hits: Vec<Option<Hit>>,
    /// Contributions of the frame in flight, merged into `accumulation` once it succeeds
    frame_accumulation: AccumulationBuffer,
    accumulation: AccumulationBuffer,

    frame: u32,
    report: RenderReport,
}

impl<'a, D: Dispatch, I: Intersector> WavefrontRenderer<'a, D, I> {
    pub fn new(
        camera: CameraParams,
        buffers: &'a SceneBuffers,
        lights: &'a IndexVec<LightIdx, AreaLight>,
        settings: RenderSettings,
        dispatch: &'a D,
        intersector: &'a I,
    ) -> Self {
        let pixel_count = camera.pixel_count();
        let capacity = settings.secondary_capacity.unwrap_or_else(|| {
            pixel_count * settings.effect.secondary_rays_per_hit(lights.len())
        });
        let query = settings.effect.query();

        log::debug!(
            "Renderer for {}x{} pixels, secondary queue capacity {capacity}",
            camera.width(),
            camera.height()
        );

        WavefrontRenderer {
            camera,
            buffers,
            lights,
            dispatch,
            intersector,

            primary_rays: vec![Ray::default(); pixel_count],
            primary_hits: vec![None; pixel_count],
            queue: SecondaryRayQueue::with_capacity(capacity),
            occluded: if query == Some(SecondaryQuery::Occlusion) {
                vec![false; capacity]
            } else {
                Vec::new()
            },
            secondary_hits: if query == Some(SecondaryQuery::Intersection) {
                vec![None; capacity]
            } else {
                Vec::new()
            },
            frame_accumulation: AccumulationBuffer::new(pixel_count),
            accumulation: AccumulationBuffer::new(pixel_count),

            settings,
            frame: 0,
            report: RenderReport::default(),
        }
    }

    pub fn frames_rendered(&self) -> u32 {
        self.frame
    }

    pub fn report(&self) -> &RenderReport {
        &self.report
    }

    /// Runs all stages of one frame, adding its contribution to the accumulation buffer.
    /// A frame that fails leaves the accumulated image and the frame counter untouched.
    pub fn render_frame(&mut self) -> Result<FrameStats, RenderError> {
        let start = Instant::now();
        let frame = self.frame;
        let dispatch = self.dispatch;
        self.frame_accumulation.clear();
        let camera = &self.camera;
        let accumulation = &self.frame_accumulation;
        let context = ShadingContext {
            buffers: self.buffers,
            lights: self.lights,
            settings: &self.settings,
        };

        self.queue.reset();

        dispatch.launch_for_each("GenerateCameraRays", &mut self.primary_rays, &|slot, ray| {
            *ray = kernels::generate_camera_ray(camera, context.settings, frame, slot);
        })?;

        self.intersector
            .query_intersection(&self.primary_rays, &mut self.primary_hits)?;

        {
            let emitter = self.queue.emitter();
            let rays = &self.primary_rays;
            let hits = &self.primary_hits;
            dispatch.launch("ShadePrimaryRays", rays.len(), &|slot| {
                kernels::shade_primary(
                    &context,
                    accumulation,
                    &emitter,
                    frame,
                    slot,
                    &rays[slot],
                    hits[slot].as_ref(),
                );
            })?;
        }

        let dropped_rays = match self.queue.len() {
            Ok(_) => 0,
            Err(overflow) => match self.settings.overflow_policy {
                OverflowPolicy::Fail => return Err(overflow.into()),
                OverflowPolicy::Drop => {
                    log::warn!("Frame {frame}: {overflow}, dropping the excess rays");
                    self.queue.truncate_overflow()
                }
            },
        };

        let rays = self.queue.rays();
        let payloads = self.queue.payloads();
        let count = rays.len();

        match self.settings.effect.query() {
            Some(SecondaryQuery::Occlusion) => {
                let occluded = &mut self.occluded[..count];
                self.intersector.query_occlusion(rays, occluded)?;
                let occluded = &*occluded;
                dispatch.launch("ProcessSecondaryRays", count, &|slot| {
                    kernels::process_secondary(
                        &context,
                        accumulation,
                        &payloads[slot],
                        SecondaryOutcome::Occluded(occluded[slot]),
                    );
                })?;
            }
            Some(SecondaryQuery::Intersection) => {
                let hits = &mut self.secondary_hits[..count];
                self.intersector.query_intersection(rays, hits)?;
                let hits = &*hits;
                dispatch.launch("ProcessSecondaryRays", count, &|slot| {
                    kernels::process_secondary(
                        &context,
                        accumulation,
                        &payloads[slot],
                        SecondaryOutcome::Intersection(hits[slot]),
                    );
                })?;
            }
            None => {}
        }

        let stats = FrameStats {
            frame,
            primary_rays: self.primary_rays.len(),
            secondary_rays: count,
            dropped_rays,
        };
        let elapsed = start.elapsed();
        log::debug!(
            "Frame {frame}: {count} secondary rays, {dropped_rays} dropped, {elapsed:.2?}"
        );

        self.accumulation.merge(&self.frame_accumulation);
        self.report.add_frame(&stats, elapsed);
        self.frame += 1;
        Ok(stats)
    }

    /// Normalized image of everything accumulated so far.
    pub fn resolve(&self) -> ResolvedImage {
        let frames = NonZeroU32::new(self.frame).unwrap_or(NonZeroU32::MIN);
        resolve(
            &self.accumulation.to_vec(),
            self.camera.width(),
            self.camera.height(),
            self.settings.normalization(frames),
        )
    }

    /// Renders the remaining frames of `settings.frame_count`, calling `on_frame` after
    /// each one, and resolves the result.
    pub fn render(
        mut self,
        mut on_frame: impl FnMut(&FrameStats),
    ) -> Result<RenderOutput, RenderError> {
        while self.frame < self.settings.frame_count.get() {
            let stats = self.render_frame()?;
            on_frame(&stats);
        }

        log::info!("Rendered {}", self.report);

        Ok(RenderOutput {
            image: self.resolve(),
            report: self.report,
        })
    }
}

mod accumulation;
mod kernels;
mod machinery;
pub mod queue;
pub mod sampler;

use std::num::NonZeroU32;

use thiserror::Error;

use crate::{backend::BackendError, geometry::FloatType, resolve::Normalization, util::Rgb};

pub use accumulation::AccumulationBuffer;
pub use machinery::{FrameStats, RenderOutput, RenderReport, WavefrontRenderer};
pub use queue::CapacityExceeded;

/// What the renderer computes per pixel.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Effect {
    /// Interpolated vertex color of the first hit
    Primary,
    /// Fraction of hemisphere directions not blocked within `radius`
    AmbientOcclusion {
        rays_per_hit: NonZeroU32,
        radius: FloatType,
    },
    /// Direct light from the scene's area lights, with shadows
    AreaShadows { rays_per_light: NonZeroU32 },
    /// Color seen in a single glossy bounce around the mirror direction
    GlossyReflection { exponent: FloatType },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SecondaryQuery {
    /// Only whether anything is hit
    Occlusion,
    /// Closest hit
    Intersection,
}

impl Effect {
    /// Upper bound of secondary rays emitted by shading one primary hit.
    pub fn secondary_rays_per_hit(&self, light_count: usize) -> usize {
        match self {
            Effect::Primary => 0,
            Effect::AmbientOcclusion { rays_per_hit, .. } => rays_per_hit.get() as usize,
            Effect::AreaShadows { rays_per_light } => light_count * rays_per_light.get() as usize,
            Effect::GlossyReflection { .. } => 1,
        }
    }

    /// None if the effect emits no secondary rays.
    pub fn query(&self) -> Option<SecondaryQuery> {
        match self {
            Effect::Primary => None,
            Effect::AmbientOcclusion { .. } | Effect::AreaShadows { .. } => {
                Some(SecondaryQuery::Occlusion)
            }
            Effect::GlossyReflection { .. } => Some(SecondaryQuery::Intersection),
        }
    }

    pub fn default_normalization(&self, frame_count: NonZeroU32) -> Normalization {
        match self {
            Effect::GlossyReflection { .. } => Normalization::PerPixelWeight,
            _ => Normalization::FrameCount(frame_count),
        }
    }
}

/// What happens when shading emits more secondary rays than the queue holds.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Abort the render with [`CapacityExceeded`]
    #[default]
    Fail,
    /// Trace only the rays that fit, count the rest
    Drop,
}

#[derive(Clone, Debug, bon::Builder)]
pub struct RenderSettings {
    pub effect: Effect,
    #[builder(default = NonZeroU32::MIN)]
    pub frame_count: NonZeroU32,
    #[builder(default)]
    pub seed: u64,
    /// Jitter primary rays inside their pixel
    #[builder(default = true)]
    pub antialiasing: bool,
    #[builder(default = Rgb::new(0.0, 0.0, 0.0))]
    pub background: Rgb,
    /// Offset of secondary ray origins from the surface
    #[builder(default = 1e-3)]
    pub ray_epsilon: FloatType,
    /// Secondary queue size; default is pixel count times the rays per hit of the effect
    pub secondary_capacity: Option<usize>,
    #[builder(default)]
    pub overflow_policy: OverflowPolicy,
    /// Overrides the effect's default normalization
    pub normalization: Option<Normalization>,
}

impl RenderSettings {
    /// Normalization to resolve an accumulation of `frames_rendered` frames with.
    pub fn normalization(&self, frames_rendered: NonZeroU32) -> Normalization {
        self.normalization
            .unwrap_or_else(|| self.effect.default_normalization(frames_rendered))
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    CapacityExceeded(#[from] CapacityExceeded),
}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::assert;
    use test_case::test_case;

    fn n(v: u32) -> NonZeroU32 {
        NonZeroU32::new(v).unwrap()
    }

    #[test_case(Effect::Primary, 0 ; "primary")]
    #[test_case(
        Effect::AmbientOcclusion { rays_per_hit: n(4), radius: 1.0 }, 4 ; "ambient_occlusion"
    )]
    #[test_case(Effect::AreaShadows { rays_per_light: n(2) }, 6 ; "area_shadows")]
    #[test_case(Effect::GlossyReflection { exponent: 10.0 }, 1 ; "glossy_reflection")]
    fn rays_per_hit_with_three_lights(effect: Effect, expected: usize) {
        assert!(effect.secondary_rays_per_hit(3) == expected);
        assert!(effect.query().is_some() == (expected > 0));
    }

    #[test]
    fn normalization_defaults() {
        let settings = RenderSettings::builder()
            .effect(Effect::Primary)
            .frame_count(n(5))
            .build();
        assert!(settings.normalization(n(5)) == Normalization::FrameCount(n(5)));
        assert!(settings.normalization(n(2)) == Normalization::FrameCount(n(2)));

        let settings = RenderSettings::builder()
            .effect(Effect::GlossyReflection { exponent: 1.0 })
            .build();
        assert!(settings.normalization(n(3)) == Normalization::PerPixelWeight);

        let settings = RenderSettings::builder()
            .effect(Effect::Primary)
            .normalization(Normalization::PerPixelWeight)
            .build();
        assert!(settings.normalization(n(3)) == Normalization::PerPixelWeight);
        assert!(settings.overflow_policy == OverflowPolicy::Fail);
        assert!(settings.antialiasing);
    }
}

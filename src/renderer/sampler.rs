use std::f32::consts::PI;

use rand::{Rng as _, SeedableRng as _, rngs::SmallRng};

use crate::geometry::{FloatType, WorldVector};

/// Integer hash used to decorrelate neighboring seeds.
pub fn wang_hash(seed: u32) -> u32 {
    let mut seed = (seed ^ 61) ^ (seed >> 16);
    seed = seed.wrapping_mul(9);
    seed ^= seed >> 4;
    seed = seed.wrapping_mul(0x27d4eb2d);
    seed ^ (seed >> 15)
}

/// Random number stream of one kernel invocation.
/// The same (seed, frame, slot, dimension) always gives the same stream; kernels that
/// need independent streams for the same slot use different dimensions.
pub struct Sampler {
    rng: SmallRng,
}

impl Sampler {
    pub fn new(seed: u64, frame: u32, slot: u32, dimension: u32) -> Sampler {
        // Both seed halves go through the hash before meeting frame or slot
        let seed_low = wang_hash(seed as u32);
        let seed_high = wang_hash((seed >> 32) as u32 ^ seed_low);
        let high = wang_hash(slot ^ wang_hash(dimension ^ seed_high));
        let low = wang_hash(frame ^ seed_low);
        Sampler {
            rng: SmallRng::seed_from_u64(u64::from(high) << 32 | u64::from(low)),
        }
    }

    /// Uniform sample in [0, 1)
    pub fn sample_1d(&mut self) -> FloatType {
        self.rng.random()
    }

    pub fn sample_2d(&mut self) -> [FloatType; 2] {
        [self.sample_1d(), self.sample_1d()]
    }
}

/// Some unit vector perpendicular to `n`, `n` must be non-zero.
pub fn orthogonal_vector(n: &WorldVector) -> WorldVector {
    let p = if n.z != 0.0 {
        WorldVector::new(0.0, -n.z, n.y)
    } else {
        WorldVector::new(n.y, -n.x, 0.0)
    };
    p.normalize()
}

/// Maps a unit square sample to a direction in the hemisphere around `normal`,
/// with density proportional to cos^exponent of the angle from the normal.
/// Exponent 1 is cosine weighted, large exponents concentrate around the normal.
pub fn map_to_hemisphere(
    sample: [FloatType; 2],
    normal: &WorldVector,
    exponent: FloatType,
) -> WorldVector {
    let v = orthogonal_vector(normal).cross(normal);
    let u = normal.cross(&v);

    let (sin_psi, cos_psi) = (2.0 * PI * sample[0]).sin_cos();
    let cos_theta = (1.0 - sample[1]).powf(1.0 / (exponent + 1.0));
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();

    (u * (sin_theta * cos_psi) + v * (sin_theta * sin_psi) + normal * cos_theta).normalize()
}

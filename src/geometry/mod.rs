mod aabb;
mod ray_box_intersection;
mod ray_triangle_intersection;
mod triangle;

pub use aabb::AABB;
pub use ray_box_intersection::RayIntersectionExt;
pub use triangle::{BarycentricCoordinates, Triangle};

pub type FloatType = f32;
pub const EPSILON: FloatType = 1e-6;

pub type ScreenSize = nalgebra::Vector2<u32>;
pub type WorldPoint = nalgebra::Point3<FloatType>;
pub type WorldVector = nalgebra::Vector3<FloatType>;
pub type TexturePoint = nalgebra::Point2<FloatType>;
pub type WorldBox = AABB<WorldPoint>;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Ray {
    pub origin: WorldPoint,
    /// Normalized direction of the ray
    pub direction: WorldVector,

    /// Componentwise inverse of the ray direction
    /// Zeros in direction get turned into positive infinity regardless of the sign of the zero
    pub inv_direction: WorldVector,

    /// Valid parametric interval along the ray
    pub t_min: FloatType,
    pub t_max: FloatType,
}

impl Ray {
    pub fn new(origin: WorldPoint, direction: WorldVector) -> Ray {
        let direction = direction.normalize();
        let inv_direction = direction.map(|x| if x == 0.0 { f32::INFINITY } else { 1.0 / x });

        Ray {
            origin,
            direction,
            inv_direction,
            t_min: 0.0,
            t_max: FloatType::INFINITY,
        }
    }

    pub fn with_range(self, t_min: FloatType, t_max: FloatType) -> Ray {
        Ray {
            t_min,
            t_max,
            ..self
        }
    }

    pub fn point_at(&self, distance: FloatType) -> WorldPoint {
        self.origin + self.direction * distance
    }
}

impl Default for Ray {
    /// Placeholder ray with an empty interval, used to pre-fill ray buffers.
    fn default() -> Self {
        Ray::new(WorldPoint::origin(), WorldVector::z()).with_range(0.0, 0.0)
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use assert2::assert;
    use proptest::prelude::*;

    /// Helper macro that creates a wrapper arnound a type that implemetns Deref and Arbitary
    macro_rules! arbitrary_wrapper {
        ( $wrapper_name:ident ( $type:ty ) -> $block:block ) => {
            #[derive(Copy, Clone, Debug)]
            pub struct $wrapper_name(pub $type);

            impl std::ops::Deref for $wrapper_name {
                type Target = $type;
                fn deref(&self) -> &$type {
                    &self.0
                }
            }

            impl Arbitrary for $wrapper_name {
                type Parameters = ();
                type Strategy = proptest::strategy::BoxedStrategy<Self>;
                fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
                    $block.prop_map(|x| $wrapper_name(x)).boxed()
                }
            }
        };
    }

    fn simple_float() -> BoxedStrategy<f32> {
        (-10_000i32..10_000).prop_map(|n| n as f32 * 1e-3).boxed()
    }

    arbitrary_wrapper! {
        NonzeroWorldVectorWrapper(WorldVector) -> {
            (simple_float(), simple_float(), simple_float())
                .prop_filter_map(
                    "vector is zero",
                    |coords| {
                        let vector = WorldVector::new(coords.0, coords.1, coords.2);
                        if vector.norm() < 1e-3 {
                            None
                        } else {
                            Some(vector)
                        }
                    })
        }
    }

    arbitrary_wrapper! {
        WorldPointWrapper(WorldPoint) -> {
            (simple_float(), simple_float(), simple_float())
                .prop_map(|coords| {
                    WorldPoint::new(coords.0, coords.1, coords.2)
                })
        }
    }

    #[test]
    fn ray_direction_is_normalized() {
        let ray = Ray::new(WorldPoint::origin(), WorldVector::new(0.0, 3.0, 4.0));
        assert!((ray.direction.norm() - 1.0).abs() < 1e-6);
        assert!(ray.inv_direction.x == f32::INFINITY);
        assert!((ray.inv_direction.y - 5.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn point_at_follows_direction() {
        let ray = Ray::new(WorldPoint::new(1.0, 2.0, 3.0), WorldVector::new(0.0, 0.0, -2.0));
        assert!(ray.point_at(2.0) == WorldPoint::new(1.0, 2.0, 1.0));
    }

    #[test]
    fn default_ray_has_empty_interval() {
        let ray = Ray::default();
        assert!(ray.t_min == 0.0);
        assert!(ray.t_max == 0.0);
    }
}

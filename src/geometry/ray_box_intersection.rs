use super::{FloatType, Ray, WorldBox};

pub trait RayIntersectionExt {
    /// Calculate first and last ray intersection with the box
    fn intersect(&self, ray: &Ray) -> (FloatType, FloatType);
}

impl RayIntersectionExt for WorldBox {
    /// Returns minimum and maximum distance along the ray, ray intersects if min <= max.
    /// Ignores the ray's own interval.
    fn intersect(&self, ray: &Ray) -> (FloatType, FloatType) {
        // The multiplication is NAN if the ray is starting inside the slab bounding plane
        // and is parallel to it. In this case we blend to +-infinity, so that the range becomes
        // infinite
        let to_box_min = (self.min - ray.origin)
            .component_mul(&ray.inv_direction)
            .map(|x| if x.is_nan() { FloatType::NEG_INFINITY } else { x });
        let to_box_max = (self.max - ray.origin)
            .component_mul(&ray.inv_direction)
            .map(|x| if x.is_nan() { FloatType::INFINITY } else { x });

        // Correctly ordered (min_t <= max_t)
        let componentwise_min_t = to_box_min.zip_map(&to_box_max, FloatType::min);
        let componentwise_max_t = to_box_min.zip_map(&to_box_max, FloatType::max);

        (componentwise_min_t.max(), componentwise_max_t.min())
    }
}

#[cfg(test)]
pub mod test {
    use assert2::assert;
    use test_case::{test_case, test_matrix};

    use super::*;

    use crate::geometry::{WorldPoint, WorldVector};

    fn test_box() -> WorldBox {
        WorldBox::new([5.0, 5.0, 5.0].into(), [10.0, 10.0, 10.0].into())
    }

    /// Checks cases when the ray hits the box, including some corner cases.
    #[test_matrix(
        [5.0, 7.0, 10.0],
        [5.0, 7.0, 10.0],
        [5.0, 7.0, 10.0],
        [-1.0, 0.0, 2.0],
        [-1.0, 0.0, 2.0],
        [-1.0, 0.0, 2.0],
        [-10.0, -1.0, 0.0, 2.0, 5.0, 20.0]
    )]
    fn hit(px: f32, py: f32, pz: f32, dx: f32, dy: f32, dz: f32, origin_pos: f32) {
        if dx == 0.0 && dy == 0.0 && dz == 0.0 {
            return;
        }

        let b = test_box();

        let p = WorldPoint::new(px, py, pz);
        let d = WorldVector::new(dx, dy, dz);
        let temp_r = Ray::new(p, d);
        let origin = temp_r.point_at(origin_pos);
        let r = Ray::new(origin, d);

        let (t1, t2) = b.intersect(&r);
        assert!(
            t1 <= t2 + 1e-3,
            "The ray passes through the box, we should always have an intersection"
        );

        let p1 = r.point_at(t1);
        let p2 = r.point_at(t2);

        assert!(point_is_in_box(&p1, &b), "{p1:?} must be in {b:?}");
        assert!(point_is_in_box(&p2, &b), "{p2:?} must be in {b:?}");
    }

    /// Just a manual example of ray grazing along an edge.
    #[test]
    fn hit_along_edge() {
        let r = Ray::new(
            WorldPoint::new(5.0, 5.0, 0.0),
            WorldVector::new(0.0, 0.0, 1.0),
        );

        assert!(test_box().intersect(&r) == (5.0, 10.0));
    }

    /// Rays that lie parallel to one axis and start outside the corresponding slab
    /// must miss, even if they move toward the box on other axes or remain unchanged.
    #[test_case( 0.0,  7.0,  7.0,   0.0, 1.0, 0.0 ; "low_x_parallel_miss")]
    #[test_case(12.0,  7.0,  7.0,   0.0, 1.0, 0.0 ; "high_x_parallel_miss")]
    #[test_case( 7.0,  0.0,  7.0,   1.0, 0.0, 0.0 ; "low_y_parallel_miss")]
    #[test_case( 7.0, 12.0,  7.0,   1.0, 0.0, 0.0 ; "high_y_parallel_miss")]
    #[test_case( 7.0,  7.0,  0.0,   1.0, 0.0, 0.0 ; "low_z_parallel_miss")]
    #[test_case( 7.0,  7.0, 12.0,   1.0, 0.0, 0.0 ; "high_z_parallel_miss")]
    #[test_case( 0.0,  0.0,  0.0,  -1.0, 1.0, 1.0 ; "corner_miss")]
    fn only_misses(px: f32, py: f32, pz: f32, dx: f32, dy: f32, dz: f32) {
        let r = Ray::new(WorldPoint::new(px, py, pz), WorldVector::new(dx, dy, dz));
        let (t1, t2) = test_box().intersect(&r);

        assert!(t1 > t2);
    }

    fn point_is_in_box(p: &WorldPoint, b: &WorldBox) -> bool {
        const TOLERANCE: f32 = 1e-3;

        (0..3).all(|i| p[i] >= b.min[i] - TOLERANCE && p[i] <= b.max[i] + TOLERANCE)
    }
}

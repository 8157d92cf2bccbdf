use super::{BarycentricCoordinates, FloatType, Ray, Triangle, WorldPoint};

impl Triangle<WorldPoint> {
    /// Calculates ray intersection with the (two sided) triangle.
    /// Returns distance along ray and barycentric uv coordinates, if the hit lies inside
    /// the ray's `[t_min, t_max]` interval.
    /// Adapted from https://en.wikipedia.org/wiki/M%C3%B6ller%E2%80%93Trumbore_intersection_algorithm#Rust_implementation
    pub fn intersect(&self, ray: &Ray) -> Option<(FloatType, BarycentricCoordinates)> {
        let [e1, e2] = self.edges();

        let ray_cross_e2 = ray.direction.cross(&e2);
        let det = e1.dot(&ray_cross_e2);

        let inv_det = 1.0 / det; // May be infinite
        let s = ray.origin - self[0];
        let u = inv_det * s.dot(&ray_cross_e2);

        let s_cross_e1 = s.cross(&e1);
        let v = inv_det * ray.direction.dot(&s_cross_e1);
        let t = inv_det * e2.dot(&s_cross_e1);

        // Written so that NaNs from a degenerate determinant fail every comparison
        let inside = u >= 0.0 && v >= 0.0 && u + v <= 1.0;
        let in_range = t >= ray.t_min && t <= ray.t_max;

        if inside && in_range {
            Some((t, BarycentricCoordinates { u, v }))
        } else {
            None
        }
    }
}

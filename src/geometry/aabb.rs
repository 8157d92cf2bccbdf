use std::ops::Sub;

use nalgebra::{Point, Scalar};

use super::{WorldBox, WorldPoint};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AABB<Point> {
    pub min: Point,
    pub max: Point,
}

impl<Point> AABB<Point> {
    pub fn new(min: Point, max: Point) -> AABB<Point> {
        AABB { min, max }
    }
}

impl<Point: Sub + Copy> AABB<Point> {
    pub fn size(&self) -> Point::Output {
        self.max - self.min
    }
}

impl<T: Scalar + PartialOrd + Copy, const D: usize> AABB<Point<T, D>> {
    /// Smallest box containing all points, None for an empty iterator.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point<T, D>>) -> Option<Self>
    where
        T: 'a,
    {
        let mut points = points.into_iter();
        let first = *points.next()?;
        let mut ret = AABB {
            min: first,
            max: first,
        };
        points.for_each(|p| ret.extend(p));
        Some(ret)
    }

    pub fn extend(&mut self, point: &Point<T, D>) {
        for i in 0..D {
            if point[i] < self.min[i] {
                self.min[i] = point[i];
            }
            if point[i] > self.max[i] {
                self.max[i] = point[i];
            }
        }
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut ret = self.clone();
        ret.extend(&other.min);
        ret.extend(&other.max);
        ret
    }
}

impl WorldBox {
    pub fn center(&self) -> WorldPoint {
        nalgebra::center(&self.min, &self.max)
    }

    /// Index of the axis along which the box is the longest.
    pub fn longest_axis(&self) -> usize {
        self.size().imax()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{assert, let_assert};

    #[test]
    fn from_points_empty() {
        assert!(WorldBox::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn from_points_encloses_all() {
        let points = [
            WorldPoint::new(1.0, -2.0, 3.0),
            WorldPoint::new(-1.0, 5.0, 0.0),
            WorldPoint::new(0.0, 0.0, 10.0),
        ];
        let_assert!(Some(b) = WorldBox::from_points(&points));
        assert!(b.min == WorldPoint::new(-1.0, -2.0, 0.0));
        assert!(b.max == WorldPoint::new(1.0, 5.0, 10.0));
        assert!(b.longest_axis() == 2);
        assert!(b.center() == WorldPoint::new(0.0, 1.5, 5.0));
    }

    #[test]
    fn union_of_disjoint_boxes() {
        let a = WorldBox::new(WorldPoint::new(0.0, 0.0, 0.0), WorldPoint::new(1.0, 1.0, 1.0));
        let b = WorldBox::new(WorldPoint::new(2.0, -1.0, 0.5), WorldPoint::new(3.0, 0.0, 0.7));
        let u = a.union(&b);
        assert!(u.min == WorldPoint::new(0.0, -1.0, 0.0));
        assert!(u.max == WorldPoint::new(3.0, 1.0, 1.0));
    }
}

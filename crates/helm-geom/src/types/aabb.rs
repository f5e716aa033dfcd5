// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use helm_core::Vec2;

/// Axis-aligned bounding box in the plane.
///
/// Invariants:
/// - `min` components are less than or equal to `max` components.
/// - Values are `f32` and represent metres; whether the box is expressed in
///   world space or grid-local space depends on the owning index.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    min: Vec2,
    max: Vec2,
}

impl Aabb {
    /// Constructs an AABB from its minimum and maximum corners.
    ///
    /// # Panics
    /// Panics if any component of `min` is greater than its counterpart in
    /// `max`.
    #[must_use]
    pub fn new(min: Vec2, max: Vec2) -> Self {
        assert!(
            min.x() <= max.x() && min.y() <= max.y(),
            "invalid AABB: min > max"
        );
        Self { min, max }
    }

    /// Builds an AABB centered at `center` with half-extents `hx, hy`.
    #[must_use]
    pub fn from_center_half_extents(center: Vec2, hx: f32, hy: f32) -> Self {
        let he = Vec2::new(hx, hy);
        Self::new(center.sub(&he), center.add(&he))
    }

    /// Builds the minimal AABB containing both `a` and `b`.
    #[must_use]
    pub fn from_corners(a: Vec2, b: Vec2) -> Self {
        Self {
            min: a.min(&b),
            max: a.max(&b),
        }
    }

    /// Returns the minimum corner.
    #[must_use]
    pub const fn min(&self) -> Vec2 {
        self.min
    }

    /// Returns the maximum corner.
    #[must_use]
    pub const fn max(&self) -> Vec2 {
        self.max
    }

    /// Center point of the box.
    #[must_use]
    pub fn center(&self) -> Vec2 {
        self.min.add(&self.max).scale(0.5)
    }

    /// Width and height as a vector.
    #[must_use]
    pub fn size(&self) -> Vec2 {
        self.max.sub(&self.min)
    }

    /// Sum of edge lengths times two; the surface-area analogue used as the
    /// cost metric when descending a bounding-volume hierarchy.
    #[must_use]
    pub fn perimeter(&self) -> f32 {
        let s = self.size();
        2.0 * (s.x() + s.y())
    }

    /// Area of the box.
    #[must_use]
    pub fn area(&self) -> f32 {
        let s = self.size();
        s.x() * s.y()
    }

    /// Returns `true` if this AABB overlaps another (inclusive on edges).
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        // Inclusive to treat touching edges as overlap for broad-phase pairing.
        !(self.max.x() < other.min.x()
            || self.min.x() > other.max.x()
            || self.max.y() < other.min.y()
            || self.min.y() > other.max.y())
    }

    /// Returns `true` if `other` lies entirely inside this box (inclusive).
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.min.x() <= other.min.x()
            && self.min.y() <= other.min.y()
            && self.max.x() >= other.max.x()
            && self.max.y() >= other.max.y()
    }

    /// Returns `true` if `point` lies inside or on the boundary of the box.
    #[must_use]
    pub fn contains_point(&self, point: &Vec2) -> bool {
        self.min.x() <= point.x()
            && point.x() <= self.max.x()
            && self.min.y() <= point.y()
            && point.y() <= self.max.y()
    }

    /// Returns the union of two AABBs.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(&other.min),
            max: self.max.max(&other.max),
        }
    }

    /// Inflates the box by a uniform margin `m` in all directions.
    ///
    /// # Panics
    /// Panics if a negative `m` would invert the box.
    #[must_use]
    pub fn inflate(&self, m: f32) -> Self {
        let delta = Vec2::splat(m);
        Self::new(self.min.sub(&delta), self.max.add(&delta))
    }

    /// Translates the box by `offset`.
    #[must_use]
    pub fn translated(&self, offset: &Vec2) -> Self {
        Self {
            min: self.min.add(offset),
            max: self.max.add(offset),
        }
    }

    /// Extends the box along `displacement`, the predictive enlargement used
    /// when a moving proxy is reinserted into a bounding-volume hierarchy.
    #[must_use]
    pub fn extended_along(&self, displacement: &Vec2) -> Self {
        let mut min = self.min;
        let mut max = self.max;
        if displacement.x() < 0.0 {
            min = Vec2::new(min.x() + displacement.x(), min.y());
        } else {
            max = Vec2::new(max.x() + displacement.x(), max.y());
        }
        if displacement.y() < 0.0 {
            min = Vec2::new(min.x(), min.y() + displacement.y());
        } else {
            max = Vec2::new(max.x(), max.y() + displacement.y());
        }
        Self { min, max }
    }

    /// Fraction of mutual overlap in `0.0..=1.0`: intersection area divided
    /// by union area. Disjoint boxes yield `0.0`.
    #[must_use]
    pub fn intersect_percentage(&self, other: &Self) -> f32 {
        if !self.overlaps(other) {
            return 0.0;
        }
        let min = self.min.max(&other.min);
        let max = self.max.min(&other.max);
        let overlap = (max.x() - min.x()) * (max.y() - min.y());
        let total = self.area() + other.area() - overlap;
        if total <= 0.0 {
            // Two degenerate boxes sitting on the same point.
            return 1.0;
        }
        overlap / total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_is_inclusive_on_edges() {
        let a = Aabb::new(Vec2::ZERO, Vec2::new(1.0, 1.0));
        let b = Aabb::new(Vec2::new(1.0, 0.0), Vec2::new(2.0, 1.0));
        assert!(a.overlaps(&b));
        let c = Aabb::new(Vec2::new(1.001, 0.0), Vec2::new(2.0, 1.0));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn union_encloses_both_inputs() {
        let a = Aabb::new(Vec2::ZERO, Vec2::new(1.0, 1.0));
        let b = Aabb::new(Vec2::new(3.0, -1.0), Vec2::new(4.0, 0.5));
        let u = a.union(&b);
        assert!(u.contains(&a));
        assert!(u.contains(&b));
        assert_eq!(u.min().to_array(), [0.0, -1.0]);
        assert_eq!(u.max().to_array(), [4.0, 1.0]);
    }

    #[test]
    fn extended_along_grows_in_displacement_direction() {
        let a = Aabb::new(Vec2::ZERO, Vec2::new(1.0, 1.0));
        let e = a.extended_along(&Vec2::new(2.0, -3.0));
        assert_eq!(e.min().to_array(), [0.0, -3.0]);
        assert_eq!(e.max().to_array(), [3.0, 1.0]);
    }

    #[test]
    fn intersect_percentage_of_identical_boxes_is_one() {
        let a = Aabb::new(Vec2::ZERO, Vec2::new(2.0, 2.0));
        assert_eq!(a.intersect_percentage(&a), 1.0);
        let far = a.translated(&Vec2::new(10.0, 0.0));
        assert_eq!(a.intersect_percentage(&far), 0.0);
    }
}

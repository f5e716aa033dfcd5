// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Collidable shape geometry.

use helm_core::Vec2;

use crate::types::aabb::Aabb;
use crate::types::transform::Transform;

/// Local-space geometry attached to a fixture.
///
/// Shapes are immutable once attached. Geometry is assumed pre-validated by
/// the constructing collaborator: radii positive, polygons convex with at
/// least three vertices, chains with at least two.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// A circle with a local-space `center` offset and `radius`.
    Circle {
        /// Center offset in the owning body's local space.
        center: Vec2,
        /// Radius in metres.
        radius: f32,
    },
    /// A convex polygon given by its counter-clockwise vertices.
    Polygon(Vec<Vec2>),
    /// An open polyline; every segment is an independent child.
    Chain(Vec<Vec2>),
}

impl Shape {
    /// Number of independent children this shape contributes, each needing
    /// its own proxy.
    #[must_use]
    pub fn child_count(&self) -> usize {
        match self {
            Self::Circle { .. } | Self::Polygon(_) => 1,
            Self::Chain(points) => points.len().saturating_sub(1),
        }
    }

    /// World AABB of child `child` under `transform`.
    ///
    /// # Panics
    /// Panics if `child` is out of range for this shape; passing a stale
    /// child index is a programmer error.
    #[must_use]
    pub fn compute_aabb(&self, transform: &Transform, child: usize) -> Aabb {
        assert!(
            child < self.child_count(),
            "shape child {child} out of range"
        );
        match self {
            Self::Circle { center, radius } => {
                let world = transform.apply(center);
                Aabb::from_center_half_extents(world, *radius, *radius)
            }
            Self::Polygon(vertices) => bound_points(transform, vertices),
            Self::Chain(points) => bound_points(transform, &points[child..=child + 1]),
        }
    }
}

/// Minimal AABB over `points` mapped through `transform`.
///
/// # Panics
/// Panics if `points` is empty.
fn bound_points(transform: &Transform, points: &[Vec2]) -> Aabb {
    assert!(!points.is_empty(), "cannot bound zero points");
    let first = transform.apply(&points[0]);
    let mut min = first;
    let mut max = first;
    for p in &points[1..] {
        let world = transform.apply(p);
        min = min.min(&world);
        max = max.max(&world);
    }
    Aabb::new(min, max)
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bodies, fixtures, and the identifier vocabulary shared with the host.
//!
//! The broad-phase does not own simulation state; the host passes a [`Body`]
//! view into lifecycle calls and keeps the authoritative copy itself.

use crate::shape::Shape;
use crate::types::aabb::Aabb;
use crate::types::transform::Transform;

/// Strongly typed identifier for an independent simulation space.
///
/// Maps never interact: no pair, query, or ray ever crosses a map boundary.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MapId(pub u32);

/// Strongly typed identifier for a rigid, independently movable sub-region
/// of a map (a station, a vehicle), carrying its own spatial index.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct GridId(pub u32);

impl GridId {
    /// The per-map default index covering gridless space. Created when the
    /// map is created and removed with it.
    pub const SPACE: Self = Self(0);
}

/// Strongly typed identifier for a physics body.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BodyId(pub u64);

/// One collidable shape on a body, with its collision-filter data.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    /// Immutable local geometry.
    pub shape: Shape,
    /// Bitmask of layers this fixture occupies.
    pub collision_layer: u32,
    /// Bitmask of layers this fixture collides with.
    pub collision_mask: u32,
}

impl Fixture {
    /// Creates a fixture from its shape and filter bits.
    #[must_use]
    pub const fn new(shape: Shape, collision_layer: u32, collision_mask: u32) -> Self {
        Self {
            shape,
            collision_layer,
            collision_mask,
        }
    }

    /// Collision-filter predicate: two fixtures are candidates when either
    /// side's mask accepts the other side's layer.
    #[must_use]
    pub const fn should_collide(&self, other: &Self) -> bool {
        (self.collision_mask & other.collision_layer) != 0
            || (other.collision_mask & self.collision_layer) != 0
    }
}

/// Host-owned view of a physics body handed to broad-phase lifecycle calls.
///
/// The ordered fixture list and the world transform are authoritative at the
/// moment of the call; the broad-phase copies what it needs into proxies and
/// never retains a reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    /// Stable identifier.
    pub id: BodyId,
    /// Map the body currently lives on.
    pub map: MapId,
    /// Current world transform.
    pub transform: Transform,
    /// Ordered fixture list; order defines the fixture index used by proxy
    /// bookkeeping.
    pub fixtures: Vec<Fixture>,
}

impl Body {
    /// World AABB: the union of every fixture child's AABB at `transform`.
    ///
    /// A body with no fixtures degenerates to a zero-size box at its
    /// position.
    #[must_use]
    pub fn world_aabb(&self) -> Aabb {
        self.world_aabb_at(&self.transform)
    }

    /// World AABB evaluated at an arbitrary transform, used for swept-bound
    /// computation during synchronization.
    #[must_use]
    pub fn world_aabb_at(&self, transform: &Transform) -> Aabb {
        let mut bounds: Option<Aabb> = None;
        for fixture in &self.fixtures {
            for child in 0..fixture.shape.child_count() {
                let aabb = fixture.shape.compute_aabb(transform, child);
                bounds = Some(match bounds {
                    Some(acc) => acc.union(&aabb),
                    None => aabb,
                });
            }
        }
        bounds.unwrap_or_else(|| Aabb::new(transform.position(), transform.position()))
    }
}

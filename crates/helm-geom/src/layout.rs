// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Collaborator seams the broad-phase depends on.
//!
//! The broad-phase never reaches into ambient state: whoever owns the map
//! tables, the body store, and gameplay collision rules passes them in
//! through these traits at the call site.

use helm_core::Vec2;
use rustc_hash::FxHashMap;

use crate::body::{Body, BodyId, GridId, MapId};
use crate::types::aabb::Aabb;

/// Where grids sit inside their maps.
///
/// `GridId::SPACE` is implicit and never reported by
/// [`MapLayout::grids_intersecting`]; the broad-phase itself decides when
/// the space index participates.
pub trait MapLayout {
    /// Visits every real grid on `map` whose world bounds intersect `aabb`.
    fn grids_intersecting(&self, map: MapId, aabb: &Aabb, visitor: &mut dyn FnMut(GridId));

    /// Whether a single grid's world bounds fully enclose `aabb`. Bodies
    /// that are not enclosed spill into gridless space and keep proxies in
    /// the space index too.
    fn enclosed_by_grid(&self, map: MapId, aabb: &Aabb) -> bool;

    /// World-space origin of `grid`, the offset between grid-local and
    /// world coordinates. The space grid's origin is the world origin.
    fn grid_origin(&self, map: MapId, grid: GridId) -> Vec2;
}

/// Read access to host-owned bodies, used when draining queued events.
pub trait BodySource {
    /// The current view of `body`, or `None` if it was deleted.
    fn body(&self, body: BodyId) -> Option<&Body>;
}

impl BodySource for FxHashMap<BodyId, Body> {
    fn body(&self, body: BodyId) -> Option<&Body> {
        self.get(&body)
    }
}

impl BodySource for std::collections::HashMap<BodyId, Body> {
    fn body(&self, body: BodyId) -> Option<&Body> {
        self.get(&body)
    }
}

/// Gameplay veto over pairs that pass the layer/mask filter.
///
/// Consulted symmetrically: a pair is dropped when either participant
/// prevents collision with the other.
pub trait CollisionModifier {
    /// Whether `body` refuses to collide with `other`.
    fn prevent_collision(&self, body: BodyId, other: BodyId) -> bool;
}

/// The "no gameplay rules" modifier.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoModifier;

impl CollisionModifier for NoModifier {
    fn prevent_collision(&self, _body: BodyId, _other: BodyId) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
struct GridRect {
    origin: Vec2,
    bounds: Aabb,
}

/// A plain rectangle registry implementing [`MapLayout`].
///
/// Suitable for hosts (and tests) that have no map system of their own:
/// grids are static axis-aligned rectangles registered per map. Hosts with
/// moving or rotating grids implement [`MapLayout`] over their own
/// transform data instead.
#[derive(Debug, Default)]
pub struct GridAtlas {
    maps: FxHashMap<MapId, FxHashMap<GridId, GridRect>>,
}

impl GridAtlas {
    /// Creates an empty atlas.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `map`; idempotent.
    pub fn add_map(&mut self, map: MapId) {
        self.maps.entry(map).or_default();
    }

    /// Unregisters `map` and all its grids.
    pub fn remove_map(&mut self, map: MapId) {
        self.maps.remove(&map);
    }

    /// Registers (or re-registers) `grid` on `map` with its world `origin`
    /// and world-space `bounds`.
    ///
    /// # Panics
    /// Panics if `grid` is [`GridId::SPACE`]; the space grid is implicit.
    pub fn add_grid(&mut self, map: MapId, grid: GridId, origin: Vec2, bounds: Aabb) {
        assert!(grid != GridId::SPACE, "the space grid cannot be registered");
        self.maps
            .entry(map)
            .or_default()
            .insert(grid, GridRect { origin, bounds });
    }

    /// Unregisters `grid` from `map`.
    pub fn remove_grid(&mut self, map: MapId, grid: GridId) {
        if let Some(grids) = self.maps.get_mut(&map) {
            grids.remove(&grid);
        }
    }
}

impl MapLayout for GridAtlas {
    fn grids_intersecting(&self, map: MapId, aabb: &Aabb, visitor: &mut dyn FnMut(GridId)) {
        let Some(grids) = self.maps.get(&map) else {
            return;
        };
        // Deterministic visit order regardless of hash state.
        let mut hits: Vec<GridId> = grids
            .iter()
            .filter(|(_, rect)| rect.bounds.overlaps(aabb))
            .map(|(grid, _)| *grid)
            .collect();
        hits.sort_unstable();
        for grid in hits {
            visitor(grid);
        }
    }

    fn enclosed_by_grid(&self, map: MapId, aabb: &Aabb) -> bool {
        self.maps.get(&map).is_some_and(|grids| {
            grids.values().any(|rect| rect.bounds.contains(aabb))
        })
    }

    fn grid_origin(&self, map: MapId, grid: GridId) -> Vec2 {
        if grid == GridId::SPACE {
            return Vec2::ZERO;
        }
        self.maps
            .get(&map)
            .and_then(|grids| grids.get(&grid))
            .map_or(Vec2::ZERO, |rect| rect.origin)
    }
}

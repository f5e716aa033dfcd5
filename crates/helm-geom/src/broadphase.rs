// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The broad-phase orchestrator.
//!
//! Owns the `Map → Grid → Index` registry and the per-body membership
//! records, drives proxy lifecycle off transform and map events, and fans
//! queries and ray casts out across grids. This is the single public
//! surface; nothing outside this module talks to a grid index directly.
//!
//! Frame contract: queue events as they arrive, drain them with
//! [`Broadphase::process_queued`], and only then call
//! [`Broadphase::update_pairs`] — pair generation must observe fully
//! synchronized bounds. Everything is synchronous and single-threaded;
//! sharing a `Broadphase` across threads is unsupported.
//!
//! Registry misses are never silently skipped. If membership bookkeeping
//! says a map, grid, or body should exist and it does not, the call returns
//! an error immediately; skipping would corrupt every later query in ways
//! that are much harder to diagnose.

use helm_core::Vec2;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::body::{Body, BodyId, GridId, MapId};
use crate::broad::{AwakeSet, GridIndex, IndexKind, ProxyId, ProxyPayload, RayFlow, SpatialIndex};
use crate::error::BroadphaseError;
use crate::layout::{BodySource, CollisionModifier, MapLayout};
use crate::types::aabb::Aabb;
use crate::types::ray::Ray;
use crate::types::transform::Transform;

/// Globally addressable proxy: which map and grid the handle belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ProxyHandle {
    /// Map owning the index.
    pub map: MapId,
    /// Grid owning the index.
    pub grid: GridId,
    /// Handle within that index.
    pub proxy: ProxyId,
}

/// One ray-cast hit, ordered ascending by `distance` in merged results.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RayHit {
    /// Body owning the hit proxy.
    pub body: BodyId,
    /// World-space entry point on the proxy's bound.
    pub point: Vec2,
    /// Distance from the ray origin to `point`.
    pub distance: f32,
}

/// A queued transform move: the body travelled `before → after` this tick.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MoveEvent {
    /// Body that moved.
    pub body: BodyId,
    /// Transform at the previous synchronization.
    pub before: Transform,
    /// Transform now.
    pub after: Transform,
}

/// A queued map change: the body left `old_map` for its current map.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MapChangeEvent {
    /// Body that changed maps.
    pub body: BodyId,
    /// Map it was registered on before.
    pub old_map: MapId,
}

/// A queued collision toggle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CollisionChangeEvent {
    /// Body whose collision flag flipped.
    pub body: BodyId,
    /// New state of the flag.
    pub enabled: bool,
}

/// A queued fixture rebuild: shape or filter data changed in place.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FixtureUpdateEvent {
    /// Body owning the fixture.
    pub body: BodyId,
    /// Index into the body's ordered fixture list.
    pub fixture: u32,
}

#[derive(Debug)]
struct BodyState {
    map: MapId,
    /// Live proxies per grid; the key set is the body's grid membership.
    proxies: FxHashMap<GridId, Vec<ProxyId>>,
}

/// Multi-map, multi-grid broad-phase front end.
#[derive(Debug)]
pub struct Broadphase {
    default_kind: IndexKind,
    graph: FxHashMap<MapId, FxHashMap<GridId, GridIndex>>,
    bodies: FxHashMap<BodyId, BodyState>,
    queued_moves: Vec<MoveEvent>,
    queued_map_changes: Vec<MapChangeEvent>,
    queued_collision_changes: Vec<CollisionChangeEvent>,
    queued_fixture_updates: Vec<FixtureUpdateEvent>,
}

impl Default for Broadphase {
    fn default() -> Self {
        Self::new(IndexKind::DynamicTree)
    }
}

impl Broadphase {
    /// Creates an empty broad-phase; `default_kind` is the index strategy
    /// grids receive unless created with an explicit one.
    #[must_use]
    pub fn new(default_kind: IndexKind) -> Self {
        Self {
            default_kind,
            graph: FxHashMap::default(),
            bodies: FxHashMap::default(),
            queued_moves: Vec::new(),
            queued_map_changes: Vec::new(),
            queued_collision_changes: Vec::new(),
            queued_fixture_updates: Vec::new(),
        }
    }

    /// Strategy used for grids created without an explicit kind.
    #[must_use]
    pub const fn default_kind(&self) -> IndexKind {
        self.default_kind
    }

    // ── Registry lifecycle ──────────────────────────────────────────

    /// Handles a map-created event: registers the map and its space index.
    /// Idempotent.
    pub fn on_map_created(&mut self, map: MapId) {
        let kind = self.default_kind;
        self.graph.entry(map).or_insert_with(|| {
            debug!(?map, "map created");
            let mut grids = FxHashMap::default();
            grids.insert(GridId::SPACE, GridIndex::new(kind));
            grids
        });
    }

    /// Handles a map-removed event: tears down every index on the map and
    /// forgets every body registered there.
    pub fn on_map_removed(&mut self, map: MapId) -> Result<(), BroadphaseError> {
        if self.graph.remove(&map).is_none() {
            return Err(BroadphaseError::MissingMap(map));
        }
        self.bodies.retain(|_, state| state.map != map);
        debug!(?map, "map removed");
        Ok(())
    }

    /// Handles a grid-created event using the default index strategy.
    pub fn on_grid_created(&mut self, map: MapId, grid: GridId) -> Result<(), BroadphaseError> {
        self.on_grid_created_with(map, grid, self.default_kind)
    }

    /// Handles a grid-created event with an explicit strategy. The choice is
    /// fixed for the grid's lifetime.
    ///
    /// # Panics
    /// Panics if `grid` is [`GridId::SPACE`]; the space index is managed by
    /// map lifecycle.
    pub fn on_grid_created_with(
        &mut self,
        map: MapId,
        grid: GridId,
        kind: IndexKind,
    ) -> Result<(), BroadphaseError> {
        assert!(grid != GridId::SPACE, "space index is created with its map");
        let grids = self
            .graph
            .get_mut(&map)
            .ok_or(BroadphaseError::MissingMap(map))?;
        grids.insert(grid, GridIndex::new(kind));
        debug!(?map, ?grid, ?kind, "grid created");
        Ok(())
    }

    /// Handles a grid-removed event: drops the index and every proxy in it,
    /// then re-homes affected bodies onto the grids (usually space) their
    /// bounds still cover.
    pub fn on_grid_removed(
        &mut self,
        map: MapId,
        grid: GridId,
        source: &impl BodySource,
        layout: &impl MapLayout,
    ) -> Result<(), BroadphaseError> {
        let grids = self
            .graph
            .get_mut(&map)
            .ok_or(BroadphaseError::MissingMap(map))?;
        if grids.remove(&grid).is_none() {
            return Err(BroadphaseError::MissingGrid(map, grid));
        }

        let mut affected: Vec<BodyId> = Vec::new();
        for (id, state) in &mut self.bodies {
            if state.map == map && state.proxies.remove(&grid).is_some() {
                affected.push(*id);
            }
        }
        affected.sort_unstable();
        debug!(?map, ?grid, bodies = affected.len(), "grid removed");

        for id in affected {
            let Some(view) = source.body(id) else {
                continue;
            };
            let membership = Self::membership(layout, map, &view.world_aabb());
            for gained in membership {
                if self.body_state(id)?.proxies.contains_key(&gained) {
                    continue;
                }
                let transform = view.transform;
                let ids = self.create_proxies_in_grid(view, gained, &transform, layout)?;
                if let Some(state) = self.bodies.get_mut(&id) {
                    state.proxies.insert(gained, ids);
                }
            }
        }
        Ok(())
    }

    // ── Body lifecycle ──────────────────────────────────────────────

    /// Registers `body`: computes the grids its world AABB intersects and
    /// creates one proxy per fixture child in each of their indexes.
    pub fn add_body(
        &mut self,
        body: &Body,
        layout: &impl MapLayout,
    ) -> Result<(), BroadphaseError> {
        if self.bodies.contains_key(&body.id) {
            return Err(BroadphaseError::BodyAlreadyRegistered(body.id));
        }
        self.graph_of(body.map)?;

        let membership = Self::membership(layout, body.map, &body.world_aabb());
        let mut proxies: FxHashMap<GridId, Vec<ProxyId>> = FxHashMap::default();
        for grid in membership {
            let ids = self.create_proxies_in_grid(body, grid, &body.transform, layout)?;
            proxies.insert(grid, ids);
        }
        trace!(body = ?body.id, grids = proxies.len(), "body registered");
        self.bodies.insert(
            body.id,
            BodyState {
                map: body.map,
                proxies,
            },
        );
        Ok(())
    }

    /// Unregisters `body`, removing all of its proxies everywhere.
    pub fn remove_body(&mut self, body: BodyId) -> Result<(), BroadphaseError> {
        let BodyState { map, proxies } = self
            .bodies
            .remove(&body)
            .ok_or(BroadphaseError::MissingBody(body))?;
        let mut entries: Vec<(GridId, Vec<ProxyId>)> = proxies.into_iter().collect();
        entries.sort_unstable_by_key(|(grid, _)| *grid);
        for (grid, ids) in entries {
            let index = self.index_of_mut(map, grid)?;
            for id in ids {
                index.remove_proxy(id);
            }
        }
        trace!(?body, "body unregistered");
        Ok(())
    }

    /// Whether `body` currently has membership records.
    #[must_use]
    pub fn is_registered(&self, body: BodyId) -> bool {
        self.bodies.contains_key(&body)
    }

    /// Re-synchronizes a moved body: recomputes grid membership, destroys
    /// proxies on grids lost, creates them on grids gained, and moves
    /// retained proxies to the swept bound of the shape at both transforms
    /// so fast motion cannot tunnel between discrete steps.
    pub fn synchronize_fixtures(
        &mut self,
        body: &Body,
        before: &Transform,
        after: &Transform,
        layout: &impl MapLayout,
    ) -> Result<(), BroadphaseError> {
        let state = self
            .bodies
            .get(&body.id)
            .ok_or(BroadphaseError::MissingBody(body.id))?;
        debug_assert_eq!(state.map, body.map, "map changes go through handle_map_change");

        let aabb_after = body.world_aabb_at(after);
        let new_membership = Self::membership(layout, body.map, &aabb_after);
        let mut old_grids: Vec<GridId> = state.proxies.keys().copied().collect();
        old_grids.sort_unstable();

        // Grids lost: drop the proxies and the membership entry.
        for grid in old_grids
            .iter()
            .copied()
            .filter(|grid| !new_membership.contains(grid))
        {
            let ids = match self.bodies.get_mut(&body.id) {
                Some(state) => state.proxies.remove(&grid).unwrap_or_default(),
                None => unreachable!(),
            };
            let index = self.index_of_mut(body.map, grid)?;
            for id in ids {
                index.remove_proxy(id);
            }
        }

        // Grids retained: move every proxy to its swept bound.
        let displacement = after.position().sub(&before.position());
        for grid in old_grids
            .iter()
            .copied()
            .filter(|grid| new_membership.contains(grid))
        {
            let ids: Vec<ProxyId> = self
                .body_state(body.id)?
                .proxies
                .get(&grid)
                .cloned()
                .unwrap_or_default();
            let origin = layout.grid_origin(body.map, grid);
            let index = self.index_of_mut(body.map, grid)?;
            for id in ids {
                let (fixture_index, child) = {
                    let payload = index.payload(id);
                    (payload.fixture as usize, payload.child as usize)
                };
                let shape = &body.fixtures[fixture_index].shape;
                let swept = shape
                    .compute_aabb(before, child)
                    .union(&shape.compute_aabb(after, child))
                    .translated(&origin.neg());
                index.move_proxy(id, swept, displacement);
            }
        }

        // Grids gained: fresh proxies at the current transform.
        for grid in new_membership
            .iter()
            .copied()
            .filter(|grid| !old_grids.contains(grid))
        {
            let ids = self.create_proxies_in_grid(body, grid, after, layout)?;
            if let Some(state) = self.bodies.get_mut(&body.id) {
                state.proxies.insert(grid, ids);
            }
        }
        Ok(())
    }

    /// Moves a body between maps: full teardown on the old map's indexes,
    /// full rebuild on the new map's. Proxies never migrate across maps.
    pub fn handle_map_change(
        &mut self,
        body: &Body,
        old_map: MapId,
        layout: &impl MapLayout,
    ) -> Result<(), BroadphaseError> {
        let state = self
            .bodies
            .get_mut(&body.id)
            .ok_or(BroadphaseError::MissingBody(body.id))?;
        debug_assert_eq!(state.map, old_map);
        let mut old_entries: Vec<(GridId, Vec<ProxyId>)> = state.proxies.drain().collect();
        old_entries.sort_unstable_by_key(|(grid, _)| *grid);
        state.map = body.map;

        for (grid, ids) in old_entries {
            let index = self.index_of_mut(old_map, grid)?;
            for id in ids {
                index.remove_proxy(id);
            }
        }

        self.graph_of(body.map)?;
        let membership = Self::membership(layout, body.map, &body.world_aabb());
        for grid in membership {
            let ids = self.create_proxies_in_grid(body, grid, &body.transform, layout)?;
            if let Some(state) = self.bodies.get_mut(&body.id) {
                state.proxies.insert(grid, ids);
            }
        }
        trace!(body = ?body.id, ?old_map, new_map = ?body.map, "body changed maps");
        Ok(())
    }

    /// Creates proxies for one fixture across every grid in the owning
    /// body's membership; the complement of [`Self::destroy_fixture_proxies`]
    /// when a fixture is added to a live body.
    pub fn create_fixture_proxies(
        &mut self,
        body: &Body,
        fixture: u32,
        layout: &impl MapLayout,
    ) -> Result<(), BroadphaseError> {
        let mut grids: Vec<GridId> = self.body_state(body.id)?.proxies.keys().copied().collect();
        grids.sort_unstable();
        for grid in grids {
            let ids =
                self.create_fixture_proxies_in_grid(body, fixture, grid, &body.transform, layout)?;
            if let Some(state) = self.bodies.get_mut(&body.id) {
                match state.proxies.get_mut(&grid) {
                    Some(existing) => existing.extend(ids),
                    None => unreachable!(),
                }
            }
        }
        Ok(())
    }

    /// Destroys one fixture's proxies across every grid in the owning
    /// body's membership. Membership itself is untouched.
    pub fn destroy_fixture_proxies(
        &mut self,
        body: BodyId,
        fixture: u32,
    ) -> Result<(), BroadphaseError> {
        let map = self.body_state(body)?.map;
        let mut grids: Vec<GridId> = self.body_state(body)?.proxies.keys().copied().collect();
        grids.sort_unstable();
        for grid in grids {
            let ids: Vec<ProxyId> = self
                .body_state(body)?
                .proxies
                .get(&grid)
                .cloned()
                .unwrap_or_default();
            let index = self.index_of_mut(map, grid)?;
            let mut kept = Vec::with_capacity(ids.len());
            for id in ids {
                if index.payload(id).fixture == fixture {
                    index.remove_proxy(id);
                } else {
                    kept.push(id);
                }
            }
            if let Some(state) = self.bodies.get_mut(&body) {
                state.proxies.insert(grid, kept);
            }
        }
        Ok(())
    }

    /// Rebuilds one fixture's proxies after its shape or filter changed.
    pub fn refresh_fixture(
        &mut self,
        body: &Body,
        fixture: u32,
        layout: &impl MapLayout,
    ) -> Result<(), BroadphaseError> {
        self.destroy_fixture_proxies(body.id, fixture)?;
        self.create_fixture_proxies(body, fixture, layout)
    }

    /// Applies a collision toggle: enabling registers the body, disabling
    /// unregisters it. Idempotent in both directions.
    pub fn set_collision_enabled(
        &mut self,
        body: &Body,
        enabled: bool,
        layout: &impl MapLayout,
    ) -> Result<(), BroadphaseError> {
        match (enabled, self.is_registered(body.id)) {
            (true, false) => self.add_body(body, layout),
            (false, true) => self.remove_body(body.id),
            _ => Ok(()),
        }
    }

    // ── Queued event intake ─────────────────────────────────────────

    /// Queues a transform move for the next [`Self::process_queued`].
    pub fn queue_move(&mut self, event: MoveEvent) {
        self.queued_moves.push(event);
    }

    /// Queues a map change.
    pub fn queue_map_change(&mut self, event: MapChangeEvent) {
        self.queued_map_changes.push(event);
    }

    /// Queues a collision toggle.
    pub fn queue_collision_change(&mut self, event: CollisionChangeEvent) {
        self.queued_collision_changes.push(event);
    }

    /// Queues a fixture rebuild.
    pub fn queue_fixture_update(&mut self, event: FixtureUpdateEvent) {
        self.queued_fixture_updates.push(event);
    }

    /// Drains every queued event in arrival order: moves first (one per
    /// body per drain; move and rotate raise the same event and would
    /// double the work), then map changes, collision toggles, and fixture
    /// updates. Call once per tick, before [`Self::update_pairs`].
    ///
    /// Bodies the source no longer knows are unregistered instead of
    /// processed; bodies that were never registered are skipped.
    pub fn process_queued(
        &mut self,
        source: &impl BodySource,
        layout: &impl MapLayout,
    ) -> Result<(), BroadphaseError> {
        let mut handled: FxHashSet<BodyId> = FxHashSet::default();
        for event in std::mem::take(&mut self.queued_moves) {
            if !handled.insert(event.body) {
                continue;
            }
            match source.body(event.body) {
                None => {
                    if self.is_registered(event.body) {
                        self.remove_body(event.body)?;
                    }
                }
                Some(view) => {
                    if self.is_registered(event.body) {
                        // The view's transform is the body's final pose this
                        // tick; sweeping from the first queued `before` to it
                        // covers the whole motion even when later move events
                        // for the body were deduplicated away.
                        let after = view.transform;
                        self.synchronize_fixtures(view, &event.before, &after, layout)?;
                    }
                }
            }
        }

        for event in std::mem::take(&mut self.queued_map_changes) {
            match source.body(event.body) {
                None => {
                    if self.is_registered(event.body) {
                        self.remove_body(event.body)?;
                    }
                }
                Some(view) => {
                    if self.is_registered(event.body) {
                        self.handle_map_change(view, event.old_map, layout)?;
                    }
                }
            }
        }

        for event in std::mem::take(&mut self.queued_collision_changes) {
            match source.body(event.body) {
                None => {
                    if self.is_registered(event.body) {
                        self.remove_body(event.body)?;
                    }
                }
                Some(view) => {
                    self.set_collision_enabled(view, event.enabled, layout)?;
                }
            }
        }

        for event in std::mem::take(&mut self.queued_fixture_updates) {
            if let Some(view) = source.body(event.body) {
                if self.is_registered(event.body) {
                    self.refresh_fixture(view, event.fixture, layout)?;
                }
            }
        }
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Runs pair generation on every index of `map`, forwarding each unique
    /// candidate pair once. Grids are visited in ascending id order so the
    /// emission sequence is deterministic.
    pub fn update_pairs(
        &mut self,
        map: MapId,
        awake: &impl AwakeSet,
        callback: &mut impl FnMut(ProxyHandle, &ProxyPayload, ProxyHandle, &ProxyPayload),
    ) -> Result<(), BroadphaseError> {
        let grids = self
            .graph
            .get_mut(&map)
            .ok_or(BroadphaseError::MissingMap(map))?;
        let mut ids: Vec<GridId> = grids.keys().copied().collect();
        ids.sort_unstable();
        for grid in ids {
            let Some(index) = grids.get_mut(&grid) else {
                unreachable!()
            };
            index.update_pairs(awake, &mut |a, pa, b, pb| {
                callback(
                    ProxyHandle {
                        map,
                        grid,
                        proxy: a,
                    },
                    pa,
                    ProxyHandle {
                        map,
                        grid,
                        proxy: b,
                    },
                    pb,
                );
            });
        }
        Ok(())
    }

    /// Exact AABB overlap between two live proxies; `false` without
    /// touching geometry when they live on different maps.
    pub fn test_overlap(
        &self,
        a: ProxyHandle,
        b: ProxyHandle,
    ) -> Result<bool, BroadphaseError> {
        if a.map != b.map {
            return Ok(false);
        }
        let bound_a = self.index_of(a.map, a.grid)?.payload(a.proxy).aabb;
        let bound_b = self.index_of(b.map, b.grid)?.payload(b.proxy).aabb;
        Ok(bound_a.overlaps(&bound_b))
    }

    /// World-AABB overlap ratio of two bodies in `0.0..=1.0`, ignoring
    /// collision filters. Bodies on different maps never overlap.
    #[must_use]
    pub fn intersection_percent(a: &Body, b: &Body) -> f32 {
        if a.map != b.map {
            return 0.0;
        }
        a.world_aabb().intersect_percentage(&b.world_aabb())
    }

    /// Distinct bodies whose proxies intersect `aabb` on `map`, ascending
    /// by id. `approximate` skips the tight-bound re-test.
    pub fn bodies_intersecting(
        &self,
        map: MapId,
        aabb: &Aabb,
        approximate: bool,
        layout: &impl MapLayout,
    ) -> Result<Vec<BodyId>, BroadphaseError> {
        let mut found: FxHashSet<BodyId> = FxHashSet::default();
        for grid in self.query_targets(layout, map, aabb)? {
            let origin = layout.grid_origin(map, grid);
            let index = self.index_of(map, grid)?;
            let local = aabb.translated(&origin.neg());
            index.query(&local, approximate, &mut |_, payload| {
                found.insert(payload.body);
                true
            });
        }
        let mut out: Vec<BodyId> = found.into_iter().collect();
        out.sort_unstable();
        Ok(out)
    }

    /// Whether any collidable proxy (non-zero layer) intersects `rect`.
    pub fn any_colliding_in_rect(
        &self,
        map: MapId,
        rect: &Aabb,
        layout: &impl MapLayout,
    ) -> Result<bool, BroadphaseError> {
        let mut found = false;
        for grid in self.query_targets(layout, map, rect)? {
            let origin = layout.grid_origin(map, grid);
            let index = self.index_of(map, grid)?;
            let local = rect.translated(&origin.neg());
            index.query(&local, false, &mut |_, payload| {
                if payload.collision_layer == 0 {
                    return true;
                }
                found = true;
                false
            });
            if found {
                break;
            }
        }
        Ok(found)
    }

    /// Bodies whose proxies overlap any of `body`'s proxies and pass both
    /// the mask filter and the symmetric gameplay veto, ascending by id.
    pub fn colliding_bodies(
        &self,
        body: &Body,
        modifier: &impl CollisionModifier,
    ) -> Result<Vec<BodyId>, BroadphaseError> {
        let state = self.body_state(body.id)?;
        let mut grids: Vec<GridId> = state.proxies.keys().copied().collect();
        grids.sort_unstable();

        let mut found: FxHashSet<BodyId> = FxHashSet::default();
        for grid in grids {
            let index = self.index_of(state.map, grid)?;
            let ids = state.proxies.get(&grid).cloned().unwrap_or_default();
            for own_id in ids {
                let own = index.payload(own_id).clone();
                index.query(&own.aabb, false, &mut |other_id, other| {
                    if other_id == own_id || other.body == body.id {
                        return true;
                    }
                    if (own.collision_mask & other.collision_layer) == 0 {
                        return true;
                    }
                    if modifier.prevent_collision(body.id, other.body)
                        || modifier.prevent_collision(other.body, body.id)
                    {
                        return true;
                    }
                    found.insert(other.body);
                    true
                });
            }
        }
        let mut out: Vec<BodyId> = found.into_iter().collect();
        out.sort_unstable();
        Ok(out)
    }

    /// Casts `ray` across every grid its sweep touches, keeping hits whose
    /// proxy layer intersects `collision_mask` and for which `predicate`
    /// returns `false` (`true` means "ignore this body"). Results are
    /// merged and sorted ascending by distance; `return_on_first_hit`
    /// short-circuits remaining grid scans and returns at most one hit.
    pub fn intersect_ray_with_predicate(
        &self,
        map: MapId,
        ray: &Ray,
        max_distance: f32,
        collision_mask: u32,
        predicate: &dyn Fn(BodyId) -> bool,
        return_on_first_hit: bool,
        layout: &impl MapLayout,
    ) -> Result<Vec<RayHit>, BroadphaseError> {
        let sweep = Aabb::from_corners(ray.origin(), ray.at(max_distance));
        let mut hits: Vec<RayHit> = Vec::new();
        for grid in self.query_targets(layout, map, &sweep)? {
            if return_on_first_hit && !hits.is_empty() {
                break;
            }
            let origin = layout.grid_origin(map, grid);
            let index = self.index_of(map, grid)?;
            let grid_ray = ray.translated(&origin.neg());
            index.ray_cast(&grid_ray, max_distance, &mut |_, payload, point, distance| {
                if (payload.collision_layer & collision_mask) == 0 {
                    return RayFlow::Continue;
                }
                if predicate(payload.body) {
                    return RayFlow::Continue;
                }
                hits.push(RayHit {
                    body: payload.body,
                    point: point.add(&origin),
                    distance,
                });
                RayFlow::Continue
            });
        }
        hits.sort_by(|x, y| x.distance.total_cmp(&y.distance).then(x.body.cmp(&y.body)));
        if return_on_first_hit {
            hits.truncate(1);
        }
        Ok(hits)
    }

    /// [`Self::intersect_ray_with_predicate`] with the common "ignore one
    /// body" filter, for rays starting inside their caster.
    pub fn intersect_ray(
        &self,
        map: MapId,
        ray: &Ray,
        max_distance: f32,
        collision_mask: u32,
        ignored: Option<BodyId>,
        return_on_first_hit: bool,
        layout: &impl MapLayout,
    ) -> Result<Vec<RayHit>, BroadphaseError> {
        self.intersect_ray_with_predicate(
            map,
            ray,
            max_distance,
            collision_mask,
            &|body| Some(body) == ignored,
            return_on_first_hit,
            layout,
        )
    }

    /// Total distance the ray spends inside matching proxies, summed over
    /// every hit within `max_distance`.
    pub fn intersect_ray_penetration(
        &self,
        map: MapId,
        ray: &Ray,
        max_distance: f32,
        collision_mask: u32,
        ignored: Option<BodyId>,
        layout: &impl MapLayout,
    ) -> Result<f32, BroadphaseError> {
        let sweep = Aabb::from_corners(ray.origin(), ray.at(max_distance));
        let mut penetration = 0.0_f32;
        for grid in self.query_targets(layout, map, &sweep)? {
            let origin = layout.grid_origin(map, grid);
            let index = self.index_of(map, grid)?;
            let grid_ray = ray.translated(&origin.neg());
            index.ray_cast(&grid_ray, max_distance, &mut |_, payload, _, _| {
                if (payload.collision_layer & collision_mask) == 0 {
                    return RayFlow::Continue;
                }
                if Some(payload.body) == ignored {
                    return RayFlow::Continue;
                }
                if let Some(span) = grid_ray.intersect_aabb(&payload.aabb) {
                    penetration += span.exit.min(max_distance) - span.enter;
                }
                RayFlow::Continue
            });
        }
        Ok(penetration)
    }

    /// Rebases `map`'s world frame to `new_origin` after a floating-origin
    /// shift. Only the space index stores world-frame bounds; grid-local
    /// indexes are untouched because their origins rebase with the layout.
    pub fn shift_origin(
        &mut self,
        map: MapId,
        new_origin: Vec2,
    ) -> Result<(), BroadphaseError> {
        let grids = self
            .graph
            .get_mut(&map)
            .ok_or(BroadphaseError::MissingMap(map))?;
        let space = grids
            .get_mut(&GridId::SPACE)
            .ok_or(BroadphaseError::MissingGrid(map, GridId::SPACE))?;
        space.shift_origin(new_origin)?;
        debug!(?map, origin = ?new_origin.to_array(), "origin shifted");
        Ok(())
    }

    // ── Introspection ───────────────────────────────────────────────

    /// The index registered for `(map, grid)`.
    pub fn grid_index(&self, map: MapId, grid: GridId) -> Result<&GridIndex, BroadphaseError> {
        self.index_of(map, grid)
    }

    /// Grid membership of `body`, ascending.
    pub fn body_grids(&self, body: BodyId) -> Result<Vec<GridId>, BroadphaseError> {
        let mut grids: Vec<GridId> = self.body_state(body)?.proxies.keys().copied().collect();
        grids.sort_unstable();
        Ok(grids)
    }

    /// Every live proxy of `body`, ordered by grid then handle.
    pub fn body_proxies(&self, body: BodyId) -> Result<Vec<ProxyHandle>, BroadphaseError> {
        let state = self.body_state(body)?;
        let map = state.map;
        let mut out: Vec<ProxyHandle> = state
            .proxies
            .iter()
            .flat_map(|(grid, ids)| {
                let grid = *grid;
                ids.iter().map(move |proxy| ProxyHandle {
                    map,
                    grid,
                    proxy: *proxy,
                })
            })
            .collect();
        out.sort_unstable_by_key(|handle| (handle.grid, handle.proxy));
        Ok(out)
    }

    // ── Internals ───────────────────────────────────────────────────

    fn graph_of(
        &self,
        map: MapId,
    ) -> Result<&FxHashMap<GridId, GridIndex>, BroadphaseError> {
        self.graph.get(&map).ok_or(BroadphaseError::MissingMap(map))
    }

    fn index_of(&self, map: MapId, grid: GridId) -> Result<&GridIndex, BroadphaseError> {
        self.graph_of(map)?
            .get(&grid)
            .ok_or(BroadphaseError::MissingGrid(map, grid))
    }

    fn index_of_mut(
        &mut self,
        map: MapId,
        grid: GridId,
    ) -> Result<&mut GridIndex, BroadphaseError> {
        self.graph
            .get_mut(&map)
            .ok_or(BroadphaseError::MissingMap(map))?
            .get_mut(&grid)
            .ok_or(BroadphaseError::MissingGrid(map, grid))
    }

    fn body_state(&self, body: BodyId) -> Result<&BodyState, BroadphaseError> {
        self.bodies
            .get(&body)
            .ok_or(BroadphaseError::MissingBody(body))
    }

    /// Membership rule: every real grid intersecting `aabb`, plus the space
    /// index when no single grid fully encloses it.
    fn membership(layout: &impl MapLayout, map: MapId, aabb: &Aabb) -> Vec<GridId> {
        let mut grids: Vec<GridId> = Vec::new();
        layout.grids_intersecting(map, aabb, &mut |grid| grids.push(grid));
        if !layout.enclosed_by_grid(map, aabb) {
            grids.push(GridId::SPACE);
        }
        grids.sort_unstable();
        grids.dedup();
        grids
    }

    /// Query fan-out rule: every real grid intersecting `aabb`, plus the
    /// space index unconditionally.
    fn query_targets(
        &self,
        layout: &impl MapLayout,
        map: MapId,
        aabb: &Aabb,
    ) -> Result<Vec<GridId>, BroadphaseError> {
        self.graph_of(map)?;
        let mut grids = vec![GridId::SPACE];
        layout.grids_intersecting(map, aabb, &mut |grid| grids.push(grid));
        grids.sort_unstable();
        grids.dedup();
        Ok(grids)
    }

    fn create_proxies_in_grid(
        &mut self,
        body: &Body,
        grid: GridId,
        transform: &Transform,
        layout: &impl MapLayout,
    ) -> Result<Vec<ProxyId>, BroadphaseError> {
        let origin = layout.grid_origin(body.map, grid);
        let index = self.index_of_mut(body.map, grid)?;
        let mut ids = Vec::new();
        for (fixture_index, fixture) in body.fixtures.iter().enumerate() {
            for child in 0..fixture.shape.child_count() {
                let world = fixture.shape.compute_aabb(transform, child);
                ids.push(index.add_proxy(ProxyPayload {
                    body: body.id,
                    fixture: fixture_index as u32,
                    child: child as u32,
                    collision_layer: fixture.collision_layer,
                    collision_mask: fixture.collision_mask,
                    aabb: world.translated(&origin.neg()),
                }));
            }
        }
        Ok(ids)
    }

    fn create_fixture_proxies_in_grid(
        &mut self,
        body: &Body,
        fixture: u32,
        grid: GridId,
        transform: &Transform,
        layout: &impl MapLayout,
    ) -> Result<Vec<ProxyId>, BroadphaseError> {
        let origin = layout.grid_origin(body.map, grid);
        let index = self.index_of_mut(body.map, grid)?;
        let fixture_data = &body.fixtures[fixture as usize];
        let mut ids = Vec::new();
        for child in 0..fixture_data.shape.child_count() {
            let world = fixture_data.shape.compute_aabb(transform, child);
            ids.push(index.add_proxy(ProxyPayload {
                body: body.id,
                fixture,
                child: child as u32,
                collision_layer: fixture_data.collision_layer,
                collision_mask: fixture_data.collision_mask,
                aabb: world.translated(&origin.neg()),
            }));
        }
        Ok(ids)
    }
}

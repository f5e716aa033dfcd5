#![allow(missing_docs, clippy::expect_used, clippy::panic, clippy::unwrap_used)]
//! Integration tests for the broad-phase orchestrator: membership, pair
//! generation, queries, and ray casts across maps and grids.

use helm_core::Vec2;
use helm_geom::{
    Aabb, Body, BodyId, Broadphase, CollisionModifier, Fixture, GridAtlas, GridId, IndexKind,
    MapId, NoModifier, Ray, Shape, SpatialIndex, Transform,
};
use rustc_hash::{FxHashMap, FxHashSet};

const MAP: MapId = MapId(1);

fn box_fixture(half: f32) -> Fixture {
    Fixture::new(
        Shape::Polygon(vec![
            Vec2::new(-half, -half),
            Vec2::new(half, -half),
            Vec2::new(half, half),
            Vec2::new(-half, half),
        ]),
        1,
        1,
    )
}

fn body_at(id: u64, position: Vec2, half: f32) -> Body {
    Body {
        id: BodyId(id),
        map: MAP,
        transform: Transform::from_position(position),
        fixtures: vec![box_fixture(half)],
    }
}

/// Empty map: just the space index.
fn space_world(kind: IndexKind) -> (Broadphase, GridAtlas) {
    let mut bp = Broadphase::new(kind);
    bp.on_map_created(MAP);
    let mut atlas = GridAtlas::new();
    atlas.add_map(MAP);
    (bp, atlas)
}

fn awake_all(bodies: &[&Body]) -> FxHashSet<BodyId> {
    bodies.iter().map(|b| b.id).collect()
}

fn collect_pairs(
    bp: &mut Broadphase,
    awake: &FxHashSet<BodyId>,
) -> Vec<(BodyId, BodyId)> {
    let mut pairs = Vec::new();
    bp.update_pairs(MAP, awake, &mut |_, pa, _, pb| {
        pairs.push((pa.body, pb.body));
    })
    .unwrap_or_else(|err| panic!("update_pairs failed: {err}"));
    pairs
}

#[test]
fn far_apart_bodies_produce_no_pairs() {
    for kind in [IndexKind::DynamicTree, IndexKind::ChunkGrid] {
        let (mut bp, atlas) = space_world(kind);
        let a = body_at(1, Vec2::ZERO, 0.5);
        let b = body_at(2, Vec2::new(100.0, 0.0), 0.5);
        bp.add_body(&a, &atlas).expect("add a");
        bp.add_body(&b, &atlas).expect("add b");

        assert!(collect_pairs(&mut bp, &awake_all(&[&a, &b])).is_empty());
    }
}

#[test]
fn overlapping_bodies_produce_exactly_one_pair() {
    for kind in [IndexKind::DynamicTree, IndexKind::ChunkGrid] {
        let (mut bp, atlas) = space_world(kind);
        let a = body_at(1, Vec2::ZERO, 1.0);
        let b = body_at(2, Vec2::new(1.0, 0.0), 1.0);
        bp.add_body(&a, &atlas).expect("add a");
        bp.add_body(&b, &atlas).expect("add b");

        let pairs = collect_pairs(&mut bp, &awake_all(&[&a, &b]));
        assert_eq!(pairs.len(), 1, "kind {kind:?} emitted {pairs:?}");
        let (x, y) = pairs[0];
        assert_eq!(
            (x.min(y), x.max(y)),
            (BodyId(1), BodyId(2)),
            "pair must cover both bodies exactly once"
        );
    }
}

#[test]
fn filtered_layers_suppress_pairs() {
    let (mut bp, atlas) = space_world(IndexKind::DynamicTree);
    let mut a = body_at(1, Vec2::ZERO, 1.0);
    let mut b = body_at(2, Vec2::new(1.0, 0.0), 1.0);
    // Disjoint layers and masks on both sides.
    a.fixtures[0].collision_layer = 0b01;
    a.fixtures[0].collision_mask = 0b01;
    b.fixtures[0].collision_layer = 0b10;
    b.fixtures[0].collision_mask = 0b10;
    bp.add_body(&a, &atlas).expect("add a");
    bp.add_body(&b, &atlas).expect("add b");

    assert!(collect_pairs(&mut bp, &awake_all(&[&a, &b])).is_empty());
}

#[test]
fn straddling_body_registers_in_both_grids_then_one() {
    let (mut bp, mut atlas) = space_world(IndexKind::DynamicTree);
    let left = GridId(1);
    let right = GridId(2);
    atlas.add_grid(
        MAP,
        left,
        Vec2::ZERO,
        Aabb::new(Vec2::ZERO, Vec2::new(10.0, 10.0)),
    );
    atlas.add_grid(
        MAP,
        right,
        Vec2::new(10.0, 0.0),
        Aabb::new(Vec2::new(10.0, 0.0), Vec2::new(20.0, 10.0)),
    );
    bp.on_grid_created(MAP, left).expect("left grid");
    bp.on_grid_created(MAP, right).expect("right grid");

    // Centered on the shared boundary at x = 10.
    let mut body = body_at(1, Vec2::new(10.0, 5.0), 1.0);
    bp.add_body(&body, &atlas).expect("add body");
    let grids = bp.body_grids(body.id).expect("grids");
    assert!(grids.contains(&left) && grids.contains(&right), "{grids:?}");

    // Fully inside the left grid: membership collapses to exactly it.
    let before = body.transform;
    body.transform = Transform::from_position(Vec2::new(5.0, 5.0));
    bp.synchronize_fixtures(&body, &before, &body.transform, &atlas)
        .expect("synchronize");
    assert_eq!(bp.body_grids(body.id).expect("grids"), vec![left]);
}

#[test]
fn first_hit_ray_reports_nearest_entry_point() {
    for kind in [IndexKind::DynamicTree, IndexKind::ChunkGrid] {
        let (mut bp, atlas) = space_world(kind);
        let target = body_at(7, Vec2::ZERO, 1.0);
        bp.add_body(&target, &atlas).expect("add target");

        let ray = Ray::new(Vec2::new(0.0, -10.0), Vec2::UNIT_Y);
        let hits = bp
            .intersect_ray(MAP, &ray, 20.0, 1, None, true, &atlas)
            .expect("cast");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].body, BodyId(7));
        assert_eq!(hits[0].distance, 9.0);
        assert_eq!(hits[0].point.to_array(), [0.0, -1.0]);
    }
}

#[test]
fn ray_results_merge_across_grids_sorted_by_distance() {
    let (mut bp, mut atlas) = space_world(IndexKind::DynamicTree);
    let grid = GridId(1);
    atlas.add_grid(
        MAP,
        grid,
        Vec2::new(0.0, 4.0),
        Aabb::new(Vec2::new(-5.0, 4.0), Vec2::new(5.0, 14.0)),
    );
    bp.on_grid_created(MAP, grid).expect("grid");

    // One body in space below the grid, one on the grid.
    let near = body_at(1, Vec2::new(0.0, 0.0), 1.0);
    let far = body_at(2, Vec2::new(0.0, 8.0), 1.0);
    bp.add_body(&near, &atlas).expect("near");
    bp.add_body(&far, &atlas).expect("far");

    let ray = Ray::new(Vec2::new(0.0, -10.0), Vec2::UNIT_Y);
    let hits = bp
        .intersect_ray(MAP, &ray, 50.0, 1, None, false, &atlas)
        .expect("cast");
    let summary: Vec<(BodyId, f32)> = hits.iter().map(|h| (h.body, h.distance)).collect();
    assert_eq!(summary, vec![(BodyId(1), 9.0), (BodyId(2), 17.0)]);
}

#[test]
fn ray_ignores_excluded_body_and_respects_mask() {
    let (mut bp, atlas) = space_world(IndexKind::DynamicTree);
    let caster = body_at(1, Vec2::new(0.0, -5.0), 1.0);
    let mut armored = body_at(2, Vec2::ZERO, 1.0);
    armored.fixtures[0].collision_layer = 0b10;
    bp.add_body(&caster, &atlas).expect("caster");
    bp.add_body(&armored, &atlas).expect("armored");

    let ray = Ray::new(Vec2::new(0.0, -5.0), Vec2::UNIT_Y);
    // Mask 0b01 cannot see layer 0b10; caster is also excluded.
    let hits = bp
        .intersect_ray(MAP, &ray, 20.0, 0b01, Some(caster.id), false, &atlas)
        .expect("cast");
    assert!(hits.is_empty());

    let hits = bp
        .intersect_ray(MAP, &ray, 20.0, 0b10, Some(caster.id), false, &atlas)
        .expect("cast");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].body, armored.id);
}

#[test]
fn penetration_sums_distance_inside_bounds() {
    let (mut bp, atlas) = space_world(IndexKind::DynamicTree);
    let target = body_at(1, Vec2::ZERO, 1.0);
    bp.add_body(&target, &atlas).expect("target");

    let ray = Ray::new(Vec2::new(0.0, -10.0), Vec2::UNIT_Y);
    let penetration = bp
        .intersect_ray_penetration(MAP, &ray, 50.0, 1, None, &atlas)
        .expect("cast");
    // Enters at y = -1, exits at y = 1.
    assert!((penetration - 2.0).abs() < 1e-5, "penetration {penetration}");
}

#[test]
fn test_overlap_rejects_cross_map_proxies() {
    let mut bp = Broadphase::new(IndexKind::DynamicTree);
    let mut atlas = GridAtlas::new();
    let other_map = MapId(2);
    for map in [MAP, other_map] {
        bp.on_map_created(map);
        atlas.add_map(map);
    }

    let a = body_at(1, Vec2::ZERO, 1.0);
    let mut b = body_at(2, Vec2::ZERO, 1.0);
    b.map = other_map;
    bp.add_body(&a, &atlas).expect("a");
    bp.add_body(&b, &atlas).expect("b");

    let pa = bp.body_proxies(a.id).expect("a proxies")[0];
    let pb = bp.body_proxies(b.id).expect("b proxies")[0];
    // Same local coordinates, different maps: never overlapping.
    assert_eq!(bp.test_overlap(pa, pb), Ok(false));
    assert_eq!(bp.test_overlap(pa, pa), Ok(true));
}

#[test]
fn map_change_rebuilds_proxies_on_the_new_map() {
    let mut bp = Broadphase::new(IndexKind::DynamicTree);
    let mut atlas = GridAtlas::new();
    let other_map = MapId(2);
    for map in [MAP, other_map] {
        bp.on_map_created(map);
        atlas.add_map(map);
    }

    let mut traveller = body_at(1, Vec2::ZERO, 1.0);
    bp.add_body(&traveller, &atlas).expect("add");
    let old = traveller.map;
    traveller.map = other_map;
    bp.handle_map_change(&traveller, old, &atlas).expect("move");

    let proxies = bp.body_proxies(traveller.id).expect("proxies");
    assert_eq!(proxies.len(), 1);
    assert_eq!(proxies[0].map, other_map);
    assert_eq!(
        bp.grid_index(MAP, GridId::SPACE).expect("old space").proxy_count(),
        0
    );
}

#[test]
fn colliding_bodies_respects_symmetric_veto() {
    struct Feuding(BodyId, BodyId);
    impl CollisionModifier for Feuding {
        fn prevent_collision(&self, body: BodyId, other: BodyId) -> bool {
            // One-directional grudge; the query must still drop the pair.
            body == self.0 && other == self.1
        }
    }

    let (mut bp, atlas) = space_world(IndexKind::DynamicTree);
    let a = body_at(1, Vec2::ZERO, 1.0);
    let b = body_at(2, Vec2::new(1.0, 0.0), 1.0);
    bp.add_body(&a, &atlas).expect("a");
    bp.add_body(&b, &atlas).expect("b");

    assert_eq!(
        bp.colliding_bodies(&a, &NoModifier).expect("query"),
        vec![b.id]
    );
    assert!(bp
        .colliding_bodies(&a, &Feuding(b.id, a.id))
        .expect("query")
        .is_empty());
}

#[test]
fn region_queries_and_collide_rect() {
    let (mut bp, atlas) = space_world(IndexKind::DynamicTree);
    let a = body_at(1, Vec2::ZERO, 1.0);
    let mut ghost = body_at(2, Vec2::new(5.0, 0.0), 1.0);
    ghost.fixtures[0].collision_layer = 0;
    bp.add_body(&a, &atlas).expect("a");
    bp.add_body(&ghost, &atlas).expect("ghost");

    let everything = Aabb::new(Vec2::new(-10.0, -10.0), Vec2::new(10.0, 10.0));
    assert_eq!(
        bp.bodies_intersecting(MAP, &everything, false, &atlas)
            .expect("query"),
        vec![a.id, ghost.id]
    );

    // Layer-zero fixtures are invisible to the boolean collide test.
    let around_ghost = Aabb::new(Vec2::new(4.5, -0.5), Vec2::new(5.5, 0.5));
    assert!(!bp
        .any_colliding_in_rect(MAP, &around_ghost, &atlas)
        .expect("rect"));
    let around_a = Aabb::new(Vec2::new(-0.5, -0.5), Vec2::new(0.5, 0.5));
    assert!(bp.any_colliding_in_rect(MAP, &around_a, &atlas).expect("rect"));
}

#[test]
fn queued_events_apply_before_pair_generation() {
    let (mut bp, atlas) = space_world(IndexKind::DynamicTree);
    let a = body_at(1, Vec2::ZERO, 1.0);
    let b = body_at(2, Vec2::new(50.0, 0.0), 1.0);
    bp.add_body(&a, &atlas).expect("a");
    bp.add_body(&b, &atlas).expect("b");

    // Host moves b next to a, then the tick drains the queue.
    let mut moved_b = b.clone();
    let before = moved_b.transform;
    moved_b.transform = Transform::from_position(Vec2::new(1.0, 0.0));
    let mut store: FxHashMap<BodyId, Body> = FxHashMap::default();
    store.insert(a.id, a.clone());
    store.insert(b.id, moved_b.clone());

    bp.queue_move(helm_geom::MoveEvent {
        body: b.id,
        before,
        after: moved_b.transform,
    });
    bp.process_queued(&store, &atlas).expect("drain");

    let pairs = collect_pairs(&mut bp, &awake_all(&[&a, &b]));
    assert_eq!(pairs.len(), 1);
}

#[test]
fn deleted_bodies_are_unregistered_by_the_queue_drain() {
    let (mut bp, atlas) = space_world(IndexKind::DynamicTree);
    let a = body_at(1, Vec2::ZERO, 1.0);
    bp.add_body(&a, &atlas).expect("a");

    // The source no longer knows the body: the drain drops it.
    let store: FxHashMap<BodyId, Body> = FxHashMap::default();
    bp.queue_move(helm_geom::MoveEvent {
        body: a.id,
        before: a.transform,
        after: a.transform,
    });
    bp.process_queued(&store, &atlas).expect("drain");
    assert!(!bp.is_registered(a.id));
}

#[test]
fn grid_removal_rehomes_bodies_into_space() {
    let (mut bp, mut atlas) = space_world(IndexKind::DynamicTree);
    let grid = GridId(1);
    atlas.add_grid(
        MAP,
        grid,
        Vec2::ZERO,
        Aabb::new(Vec2::new(-10.0, -10.0), Vec2::new(10.0, 10.0)),
    );
    bp.on_grid_created(MAP, grid).expect("grid");

    let resident = body_at(1, Vec2::ZERO, 1.0);
    bp.add_body(&resident, &atlas).expect("add");
    assert_eq!(bp.body_grids(resident.id).expect("grids"), vec![grid]);

    let mut store: FxHashMap<BodyId, Body> = FxHashMap::default();
    store.insert(resident.id, resident.clone());
    atlas.remove_grid(MAP, grid);
    bp.on_grid_removed(MAP, grid, &store, &atlas).expect("remove");

    assert_eq!(
        bp.body_grids(resident.id).expect("grids"),
        vec![GridId::SPACE]
    );
}

#[test]
fn fixture_refresh_rebuilds_proxies_for_one_fixture() {
    let (mut bp, atlas) = space_world(IndexKind::DynamicTree);
    let mut body = body_at(1, Vec2::ZERO, 1.0);
    body.fixtures.push(Fixture::new(
        Shape::Chain(vec![
            Vec2::new(-2.0, 0.0),
            Vec2::new(0.0, 2.0),
            Vec2::new(2.0, 0.0),
        ]),
        1,
        1,
    ));
    bp.add_body(&body, &atlas).expect("add");
    // One proxy for the box, two for the chain segments.
    assert_eq!(bp.body_proxies(body.id).expect("proxies").len(), 3);

    // Chain loses a segment; refresh resynchronizes the proxy count.
    body.fixtures[1].shape = Shape::Chain(vec![Vec2::new(-2.0, 0.0), Vec2::new(0.0, 2.0)]);
    bp.refresh_fixture(&body, 1, &atlas).expect("refresh");
    assert_eq!(bp.body_proxies(body.id).expect("proxies").len(), 2);

    bp.destroy_fixture_proxies(body.id, 1).expect("destroy");
    assert_eq!(bp.body_proxies(body.id).expect("proxies").len(), 1);
}

#[test]
fn collision_toggle_registers_and_unregisters() {
    let (mut bp, atlas) = space_world(IndexKind::DynamicTree);
    let body = body_at(1, Vec2::ZERO, 1.0);
    bp.set_collision_enabled(&body, true, &atlas).expect("enable");
    assert!(bp.is_registered(body.id));
    // Toggling again is a no-op.
    bp.set_collision_enabled(&body, true, &atlas).expect("enable");
    bp.set_collision_enabled(&body, false, &atlas).expect("disable");
    assert!(!bp.is_registered(body.id));
}

#[test]
fn intersection_percent_tracks_world_overlap() {
    let a = body_at(1, Vec2::ZERO, 1.0);
    let b = body_at(2, Vec2::new(2.0, 0.0), 1.0);
    assert_eq!(Broadphase::intersection_percent(&a, &a), 1.0);
    assert_eq!(Broadphase::intersection_percent(&a, &b), 0.0);

    let mut other_map = a.clone();
    other_map.map = MapId(9);
    assert_eq!(Broadphase::intersection_percent(&a, &other_map), 0.0);
}

#[test]
fn space_origin_shift_rebases_world_bounds() {
    let (mut bp, atlas) = space_world(IndexKind::DynamicTree);
    let body = body_at(1, Vec2::new(100.0, 0.0), 1.0);
    bp.add_body(&body, &atlas).expect("add");

    bp.shift_origin(MAP, Vec2::new(100.0, 0.0)).expect("shift");
    let region = Aabb::new(Vec2::new(-1.5, -1.5), Vec2::new(1.5, 1.5));
    assert_eq!(
        bp.bodies_intersecting(MAP, &region, false, &atlas)
            .expect("query"),
        vec![body.id]
    );
}

#[test]
fn chunk_grid_strategy_reports_origin_shift_unsupported() {
    let (mut bp, atlas) = space_world(IndexKind::ChunkGrid);
    let body = body_at(1, Vec2::ZERO, 1.0);
    bp.add_body(&body, &atlas).expect("add");
    assert_eq!(
        bp.shift_origin(MAP, Vec2::new(1.0, 0.0)),
        Err(helm_geom::BroadphaseError::OriginShiftUnsupported)
    );
}

#[test]
fn registry_misses_surface_as_errors() {
    let mut bp = Broadphase::new(IndexKind::DynamicTree);
    let atlas = GridAtlas::new();
    let body = body_at(1, Vec2::ZERO, 1.0);

    assert_eq!(
        bp.add_body(&body, &atlas),
        Err(helm_geom::BroadphaseError::MissingMap(MAP))
    );
    assert_eq!(
        bp.remove_body(body.id),
        Err(helm_geom::BroadphaseError::MissingBody(body.id))
    );

    bp.on_map_created(MAP);
    bp.add_body(&body, &atlas).expect("add");
    assert_eq!(
        bp.add_body(&body, &atlas),
        Err(helm_geom::BroadphaseError::BodyAlreadyRegistered(body.id))
    );
}

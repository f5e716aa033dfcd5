// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Chunked uniform-grid index.
//!
//! Space is cut into 1 m cells grouped into `CHUNK_SIZE`-square chunks keyed
//! by their floor-aligned origin. Each cell owns the list of proxies whose
//! tight bound covers it; a proxy covering N cells is registered N times and
//! caches its covered-cell list so moves and removals never rescan geometry.
//!
//! Chunks exist only while occupied: created lazily by the first
//! registration, deleted eagerly when the last one leaves. Cell coverage is
//! derived exactly from the AABB (`floor(min) ..= floor(max)` per axis,
//! boundary inclusive); there is no radius heuristic anywhere.
//!
//! Ownership is arena-shaped: the index owns chunks by origin, chunks own
//! node vectors by local offset, and nodes hold plain proxy handles. A
//! node's parent chunk is a lookup key, never a back-pointer.

use helm_core::Vec2;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::broad::{
    AwakeSet, PairCallback, ProxyId, ProxyPayload, QueryCallback, RayCastCallback, RayFlow,
    SpatialIndex,
};
use crate::error::BroadphaseError;
use crate::types::aabb::Aabb;
use crate::types::ray::Ray;

/// Cells per chunk edge.
const CHUNK_SIZE: i32 = 16;

/// Integer cell coordinate; chunk origins are cell coordinates aligned to
/// `CHUNK_SIZE` multiples.
type Cell = (i32, i32);

#[derive(Debug)]
struct Chunk {
    /// One proxy list per cell, row-major over the chunk square.
    nodes: Vec<Vec<ProxyId>>,
    /// Total registrations across all nodes; the chunk is deleted when this
    /// reaches zero.
    occupancy: usize,
}

impl Chunk {
    fn new() -> Self {
        Self {
            nodes: vec![Vec::new(); (CHUNK_SIZE * CHUNK_SIZE) as usize],
            occupancy: 0,
        }
    }

    fn node_index(origin: Cell, cell: Cell) -> usize {
        let local_x = cell.0 - origin.0;
        let local_y = cell.1 - origin.1;
        debug_assert!((0..CHUNK_SIZE).contains(&local_x));
        debug_assert!((0..CHUNK_SIZE).contains(&local_y));
        (local_y * CHUNK_SIZE + local_x) as usize
    }
}

#[derive(Debug)]
struct ProxySlot {
    payload: ProxyPayload,
    /// Cells this proxy is currently registered in.
    cells: Vec<Cell>,
}

/// Chunked-grid index; one per grid that selected this strategy.
#[derive(Debug, Default)]
pub struct ChunkGrid {
    chunks: FxHashMap<Cell, Chunk>,
    slots: Vec<Option<ProxySlot>>,
    free: Vec<u32>,
    proxy_count: usize,
    /// Proxies added or moved since the last pair update.
    moved: FxHashSet<ProxyId>,
}

fn chunk_origin(cell: Cell) -> Cell {
    (
        cell.0.div_euclid(CHUNK_SIZE) * CHUNK_SIZE,
        cell.1.div_euclid(CHUNK_SIZE) * CHUNK_SIZE,
    )
}

/// Inclusive cell range covered by `aabb`; a bound sitting exactly on a cell
/// edge counts as covering the cell it opens.
fn cell_range(aabb: &Aabb) -> (Cell, Cell) {
    let min = aabb.min().to_array();
    let max = aabb.max().to_array();
    (
        (min[0].floor() as i32, min[1].floor() as i32),
        (max[0].floor() as i32, max[1].floor() as i32),
    )
}

fn covered_cells(aabb: &Aabb) -> Vec<Cell> {
    let ((x0, y0), (x1, y1)) = cell_range(aabb);
    let mut cells = Vec::with_capacity(((x1 - x0 + 1) * (y1 - y0 + 1)) as usize);
    for y in y0..=y1 {
        for x in x0..=x1 {
            cells.push((x, y));
        }
    }
    cells
}

impl ChunkGrid {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (occupied) chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn slot(&self, proxy: ProxyId) -> &ProxySlot {
        let slot = self.slots.get(proxy.0 as usize).and_then(Option::as_ref);
        assert!(slot.is_some(), "invalid proxy handle {proxy:?}");
        match slot {
            Some(slot) => slot,
            None => unreachable!(),
        }
    }

    fn register(&mut self, proxy: ProxyId, cell: Cell) {
        let origin = chunk_origin(cell);
        let chunk = self.chunks.entry(origin).or_insert_with(Chunk::new);
        chunk.nodes[Chunk::node_index(origin, cell)].push(proxy);
        chunk.occupancy += 1;
    }

    fn unregister(&mut self, proxy: ProxyId, cell: Cell) {
        let origin = chunk_origin(cell);
        let Some(chunk) = self.chunks.get_mut(&origin) else {
            unreachable!("proxy registered in a chunk that no longer exists");
        };
        let node = &mut chunk.nodes[Chunk::node_index(origin, cell)];
        let Some(position) = node.iter().position(|&p| p == proxy) else {
            unreachable!("proxy missing from its recorded cell");
        };
        node.swap_remove(position);
        chunk.occupancy -= 1;
        if chunk.occupancy == 0 {
            self.chunks.remove(&origin);
        }
    }

    /// Visits each candidate proxy under `aabb` exactly once, scanning only
    /// chunks that exist. Returns `false` if the callback stopped early.
    fn scan_candidates(&self, aabb: &Aabb, visit: &mut dyn FnMut(ProxyId) -> bool) -> bool {
        let ((x0, y0), (x1, y1)) = cell_range(aabb);
        let (cx0, cy0) = chunk_origin((x0, y0));
        let (cx1, cy1) = chunk_origin((x1, y1));

        let mut seen: FxHashSet<ProxyId> = FxHashSet::default();
        let mut cy = cy0;
        while cy <= cy1 {
            let mut cx = cx0;
            while cx <= cx1 {
                if let Some(chunk) = self.chunks.get(&(cx, cy)) {
                    // Clamp the covered cell range to this chunk.
                    let lx0 = x0.max(cx);
                    let lx1 = x1.min(cx + CHUNK_SIZE - 1);
                    let ly0 = y0.max(cy);
                    let ly1 = y1.min(cy + CHUNK_SIZE - 1);
                    for y in ly0..=ly1 {
                        for x in lx0..=lx1 {
                            for &proxy in &chunk.nodes[Chunk::node_index((cx, cy), (x, y))] {
                                if seen.insert(proxy) && !visit(proxy) {
                                    return false;
                                }
                            }
                        }
                    }
                }
                cx += CHUNK_SIZE;
            }
            cy += CHUNK_SIZE;
        }
        true
    }
}

impl SpatialIndex for ChunkGrid {
    fn add_proxy(&mut self, payload: ProxyPayload) -> ProxyId {
        let cells = covered_cells(&payload.aabb);
        let slot = ProxySlot {
            payload,
            cells: cells.clone(),
        };
        let id = match self.free.pop() {
            Some(slot_index) => {
                self.slots[slot_index as usize] = Some(slot);
                ProxyId(slot_index)
            }
            None => {
                self.slots.push(Some(slot));
                ProxyId((self.slots.len() - 1) as u32)
            }
        };
        for cell in cells {
            self.register(id, cell);
        }
        self.proxy_count += 1;
        self.moved.insert(id);
        id
    }

    fn remove_proxy(&mut self, proxy: ProxyId) -> ProxyPayload {
        let taken = self.slots.get_mut(proxy.0 as usize).and_then(Option::take);
        assert!(taken.is_some(), "invalid proxy handle {proxy:?}");
        let slot = match taken {
            Some(slot) => slot,
            None => unreachable!(),
        };
        for &cell in &slot.cells {
            self.unregister(proxy, cell);
        }
        self.free.push(proxy.0);
        self.proxy_count -= 1;
        self.moved.remove(&proxy);
        slot.payload
    }

    fn move_proxy(&mut self, proxy: ProxyId, aabb: Aabb, _displacement: Vec2) {
        assert!(
            self.slots
                .get(proxy.0 as usize)
                .is_some_and(Option::is_some),
            "invalid proxy handle {proxy:?}"
        );

        let new_cells = covered_cells(&aabb);
        let old_cells = match &self.slots[proxy.0 as usize] {
            Some(slot) => slot.cells.clone(),
            None => unreachable!(),
        };

        if new_cells != old_cells {
            let old_set: FxHashSet<Cell> = old_cells.iter().copied().collect();
            let new_set: FxHashSet<Cell> = new_cells.iter().copied().collect();
            for &cell in &old_cells {
                if !new_set.contains(&cell) {
                    self.unregister(proxy, cell);
                }
            }
            for &cell in &new_cells {
                if !old_set.contains(&cell) {
                    self.register(proxy, cell);
                }
            }
        }

        if let Some(slot) = &mut self.slots[proxy.0 as usize] {
            slot.payload.aabb = aabb;
            slot.cells = new_cells;
        }
        self.moved.insert(proxy);
    }

    fn payload(&self, proxy: ProxyId) -> &ProxyPayload {
        &self.slot(proxy).payload
    }

    fn query(&self, aabb: &Aabb, approximate: bool, callback: &mut QueryCallback<'_>) {
        self.scan_candidates(aabb, &mut |proxy| {
            let payload = &self.slot(proxy).payload;
            if approximate || payload.aabb.overlaps(aabb) {
                callback(proxy, payload)
            } else {
                true
            }
        });
    }

    fn ray_cast(&self, ray: &Ray, max_distance: f32, callback: &mut RayCastCallback<'_>) {
        let sweep = Aabb::from_corners(ray.origin(), ray.at(max_distance));

        let mut hits: Vec<(f32, ProxyId)> = Vec::new();
        self.scan_candidates(&sweep, &mut |proxy| {
            if let Some(span) = ray.intersect_aabb(&self.slot(proxy).payload.aabb) {
                if span.enter <= max_distance {
                    hits.push((span.enter, proxy));
                }
            }
            true
        });

        // Visit in ascending distance so a clipping callback prunes the tail.
        hits.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let mut max_distance = max_distance;
        for (distance, proxy) in hits {
            if distance > max_distance {
                break;
            }
            let payload = &self.slot(proxy).payload;
            match callback(proxy, payload, ray.at(distance), distance) {
                RayFlow::Continue => {}
                RayFlow::Clip(clip) => max_distance = max_distance.min(clip),
                RayFlow::Stop => return,
            }
        }
    }

    fn update_pairs(&mut self, awake: &dyn AwakeSet, callback: &mut PairCallback<'_>) {
        let mut seeds: Vec<ProxyId> = self.moved.iter().copied().collect();
        seeds.sort_unstable();

        let mut pairs: Vec<(ProxyId, ProxyId)> = Vec::new();
        for seed in seeds {
            let slot = self.slot(seed);
            if !awake.is_awake(slot.payload.body) {
                continue;
            }
            for &cell in &slot.cells {
                let origin = chunk_origin(cell);
                let Some(chunk) = self.chunks.get(&origin) else {
                    unreachable!("proxy registered in a chunk that no longer exists");
                };
                for &other in &chunk.nodes[Chunk::node_index(origin, cell)] {
                    if other == seed {
                        continue;
                    }
                    let other_payload = &self.slot(other).payload;
                    if other_payload.body == slot.payload.body
                        || !slot.payload.should_collide(other_payload)
                        || !slot.payload.aabb.overlaps(&other_payload.aabb)
                    {
                        continue;
                    }
                    pairs.push(if seed < other {
                        (seed, other)
                    } else {
                        (other, seed)
                    });
                }
            }
        }

        pairs.sort_unstable();
        pairs.dedup();
        for (a, b) in pairs {
            let pa = &self.slot(a).payload;
            let pb = &self.slot(b).payload;
            callback(a, pa, b, pb);
        }
        self.moved.clear();
    }

    fn test_overlap(&self, a: ProxyId, b: ProxyId) -> bool {
        self.slot(a).payload.aabb.overlaps(&self.slot(b).payload.aabb)
    }

    fn shift_origin(&mut self, _offset: Vec2) -> Result<(), BroadphaseError> {
        // Chunk origins are lattice-aligned; rebasing them would remap every
        // registration. Callers keep chunk grids in grid-local frames where
        // origins never move.
        Err(BroadphaseError::OriginShiftUnsupported)
    }

    fn proxy_count(&self) -> usize {
        self.proxy_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyId;

    fn payload(body: u64, aabb: Aabb) -> ProxyPayload {
        ProxyPayload {
            body: BodyId(body),
            fixture: 0,
            child: 0,
            collision_layer: 1,
            collision_mask: 1,
            aabb,
        }
    }

    fn aabb(min: [f32; 2], max: [f32; 2]) -> Aabb {
        Aabb::new(Vec2::new(min[0], min[1]), Vec2::new(max[0], max[1]))
    }

    fn collect_query(grid: &ChunkGrid, region: &Aabb) -> Vec<ProxyId> {
        let mut hits = Vec::new();
        grid.query(region, false, &mut |id, _| {
            hits.push(id);
            true
        });
        hits.sort_unstable();
        hits
    }

    #[test]
    fn chunk_origin_is_floor_aligned() {
        assert_eq!(chunk_origin((0, 0)), (0, 0));
        assert_eq!(chunk_origin((15, 15)), (0, 0));
        assert_eq!(chunk_origin((16, 15)), (16, 0));
        assert_eq!(chunk_origin((-1, -16)), (-16, -16));
        assert_eq!(chunk_origin((-17, 0)), (-32, 0));
    }

    #[test]
    fn aabb_touching_cell_edge_covers_the_cell_it_opens() {
        // Max exactly on x = 16: the proxy counts as covering cell (16, 0),
        // which lives in the next chunk over.
        let mut grid = ChunkGrid::new();
        grid.add_proxy(payload(1, aabb([15.0, 0.0], [16.0, 1.0])));
        assert_eq!(grid.chunk_count(), 2);
    }

    #[test]
    fn removing_last_proxy_purges_the_chunk() {
        let mut grid = ChunkGrid::new();
        let a = grid.add_proxy(payload(1, aabb([1.0, 1.0], [2.0, 2.0])));
        let b = grid.add_proxy(payload(2, aabb([3.0, 3.0], [4.0, 4.0])));
        assert_eq!(grid.chunk_count(), 1);
        grid.remove_proxy(a);
        assert_eq!(grid.chunk_count(), 1);
        grid.remove_proxy(b);
        assert_eq!(grid.chunk_count(), 0);
        assert_eq!(grid.proxy_count(), 0);
    }

    #[test]
    fn query_returns_only_overlapping_proxies() {
        let mut grid = ChunkGrid::new();
        let near = grid.add_proxy(payload(1, aabb([0.0, 0.0], [1.0, 1.0])));
        let _far = grid.add_proxy(payload(2, aabb([40.0, 40.0], [41.0, 41.0])));
        assert_eq!(collect_query(&grid, &aabb([0.5, 0.5], [2.0, 2.0])), vec![near]);
    }

    #[test]
    fn move_across_chunks_rebuilds_coverage() {
        let mut grid = ChunkGrid::new();
        let id = grid.add_proxy(payload(1, aabb([0.0, 0.0], [1.0, 1.0])));
        grid.move_proxy(id, aabb([40.0, 0.0], [41.0, 1.0]), Vec2::new(40.0, 0.0));
        assert_eq!(grid.chunk_count(), 1);
        assert!(collect_query(&grid, &aabb([0.0, 0.0], [1.0, 1.0])).is_empty());
        assert_eq!(collect_query(&grid, &aabb([40.0, 0.0], [41.0, 1.0])), vec![id]);
    }

    #[test]
    fn zero_displacement_move_is_a_no_op_on_coverage() {
        let mut grid = ChunkGrid::new();
        let box_a = aabb([0.25, 0.25], [0.75, 0.75]);
        let id = grid.add_proxy(payload(1, box_a));
        let cells_before = grid.slot(id).cells.clone();
        grid.move_proxy(id, box_a, Vec2::ZERO);
        assert_eq!(grid.slot(id).cells, cells_before);
        assert_eq!(grid.chunk_count(), 1);
    }

    #[test]
    fn update_pairs_uses_cell_neighborhoods() {
        let mut grid = ChunkGrid::new();
        let a = grid.add_proxy(payload(1, aabb([0.0, 0.0], [2.0, 2.0])));
        let b = grid.add_proxy(payload(2, aabb([1.0, 1.0], [3.0, 3.0])));
        let _far = grid.add_proxy(payload(3, aabb([30.0, 30.0], [31.0, 31.0])));

        let mut awake = rustc_hash::FxHashSet::default();
        for body in 1..=3 {
            awake.insert(BodyId(body));
        }

        let mut pairs = Vec::new();
        grid.update_pairs(&awake, &mut |a, _, b, _| pairs.push((a, b)));
        assert_eq!(pairs, vec![(a, b)]);

        pairs.clear();
        grid.update_pairs(&awake, &mut |a, _, b, _| pairs.push((a, b)));
        assert!(pairs.is_empty());
    }

    #[test]
    fn ray_cast_visits_hits_in_distance_order() {
        let mut grid = ChunkGrid::new();
        let near = grid.add_proxy(payload(1, aabb([-1.0, -1.0], [1.0, 1.0])));
        let far = grid.add_proxy(payload(2, aabb([-1.0, 5.0], [1.0, 7.0])));

        let ray = Ray::new(Vec2::new(0.0, -10.0), Vec2::UNIT_Y);
        let mut hits = Vec::new();
        grid.ray_cast(&ray, 100.0, &mut |id, _, _, distance| {
            hits.push((id, distance));
            RayFlow::Continue
        });
        assert_eq!(hits, vec![(near, 9.0), (far, 15.0)]);

        // Clipping at the first hit suppresses the second.
        let mut clipped = Vec::new();
        grid.ray_cast(&ray, 100.0, &mut |id, _, _, distance| {
            clipped.push(id);
            RayFlow::Clip(distance)
        });
        assert_eq!(clipped, vec![near]);
    }

    #[test]
    fn shift_origin_reports_unsupported() {
        let mut grid = ChunkGrid::new();
        assert_eq!(
            grid.shift_origin(Vec2::new(1.0, 0.0)),
            Err(BroadphaseError::OriginShiftUnsupported)
        );
    }
}

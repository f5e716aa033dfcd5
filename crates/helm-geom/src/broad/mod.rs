// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The per-grid spatial index contract and its two strategies.
//!
//! Every grid owns exactly one index. The strategy is chosen when the grid
//! is created and never changes afterwards; callers go through the shared
//! [`SpatialIndex`] trait (or the closed [`GridIndex`] union when they own
//! the value) and cannot observe which strategy answers them beyond
//! performance and the one documented capability gap
//! ([`SpatialIndex::shift_origin`] on the chunk grid).
//!
//! Re-entrancy: callbacks handed to `query`, `ray_cast`, and `update_pairs`
//! must not call back into the index with mutating operations. This is a
//! documented contract, not a guarded one.

use helm_core::Vec2;

use crate::body::BodyId;
use crate::error::BroadphaseError;
use crate::types::aabb::Aabb;
use crate::types::ray::Ray;

/// Balanced AABB tree strategy.
pub mod dynamic_tree;

/// Chunked uniform-grid strategy.
pub mod chunk_grid;

pub use chunk_grid::ChunkGrid;
pub use dynamic_tree::DynamicTree;

/// Opaque handle to a proxy registered in one index.
///
/// Handles are only meaningful to the index that issued them and are
/// recycled after removal; holding a stale handle is a programmer error.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ProxyId(pub u32);

/// Everything an index stores about one registered shape child.
///
/// The `aabb` is the tight, grid-local bound of the shape child at its last
/// synchronized transform; indexes fatten or rasterize it internally as
/// their strategy requires but always report candidates against this tight
/// bound.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyPayload {
    /// Owning body.
    pub body: BodyId,
    /// Index of the fixture within the owning body's ordered fixture list.
    pub fixture: u32,
    /// Shape child within the fixture.
    pub child: u32,
    /// Collision layer bits copied from the fixture.
    pub collision_layer: u32,
    /// Collision mask bits copied from the fixture.
    pub collision_mask: u32,
    /// Tight grid-local AABB at the last completed move.
    pub aabb: Aabb,
}

impl ProxyPayload {
    /// Collision-filter predicate over the copied fixture bits; matches
    /// [`crate::body::Fixture::should_collide`].
    #[must_use]
    pub const fn should_collide(&self, other: &Self) -> bool {
        (self.collision_mask & other.collision_layer) != 0
            || (other.collision_mask & self.collision_layer) != 0
    }
}

/// Answer from a ray-cast callback steering the remaining traversal.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RayFlow {
    /// Keep visiting hits with the current maximum distance.
    Continue,
    /// Shrink the remaining ray to `0.0..=distance` and keep visiting.
    Clip(f32),
    /// Stop the cast immediately.
    Stop,
}

/// Visitor for region queries. Return `false` to stop early.
pub type QueryCallback<'a> = dyn FnMut(ProxyId, &ProxyPayload) -> bool + 'a;

/// Visitor for ray casts: proxy, hit point (index-local), and distance from
/// the ray origin.
pub type RayCastCallback<'a> = dyn FnMut(ProxyId, &ProxyPayload, Vec2, f32) -> RayFlow + 'a;

/// Receiver for candidate pairs from [`SpatialIndex::update_pairs`].
pub type PairCallback<'a> = dyn FnMut(ProxyId, &ProxyPayload, ProxyId, &ProxyPayload) + 'a;

/// Awake-body provider consulted when seeding pair searches.
///
/// Only proxies whose owning body is awake start a search; sleeping bodies
/// still appear on the receiving end of a pair.
pub trait AwakeSet {
    /// Whether `body` is currently simulated for motion.
    fn is_awake(&self, body: BodyId) -> bool;
}

impl AwakeSet for rustc_hash::FxHashSet<BodyId> {
    fn is_awake(&self, body: BodyId) -> bool {
        self.contains(&body)
    }
}

impl AwakeSet for std::collections::HashSet<BodyId> {
    fn is_awake(&self, body: BodyId) -> bool {
        self.contains(&body)
    }
}

/// The contract both index strategies implement.
///
/// Mutating calls (`add_proxy`, `remove_proxy`, `move_proxy`) must all
/// complete before `update_pairs` runs for the tick, so pair generation
/// observes current bounds. All methods are synchronous and single-threaded;
/// concurrent access is unsupported.
pub trait SpatialIndex {
    /// Registers a proxy for `payload` (whose `aabb` is the tight bound) and
    /// returns its handle. Newly added proxies seed the next pair update.
    fn add_proxy(&mut self, payload: ProxyPayload) -> ProxyId;

    /// Unregisters `proxy` and returns its payload.
    ///
    /// # Panics
    /// Panics if the handle is invalid; that is a bookkeeping bug in the
    /// caller, not a recoverable condition.
    fn remove_proxy(&mut self, proxy: ProxyId) -> ProxyPayload;

    /// Updates `proxy` to a new tight bound.
    ///
    /// `displacement` is the positional delta that produced the move and
    /// lets a strategy pre-enlarge storage along the motion direction.
    ///
    /// # Panics
    /// Panics if the handle is invalid.
    fn move_proxy(&mut self, proxy: ProxyId, aabb: Aabb, displacement: Vec2);

    /// Payload of a live proxy.
    ///
    /// # Panics
    /// Panics if the handle is invalid.
    fn payload(&self, proxy: ProxyId) -> &ProxyPayload;

    /// Visits proxies intersecting `aabb`. With `approximate` the strategy
    /// may report everything its coarse structure overlaps; without it,
    /// candidates are filtered against their tight bounds first.
    fn query(&self, aabb: &Aabb, approximate: bool, callback: &mut QueryCallback<'_>);

    /// Casts `ray` up to `max_distance`, visiting proxies whose tight bound
    /// the ray hits in an order that respects clipping: once a callback
    /// returns [`RayFlow::Clip`], farther proxies are pruned.
    fn ray_cast(&self, ray: &Ray, max_distance: f32, callback: &mut RayCastCallback<'_>);

    /// Emits every unique candidate pair seeded by proxies that moved since
    /// the previous call and whose body is awake, then clears the moved set.
    ///
    /// Pairs are canonical (lower [`ProxyId`] first) and emitted in
    /// ascending handle order; the same pair is never emitted twice in one
    /// call, in either orientation.
    fn update_pairs(&mut self, awake: &dyn AwakeSet, callback: &mut PairCallback<'_>);

    /// Exact tight-bound overlap test between two live proxies.
    ///
    /// # Panics
    /// Panics if either handle is invalid.
    fn test_overlap(&self, a: ProxyId, b: ProxyId) -> bool;

    /// Translates every stored bound by `-offset`, rebasing the index to a
    /// new world origin. Strategies that cannot rebase return
    /// [`BroadphaseError::OriginShiftUnsupported`].
    fn shift_origin(&mut self, offset: Vec2) -> Result<(), BroadphaseError>;

    /// Number of live proxies.
    fn proxy_count(&self) -> usize;
}

/// Strategy selector, fixed per grid at creation time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IndexKind {
    /// Balanced fat-AABB bounding-volume hierarchy; the general-purpose
    /// choice and the only one supporting origin shifts.
    DynamicTree,
    /// Fixed-size chunk lattice subdivided into unit cells; favors dense,
    /// tile-aligned grids.
    ChunkGrid,
}

/// Closed union over the two strategies, so a registry can own either
/// without boxing.
#[derive(Debug)]
pub enum GridIndex {
    /// Dynamic-tree strategy.
    Tree(DynamicTree),
    /// Chunk-grid strategy.
    Chunks(ChunkGrid),
}

impl GridIndex {
    /// Creates an empty index of the requested strategy.
    #[must_use]
    pub fn new(kind: IndexKind) -> Self {
        match kind {
            IndexKind::DynamicTree => Self::Tree(DynamicTree::new()),
            IndexKind::ChunkGrid => Self::Chunks(ChunkGrid::new()),
        }
    }

    /// The strategy this index was created with.
    #[must_use]
    pub const fn kind(&self) -> IndexKind {
        match self {
            Self::Tree(_) => IndexKind::DynamicTree,
            Self::Chunks(_) => IndexKind::ChunkGrid,
        }
    }
}

impl SpatialIndex for GridIndex {
    fn add_proxy(&mut self, payload: ProxyPayload) -> ProxyId {
        match self {
            Self::Tree(tree) => tree.add_proxy(payload),
            Self::Chunks(chunks) => chunks.add_proxy(payload),
        }
    }

    fn remove_proxy(&mut self, proxy: ProxyId) -> ProxyPayload {
        match self {
            Self::Tree(tree) => tree.remove_proxy(proxy),
            Self::Chunks(chunks) => chunks.remove_proxy(proxy),
        }
    }

    fn move_proxy(&mut self, proxy: ProxyId, aabb: Aabb, displacement: Vec2) {
        match self {
            Self::Tree(tree) => tree.move_proxy(proxy, aabb, displacement),
            Self::Chunks(chunks) => chunks.move_proxy(proxy, aabb, displacement),
        }
    }

    fn payload(&self, proxy: ProxyId) -> &ProxyPayload {
        match self {
            Self::Tree(tree) => tree.payload(proxy),
            Self::Chunks(chunks) => chunks.payload(proxy),
        }
    }

    fn query(&self, aabb: &Aabb, approximate: bool, callback: &mut QueryCallback<'_>) {
        match self {
            Self::Tree(tree) => tree.query(aabb, approximate, callback),
            Self::Chunks(chunks) => chunks.query(aabb, approximate, callback),
        }
    }

    fn ray_cast(&self, ray: &Ray, max_distance: f32, callback: &mut RayCastCallback<'_>) {
        match self {
            Self::Tree(tree) => tree.ray_cast(ray, max_distance, callback),
            Self::Chunks(chunks) => chunks.ray_cast(ray, max_distance, callback),
        }
    }

    fn update_pairs(&mut self, awake: &dyn AwakeSet, callback: &mut PairCallback<'_>) {
        match self {
            Self::Tree(tree) => tree.update_pairs(awake, callback),
            Self::Chunks(chunks) => chunks.update_pairs(awake, callback),
        }
    }

    fn test_overlap(&self, a: ProxyId, b: ProxyId) -> bool {
        match self {
            Self::Tree(tree) => tree.test_overlap(a, b),
            Self::Chunks(chunks) => chunks.test_overlap(a, b),
        }
    }

    fn shift_origin(&mut self, offset: Vec2) -> Result<(), BroadphaseError> {
        match self {
            Self::Tree(tree) => tree.shift_origin(offset),
            Self::Chunks(chunks) => chunks.shift_origin(offset),
        }
    }

    fn proxy_count(&self) -> usize {
        match self {
            Self::Tree(tree) => tree.proxy_count(),
            Self::Chunks(chunks) => chunks.proxy_count(),
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![deny(
    warnings,
    clippy::all,
    clippy::pedantic,
    rust_2018_idioms,
    missing_docs,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::float_cmp
)]
#![doc = r"Geometry and broad-phase for Helm.

This crate provides:
- Axis-aligned bounding boxes (`Aabb`), rigid 2D transforms (`Transform`),
  and rays (`Ray`).
- Shapes, fixtures, and the body view handed in by the host simulation.
- Two per-grid spatial index strategies behind one contract: a balanced
  fat-AABB tree (`DynamicTree`) and a chunked uniform grid (`ChunkGrid`).
- The `Broadphase` orchestrator: a `Map → Grid → Index` registry that keeps
  per-body grid membership synchronized with geometry and fans out pair
  generation, region queries, and ray casts.

Design notes:
- Deterministic: no ambient RNG; pair and hit emission orders are canonical.
- Float32 throughout; operations favor clarity and reproducibility.
- Single-threaded by contract: all mutation and queries happen inside the
  owning simulation's tick.
- Collaborators are injected, never located: map geometry, body views, and
  gameplay collision vetoes come in through the traits in `layout`.
- Rustdoc is treated as part of the contract; public items are documented.
"]

/// Bodies, fixtures, and identifier newtypes.
pub mod body;
/// Spatial index strategies and their shared contract.
pub mod broad;
/// The orchestrator: registry, membership, and the public query surface.
pub mod broadphase;
/// Error taxonomy.
pub mod error;
/// Collaborator seams (map layout, body source, collision veto).
pub mod layout;
/// Collidable shape geometry.
pub mod shape;
/// Foundational geometric types.
pub mod types;

pub use body::{Body, BodyId, Fixture, GridId, MapId};
pub use broad::{
    AwakeSet, ChunkGrid, DynamicTree, GridIndex, IndexKind, ProxyId, ProxyPayload, RayFlow,
    SpatialIndex,
};
pub use broadphase::{
    Broadphase, CollisionChangeEvent, FixtureUpdateEvent, MapChangeEvent, MoveEvent, ProxyHandle,
    RayHit,
};
pub use error::BroadphaseError;
pub use layout::{BodySource, CollisionModifier, GridAtlas, MapLayout, NoModifier};
pub use shape::Shape;
pub use types::aabb::Aabb;
pub use types::ray::Ray;
pub use types::transform::Transform;

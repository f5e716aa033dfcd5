// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Broad-phase error taxonomy.
//!
//! Everything here is a consistency violation or an unsupported operation:
//! deterministic, non-transient, and not worth retrying. The physics step
//! driver decides whether to halt (development) or log-and-skip the body for
//! the tick (production). Invalid proxy handles inside an index are the one
//! exception: those are programmer errors and fail fast with a panic rather
//! than surfacing here.

use thiserror::Error;

use crate::body::{BodyId, GridId, MapId};

/// Errors produced by broad-phase bookkeeping and registry lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BroadphaseError {
    /// Referenced a map with no registered index graph.
    #[error("missing map: {0:?}")]
    MissingMap(MapId),
    /// Referenced a grid with no index on the given map.
    #[error("missing grid {1:?} on map {0:?}")]
    MissingGrid(MapId, GridId),
    /// Referenced a body the broad-phase has no membership record for.
    #[error("missing body: {0:?}")]
    MissingBody(BodyId),
    /// Tried to register a body that already has membership.
    #[error("body already registered: {0:?}")]
    BodyAlreadyRegistered(BodyId),
    /// The chunk-grid index cannot rebase its lattice-aligned origins.
    #[error("origin shift is not supported by the chunk-grid index")]
    OriginShiftUnsupported,
}

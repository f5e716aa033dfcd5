// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![doc = r"Deterministic 2D math for Helm.

This crate provides the numeric floor the rest of the engine stands on:
`Vec2`, `Rot2`, and a handful of scalar helpers.

Design notes:
- Float32 throughout; operations round the way the simulation's float32 mode
  rounds, so results are reproducible across hosts.
- Trigonometry goes through `libm` rather than platform intrinsics to keep
  sin/cos bit-identical across targets.
- No ambient RNG, no global state.
"]

/// Foundational math types and scalar helpers.
pub mod math;

pub use math::rot2::Rot2;
pub use math::vec2::Vec2;

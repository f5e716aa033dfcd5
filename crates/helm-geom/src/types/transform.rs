// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use helm_core::{Rot2, Vec2};

/// Rigid planar transform used by broad-phase and shape placement.
///
/// Conventions:
/// - `position` in metres (world space).
/// - `rotation` as a unit complex number, counter-clockwise positive.
/// - No scale: bodies are rigid; shapes carry their own dimensions.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Transform {
    position: Vec2,
    rotation: Rot2,
}

impl Transform {
    /// Identity transform (no translation, no rotation).
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            position: Vec2::ZERO,
            rotation: Rot2::IDENTITY,
        }
    }

    /// Creates a transform from components.
    #[must_use]
    pub const fn new(position: Vec2, rotation: Rot2) -> Self {
        Self { position, rotation }
    }

    /// Creates a pure translation.
    #[must_use]
    pub const fn from_position(position: Vec2) -> Self {
        Self {
            position,
            rotation: Rot2::IDENTITY,
        }
    }

    /// Translation component.
    #[must_use]
    pub const fn position(&self) -> Vec2 {
        self.position
    }

    /// Rotation component.
    #[must_use]
    pub const fn rotation(&self) -> Rot2 {
        self.rotation
    }

    /// Maps a local-space point into world space.
    #[must_use]
    pub fn apply(&self, local: &Vec2) -> Vec2 {
        self.rotation.apply(local).add(&self.position)
    }

    /// Maps a world-space point into local space.
    #[must_use]
    pub fn apply_inverse(&self, world: &Vec2) -> Vec2 {
        self.rotation.apply_inverse(&world.sub(&self.position))
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn apply_then_inverse_round_trips() {
        let xf = Transform::new(Vec2::new(5.0, -3.0), Rot2::from_angle(FRAC_PI_2));
        let p = Vec2::new(1.0, 2.0);
        let back = xf.apply_inverse(&xf.apply(&p));
        assert!(back.sub(&p).length() < 1e-5);
    }

    #[test]
    fn pure_translation_moves_points() {
        let xf = Transform::from_position(Vec2::new(2.0, 3.0));
        assert_eq!(xf.apply(&Vec2::ZERO).to_array(), [2.0, 3.0]);
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use crate::math::vec2::Vec2;

/// Planar rotation stored as a unit complex number (`cos`, `sin`).
///
/// Determinism:
/// - [`Rot2::from_angle`] routes through `libm::sinf`/`libm::cosf` so the
///   same angle yields the same rotation on every target.
/// - Composition and application are plain `f32` multiply-adds; no FMA.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Rot2 {
    cos: f32,
    sin: f32,
}

impl Rot2 {
    /// The identity rotation.
    pub const IDENTITY: Self = Self {
        cos: 1.0,
        sin: 0.0,
    };

    /// Builds a rotation from an angle in radians (counter-clockwise).
    #[must_use]
    pub fn from_angle(radians: f32) -> Self {
        Self {
            cos: libm::cosf(radians),
            sin: libm::sinf(radians),
        }
    }

    /// Cosine of the rotation angle.
    #[must_use]
    pub const fn cos(&self) -> f32 {
        self.cos
    }

    /// Sine of the rotation angle.
    #[must_use]
    pub const fn sin(&self) -> f32 {
        self.sin
    }

    /// Recovers the rotation angle in radians (`-π..=π`).
    #[must_use]
    pub fn angle(&self) -> f32 {
        libm::atan2f(self.sin, self.cos)
    }

    /// Rotates `v` by this rotation.
    #[must_use]
    pub fn apply(&self, v: &Vec2) -> Vec2 {
        Vec2::new(
            self.cos * v.x() - self.sin * v.y(),
            self.sin * v.x() + self.cos * v.y(),
        )
    }

    /// Rotates `v` by the inverse of this rotation.
    #[must_use]
    pub fn apply_inverse(&self, v: &Vec2) -> Vec2 {
        Vec2::new(
            self.cos * v.x() + self.sin * v.y(),
            -self.sin * v.x() + self.cos * v.y(),
        )
    }

    /// Composes two rotations (`self` after `other`).
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            cos: self.cos * other.cos - self.sin * other.sin,
            sin: self.sin * other.cos + self.cos * other.sin,
        }
    }

    /// The inverse rotation.
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            cos: self.cos,
            sin: -self.sin,
        }
    }
}

impl Default for Rot2 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::EPSILON;
    use std::f32::consts::FRAC_PI_2;

    fn assert_close(a: &Vec2, b: &Vec2) {
        assert!(
            a.sub(b).length() < 1e-5,
            "vectors differ: {a:?} vs {b:?}"
        );
    }

    #[test]
    fn quarter_turn_maps_x_to_y() {
        let r = Rot2::from_angle(FRAC_PI_2);
        assert_close(&r.apply(&Vec2::UNIT_X), &Vec2::UNIT_Y);
    }

    #[test]
    fn inverse_round_trips() {
        let r = Rot2::from_angle(0.73);
        let v = Vec2::new(3.0, -2.0);
        assert_close(&r.apply_inverse(&r.apply(&v)), &v);
        assert_close(&r.inverse().apply(&r.apply(&v)), &v);
    }

    #[test]
    fn angle_survives_round_trip() {
        let r = Rot2::from_angle(1.1);
        assert!((r.angle() - 1.1).abs() < EPSILON * 10.0);
    }
}

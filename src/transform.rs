//! 2-D affine transform for layer placement
//!
//! The matrix is stored as
//!
//! ```text
//! | a  c  tx |
//! | b  d  ty |
//! | 0  0  1  |
//! ```
//!
//! and maps a point `(x, y)` to `(a*x + c*y + tx, b*x + d*y + ty)`.
//! `post_*` operations apply the new step *after* the existing transform
//! (`M' = S * M`), which is how gesture deltas accumulate in screen space.

use serde::{Deserialize, Serialize};

/// Determinants below this are treated as singular
const SINGULAR_EPSILON: f64 = 1e-12;

/// Column-major 2×3 affine transform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl AffineTransform {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    #[must_use]
    pub const fn from_translation(dx: f64, dy: f64) -> Self {
        Self {
            tx: dx,
            ty: dy,
            ..Self::IDENTITY
        }
    }

    /// Scale about the pivot `(px, py)`
    #[must_use]
    pub const fn from_scale(sx: f64, sy: f64, px: f64, py: f64) -> Self {
        Self {
            a: sx,
            b: 0.0,
            c: 0.0,
            d: sy,
            tx: px - sx * px,
            ty: py - sy * py,
        }
    }

    /// Rotate by `degrees` (clockwise in y-down screen space) about `(px, py)`
    #[must_use]
    pub fn from_rotation(degrees: f64, px: f64, py: f64) -> Self {
        let (s, c) = degrees.to_radians().sin_cos();
        Self {
            a: c,
            b: s,
            c: -s,
            d: c,
            tx: px - c * px + s * py,
            ty: py - s * px - c * py,
        }
    }

    /// `self * other`: apply `other` first, then `self`
    #[must_use]
    pub fn then_after(&self, other: &Self) -> Self {
        Self {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            tx: self.a * other.tx + self.c * other.ty + self.tx,
            ty: self.b * other.tx + self.d * other.ty + self.ty,
        }
    }

    /// Apply `other` after the current transform
    pub fn post_concat(&mut self, other: &Self) {
        *self = other.then_after(self);
    }

    /// Apply `other` before the current transform
    pub fn pre_concat(&mut self, other: &Self) {
        *self = self.then_after(other);
    }

    pub fn post_scale(&mut self, sx: f64, sy: f64, px: f64, py: f64) {
        self.post_concat(&Self::from_scale(sx, sy, px, py));
    }

    pub fn post_translate(&mut self, dx: f64, dy: f64) {
        self.post_concat(&Self::from_translation(dx, dy));
    }

    pub fn post_rotate(&mut self, degrees: f64, px: f64, py: f64) {
        self.post_concat(&Self::from_rotation(degrees, px, py));
    }

    #[must_use]
    pub fn map_point(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }

    #[must_use]
    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// Inverse transform, `None` when singular
    #[must_use]
    pub fn invert(&self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() < SINGULAR_EPSILON || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        Some(Self {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
            tx: (self.c * self.ty - self.d * self.tx) * inv,
            ty: (self.b * self.tx - self.a * self.ty) * inv,
        })
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.a.is_finite()
            && self.b.is_finite()
            && self.c.is_finite()
            && self.d.is_finite()
            && self.tx.is_finite()
            && self.ty.is_finite()
    }

    /// Pure translation by whole pixels, allowing a copy instead of resampling
    ///
    /// Offsets beyond the `i32` range are not reported, so pixel arithmetic
    /// on the result cannot overflow.
    #[must_use]
    pub fn integer_translation(&self) -> Option<(i64, i64)> {
        const LIMIT: f64 = i32::MAX as f64;
        let unit = self.a == 1.0 && self.b == 0.0 && self.c == 0.0 && self.d == 1.0;
        let in_range = self.tx.abs() <= LIMIT && self.ty.abs() <= LIMIT;
        if unit && in_range && self.tx.fract() == 0.0 && self.ty.fract() == 0.0 {
            Some((self.tx as i64, self.ty as i64))
        } else {
            None
        }
    }

    /// Horizontal and vertical scale factors
    #[must_use]
    pub fn scale_factors(&self) -> (f64, f64) {
        (self.a.hypot(self.b), self.c.hypot(self.d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_point(actual: (f64, f64), expected: (f64, f64)) {
        assert!(
            (actual.0 - expected.0).abs() < 1e-9 && (actual.1 - expected.1).abs() < 1e-9,
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn test_scale_then_translate_differs_from_reverse() {
        let mut scale_first = AffineTransform::IDENTITY;
        scale_first.post_scale(2.0, 2.0, 10.0, 10.0);
        scale_first.post_translate(5.0, 0.0);
        assert_point(scale_first.map_point(0.0, 0.0), (-5.0, -10.0));

        let mut translate_first = AffineTransform::IDENTITY;
        translate_first.post_translate(5.0, 0.0);
        translate_first.post_scale(2.0, 2.0, 10.0, 10.0);
        assert_point(translate_first.map_point(0.0, 0.0), (0.0, -10.0));

        assert_ne!(scale_first, translate_first);
    }

    #[test]
    fn test_scale_keeps_focus_fixed() {
        let mut t = AffineTransform::from_translation(3.0, 4.0);
        t.post_scale(1.5, 1.5, 50.0, 20.0);
        let focus_before = AffineTransform::from_translation(3.0, 4.0)
            .invert()
            .unwrap()
            .map_point(50.0, 20.0);
        assert_point(t.map_point(focus_before.0, focus_before.1), (50.0, 20.0));
    }

    #[test]
    fn test_invert_round_trip() {
        let mut t = AffineTransform::IDENTITY;
        t.post_scale(2.0, 3.0, 1.0, 1.0);
        t.post_rotate(30.0, 4.0, 4.0);
        t.post_translate(-7.0, 2.5);

        let inverse = t.invert().unwrap();
        let (x, y) = t.map_point(12.0, -3.0);
        assert_point(inverse.map_point(x, y), (12.0, -3.0));
        assert_point(t.then_after(&inverse).map_point(1.0, 1.0), (1.0, 1.0));
    }

    #[test]
    fn test_singular_has_no_inverse() {
        let mut t = AffineTransform::IDENTITY;
        t.post_scale(0.0, 1.0, 0.0, 0.0);
        assert!(t.invert().is_none());
    }

    #[test]
    fn test_pre_and_post_concat() {
        let scale = AffineTransform::from_scale(2.0, 2.0, 0.0, 0.0);
        let shift = AffineTransform::from_translation(1.0, 0.0);

        let mut post = shift;
        post.post_concat(&scale);
        assert_point(post.map_point(0.0, 0.0), (2.0, 0.0));

        let mut pre = shift;
        pre.pre_concat(&scale);
        assert_point(pre.map_point(0.0, 0.0), (1.0, 0.0));
    }

    #[test]
    fn test_rotation_about_pivot() {
        let t = AffineTransform::from_rotation(90.0, 0.0, 0.0);
        assert_point(t.map_point(1.0, 0.0), (0.0, 1.0));

        let about = AffineTransform::from_rotation(180.0, 5.0, 5.0);
        assert_point(about.map_point(5.0, 5.0), (5.0, 5.0));
        assert_point(about.map_point(6.0, 5.0), (4.0, 5.0));
    }

    #[test]
    fn test_integer_translation_detection() {
        assert_eq!(AffineTransform::IDENTITY.integer_translation(), Some((0, 0)));
        assert_eq!(
            AffineTransform::from_translation(3.0, -2.0).integer_translation(),
            Some((3, -2))
        );
        assert_eq!(
            AffineTransform::from_translation(0.5, 0.0).integer_translation(),
            None
        );
        assert_eq!(
            AffineTransform::from_scale(2.0, 2.0, 0.0, 0.0).integer_translation(),
            None
        );
    }

    #[test]
    fn test_huge_translation_is_not_integer() {
        assert_eq!(
            AffineTransform::from_translation(1e19, 0.0).integer_translation(),
            None
        );
        assert_eq!(
            AffineTransform::from_translation(0.0, -1e19).integer_translation(),
            None
        );
        assert_eq!(
            AffineTransform::from_translation(f64::from(i32::MAX), 0.0).integer_translation(),
            Some((i64::from(i32::MAX), 0))
        );
    }

    #[test]
    fn test_scale_factors() {
        let mut t = AffineTransform::IDENTITY;
        t.post_scale(2.0, 3.0, 10.0, 10.0);
        t.post_rotate(45.0, 0.0, 0.0);
        let (sx, sy) = t.scale_factors();
        assert!((sx - 2.0).abs() < 1e-9);
        assert!((sy - 3.0).abs() < 1e-9);
    }
}

use serde::{Deserialize, Serialize};

use super::rect::{Point, Rect, Size};

/// Values closer than this to 0 or ±1 are snapped when building rotations,
/// so quarter turns produce exact matrices.
const SNAP_EPSILON: f64 = 1e-12;

/// 2D affine transform in row-vector form.
///
/// A point is mapped as `x' = a·x + c·y + tx`, `y' = b·x + d·y + ty`.
/// Stored orientation transforms of video tracks use this layout.
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
    pub const IDENTITY: Self = Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);

    pub const fn new(a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    pub const fn translation(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub const fn scale(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// Rotation by `angle` radians, counter-clockwise in a y-up space
    pub fn rotation(angle: f64) -> Self {
        let cos = snap(angle.cos());
        let sin = snap(angle.sin());
        Self::new(cos, sin, -sin, cos, 0.0, 0.0)
    }

    /// Mirror about the horizontal axis, mapping `y` to `height - y`.
    ///
    /// Converts between top-left (y down) and bottom-left (y up) origins for
    /// a frame of the given height.
    pub const fn flip_vertical(height: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, -1.0, 0.0, height)
    }

    /// Apply `self` first, then `other`
    pub fn concatenating(&self, other: &AffineTransform) -> AffineTransform {
        AffineTransform {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            tx: self.tx * other.a + self.ty * other.c + other.tx,
            ty: self.tx * other.b + self.ty * other.d + other.ty,
        }
    }

    /// Apply `self`, then translate by `(tx, ty)`
    pub fn translated(&self, tx: f64, ty: f64) -> AffineTransform {
        self.concatenating(&AffineTransform::translation(tx, ty))
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// Inverse transform, `None` when the matrix is singular
    pub fn inverted(&self) -> Option<AffineTransform> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON || !det.is_finite() {
            return None;
        }

        Some(AffineTransform {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            tx: (self.c * self.ty - self.d * self.tx) / det,
            ty: (self.b * self.tx - self.a * self.ty) / det,
        })
    }

    pub fn apply(&self, point: Point) -> Point {
        Point::new(
            self.a * point.x + self.c * point.y + self.tx,
            self.b * point.x + self.d * point.y + self.ty,
        )
    }

    /// Axis-aligned bounding box of the transformed rectangle
    pub fn apply_rect(&self, rect: &Rect) -> Rect {
        let corners = [
            Point::new(rect.min_x(), rect.min_y()),
            Point::new(rect.max_x(), rect.min_y()),
            Point::new(rect.min_x(), rect.max_y()),
            Point::new(rect.max_x(), rect.max_y()),
        ]
        .map(|corner| self.apply(corner));

        let min_x = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let min_y = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let max_x = corners.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        let max_y = corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);

        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Bounding-box size of a frame of `size` after the linear part
    pub fn apply_size(&self, size: Size) -> Size {
        self.apply_rect(&Rect::from_size(size)).size()
    }

    /// Re-translate so the transformed `bounds` start at the origin.
    ///
    /// Returns the adjusted transform and the size of the resulting extent.
    pub fn anchored_at_origin(&self, bounds: &Rect) -> (AffineTransform, Size) {
        let extent = self.apply_rect(bounds);
        (self.translated(-extent.min_x(), -extent.min_y()), extent.size())
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// True when the linear part is not the identity (rotation, reflection or scale)
    pub fn is_reoriented(&self) -> bool {
        self.a != 1.0 || self.b != 0.0 || self.c != 0.0 || self.d != 1.0
    }
}

fn snap(value: f64) -> f64 {
    if value.abs() < SNAP_EPSILON {
        0.0
    } else if (value - 1.0).abs() < SNAP_EPSILON {
        1.0
    } else if (value + 1.0).abs() < SNAP_EPSILON {
        -1.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_quarter_turn_is_exact() {
        let rotation = AffineTransform::rotation(FRAC_PI_2);
        assert_eq!(rotation, AffineTransform::new(0.0, 1.0, -1.0, 0.0, 0.0, 0.0));

        let half = AffineTransform::rotation(PI);
        assert_eq!(half, AffineTransform::new(-1.0, 0.0, 0.0, -1.0, 0.0, 0.0));
    }

    #[test]
    fn test_concatenation_order() {
        // Translate then scale differs from scale then translate
        let translate = AffineTransform::translation(10.0, 0.0);
        let scale = AffineTransform::scale(2.0, 2.0);

        let p = Point::new(1.0, 1.0);
        assert_eq!(translate.concatenating(&scale).apply(p), Point::new(22.0, 2.0));
        assert_eq!(scale.concatenating(&translate).apply(p), Point::new(12.0, 2.0));
    }

    #[test]
    fn test_inverse_round_trips_points() {
        let transform = AffineTransform::rotation(0.3)
            .concatenating(&AffineTransform::scale(2.0, 0.5))
            .translated(7.0, -3.0);
        let inverse = transform.inverted().unwrap();

        let p = Point::new(12.5, -4.25);
        let back = inverse.apply(transform.apply(p));
        assert!((back.x - p.x).abs() < 1e-9);
        assert!((back.y - p.y).abs() < 1e-9);

        assert!(AffineTransform::scale(0.0, 1.0).inverted().is_none());
    }

    #[test]
    fn test_rotated_bounds_swap_dimensions() {
        let size = AffineTransform::rotation(FRAC_PI_2).apply_size(Size::new(1920.0, 1080.0));
        assert_eq!(size, Size::new(1080.0, 1920.0));
    }

    #[test]
    fn test_anchored_at_origin() {
        let (anchored, extent) = AffineTransform::rotation(PI)
            .anchored_at_origin(&Rect::new(0.0, 0.0, 4.0, 2.0));
        assert_eq!(extent, Size::new(4.0, 2.0));
        assert_eq!(anchored.apply(Point::new(0.0, 0.0)), Point::new(4.0, 2.0));
        assert_eq!(anchored.apply(Point::new(4.0, 2.0)), Point::new(0.0, 0.0));
    }

    #[test]
    fn test_reorientation_detection() {
        assert!(!AffineTransform::IDENTITY.is_reoriented());
        assert!(!AffineTransform::translation(5.0, 5.0).is_reoriented());

        // Half turns have no off-diagonal terms but still need normalizing
        let half_turn = AffineTransform::new(-1.0, 0.0, 0.0, -1.0, 10.0, 10.0);
        assert!(half_turn.is_reoriented());

        let portrait = AffineTransform::new(0.0, 1.0, -1.0, 0.0, 1080.0, 0.0);
        assert!(portrait.is_reoriented());
    }
}

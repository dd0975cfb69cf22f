//! 2D similarity transforms and their least-squares estimation.
//!
//! A similarity transform has four degrees of freedom (uniform scale,
//! rotation and translation) and is stored as
//!
//! ```text
//! | a  -b  tx |
//! | b   a  ty |
//! ```
//!
//! with `scale = sqrt(a² + b²)` and `rotation = atan2(b, a)`. All arithmetic
//! is done in `f64`; landmark points stay `f32`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Point;

/// Source spread (sum of squared distances to the centroid) below which a
/// fit is considered degenerate.
const MIN_SOURCE_SPREAD: f64 = 1e-9;

/// Largest scale a fit may imply. Source points bunched tighter than this
/// relative to the targets are treated as coincident.
const MAX_FIT_SCALE: f64 = 1e3;

/// Squared scale below which the fitted transform is not invertible.
const MIN_SQUARED_SCALE: f64 = 1e-18;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityTransform {
    a: f64,
    b: f64,
    tx: f64,
    ty: f64,
}

impl SimilarityTransform {
    pub const fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Build a transform from scale, rotation (radians, counter-clockwise in
    /// a y-up frame) and translation.
    pub fn from_params(scale: f64, rotation: f64, tx: f64, ty: f64) -> Self {
        Self {
            a: scale * rotation.cos(),
            b: scale * rotation.sin(),
            tx,
            ty,
        }
    }

    pub fn scale(&self) -> f64 {
        self.a.hypot(self.b)
    }

    pub fn rotation(&self) -> f64 {
        self.b.atan2(self.a)
    }

    pub fn translation(&self) -> (f64, f64) {
        (self.tx, self.ty)
    }

    #[inline]
    pub fn apply_xy(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    pub fn apply(&self, p: Point) -> Point {
        let (x, y) = self.apply_xy(p.x as f64, p.y as f64);
        Point::new(x as f32, y as f32)
    }

    /// Apply only the scale and rotation part, ignoring translation.
    pub fn apply_linear(&self, p: Point) -> Point {
        let (x, y) = (p.x as f64, p.y as f64);
        Point::new(
            (self.a * x - self.b * y) as f32,
            (self.b * x + self.a * y) as f32,
        )
    }

    /// Algebraic inverse. `None` when the scale is zero.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det <= MIN_SQUARED_SCALE {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }

    /// Composition that applies `self` first, then `next`.
    pub fn then(&self, next: &SimilarityTransform) -> Self {
        let (tx, ty) = next.apply_xy(self.tx, self.ty);
        Self {
            a: next.a * self.a - next.b * self.b,
            b: next.b * self.a + next.a * self.b,
            tx,
            ty,
        }
    }
}

impl Default for SimilarityTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Result of [`fit_similarity`]: the fitted transform and its inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityFit {
    pub transform: SimilarityTransform,
    pub inverse: SimilarityTransform,
}

/// Estimate the similarity transform `T` minimizing `Σ ‖T(srcᵢ) − dstᵢ‖²`.
///
/// Closed-form Umeyama solution restricted to proper rotations. Requires at
/// least two point pairs. Coincident source points cannot determine scale or
/// rotation and are reported as [`Error::DegenerateFit`], as are source
/// points whose spread is negligible next to the targets' (an implied scale
/// above 1000).
pub fn fit_similarity(src: &[Point], dst: &[Point]) -> Result<SimilarityFit> {
    if src.len() != dst.len() || src.len() < 2 {
        return Err(Error::PointCountMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }

    let n = src.len() as f64;
    let centroid = |pts: &[Point]| {
        let (sx, sy) = pts
            .iter()
            .fold((0.0f64, 0.0f64), |(x, y), p| (x + p.x as f64, y + p.y as f64));
        (sx / n, sy / n)
    };
    let (msx, msy) = centroid(src);
    let (mdx, mdy) = centroid(dst);

    let mut spread = 0.0f64;
    let mut target_spread = 0.0f64;
    let mut dot = 0.0f64;
    let mut cross = 0.0f64;
    for (s, d) in src.iter().zip(dst) {
        let (sx, sy) = (s.x as f64 - msx, s.y as f64 - msy);
        let (dx, dy) = (d.x as f64 - mdx, d.y as f64 - mdy);
        spread += sx * sx + sy * sy;
        target_spread += dx * dx + dy * dy;
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
    }

    let max_scale_sq = MAX_FIT_SCALE * MAX_FIT_SCALE;
    if !(spread > MIN_SOURCE_SPREAD) || spread * max_scale_sq <= target_spread {
        return Err(Error::DegenerateFit);
    }

    let a = dot / spread;
    let b = cross / spread;
    let transform = SimilarityTransform {
        a,
        b,
        tx: mdx - (a * msx - b * msy),
        ty: mdy - (b * msx + a * msy),
    };
    let inverse = transform.inverse().ok_or(Error::DegenerateFit)?;

    Ok(SimilarityFit { transform, inverse })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ]
    }

    #[test]
    fn identical_points_give_identity() {
        let pts = square();
        let fit = fit_similarity(&pts, &pts).unwrap();

        assert!((fit.transform.scale() - 1.0).abs() < 1e-12);
        assert!(fit.transform.rotation().abs() < 1e-12);
        let (tx, ty) = fit.transform.translation();
        assert!(tx.abs() < 1e-12 && ty.abs() < 1e-12);
    }

    #[test]
    fn recovers_known_transform() {
        let known = SimilarityTransform::from_params(2.5, 0.3, 12.0, -7.0);
        let src = square();
        let dst: Vec<Point> = src.iter().map(|p| known.apply(*p)).collect();

        let fit = fit_similarity(&src, &dst).unwrap();
        assert!((fit.transform.scale() - 2.5).abs() < 1e-5);
        assert!((fit.transform.rotation() - 0.3).abs() < 1e-5);
        let (tx, ty) = fit.transform.translation();
        assert!((tx - 12.0).abs() < 1e-4);
        assert!((ty + 7.0).abs() < 1e-4);
    }

    #[test]
    fn inverse_undoes_transform() {
        let t = SimilarityTransform::from_params(0.7, -1.2, 3.0, 4.0);
        let inv = t.inverse().unwrap();
        let p = Point::new(13.5, -2.25);

        let back = inv.apply(t.apply(p));
        assert!((back.x - p.x).abs() < 1e-4);
        assert!((back.y - p.y).abs() < 1e-4);

        let round = t.then(&inv);
        assert!((round.scale() - 1.0).abs() < 1e-12);
        assert!(round.rotation().abs() < 1e-12);
    }

    #[test]
    fn composition_applies_in_order() {
        let shift = SimilarityTransform::from_params(1.0, 0.0, 5.0, 0.0);
        let double = SimilarityTransform::from_params(2.0, 0.0, 0.0, 0.0);

        // Shift then double: (1, 1) -> (6, 1) -> (12, 2)
        let p = shift.then(&double).apply(Point::new(1.0, 1.0));
        assert_eq!(p, Point::new(12.0, 2.0));
    }

    #[test]
    fn least_squares_with_noise() {
        let known = SimilarityTransform::from_params(1.5, 0.1, -3.0, 2.0);
        let src = square();
        let mut dst: Vec<Point> = src.iter().map(|p| known.apply(*p)).collect();
        dst[0].x += 0.05;
        dst[2].y -= 0.05;

        let fit = fit_similarity(&src, &dst).unwrap();
        assert!((fit.transform.scale() - 1.5).abs() < 0.01);
        assert!((fit.transform.rotation() - 0.1).abs() < 0.01);
    }

    #[test]
    fn coincident_source_is_degenerate() {
        let src = vec![Point::new(4.0, 4.0); 9];
        let dst = square();
        let err = fit_similarity(&src, &dst[..]).unwrap_err();
        assert!(matches!(err, Error::PointCountMismatch { .. }));

        let dst: Vec<Point> = (0..9).map(|i| Point::new(i as f32, 0.0)).collect();
        let err = fit_similarity(&src, &dst).unwrap_err();
        assert!(matches!(err, Error::DegenerateFit));
    }

    #[test]
    fn near_coincident_source_is_degenerate() {
        let dst: Vec<Point> = square().iter().map(|p| *p * 10.0).collect();
        let src: Vec<Point> = square()
            .iter()
            .map(|p| Point::new(120.0 + p.x * 1e-4, 80.0 + p.y * 1e-4))
            .collect();
        assert!(matches!(
            fit_similarity(&src, &dst),
            Err(Error::DegenerateFit)
        ));

        // A large but plausible scale-up is still fitted
        let src: Vec<Point> = square().iter().map(|p| *p * 0.05).collect();
        let fit = fit_similarity(&src, &dst).unwrap();
        assert!((fit.transform.scale() - 200.0).abs() < 1e-2);
    }

    #[test]
    fn coincident_target_is_degenerate() {
        let src = square();
        let dst = vec![Point::new(1.0, 1.0); 4];
        assert!(matches!(
            fit_similarity(&src, &dst),
            Err(Error::DegenerateFit)
        ));
    }

    #[test]
    fn needs_two_pairs() {
        let one = vec![Point::new(1.0, 1.0)];
        assert!(matches!(
            fit_similarity(&one, &one),
            Err(Error::PointCountMismatch { src: 1, dst: 1 })
        ));
    }
}

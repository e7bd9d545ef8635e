//! Homography solver
//!
//! Computes the projective transform that maps a source quadrilateral (in
//! native image pixels) onto a destination quadrilateral (in output pixels),
//! normally the corners of the output rectangle.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StraightenError};
use crate::geometry::{NativePoint, NativeQuad, OutputPoint, OutputQuad, Point};

/// Numerical tolerances used by the solver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverTolerances {
    /// Relative area below which three points count as collinear
    pub collinearity: f64,
    /// Smallest pivot accepted during elimination
    pub pivot: f64,
}

impl Default for SolverTolerances {
    fn default() -> Self {
        Self {
            collinearity: 1e-9,
            pivot: 1e-12,
        }
    }
}

/// Perspective transformation matrix (3x3 homography)
///
/// Both matrices are row-major with their bottom-right entry equal to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Homography {
    /// Native -> output
    matrix: [f64; 9],
    /// Output -> native (used for warping)
    inverse: [f64; 9],
}

impl Homography {
    pub fn identity() -> Self {
        let m = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        Self {
            matrix: m,
            inverse: m,
        }
    }

    /// Compute the homography mapping `src` corner `i` onto `dst` corner `i`
    pub fn compute(src: &NativeQuad, dst: &OutputQuad) -> Result<Self> {
        Self::compute_with(src, dst, &SolverTolerances::default())
    }

    pub fn compute_with(
        src: &NativeQuad,
        dst: &OutputQuad,
        tolerances: &SolverTolerances,
    ) -> Result<Self> {
        if src.has_collinear_triple(tolerances.collinearity)
            || dst.has_collinear_triple(tolerances.collinearity)
        {
            return Err(StraightenError::DegenerateQuadrilateral);
        }

        let src_pts = src.corners.map(|p| (p.x, p.y));
        let dst_pts = dst.corners.map(|p| (p.x, p.y));

        let matrix = compute_homography(src_pts, dst_pts, tolerances.pivot)?;
        let inverse = invert(&matrix, tolerances.pivot)?;

        tracing::debug!("Computed homography {:?}", matrix);

        Ok(Self { matrix, inverse })
    }

    /// Transform a point from native to output coordinates
    ///
    /// Returns `None` if the point maps to infinity.
    #[inline]
    pub fn apply(&self, p: NativePoint) -> Option<OutputPoint> {
        apply_homography(&self.matrix, p.x, p.y).map(|(x, y)| Point::new(x, y))
    }

    /// Transform a point from output to native coordinates (inverse)
    #[inline]
    pub fn apply_inverse(&self, p: OutputPoint) -> Option<NativePoint> {
        apply_homography(&self.inverse, p.x, p.y).map(|(x, y)| Point::new(x, y))
    }

    /// Raw inverse mapping used on the warp hot path
    #[inline]
    pub(crate) fn inverse_xy(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        apply_homography(&self.inverse, x, y)
    }

    pub fn matrix(&self) -> &[f64; 9] {
        &self.matrix
    }

    pub fn inverse_matrix(&self) -> &[f64; 9] {
        &self.inverse
    }
}

/// Similarity transform that centers points on their centroid and scales
/// their mean distance from it to sqrt(2)
fn normalization(points: &[(f64, f64); 4]) -> Matrix3<f64> {
    let cx = points.iter().map(|p| p.0).sum::<f64>() / 4.0;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / 4.0;
    let mean_dist = points
        .iter()
        .map(|p| (p.0 - cx).hypot(p.1 - cy))
        .sum::<f64>()
        / 4.0;
    let s = std::f64::consts::SQRT_2 / mean_dist;

    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

fn transform_points(t: &Matrix3<f64>, points: &[(f64, f64); 4]) -> [(f64, f64); 4] {
    points.map(|(x, y)| (t[(0, 0)] * x + t[(0, 2)], t[(1, 1)] * y + t[(1, 2)]))
}

/// Compute a 3x3 homography matrix from 4 point correspondences
fn compute_homography(
    src: [(f64, f64); 4],
    dst: [(f64, f64); 4],
    pivot_tolerance: f64,
) -> Result<[f64; 9]> {
    let t_src = normalization(&src);
    let t_dst = normalization(&dst);
    let src_n = transform_points(&t_src, &src);
    let dst_n = transform_points(&t_dst, &dst);

    // Each correspondence (x,y) -> (x',y') gives two equations with h33 = 1:
    // h11*x + h12*y + h13 - x'*x*h31 - x'*y*h32 = x'
    // h21*x + h22*y + h23 - y'*x*h31 - y'*y*h32 = y'
    let mut a = [[0.0f64; 8]; 8];
    let mut b = [0.0f64; 8];

    for i in 0..4 {
        let (x, y) = src_n[i];
        let (xp, yp) = dst_n[i];

        a[i * 2] = [x, y, 1.0, 0.0, 0.0, 0.0, -xp * x, -xp * y];
        b[i * 2] = xp;

        a[i * 2 + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -yp * x, -yp * y];
        b[i * 2 + 1] = yp;
    }

    let h = solve_linear_system(&mut a, &mut b, pivot_tolerance)?;
    let h_n = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| StraightenError::IllConditioned("destination normalization".into()))?;
    let h = t_dst_inv * h_n * t_src;

    normalized(&h, pivot_tolerance)
}

/// Scale `h` so its bottom-right entry is 1
fn normalized(h: &Matrix3<f64>, tolerance: f64) -> Result<[f64; 9]> {
    let scale = h[(2, 2)];
    if scale.abs() < tolerance {
        return Err(StraightenError::IllConditioned(format!(
            "bottom-right entry {:e} is too close to zero",
            scale
        )));
    }

    let mut out = [0.0f64; 9];
    for r in 0..3 {
        for c in 0..3 {
            out[r * 3 + c] = h[(r, c)] / scale;
        }
    }

    if out.iter().any(|v| !v.is_finite()) {
        return Err(StraightenError::IllConditioned(
            "non-finite matrix entry".into(),
        ));
    }
    Ok(out)
}

fn invert(m: &[f64; 9], tolerance: f64) -> Result<[f64; 9]> {
    let inv = Matrix3::from_row_slice(m)
        .try_inverse()
        .ok_or_else(|| StraightenError::IllConditioned("matrix is singular".into()))?;
    normalized(&inv, tolerance)
}

/// Solve an 8x8 linear system using Gaussian elimination with partial pivoting
fn solve_linear_system(
    a: &mut [[f64; 8]; 8],
    b: &mut [f64; 8],
    pivot_tolerance: f64,
) -> Result<[f64; 8]> {
    let n = 8;

    // Forward elimination with partial pivoting
    for col in 0..n {
        let mut max_row = col;
        let mut max_val = a[col][col].abs();
        for row in (col + 1)..n {
            if a[row][col].abs() > max_val {
                max_val = a[row][col].abs();
                max_row = row;
            }
        }

        if max_row != col {
            a.swap(col, max_row);
            b.swap(col, max_row);
        }

        let pivot = a[col][col];
        if !pivot.is_finite() || pivot.abs() < pivot_tolerance {
            return Err(StraightenError::IllConditioned(format!(
                "pivot {:e} in column {}",
                pivot, col
            )));
        }

        for row in (col + 1)..n {
            let factor = a[row][col] / pivot;
            for j in col..n {
                a[row][j] -= factor * a[col][j];
            }
            b[row] -= factor * b[col];
        }
    }

    // Back substitution
    let mut x = [0.0f64; 8];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= a[i][j] * x[j];
        }
        x[i] = sum / a[i][i];
    }

    Ok(x)
}

/// Apply a homography matrix to a point
#[inline]
fn apply_homography(h: &[f64; 9], x: f64, y: f64) -> Option<(f64, f64)> {
    let w = h[6] * x + h[7] * y + h[8];
    if w.abs() < 1e-12 {
        return None;
    }
    let xp = (h[0] * x + h[1] * y + h[2]) / w;
    let yp = (h[3] * x + h[4] * y + h[5]) / w;
    Some((xp, yp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;

    fn assert_close(a: (f64, f64), b: (f64, f64), tol: f64) {
        assert!(
            (a.0 - b.0).abs() < tol && (a.1 - b.1).abs() < tol,
            "{:?} != {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_identity_transform() {
        let src = NativeQuad::from_tuples([(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]);
        let dst = OutputQuad::rectangle(Size::new(100, 100));

        let h = Homography::compute(&src, &dst).unwrap();
        let identity = Homography::identity();
        for (a, b) in h.matrix().iter().zip(identity.matrix()) {
            assert!((a - b).abs() < 1e-9, "{:?}", h.matrix());
        }

        let p = h.apply(NativePoint::new(37.0, 81.0)).unwrap();
        assert_close((p.x, p.y), (37.0, 81.0), 1e-9);
    }

    #[test]
    fn test_round_trip_corners() {
        let cases = [
            // Photographed page, mild keystone
            ([(112.0, 87.0), (1630.0, 140.0), (1712.0, 1180.0), (64.0, 1023.0)], Size::new(1200, 900)),
            // Strong perspective, far edge much shorter
            ([(400.0, 50.0), (600.0, 60.0), (980.0, 700.0), (20.0, 690.0)], Size::new(640, 480)),
            // Rotated about 30 degrees
            ([(250.0, 0.0), (683.0, 250.0), (433.0, 683.0), (0.0, 433.0)], Size::new(500, 500)),
            // Thin sliver, wide output
            ([(10.0, 300.0), (3000.0, 280.0), (3010.0, 360.0), (5.0, 370.0)], Size::new(4000, 100)),
            // Tiny selection blown up
            ([(3.0, 2.0), (9.0, 3.0), (8.0, 11.0), (2.0, 9.0)], Size::new(1920, 1080)),
        ];

        for (corners, size) in cases {
            let src = NativeQuad::from_tuples(corners);
            let dst = OutputQuad::rectangle(size);

            let h = Homography::compute(&src, &dst).unwrap();
            assert_eq!(h.matrix()[8], 1.0);
            assert_eq!(h.inverse_matrix()[8], 1.0);

            for (s, d) in src.corners.iter().zip(dst.corners.iter()) {
                let mapped = h.apply(*s).unwrap();
                assert_close((mapped.x, mapped.y), (d.x, d.y), 1e-6);

                let back = h.apply_inverse(*d).unwrap();
                assert_close((back.x, back.y), (s.x, s.y), 1e-6);
            }
        }
    }

    #[test]
    fn test_pivot_tolerance_rejects() {
        let src = NativeQuad::from_tuples([(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]);
        let dst = OutputQuad::rectangle(Size::new(100, 100));

        // Every pivot of the normalised system is far below this
        let strict = SolverTolerances {
            pivot: 1e3,
            ..Default::default()
        };
        assert!(matches!(
            Homography::compute_with(&src, &dst, &strict),
            Err(StraightenError::IllConditioned(_))
        ));

        assert!(Homography::compute_with(&src, &dst, &SolverTolerances::default()).is_ok());
    }

    #[test]
    fn test_simple_transform() {
        let src = NativeQuad::from_tuples([(10.0, 10.0), (90.0, 10.0), (90.0, 90.0), (10.0, 90.0)]);
        let dst = OutputQuad::rectangle(Size::new(100, 100));

        let h = Homography::compute(&src, &dst).unwrap();

        // Pure scale + translation: the center stays the center
        let p = h.apply(NativePoint::new(50.0, 50.0)).unwrap();
        assert_close((p.x, p.y), (50.0, 50.0), 1e-9);
    }

    #[test]
    fn test_collinear_source_rejected() {
        let src = NativeQuad::from_tuples([(0.0, 0.0), (10.0, 0.0), (20.0, 0.0), (5.0, 5.0)]);
        let dst = OutputQuad::rectangle(Size::new(100, 100));

        assert_eq!(
            Homography::compute(&src, &dst),
            Err(StraightenError::DegenerateQuadrilateral)
        );
    }

    #[test]
    fn test_degenerate_destination_rejected() {
        let src = NativeQuad::from_tuples([(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let dst = OutputQuad::rectangle(Size::new(100, 0));

        assert_eq!(
            Homography::compute(&src, &dst),
            Err(StraightenError::DegenerateQuadrilateral)
        );
    }

    #[test]
    fn test_collinearity_is_scale_independent() {
        // Nearly-but-not-quite collinear at large coordinates is still valid
        let src = NativeQuad::from_tuples([
            (0.0, 0.0),
            (10_000.0, 0.0),
            (10_000.0, 50.0),
            (0.0, 50.0),
        ]);
        let dst = OutputQuad::rectangle(Size::new(1000, 5));
        assert!(Homography::compute(&src, &dst).is_ok());
    }

    #[test]
    fn test_apply_at_infinity() {
        // w = x - 1 vanishes on the line x = 1
        let h = Homography {
            matrix: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, -1.0],
            inverse: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        };
        assert!(h.apply(NativePoint::new(1.0, 5.0)).is_none());
    }
}

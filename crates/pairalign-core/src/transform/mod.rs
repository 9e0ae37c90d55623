pub mod compose;
pub mod fit;
pub mod tps;

use serde::{Deserialize, Serialize};

use crate::error::{PairalignError, Result};
use crate::frame::Point;

pub use compose::{compose, strip_rotation, ComposedTransform};
pub use fit::{fit_transform, RansacConfig};
pub use tps::TpsWarp;

/// Class of geometric transform to fit between a pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformKind {
    /// Linear + translation; rotation/shear optional.
    Affine,
    /// Full homography.
    Projective,
    /// Thin-plate-spline warp.
    NonRigid,
}

impl TransformKind {
    /// Minimum correspondences needed for a fit.
    pub fn min_points(&self) -> usize {
        match self {
            TransformKind::Affine => 3,
            TransformKind::Projective => 4,
            TransformKind::NonRigid => 4,
        }
    }
}

/// Row-major 2x3 affine matrix `[a, b, tx, c, d, ty]`:
/// `x' = a*x + b*y + tx`, `y' = c*x + d*y + ty`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineMatrix(pub [f64; 6]);

/// Row-major 3x3 projective matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectiveMatrix(pub [f64; 9]);

/// A fitted mapping from source pixel coordinates to destination pixel
/// coordinates. Linear variants can be inverted and composed with a uniform
/// scale; the non-rigid variant is fitted backward instead (see
/// [`tps::TpsWarp`]).
#[derive(Clone, Debug)]
pub enum Transform {
    Affine(AffineMatrix),
    Projective(ProjectiveMatrix),
    NonRigid(TpsWarp),
}

impl Transform {
    /// Evaluate the mapping at a point.
    pub fn apply(&self, p: Point) -> Point {
        match self {
            Transform::Affine(AffineMatrix(m)) => Point::new(
                m[0] * p.x + m[1] * p.y + m[2],
                m[3] * p.x + m[4] * p.y + m[5],
            ),
            Transform::Projective(ProjectiveMatrix(m)) => {
                let w = m[6] * p.x + m[7] * p.y + m[8];
                let w = if w.abs() < 1e-12 { 1e-12 } else { w };
                Point::new(
                    (m[0] * p.x + m[1] * p.y + m[2]) / w,
                    (m[3] * p.x + m[4] * p.y + m[5]) / w,
                )
            }
            Transform::NonRigid(tps) => tps.apply(p),
        }
    }

    /// Invert a linear transform for backward-mapped resampling.
    ///
    /// The non-rigid variant has no closed-form inverse; callers fit the
    /// reverse spline instead.
    pub fn inverse(&self) -> Result<Transform> {
        match self {
            Transform::Affine(AffineMatrix(m)) => {
                let det = m[0] * m[4] - m[1] * m[3];
                if det.abs() < 1e-12 {
                    return Err(PairalignError::TransformFit(
                        "singular affine matrix".into(),
                    ));
                }
                let inv_det = 1.0 / det;
                let a = m[4] * inv_det;
                let b = -m[1] * inv_det;
                let c = -m[3] * inv_det;
                let d = m[0] * inv_det;
                Ok(Transform::Affine(AffineMatrix([
                    a,
                    b,
                    -(a * m[2] + b * m[5]),
                    c,
                    d,
                    -(c * m[2] + d * m[5]),
                ])))
            }
            Transform::Projective(ProjectiveMatrix(m)) => {
                let mat = nalgebra::Matrix3::from_row_slice(m);
                let inv = mat.try_inverse().ok_or_else(|| {
                    PairalignError::TransformFit("singular projective matrix".into())
                })?;
                let mut out = [0.0f64; 9];
                for row in 0..3 {
                    for col in 0..3 {
                        out[row * 3 + col] = inv[(row, col)];
                    }
                }
                Ok(Transform::Projective(ProjectiveMatrix(out)))
            }
            Transform::NonRigid(_) => Err(PairalignError::TransformFit(
                "non-rigid transforms are fitted backward, not inverted".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn affine_apply_and_inverse_round_trip() {
        let t = Transform::Affine(AffineMatrix([1.5, 0.2, 10.0, -0.1, 2.0, -4.0]));
        let inv = t.inverse().unwrap();
        let p = Point::new(7.0, 13.0);
        let q = inv.apply(t.apply(p));
        assert_abs_diff_eq!(q.x, p.x, epsilon = 1e-9);
        assert_abs_diff_eq!(q.y, p.y, epsilon = 1e-9);
    }

    #[test]
    fn projective_apply_and_inverse_round_trip() {
        let t = Transform::Projective(ProjectiveMatrix([
            1.1, 0.05, 3.0, -0.02, 0.9, 1.0, 1e-4, -2e-4, 1.0,
        ]));
        let inv = t.inverse().unwrap();
        let p = Point::new(40.0, 25.0);
        let q = inv.apply(t.apply(p));
        assert_abs_diff_eq!(q.x, p.x, epsilon = 1e-6);
        assert_abs_diff_eq!(q.y, p.y, epsilon = 1e-6);
    }

    #[test]
    fn singular_affine_is_rejected() {
        let t = Transform::Affine(AffineMatrix([1.0, 2.0, 0.0, 2.0, 4.0, 0.0]));
        assert!(t.inverse().is_err());
    }
}

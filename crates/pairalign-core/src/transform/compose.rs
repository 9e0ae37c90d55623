//! Composition of a fitted transform with the requested output scale.
//!
//! The fitted mapping carries whatever scale difference exists between the
//! two inputs. Composing the requested scale on top and then normalizing the
//! result by its effective scale yields a transform whose output grid matches
//! the reference image times the requested factor, with the residual scale
//! reported separately for canvas and crop bookkeeping.

use crate::error::{PairalignError, Result};
use crate::transform::{AffineMatrix, ProjectiveMatrix, Transform};

/// A scale-composed transform plus the bookkeeping the warp stage needs.
#[derive(Clone, Debug)]
pub struct ComposedTransform {
    /// Normalized transform with unit diagonal, ready for inversion and
    /// backward-mapped warping.
    pub transform: Transform,
    /// Average of the absolute diagonal entries after scale composition.
    pub effective_scale: f64,
    /// Ratio of requested scale to effective scale. Output canvas dimensions
    /// and crop offsets are multiplied by this.
    pub canvas_factor: f64,
}

/// Remove rotation and shear from a linear transform, keeping per-axis scale
/// and translation.
///
/// The per-axis scales are the column norms of the upper-left 2x2 block.
pub fn strip_rotation(transform: &Transform) -> Result<Transform> {
    match transform {
        Transform::Affine(AffineMatrix(m)) => {
            let sx = (m[0] * m[0] + m[3] * m[3]).sqrt();
            let sy = (m[1] * m[1] + m[4] * m[4]).sqrt();
            Ok(Transform::Affine(AffineMatrix([
                sx, 0.0, m[2], 0.0, sy, m[5],
            ])))
        }
        Transform::Projective(ProjectiveMatrix(m)) => {
            if m[8].abs() < 1e-12 {
                return Err(PairalignError::TransformFit(
                    "projective matrix has zero homogeneous term".into(),
                ));
            }
            let m: Vec<f64> = m.iter().map(|v| v / m[8]).collect();
            let sx = (m[0] * m[0] + m[3] * m[3]).sqrt();
            let sy = (m[1] * m[1] + m[4] * m[4]).sqrt();
            Ok(Transform::Projective(ProjectiveMatrix([
                sx, 0.0, m[2], 0.0, sy, m[5], 0.0, 0.0, 1.0,
            ])))
        }
        Transform::NonRigid(_) => Err(PairalignError::TransformFit(
            "cannot strip rotation from a non-rigid warp".into(),
        )),
    }
}

/// Compose a uniform scale onto a linear transform and normalize the result.
///
/// The scale matrix multiplies from the left, so the fitted mapping runs
/// first and the upscale second. The effective scale is then divided out of
/// the first two rows and the diagonal pinned to exactly 1, leaving a
/// transform that maps between equally scaled grids.
pub fn compose_scale(transform: &Transform, scale: f64) -> Result<ComposedTransform> {
    match transform {
        Transform::Affine(AffineMatrix(m)) => {
            let scaled = [
                scale * m[0],
                scale * m[1],
                scale * m[2],
                scale * m[3],
                scale * m[4],
                scale * m[5],
            ];
            let effective = (scaled[0].abs() + scaled[4].abs()) / 2.0;
            if effective <= 1e-12 {
                return Err(PairalignError::TransformFit(
                    "composed transform has zero effective scale".into(),
                ));
            }
            let mut n = scaled.map(|v| v / effective);
            n[0] = 1.0;
            n[4] = 1.0;
            Ok(ComposedTransform {
                transform: Transform::Affine(AffineMatrix(n)),
                effective_scale: effective,
                canvas_factor: scale / effective,
            })
        }
        Transform::Projective(ProjectiveMatrix(m)) => {
            if m[8].abs() < 1e-12 {
                return Err(PairalignError::TransformFit(
                    "projective matrix has zero homogeneous term".into(),
                ));
            }
            let m: Vec<f64> = m.iter().map(|v| v / m[8]).collect();
            let scaled = [
                scale * m[0],
                scale * m[1],
                scale * m[2],
                scale * m[3],
                scale * m[4],
                scale * m[5],
                m[6],
                m[7],
                1.0,
            ];
            let effective = (scaled[0].abs() + scaled[4].abs()) / 2.0;
            if effective <= 1e-12 {
                return Err(PairalignError::TransformFit(
                    "composed transform has zero effective scale".into(),
                ));
            }
            let mut n = scaled;
            for v in n.iter_mut().take(6) {
                *v /= effective;
            }
            n[0] = 1.0;
            n[4] = 1.0;
            Ok(ComposedTransform {
                transform: Transform::Projective(ProjectiveMatrix(n)),
                effective_scale: effective,
                canvas_factor: scale / effective,
            })
        }
        Transform::NonRigid(_) => Err(PairalignError::TransformFit(
            "non-rigid warps are not composed with a scale matrix".into(),
        )),
    }
}

/// Prepare a fitted linear transform for warping: optionally strip rotation,
/// then compose and normalize the requested scale.
pub fn compose(transform: &Transform, scale: f64, allow_rotation: bool) -> Result<ComposedTransform> {
    let base = if allow_rotation {
        transform.clone()
    } else {
        strip_rotation(transform)?
    };
    compose_scale(&base, scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn strip_rotation_removes_rotation_keeps_scale() {
        let angle = 0.3f64;
        let (s, c) = angle.sin_cos();
        let sx = 2.0;
        let sy = 0.5;
        let t = Transform::Affine(AffineMatrix([
            sx * c,
            -sy * s,
            7.0,
            sx * s,
            sy * c,
            -3.0,
        ]));
        let stripped = strip_rotation(&t).unwrap();
        match stripped {
            Transform::Affine(AffineMatrix(m)) => {
                assert_abs_diff_eq!(m[0], sx, epsilon = 1e-9);
                assert_abs_diff_eq!(m[4], sy, epsilon = 1e-9);
                assert_eq!(m[1], 0.0);
                assert_eq!(m[3], 0.0);
                assert_abs_diff_eq!(m[2], 7.0);
                assert_abs_diff_eq!(m[5], -3.0);
            }
            _ => panic!("expected affine"),
        }
    }

    #[test]
    fn compose_pins_unit_diagonal() {
        let t = Transform::Affine(AffineMatrix([0.52, 0.0, 10.0, 0.0, 0.48, -4.0]));
        let composed = compose_scale(&t, 2.0).unwrap();
        assert_abs_diff_eq!(composed.effective_scale, 1.0, epsilon = 1e-9);
        match composed.transform {
            Transform::Affine(AffineMatrix(m)) => {
                assert_eq!(m[0], 1.0);
                assert_eq!(m[4], 1.0);
                // Translation is divided by the effective scale too.
                assert_abs_diff_eq!(m[2], 20.0, epsilon = 1e-9);
                assert_abs_diff_eq!(m[5], -8.0, epsilon = 1e-9);
            }
            _ => panic!("expected affine"),
        }
    }

    #[test]
    fn canvas_factor_is_requested_over_effective() {
        let t = Transform::Affine(AffineMatrix([0.25, 0.0, 0.0, 0.0, 0.25, 0.0]));
        let composed = compose_scale(&t, 4.0).unwrap();
        assert_abs_diff_eq!(composed.effective_scale, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(composed.canvas_factor, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn zero_scale_is_rejected() {
        let t = Transform::Affine(AffineMatrix([0.0, 0.0, 1.0, 0.0, 0.0, 1.0]));
        assert!(compose_scale(&t, 2.0).is_err());
    }

    #[test]
    fn projective_normalizes_homogeneous_term_first() {
        let t = Transform::Projective(ProjectiveMatrix([
            2.0, 0.0, 4.0, 0.0, 2.0, -2.0, 0.0, 0.0, 2.0,
        ]));
        let composed = compose_scale(&t, 1.0).unwrap();
        match composed.transform {
            Transform::Projective(ProjectiveMatrix(m)) => {
                assert_eq!(m[0], 1.0);
                assert_eq!(m[4], 1.0);
                assert_eq!(m[8], 1.0);
                assert_abs_diff_eq!(m[2], 2.0, epsilon = 1e-9);
                assert_abs_diff_eq!(m[5], -1.0, epsilon = 1e-9);
            }
            _ => panic!("expected projective"),
        }
    }
}

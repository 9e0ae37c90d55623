//! Robust transform estimation from point correspondences.
//!
//! RANSAC with adaptive early termination and a final least-squares
//! refinement on the inlier set. Affine fits use the normal equations,
//! homographies use normalized DLT with an SVD null-space solve.

use nalgebra::{DMatrix, SVD};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::error::{PairalignError, Result};
use crate::frame::{Point, PointMatches};
use crate::transform::{AffineMatrix, ProjectiveMatrix, Transform, TransformKind};

/// RANSAC configuration.
#[derive(Clone, Debug)]
pub struct RansacConfig {
    /// Maximum iterations.
    pub max_iterations: usize,
    /// Inlier distance threshold in pixels.
    pub inlier_threshold: f64,
    /// Target confidence for early termination.
    pub confidence: f64,
    /// Random seed for reproducibility (None for random).
    pub seed: Option<u64>,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            inlier_threshold: 3.0,
            confidence: 0.999,
            seed: None,
        }
    }
}

/// Fit a linear transform to correspondences with RANSAC.
///
/// `kind` must be `Affine` or `Projective`; non-rigid fits go through
/// [`super::tps::TpsWarp::fit`] since they have no minimal-sample model.
pub fn fit_transform(
    matches: &PointMatches,
    kind: TransformKind,
    config: &RansacConfig,
) -> Result<Transform> {
    let n = matches.len();
    let min_samples = kind.min_points();
    if n < min_samples.max(4) {
        return Err(PairalignError::Correspondence {
            found: n,
            needed: min_samples.max(4),
        });
    }

    let mut rng: ChaCha8Rng = match config.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_os_rng(),
    };

    let mut best_transform: Option<Transform> = None;
    let mut best_inliers: Vec<usize> = Vec::new();

    let mut sample_indices: Vec<usize> = Vec::with_capacity(min_samples);
    let mut iterations = 0;

    while iterations < config.max_iterations {
        iterations += 1;

        random_sample_into(&mut rng, n, min_samples, &mut sample_indices);
        let sample_src: Vec<Point> = sample_indices.iter().map(|&i| matches.source[i]).collect();
        let sample_dst: Vec<Point> = sample_indices.iter().map(|&i| matches.target[i]).collect();

        let candidate = match estimate(&sample_src, &sample_dst, kind) {
            Some(t) => t,
            None => continue,
        };

        let inliers = count_inliers(matches, &candidate, config.inlier_threshold);

        if inliers.len() > best_inliers.len() {
            let inlier_ratio = inliers.len() as f64 / n as f64;
            best_inliers = inliers;
            best_transform = Some(candidate);

            let adaptive_max = adaptive_iterations(inlier_ratio, min_samples, config.confidence);
            if iterations >= adaptive_max {
                break;
            }
        }
    }

    let transform = best_transform.ok_or_else(|| {
        PairalignError::TransformFit("no consensus model found (degenerate geometry)".into())
    })?;

    if best_inliers.len() < min_samples {
        return Err(PairalignError::TransformFit(format!(
            "only {} inliers, need {}",
            best_inliers.len(),
            min_samples
        )));
    }

    // Final refinement with least squares on all inliers.
    let inlier_src: Vec<Point> = best_inliers.iter().map(|&i| matches.source[i]).collect();
    let inlier_dst: Vec<Point> = best_inliers.iter().map(|&i| matches.target[i]).collect();
    Ok(estimate(&inlier_src, &inlier_dst, kind).unwrap_or(transform))
}

fn estimate(src: &[Point], dst: &[Point], kind: TransformKind) -> Option<Transform> {
    match kind {
        TransformKind::Affine => estimate_affine(src, dst),
        TransformKind::Projective => estimate_homography(src, dst),
        TransformKind::NonRigid => None,
    }
}

/// Randomly sample k unique indices from 0..n into a pre-allocated buffer.
fn random_sample_into<R: Rng>(rng: &mut R, n: usize, k: usize, buffer: &mut Vec<usize>) {
    debug_assert!(k <= n);
    buffer.clear();
    // Floyd's algorithm for sampling without replacement.
    for j in (n - k)..n {
        let t = rng.random_range(0..=j);
        if buffer.contains(&t) {
            buffer.push(j);
        } else {
            buffer.push(t);
        }
    }
}

fn count_inliers(matches: &PointMatches, transform: &Transform, threshold: f64) -> Vec<usize> {
    let t2 = threshold * threshold;
    matches
        .source
        .iter()
        .zip(matches.target.iter())
        .enumerate()
        .filter_map(|(i, (&s, &d))| {
            let mapped = transform.apply(s);
            let dx = mapped.x - d.x;
            let dy = mapped.y - d.y;
            if dx * dx + dy * dy <= t2 {
                Some(i)
            } else {
                None
            }
        })
        .collect()
}

/// Iteration count needed to hit `confidence` given the observed inlier
/// ratio: N = log(1 - confidence) / log(1 - w^n).
fn adaptive_iterations(inlier_ratio: f64, sample_size: usize, confidence: f64) -> usize {
    if inlier_ratio <= 0.0 || inlier_ratio >= 1.0 {
        return 1;
    }
    let w_n = inlier_ratio.powi(sample_size as i32);
    if w_n >= 1.0 {
        return 1;
    }
    let log_conf = (1.0 - confidence).ln();
    let log_outlier = (1.0 - w_n).ln();
    if log_outlier >= 0.0 {
        return 1000;
    }
    (log_conf / log_outlier).ceil() as usize
}

/// Least-squares affine fit via the normal equations.
fn estimate_affine(src: &[Point], dst: &[Point]) -> Option<Transform> {
    if src.len() < 3 {
        return None;
    }

    let n = src.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xx = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_yy = 0.0;
    let mut sum_tx = 0.0;
    let mut sum_ty = 0.0;
    let mut sum_x_tx = 0.0;
    let mut sum_y_tx = 0.0;
    let mut sum_x_ty = 0.0;
    let mut sum_y_ty = 0.0;

    for (r, t) in src.iter().zip(dst.iter()) {
        sum_x += r.x;
        sum_y += r.y;
        sum_xx += r.x * r.x;
        sum_xy += r.x * r.y;
        sum_yy += r.y * r.y;
        sum_tx += t.x;
        sum_ty += t.y;
        sum_x_tx += r.x * t.x;
        sum_y_tx += r.y * t.x;
        sum_x_ty += r.x * t.y;
        sum_y_ty += r.y * t.y;
    }

    // 3x3 system per destination coordinate:
    // [sum_xx  sum_xy  sum_x ] [a]   [sum_x_tx]
    // [sum_xy  sum_yy  sum_y ] [b] = [sum_y_tx]
    // [sum_x   sum_y   n     ] [e]   [sum_tx  ]
    let det = sum_xx * (sum_yy * n - sum_y * sum_y) - sum_xy * (sum_xy * n - sum_y * sum_x)
        + sum_x * (sum_xy * sum_y - sum_yy * sum_x);
    if det.abs() < 1e-10 {
        return None;
    }
    let inv_det = 1.0 / det;

    let m00 = (sum_yy * n - sum_y * sum_y) * inv_det;
    let m01 = (sum_x * sum_y - sum_xy * n) * inv_det;
    let m02 = (sum_xy * sum_y - sum_yy * sum_x) * inv_det;
    let m10 = (sum_y * sum_x - sum_xy * n) * inv_det;
    let m11 = (sum_xx * n - sum_x * sum_x) * inv_det;
    let m12 = (sum_xy * sum_x - sum_xx * sum_y) * inv_det;
    let m20 = (sum_xy * sum_y - sum_x * sum_yy) * inv_det;
    let m21 = (sum_xy * sum_x - sum_y * sum_xx) * inv_det;
    let m22 = (sum_xx * sum_yy - sum_xy * sum_xy) * inv_det;

    let a = m00 * sum_x_tx + m01 * sum_y_tx + m02 * sum_tx;
    let b = m10 * sum_x_tx + m11 * sum_y_tx + m12 * sum_tx;
    let e = m20 * sum_x_tx + m21 * sum_y_tx + m22 * sum_tx;
    let c = m00 * sum_x_ty + m01 * sum_y_ty + m02 * sum_ty;
    let d = m10 * sum_x_ty + m11 * sum_y_ty + m12 * sum_ty;
    let f = m20 * sum_x_ty + m21 * sum_y_ty + m22 * sum_ty;

    let result = [a, b, e, c, d, f];
    if result.iter().all(|v| v.is_finite()) {
        Some(Transform::Affine(AffineMatrix(result)))
    } else {
        None
    }
}

/// Homography via normalized Direct Linear Transform.
fn estimate_homography(src: &[Point], dst: &[Point]) -> Option<Transform> {
    if src.len() < 4 {
        return None;
    }

    let (src_norm, src_t) = normalize_points(src);
    let (dst_norm, dst_t) = normalize_points(dst);

    // Each correspondence contributes two rows of the 2n x 9 design matrix.
    let n = src_norm.len();
    let mut a_data = vec![0.0f64; 2 * n * 9];
    for i in 0..n {
        let r = src_norm[i];
        let t = dst_norm[i];
        let base = i * 18;
        a_data[base..base + 9].copy_from_slice(&[
            -r.x,
            -r.y,
            -1.0,
            0.0,
            0.0,
            0.0,
            r.x * t.x,
            r.y * t.x,
            t.x,
        ]);
        a_data[base + 9..base + 18].copy_from_slice(&[
            0.0,
            0.0,
            0.0,
            -r.x,
            -r.y,
            -1.0,
            r.x * t.y,
            r.y * t.y,
            t.y,
        ]);
    }
    let a = DMatrix::from_row_slice(2 * n, 9, &a_data);

    let h_norm = solve_homogeneous_svd(a)?;

    // Denormalize: H = T_dst^-1 * H_norm * T_src
    let dst_t_inv = dst_t.try_inverse()?;
    let h = dst_t_inv * h_norm * src_t;

    let scale = h[(2, 2)];
    if scale.abs() < 1e-10 {
        return None;
    }

    let mut data = [0.0f64; 9];
    for row in 0..3 {
        for col in 0..3 {
            data[row * 3 + col] = h[(row, col)] / scale;
        }
    }
    if data.iter().all(|v| v.is_finite()) {
        Some(Transform::Projective(ProjectiveMatrix(data)))
    } else {
        None
    }
}

/// Hartley normalization: translate to the centroid, scale the average
/// distance to sqrt(2).
fn normalize_points(points: &[Point]) -> (Vec<Point>, nalgebra::Matrix3<f64>) {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;

    let avg_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if avg_dist < 1e-10 {
        return (points.to_vec(), nalgebra::Matrix3::identity());
    }

    let scale = std::f64::consts::SQRT_2 / avg_dist;
    let normalized: Vec<Point> = points
        .iter()
        .map(|p| Point::new((p.x - cx) * scale, (p.y - cy) * scale))
        .collect();

    let t = nalgebra::Matrix3::new(
        scale,
        0.0,
        -cx * scale,
        0.0,
        scale,
        -cy * scale,
        0.0,
        0.0,
        1.0,
    );
    (normalized, t)
}

/// Null-space solve for Ah = 0: right singular vector of the smallest
/// singular value. Pads the design matrix to at least 9 rows so the thin
/// SVD exposes the full V^T.
fn solve_homogeneous_svd(a: DMatrix<f64>) -> Option<nalgebra::Matrix3<f64>> {
    let nrows = a.nrows();
    let ncols = a.ncols();
    let a = if nrows < ncols {
        let mut padded = DMatrix::zeros(ncols, ncols);
        padded.view_mut((0, 0), (nrows, ncols)).copy_from(&a);
        padded
    } else {
        a
    };

    let svd = SVD::new(a, false, true);
    let v_t = svd.v_t?;
    let last_row = v_t.row(8);

    Some(nalgebra::Matrix3::new(
        last_row[0],
        last_row[1],
        last_row[2],
        last_row[3],
        last_row[4],
        last_row[5],
        last_row[6],
        last_row[7],
        last_row[8],
    ))
}

//! Alignment quality score for an already-aligned pair.
//!
//! Both images are resampled to a common small square, matched, and the
//! residual displacement of robust inlier correspondences is turned into a
//! score in [0, 1] where 1 means pixel-perfect registration.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::error::{PairalignError, Result};
use crate::features::CorrespondenceFinder;
use crate::frame::{ColorImage, PointMatches};
use crate::resample::{resize_color, Interpolation};

/// Side length both images are resampled to before matching, so the score
/// is comparable across image sizes.
const SCORE_CANVAS: usize = 256;

const RANSAC_LINE_ITERATIONS: usize = 100;

/// Score how well `a` and `b` are registered.
///
/// Displacements are measured between inlier correspondences only; a mean
/// absolute displacement of 33 pixels or more on the 256-square canvas
/// scores 0.
pub fn align_score(
    a: &ColorImage,
    b: &ColorImage,
    finder: &dyn CorrespondenceFinder,
    seed: Option<u64>,
) -> Result<f64> {
    let a = resize_color(a, SCORE_CANVAS, SCORE_CANVAS, Interpolation::Lanczos3);
    let b = resize_color(b, SCORE_CANVAS, SCORE_CANVAS, Interpolation::Lanczos3);

    let matches = finder.find(&a.luminance(), &b.luminance())?;
    let inliers = robust_inliers(&matches, seed)?;

    let n = inliers.len() as f64;
    let total: f64 = inliers
        .source
        .iter()
        .zip(inliers.target.iter())
        .map(|(s, t)| (t.x - s.x).abs() + (t.y - s.y).abs())
        .sum();
    let mean_disp = total / n;

    Ok((1.0 - 3.0 * (mean_disp / 100.0)).max(0.0))
}

/// Keep correspondences that are inliers of a per-axis robust linear fit on
/// both x and y simultaneously.
fn robust_inliers(matches: &PointMatches, seed: Option<u64>) -> Result<PointMatches> {
    if matches.len() < 2 {
        return Err(PairalignError::Correspondence {
            found: matches.len(),
            needed: 2,
        });
    }
    let mut rng: ChaCha8Rng = match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_os_rng(),
    };

    let xs_src: Vec<f64> = matches.source.iter().map(|p| p.x).collect();
    let xs_dst: Vec<f64> = matches.target.iter().map(|p| p.x).collect();
    let ys_src: Vec<f64> = matches.source.iter().map(|p| p.y).collect();
    let ys_dst: Vec<f64> = matches.target.iter().map(|p| p.y).collect();

    let mask_x = ransac_line_inliers(&xs_src, &xs_dst, &mut rng)?;
    let mask_y = ransac_line_inliers(&ys_src, &ys_dst, &mut rng)?;

    let mut inliers = PointMatches::default();
    for i in 0..matches.len() {
        if mask_x[i] && mask_y[i] {
            inliers.source.push(matches.source[i]);
            inliers.target.push(matches.target[i]);
        }
    }
    if inliers.is_empty() {
        return Err(PairalignError::Correspondence {
            found: 0,
            needed: 1,
        });
    }
    Ok(inliers)
}

/// 1D robust line fit: repeatedly fit `y = a*x + b` to a random pair and
/// keep the inlier mask of the best consensus. The inlier threshold is the
/// median absolute deviation of the targets.
fn ransac_line_inliers(x: &[f64], y: &[f64], rng: &mut ChaCha8Rng) -> Result<Vec<bool>> {
    let n = x.len();
    let threshold = median_absolute_deviation(y).max(1e-3);

    let mut best_mask = vec![false; n];
    let mut best_count = 0usize;

    for _ in 0..RANSAC_LINE_ITERATIONS {
        let i = rng.random_range(0..n);
        let j = rng.random_range(0..n);
        if i == j {
            continue;
        }
        let dx = x[j] - x[i];
        if dx.abs() < 1e-9 {
            continue;
        }
        let slope = (y[j] - y[i]) / dx;
        let intercept = y[i] - slope * x[i];

        let mask: Vec<bool> = x
            .iter()
            .zip(y.iter())
            .map(|(&xv, &yv)| (slope * xv + intercept - yv).abs() <= threshold)
            .collect();
        let count = mask.iter().filter(|&&m| m).count();
        if count > best_count {
            best_count = count;
            best_mask = mask;
        }
    }

    if best_count == 0 {
        return Err(PairalignError::TransformFit(
            "no consensus line for displacement scoring".into(),
        ));
    }
    Ok(best_mask)
}

fn median_absolute_deviation(values: &[f64]) -> f64 {
    let med = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    median(&deviations)
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, Point};
    use ndarray::Array2;

    struct FixedMatches(PointMatches);

    impl CorrespondenceFinder for FixedMatches {
        fn find(&self, _a: &Frame, _b: &Frame) -> Result<PointMatches> {
            Ok(self.0.clone())
        }
    }

    fn gray_image(h: usize, w: usize) -> ColorImage {
        let frame = Frame::new(Array2::from_elem((h, w), 0.5));
        ColorImage {
            red: frame.clone(),
            green: frame.clone(),
            blue: frame,
        }
    }

    fn grid(offset_x: f64, offset_y: f64) -> PointMatches {
        let mut matches = PointMatches::default();
        for row in 0..5 {
            for col in 0..5 {
                let p = Point::new(col as f64 * 40.0 + 20.0, row as f64 * 40.0 + 20.0);
                matches.source.push(p);
                matches
                    .target
                    .push(Point::new(p.x + offset_x, p.y + offset_y));
            }
        }
        matches
    }

    #[test]
    fn perfect_registration_scores_one() {
        let finder = FixedMatches(grid(0.0, 0.0));
        let image = gray_image(100, 100);
        let score = align_score(&image, &image, &finder, Some(1)).unwrap();
        assert_eq!(score, 1.0);
    }

    #[test]
    fn large_displacement_scores_zero() {
        let finder = FixedMatches(grid(30.0, 30.0));
        let image = gray_image(100, 100);
        let score = align_score(&image, &image, &finder, Some(1)).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn score_decreases_with_displacement() {
        let image = gray_image(100, 100);
        let small = align_score(
            &image,
            &image,
            &FixedMatches(grid(1.0, 1.0)),
            Some(1),
        )
        .unwrap();
        let large = align_score(
            &image,
            &image,
            &FixedMatches(grid(5.0, 5.0)),
            Some(1),
        )
        .unwrap();
        assert!((0.0..=1.0).contains(&small));
        assert!((0.0..=1.0).contains(&large));
        assert!(small > large);
    }
}

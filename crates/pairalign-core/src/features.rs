use ndarray::Array2;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{PairalignError, Result};
use crate::filters::gaussian_blur_array;
use crate::frame::{Frame, Point, PointMatches};
use crate::resample::{resize_array, Interpolation};

/// Upper bound on keypoints kept per image.
pub const MAX_FEATURES: usize = 500;

/// Minimum surviving matches for a usable correspondence set.
pub const MIN_GOOD_MATCHES: usize = 6;

/// Lowe ratio: best distance must beat 0.7x the second best.
const RATIO_THRESHOLD: f32 = 0.7;

/// Keypoints closer than this to the image edge cannot host a descriptor
/// patch and are discarded.
const PATCH_MARGIN: isize = 18;

/// BRIEF patch half-extent.
const PATCH_RADIUS: i8 = 15;

/// Descriptor length in bytes (256 comparisons).
const DESCRIPTOR_BYTES: usize = 32;

/// Finds point correspondences between two grayscale images.
///
/// This is the seam between alignment and feature matching: production code
/// uses [`FeatureMatcher`], tests can inject exact correspondences.
pub trait CorrespondenceFinder: Send + Sync {
    fn find(&self, a: &Frame, b: &Frame) -> Result<PointMatches>;
}

#[derive(Clone, Copy, Debug)]
pub struct FeatureConfig {
    /// FAST intensity threshold, in [0,1] pixel units.
    pub threshold: f32,
    /// Keypoint cap per image.
    pub max_features: usize,
    /// Blur applied before descriptor sampling.
    pub descriptor_sigma: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            threshold: 0.08,
            max_features: MAX_FEATURES,
            descriptor_sigma: 2.0,
        }
    }
}

/// FAST-9 corners with BRIEF-256 descriptors and ratio-test matching.
#[derive(Clone, Debug, Default)]
pub struct FeatureMatcher {
    pub config: FeatureConfig,
}

impl FeatureMatcher {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }
}

impl CorrespondenceFinder for FeatureMatcher {
    /// Match two images of possibly different sizes.
    ///
    /// Both are first resampled to their common maximum dimensions so the
    /// descriptor patches see comparable detail, then matched coordinates
    /// are rescaled back into each image's native pixel space.
    fn find(&self, a: &Frame, b: &Frame) -> Result<PointMatches> {
        let (ah, aw) = a.data.dim();
        let (bh, bw) = b.data.dim();
        let h = ah.max(bh);
        let w = aw.max(bw);

        let a_big = resize_array(&a.data, h, w, Interpolation::Lanczos3);
        let b_big = resize_array(&b.data, h, w, Interpolation::Lanczos3);

        let feats_a = detect_and_describe(&a_big, &self.config);
        let feats_b = detect_and_describe(&b_big, &self.config);
        debug!(
            a = feats_a.len(),
            b = feats_b.len(),
            "Detected feature points"
        );

        let pairs = match_descriptors(&feats_a, &feats_b);
        if pairs.len() < MIN_GOOD_MATCHES {
            return Err(PairalignError::Correspondence {
                found: pairs.len(),
                needed: MIN_GOOD_MATCHES,
            });
        }

        let mut matches = PointMatches::default();
        for (ia, ib) in pairs {
            let ka = &feats_a[ia];
            let kb = &feats_b[ib];
            matches.source.push(Point::new(
                ka.x * aw as f64 / w as f64,
                ka.y * ah as f64 / h as f64,
            ));
            matches.target.push(Point::new(
                kb.x * bw as f64 / w as f64,
                kb.y * bh as f64 / h as f64,
            ));
        }
        Ok(matches)
    }
}

#[derive(Clone, Debug)]
struct Feature {
    x: f64,
    y: f64,
    descriptor: [u8; DESCRIPTOR_BYTES],
}

/// Bresenham circle of radius 3 used by FAST, clockwise from 12 o'clock.
const FAST_CIRCLE: [(isize, isize); 16] = [
    (-3, 0),
    (-3, 1),
    (-2, 2),
    (-1, 3),
    (0, 3),
    (1, 3),
    (2, 2),
    (3, 1),
    (3, 0),
    (3, -1),
    (2, -2),
    (1, -3),
    (0, -3),
    (-1, -3),
    (-2, -2),
    (-3, -1),
];

fn detect_and_describe(data: &Array2<f32>, config: &FeatureConfig) -> Vec<Feature> {
    let (h, w) = data.dim();
    if h as isize <= 2 * PATCH_MARGIN || w as isize <= 2 * PATCH_MARGIN {
        return Vec::new();
    }

    // Corner response map; zero where not a corner.
    let response_rows: Vec<Vec<f32>> = (0..h)
        .into_par_iter()
        .map(|row| {
            (0..w)
                .map(|col| {
                    if (row as isize) < PATCH_MARGIN
                        || (col as isize) < PATCH_MARGIN
                        || row as isize >= h as isize - PATCH_MARGIN
                        || col as isize >= w as isize - PATCH_MARGIN
                    {
                        0.0
                    } else {
                        fast9_response(data, row, col, config.threshold)
                    }
                })
                .collect()
        })
        .collect();

    let mut response = Array2::<f32>::zeros((h, w));
    for (row, row_data) in response_rows.into_iter().enumerate() {
        for (col, val) in row_data.into_iter().enumerate() {
            response[[row, col]] = val;
        }
    }

    // 3x3 non-max suppression.
    let mut corners: Vec<(usize, usize, f32)> = Vec::new();
    for row in 1..h - 1 {
        for col in 1..w - 1 {
            let r = response[[row, col]];
            if r <= 0.0 {
                continue;
            }
            let mut is_max = true;
            'nms: for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    if dy == 0 && dx == 0 {
                        continue;
                    }
                    let n = response[[(row as isize + dy) as usize, (col as isize + dx) as usize]];
                    if n > r {
                        is_max = false;
                        break 'nms;
                    }
                }
            }
            if is_max {
                corners.push((row, col, r));
            }
        }
    }

    corners.sort_by(|a, b| b.2.total_cmp(&a.2));
    corners.truncate(config.max_features);

    let smoothed = gaussian_blur_array(data, config.descriptor_sigma);
    let pattern = brief_pattern();

    corners
        .into_iter()
        .map(|(row, col, _)| Feature {
            x: col as f64,
            y: row as f64,
            descriptor: brief_descriptor(&smoothed, row, col, &pattern),
        })
        .collect()
}

/// FAST-9 corner test. Returns the response (sum of absolute differences
/// along the contiguous arc) or 0 when the pixel is not a corner.
fn fast9_response(data: &Array2<f32>, row: usize, col: usize, threshold: f32) -> f32 {
    let center = data[[row, col]];
    let ring: Vec<f32> = FAST_CIRCLE
        .iter()
        .map(|&(dy, dx)| data[[(row as isize + dy) as usize, (col as isize + dx) as usize]])
        .collect();

    // Quick reject: of the 4 compass points at least 3 must deviate.
    let compass = [ring[0], ring[4], ring[8], ring[12]];
    let brighter = compass.iter().filter(|&&v| v > center + threshold).count();
    let darker = compass.iter().filter(|&&v| v < center - threshold).count();
    if brighter < 3 && darker < 3 {
        return 0.0;
    }

    // Longest contiguous arc (wrapping) that is uniformly brighter/darker.
    let mut best = 0.0f32;
    for &sign in &[1.0f32, -1.0] {
        let mut run = 0usize;
        let mut run_sum = 0.0f32;
        let mut found = false;
        let mut found_sum = 0.0f32;
        for i in 0..32 {
            let v = ring[i % 16];
            let diff = sign * (v - center);
            if diff > threshold {
                run += 1;
                run_sum += diff;
                if run >= 9 && !found {
                    found = true;
                }
                if run >= 9 {
                    found_sum = found_sum.max(run_sum);
                }
            } else {
                run = 0;
                run_sum = 0.0;
            }
        }
        if found {
            best = best.max(found_sum);
        }
    }
    best
}

/// Fixed BRIEF sampling pattern, regenerated deterministically per call.
/// 256 point pairs uniformly distributed inside the patch.
fn brief_pattern() -> Vec<(i8, i8, i8, i8)> {
    let mut rng = ChaCha8Rng::seed_from_u64(0x9E3779B97F4A7C15);
    (0..DESCRIPTOR_BYTES * 8)
        .map(|_| {
            (
                rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
                rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
                rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
                rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
            )
        })
        .collect()
}

fn brief_descriptor(
    smoothed: &Array2<f32>,
    row: usize,
    col: usize,
    pattern: &[(i8, i8, i8, i8)],
) -> [u8; DESCRIPTOR_BYTES] {
    let mut descriptor = [0u8; DESCRIPTOR_BYTES];
    for (bit, &(dy1, dx1, dy2, dx2)) in pattern.iter().enumerate() {
        let p1 = smoothed[[
            (row as isize + dy1 as isize) as usize,
            (col as isize + dx1 as isize) as usize,
        ]];
        let p2 = smoothed[[
            (row as isize + dy2 as isize) as usize,
            (col as isize + dx2 as isize) as usize,
        ]];
        if p1 < p2 {
            descriptor[bit / 8] |= 1 << (bit % 8);
        }
    }
    descriptor
}

fn hamming(a: &[u8; DESCRIPTOR_BYTES], b: &[u8; DESCRIPTOR_BYTES]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x ^ y).count_ones())
        .sum()
}

/// Brute-force matching with the Lowe ratio test.
fn match_descriptors(a: &[Feature], b: &[Feature]) -> Vec<(usize, usize)> {
    if b.len() < 2 {
        return Vec::new();
    }
    a.par_iter()
        .enumerate()
        .filter_map(|(ia, fa)| {
            let mut best = u32::MAX;
            let mut second = u32::MAX;
            let mut best_idx = 0usize;
            for (ib, fb) in b.iter().enumerate() {
                let d = hamming(&fa.descriptor, &fb.descriptor);
                if d < best {
                    second = best;
                    best = d;
                    best_idx = ib;
                } else if d < second {
                    second = d;
                }
            }
            if (best as f32) < RATIO_THRESHOLD * second as f32 {
                Some((ia, best_idx))
            } else {
                None
            }
        })
        .collect()
}

/// Exposed for tests and the scorer: keypoint positions only.
pub fn detect_corners(frame: &Frame, config: &FeatureConfig) -> Vec<(f64, f64)> {
    detect_and_describe(&frame.data, config)
        .into_iter()
        .map(|f| (f.x, f.y))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_image_has_no_corners() {
        let frame = Frame::new(Array2::<f32>::from_elem((64, 64), 0.5));
        let corners = detect_corners(&frame, &FeatureConfig::default());
        assert!(corners.is_empty());
    }

    #[test]
    fn bright_square_corner_is_detected() {
        let mut data = Array2::<f32>::zeros((64, 64));
        for row in 30..64 {
            for col in 30..64 {
                data[[row, col]] = 1.0;
            }
        }
        let corners = detect_corners(&Frame::new(data), &FeatureConfig::default());
        assert!(!corners.is_empty());
        // The detected corner should be near (30, 30).
        let near = corners
            .iter()
            .any(|&(x, y)| (x - 30.0).abs() < 4.0 && (y - 30.0).abs() < 4.0);
        assert!(near, "no corner near the square corner: {corners:?}");
    }

    #[test]
    fn identical_textured_images_match() {
        // Deterministic noise texture has corners everywhere.
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let data = Array2::<f32>::from_shape_fn((96, 96), |_| rng.random_range(0.0..1.0));
        let frame = Frame::new(data);
        let matcher = FeatureMatcher::default();
        let matches = matcher.find(&frame, &frame).unwrap();
        assert!(matches.len() >= MIN_GOOD_MATCHES);
        // Self-matching must be the identity on coordinates.
        for (s, t) in matches.source.iter().zip(matches.target.iter()) {
            assert_eq!(s, t);
        }
    }
}

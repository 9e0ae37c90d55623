//! End-to-end alignment of one HR/LR pair.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::align::rectangle::{largest_rectangle, Rect};
use crate::error::{PairalignError, Result};
use crate::features::CorrespondenceFinder;
use crate::filters::gaussian_blur_color;
use crate::frame::{ColorImage, Point, PointMatches};
use crate::io::autocrop::autocrop_borders;
use crate::resample::{blend_half, resize_color, warp_array, Interpolation};
use crate::transform::{compose, fit_transform, RansacConfig, Transform, TransformKind, TpsWarp};

/// Blur applied to the high-resolution reference before feature matching,
/// so both references carry comparable detail frequencies.
const REFERENCE_BLUR_SIGMA: f32 = 2.0;

/// Which image of the pair gets resampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignMode {
    /// Warp the HR image into the LR frame's geometry. LR pixels stay true
    /// apart from cropping.
    WarpHr,
    /// Warp the LR image into the HR frame's geometry. HR pixels stay true
    /// apart from cropping.
    WarpLr,
}

/// Per-pair alignment settings.
#[derive(Clone, Debug)]
pub struct AlignConfig {
    /// Requested HR/LR resolution ratio, e.g. 2.0.
    pub scale: f64,
    pub mode: AlignMode,
    pub kind: TransformKind,
    /// Keep rotation and shear in the fitted transform. When false the
    /// linear block is reduced to per-axis scales.
    pub allow_rotation: bool,
    /// Strip near-black borders before aligning.
    pub autocrop: bool,
    /// 8-bit luminance cutoff for the autocrop.
    pub luminance_threshold: u8,
    /// Produce a 50/50 blended preview of the aligned pair.
    pub overlay: bool,
    pub ransac: RansacConfig,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            scale: 2.0,
            mode: AlignMode::WarpHr,
            kind: TransformKind::Affine,
            allow_rotation: false,
            autocrop: false,
            luminance_threshold: 50,
            overlay: true,
            ransac: RansacConfig::default(),
        }
    }
}

/// Result of aligning one pair.
#[derive(Clone, Debug)]
pub struct AlignedPair {
    pub hr: ColorImage,
    pub lr: ColorImage,
    pub overlay: Option<ColorImage>,
}

/// Align an HR/LR pair and return the cropped, co-registered images.
pub fn align_pair(
    hr: &ColorImage,
    lr: &ColorImage,
    config: &AlignConfig,
    finder: &dyn CorrespondenceFinder,
) -> Result<AlignedPair> {
    let (hr, lr) = if config.autocrop {
        (
            autocrop_borders(hr, config.luminance_threshold),
            autocrop_borders(lr, config.luminance_threshold),
        )
    } else {
        (hr.clone(), lr.clone())
    };

    let hr_ref = gaussian_blur_color(&hr, REFERENCE_BLUR_SIGMA);

    let (hr_out, lr_out) = match config.mode {
        AlignMode::WarpHr => {
            let (warped_hr, cropped_lr) =
                align_process(&hr, &lr, &hr_ref, &lr, config.scale, config, finder)?;
            (warped_hr, cropped_lr)
        }
        AlignMode::WarpLr => {
            // The mapping runs LR -> HR, so the scale carried through the
            // pipeline is the reciprocal of the requested ratio.
            let (warped_lr, cropped_hr) =
                align_process(&lr, &hr, &lr, &hr_ref, 1.0 / config.scale, config, finder)?;
            (cropped_hr, warped_lr)
        }
    };

    let overlay = if config.overlay {
        let upscaled_lr = resize_color(
            &lr_out,
            hr_out.height(),
            hr_out.width(),
            Interpolation::Lanczos3,
        );
        Some(blend_half(&hr_out, &upscaled_lr))
    } else {
        None
    };

    Ok(AlignedPair {
        hr: hr_out,
        lr: lr_out,
        overlay,
    })
}

/// Truncate a scale-times-index product to a pixel count. The epsilon keeps
/// values a hair under an integer, produced by float noise in the fitted
/// scale, from losing a whole row or column.
fn trunc(v: f64) -> usize {
    (v + 1e-6).floor().max(0.0) as usize
}

/// Core pipeline: warp `im1` into `im2`'s frame, upscaled by `scale`,
/// and crop both to the usable overlap.
///
/// `im1_ref`/`im2_ref` are the (possibly smoothed) copies used only for
/// correspondence finding; the originals are what get resampled.
#[allow(clippy::too_many_arguments)]
fn align_process(
    im1: &ColorImage,
    im2: &ColorImage,
    im1_ref: &ColorImage,
    im2_ref: &ColorImage,
    scale: f64,
    config: &AlignConfig,
    finder: &dyn CorrespondenceFinder,
) -> Result<(ColorImage, ColorImage)> {
    let (h1, w1) = (im1_ref.height(), im1_ref.width());
    let (h2, w2) = (im2_ref.height(), im2_ref.width());

    let matches = finder.find(&im1_ref.luminance(), &im2_ref.luminance())?;
    debug!(matches = matches.len(), "correspondences found");

    match config.kind {
        TransformKind::NonRigid => {
            align_non_rigid(im1, im2, &matches, (h1, w1), (h2, w2), scale, config)
        }
        _ => align_linear(im1, im2, &matches, (h1, w1), (h2, w2), scale, config),
    }
}

fn align_linear(
    im1: &ColorImage,
    im2: &ColorImage,
    matches: &PointMatches,
    (h1, w1): (usize, usize),
    (h2, w2): (usize, usize),
    scale: f64,
    config: &AlignConfig,
) -> Result<(ColorImage, ColorImage)> {
    let fitted = fit_transform(matches, config.kind, &config.ransac)?;

    // The validity mask goes through the raw (optionally de-rotated)
    // transform; the requested scale only enters the image warp.
    let mask_transform = if config.allow_rotation {
        fitted.clone()
    } else {
        crate::transform::strip_rotation(&fitted)?
    };
    let mask = warp_mask(&mask_transform, (h1, w1), (h2, w2))?;

    let rect = largest_rectangle(&mask);
    debug!(?rect, "usable overlap");
    let rect = snap_for_mode(rect, scale, config.mode)?;

    let composed = compose(&fitted, scale, config.allow_rotation)?;
    debug!(
        effective_scale = composed.effective_scale,
        canvas_factor = composed.canvas_factor,
        "composed transform"
    );
    let factor = composed.canvas_factor;
    let inverse = composed.transform.inverse()?;

    // Destination window in upscaled coordinates, top-left inclusive,
    // bottom-right exclusive.
    let y0 = trunc(factor * rect.top as f64);
    let x0 = trunc(factor * rect.left as f64);
    let y1 = trunc(factor * (rect.bottom + 1) as f64);
    let x1 = trunc(factor * (rect.right + 1) as f64);
    if y1 <= y0 || x1 <= x0 {
        return Err(PairalignError::Pipeline(
            "usable overlap collapsed to an empty crop".into(),
        ));
    }

    let warped = im1.map_channels(|frame| {
        crate::frame::Frame::new(warp_array(
            &frame.data,
            y1 - y0,
            x1 - x0,
            Interpolation::Lanczos3,
            |y, x| {
                let src = inverse.apply(Point::new(x + x0 as f64, y + y0 as f64));
                (src.y, src.x)
            },
        ))
    });

    let cropped = crop_color(im2, rect);
    Ok((warped, cropped))
}

fn align_non_rigid(
    im1: &ColorImage,
    im2: &ColorImage,
    matches: &PointMatches,
    (h1, w1): (usize, usize),
    (h2, w2): (usize, usize),
    scale: f64,
    config: &AlignConfig,
) -> Result<(ColorImage, ColorImage)> {
    if matches.len() < TransformKind::NonRigid.min_points() {
        return Err(PairalignError::Correspondence {
            found: matches.len(),
            needed: TransformKind::NonRigid.min_points(),
        });
    }

    // Fitted backward (destination to source) so evaluation drives the
    // backward-mapped resampling directly.
    let mask_spline = TpsWarp::fit(&matches.target, &matches.source)?;
    let ones = Array2::<f32>::from_elem((h1, w1), 1.0);
    let mask = warp_array(&ones, h2, w2, Interpolation::Nearest, |y, x| {
        let src = mask_spline.apply(Point::new(x, y));
        (src.y, src.x)
    });

    let rect = largest_rectangle(&mask);
    debug!(?rect, "usable overlap");
    let rect = snap_for_mode(rect, scale, config.mode)?;

    // Image spline maps upscaled destination coordinates back to im1.
    let scaled_target: Vec<Point> = matches
        .target
        .iter()
        .map(|p| Point::new(p.x * scale, p.y * scale))
        .collect();
    let image_spline = TpsWarp::fit(&scaled_target, &matches.source)?;

    // Canvas large enough for either the source or the upscaled destination.
    let canvas_h = h1.max((scale * h2 as f64).round() as usize);
    let canvas_w = w1.max((scale * w2 as f64).round() as usize);

    let y0 = trunc(scale * rect.top as f64);
    let x0 = trunc(scale * rect.left as f64);
    let y1 = trunc(scale * (rect.bottom + 1) as f64).min(canvas_h);
    let x1 = trunc(scale * (rect.right + 1) as f64).min(canvas_w);
    if y1 <= y0 || x1 <= x0 {
        return Err(PairalignError::Pipeline(
            "usable overlap collapsed to an empty crop".into(),
        ));
    }

    let warped = im1.map_channels(|frame| {
        crate::frame::Frame::new(warp_array(
            &frame.data,
            y1 - y0,
            x1 - x0,
            Interpolation::Lanczos3,
            |y, x| {
                let src = image_spline.apply(Point::new(x + x0 as f64, y + y0 as f64));
                (src.y, src.x)
            },
        ))
    });

    let cropped = crop_color(im2, rect);
    Ok((warped, cropped))
}

/// Warp an all-ones source canvas through the fitted transform into the
/// destination's dimensions. Nearest sampling keeps the mask binary.
fn warp_mask(
    transform: &Transform,
    (h1, w1): (usize, usize),
    (h2, w2): (usize, usize),
) -> Result<Array2<f32>> {
    let ones = Array2::<f32>::from_elem((h1, w1), 1.0);
    let inverse = transform.inverse()?;
    Ok(warp_array(&ones, h2, w2, Interpolation::Nearest, |y, x| {
        let src = inverse.apply(Point::new(x, y));
        (src.y, src.x)
    }))
}

/// Mode-1 runs require crops whose dimensions survive an exact integer
/// decimation back to the LR grid.
fn snap_for_mode(rect: Rect, scale: f64, mode: AlignMode) -> Result<Rect> {
    match mode {
        AlignMode::WarpHr => Ok(rect),
        AlignMode::WarpLr => {
            let modulus = (1.0 / scale).round().max(1.0) as usize;
            rect.snap_to_multiple(modulus).ok_or_else(|| {
                PairalignError::Pipeline(format!(
                    "overlap {}x{} is smaller than the scale modulus {}",
                    rect.height(),
                    rect.width(),
                    modulus
                ))
            })
        }
    }
}

fn crop_color(image: &ColorImage, rect: Rect) -> ColorImage {
    image.map_channels(|frame| {
        let view = frame
            .data
            .slice(ndarray::s![rect.top..=rect.bottom, rect.left..=rect.right]);
        crate::frame::Frame::new(view.to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trunc_matches_integer_cast_semantics() {
        assert_eq!(trunc(3.999), 3);
        assert_eq!(trunc(4.0), 4);
        assert_eq!(trunc(-0.5), 0);
    }

    #[test]
    fn snap_for_mode_zero_is_identity() {
        let rect = Rect {
            top: 1,
            left: 2,
            bottom: 10,
            right: 11,
        };
        assert_eq!(snap_for_mode(rect, 2.0, AlignMode::WarpHr).unwrap(), rect);
    }

    #[test]
    fn snap_for_mode_one_enforces_modulus() {
        let rect = Rect {
            top: 0,
            left: 0,
            bottom: 12,
            right: 18,
        };
        // Internal scale 0.25 means crops must decimate by 4 exactly.
        let snapped = snap_for_mode(rect, 0.25, AlignMode::WarpLr).unwrap();
        assert_eq!(snapped.height() % 4, 0);
        assert_eq!(snapped.width() % 4, 0);
    }

    #[test]
    fn crop_color_uses_inclusive_bounds() {
        let data = Array2::<f32>::from_shape_fn((8, 8), |(r, c)| (r * 8 + c) as f32 / 64.0);
        let frame = crate::frame::Frame::new(data);
        let image = ColorImage {
            red: frame.clone(),
            green: frame.clone(),
            blue: frame,
        };
        let rect = Rect {
            top: 2,
            left: 3,
            bottom: 5,
            right: 6,
        };
        let cropped = crop_color(&image, rect);
        assert_eq!(cropped.height(), 4);
        assert_eq!(cropped.width(), 4);
        assert_eq!(cropped.red.data[[0, 0]], (2 * 8 + 3) as f32 / 64.0);
    }
}

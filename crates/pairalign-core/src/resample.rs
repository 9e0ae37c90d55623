use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::frame::{ColorImage, Frame};

/// Interpolation kernel for sampling and resizing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Interpolation {
    /// No interpolation; used for coverage masks where fractional values
    /// would blur the valid/invalid boundary.
    Nearest,
    Bilinear,
    /// Windowed sinc, radius 3. Output resampling default.
    Lanczos3,
}

/// Sample `data` at fractional coordinates. Coordinates outside the array
/// yield 0.
pub fn sample(data: &Array2<f32>, y: f64, x: f64, interp: Interpolation) -> f32 {
    match interp {
        Interpolation::Nearest => sample_nearest(data, y, x),
        Interpolation::Bilinear => sample_bilinear(data, y, x),
        Interpolation::Lanczos3 => sample_lanczos3(data, y, x),
    }
}

fn sample_nearest(data: &Array2<f32>, y: f64, x: f64) -> f32 {
    let (h, w) = data.dim();
    let row = y.round();
    let col = x.round();
    if row < 0.0 || col < 0.0 || row >= h as f64 || col >= w as f64 {
        return 0.0;
    }
    data[[row as usize, col as usize]]
}

fn sample_bilinear(data: &Array2<f32>, y: f64, x: f64) -> f32 {
    let (h, w) = data.dim();
    if y < 0.0 || x < 0.0 || y > (h - 1) as f64 || x > (w - 1) as f64 {
        return 0.0;
    }
    let y0 = y.floor() as usize;
    let x0 = x.floor() as usize;
    let y1 = (y0 + 1).min(h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let fy = (y - y0 as f64) as f32;
    let fx = (x - x0 as f64) as f32;

    data[[y0, x0]] * (1.0 - fy) * (1.0 - fx)
        + data[[y0, x1]] * (1.0 - fy) * fx
        + data[[y1, x0]] * fy * (1.0 - fx)
        + data[[y1, x1]] * fy * fx
}

fn lanczos3_weight(t: f64) -> f64 {
    let t = t.abs();
    if t < 1e-9 {
        return 1.0;
    }
    if t >= 3.0 {
        return 0.0;
    }
    let pt = std::f64::consts::PI * t;
    3.0 * (pt.sin() * (pt / 3.0).sin()) / (pt * pt)
}

fn sample_lanczos3(data: &Array2<f32>, y: f64, x: f64) -> f32 {
    let (h, w) = data.dim();
    if y < -0.5 || x < -0.5 || y > h as f64 - 0.5 || x > w as f64 - 0.5 {
        return 0.0;
    }
    let y0 = y.floor() as isize;
    let x0 = x.floor() as isize;

    let mut acc = 0.0f64;
    let mut weight_sum = 0.0f64;
    for dy in -2..=3 {
        let row = (y0 + dy).clamp(0, h as isize - 1) as usize;
        let wy = lanczos3_weight(y - (y0 + dy) as f64);
        if wy == 0.0 {
            continue;
        }
        for dx in -2..=3 {
            let col = (x0 + dx).clamp(0, w as isize - 1) as usize;
            let wx = lanczos3_weight(x - (x0 + dx) as f64);
            if wx == 0.0 {
                continue;
            }
            let weight = wy * wx;
            acc += data[[row, col]] as f64 * weight;
            weight_sum += weight;
        }
    }
    if weight_sum.abs() < 1e-12 {
        return 0.0;
    }
    (acc / weight_sum) as f32
}

/// Resize a plane to `(new_h, new_w)` with the given kernel.
pub fn resize_array(
    data: &Array2<f32>,
    new_h: usize,
    new_w: usize,
    interp: Interpolation,
) -> Array2<f32> {
    let (h, w) = data.dim();
    let sy = h as f64 / new_h as f64;
    let sx = w as f64 / new_w as f64;

    let rows: Vec<Vec<f32>> = (0..new_h)
        .into_par_iter()
        .map(|row| {
            let src_y = (row as f64 + 0.5) * sy - 0.5;
            (0..new_w)
                .map(|col| {
                    let src_x = (col as f64 + 0.5) * sx - 0.5;
                    sample(data, src_y.max(0.0), src_x.max(0.0), interp)
                })
                .collect()
        })
        .collect();

    let mut result = Array2::<f32>::zeros((new_h, new_w));
    for (row, row_data) in rows.into_iter().enumerate() {
        for (col, val) in row_data.into_iter().enumerate() {
            result[[row, col]] = val;
        }
    }
    result
}

/// Resize a frame.
pub fn resize_frame(frame: &Frame, new_h: usize, new_w: usize, interp: Interpolation) -> Frame {
    Frame::new(resize_array(&frame.data, new_h, new_w, interp))
}

/// Resize a color image channel-wise.
pub fn resize_color(
    image: &ColorImage,
    new_h: usize,
    new_w: usize,
    interp: Interpolation,
) -> ColorImage {
    image.map_channels(|frame| resize_frame(frame, new_h, new_w, interp))
}

/// Backward-mapped warp: for each output pixel, `map(y, x)` returns the
/// fractional source coordinates to sample. Coordinates outside the source
/// yield 0.
pub fn warp_array<F>(
    data: &Array2<f32>,
    out_h: usize,
    out_w: usize,
    interp: Interpolation,
    map: F,
) -> Array2<f32>
where
    F: Fn(f64, f64) -> (f64, f64) + Sync,
{
    let rows: Vec<Vec<f32>> = (0..out_h)
        .into_par_iter()
        .map(|row| {
            (0..out_w)
                .map(|col| {
                    let (src_y, src_x) = map(row as f64, col as f64);
                    sample(data, src_y, src_x, interp)
                })
                .collect()
        })
        .collect();

    let mut result = Array2::<f32>::zeros((out_h, out_w));
    for (row, row_data) in rows.into_iter().enumerate() {
        for (col, val) in row_data.into_iter().enumerate() {
            result[[row, col]] = val;
        }
    }
    result
}

/// 50/50 alpha blend of two equally sized images, for overlay previews.
pub fn blend_half(a: &ColorImage, b: &ColorImage) -> ColorImage {
    let blend = |x: &Array2<f32>, y: &Array2<f32>| -> Array2<f32> {
        let mut out = x.clone();
        out.zip_mut_with(y, |u, &v| *u = 0.5 * *u + 0.5 * v);
        out
    };
    ColorImage {
        red: Frame::new(blend(&a.red.data, &b.red.data)),
        green: Frame::new(blend(&a.green.data, &b.green.data)),
        blue: Frame::new(blend(&a.blue.data, &b.blue.data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn bilinear_interpolates_midpoint() {
        let mut data = Array2::<f32>::zeros((2, 2));
        data[[0, 1]] = 1.0;
        data[[1, 1]] = 1.0;
        assert_abs_diff_eq!(
            sample(&data, 0.5, 0.5, Interpolation::Bilinear),
            0.5,
            epsilon = 1e-6
        );
    }

    #[test]
    fn nearest_outside_is_zero() {
        let data = Array2::<f32>::from_elem((4, 4), 1.0);
        assert_eq!(sample(&data, -1.0, 0.0, Interpolation::Nearest), 0.0);
        assert_eq!(sample(&data, 0.0, 4.2, Interpolation::Nearest), 0.0);
    }

    #[test]
    fn lanczos_reproduces_constant() {
        let data = Array2::<f32>::from_elem((12, 12), 0.7);
        let v = sample(&data, 5.3, 6.8, Interpolation::Lanczos3);
        assert_abs_diff_eq!(v, 0.7, epsilon = 1e-4);
    }

    #[test]
    fn warp_with_identity_map_is_identity() {
        let mut data = Array2::<f32>::zeros((5, 7));
        data[[2, 3]] = 0.9;
        data[[4, 6]] = 0.4;
        let out = warp_array(&data, 5, 7, Interpolation::Nearest, |y, x| (y, x));
        assert_eq!(out, data);
    }

    #[test]
    fn warp_applies_translation() {
        let mut data = Array2::<f32>::zeros((6, 6));
        data[[1, 1]] = 1.0;
        let out = warp_array(&data, 6, 6, Interpolation::Nearest, |y, x| {
            (y - 2.0, x - 3.0)
        });
        assert_eq!(out[[3, 4]], 1.0);
        assert_eq!(out[[1, 1]], 0.0);
    }

    #[test]
    fn resize_halves_dimensions() {
        let data = Array2::<f32>::from_elem((8, 6), 0.25);
        let out = resize_array(&data, 4, 3, Interpolation::Bilinear);
        assert_eq!(out.dim(), (4, 3));
        assert_abs_diff_eq!(out[[2, 1]], 0.25, epsilon = 1e-5);
    }
}

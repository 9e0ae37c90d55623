use ndarray::Array2;
use rayon::prelude::*;

use crate::frame::{ColorImage, Frame};

/// Minimum pixel count (h*w) to justify row-level parallelism.
const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Apply Gaussian blur to a frame using separable 1D convolution.
pub fn gaussian_blur(frame: &Frame, sigma: f32) -> Frame {
    Frame::new(gaussian_blur_array(&frame.data, sigma))
}

/// Blur each channel of a color image.
pub fn gaussian_blur_color(image: &ColorImage, sigma: f32) -> ColorImage {
    image.map_channels(|frame| gaussian_blur(frame, sigma))
}

/// Apply Gaussian blur to a raw array.
pub fn gaussian_blur_array(data: &Array2<f32>, sigma: f32) -> Array2<f32> {
    let kernel = make_gaussian_kernel(sigma);
    let row_pass = convolve_axis(data, &kernel, Axis::Rows);
    convolve_axis(&row_pass, &kernel, Axis::Cols)
}

fn make_gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil() as usize;
    let size = 2 * radius + 1;
    let mut kernel = vec![0.0f32; size];
    let s2 = 2.0 * sigma * sigma;
    let mut sum = 0.0f32;

    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f32 - radius as f32;
        *k = (-x * x / s2).exp();
        sum += *k;
    }

    for v in &mut kernel {
        *v /= sum;
    }

    kernel
}

#[derive(Clone, Copy, PartialEq)]
enum Axis {
    Rows,
    Cols,
}

fn convolve_axis(data: &Array2<f32>, kernel: &[f32], axis: Axis) -> Array2<f32> {
    let (h, w) = data.dim();
    let radius = kernel.len() / 2;

    let convolve_row = |row: usize| -> Vec<f32> {
        (0..w)
            .map(|col| {
                let mut sum = 0.0f32;
                for (ki, &kv) in kernel.iter().enumerate() {
                    let offset = ki as isize - radius as isize;
                    let (src_row, src_col) = match axis {
                        Axis::Rows => (
                            row,
                            (col as isize + offset).clamp(0, w as isize - 1) as usize,
                        ),
                        Axis::Cols => (
                            (row as isize + offset).clamp(0, h as isize - 1) as usize,
                            col,
                        ),
                    };
                    sum += data[[src_row, src_col]] * kv;
                }
                sum
            })
            .collect()
    };

    let rows: Vec<Vec<f32>> = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        (0..h).into_par_iter().map(convolve_row).collect()
    } else {
        (0..h).map(convolve_row).collect()
    };

    let mut result = Array2::<f32>::zeros((h, w));
    for (row, row_data) in rows.into_iter().enumerate() {
        for (col, val) in row_data.into_iter().enumerate() {
            result[[row, col]] = val;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn blur_preserves_constant_image() {
        let data = Array2::<f32>::from_elem((16, 16), 0.5);
        let blurred = gaussian_blur_array(&data, 2.0);
        for &v in blurred.iter() {
            assert_abs_diff_eq!(v, 0.5, epsilon = 1e-5);
        }
    }

    #[test]
    fn blur_spreads_impulse() {
        let mut data = Array2::<f32>::zeros((21, 21));
        data[[10, 10]] = 1.0;
        let blurred = gaussian_blur_array(&data, 2.0);
        assert!(blurred[[10, 10]] < 1.0);
        assert!(blurred[[10, 8]] > 0.0);
        // Kernel is normalized, so total mass is preserved.
        assert_abs_diff_eq!(blurred.sum(), 1.0, epsilon = 1e-4);
    }
}

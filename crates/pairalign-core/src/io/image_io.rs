use std::path::Path;

use image::{ImageFormat, Rgb};
use ndarray::Array2;

use crate::error::{PairalignError, Result};
use crate::frame::{ColorImage, Frame};

/// Load a color image file into a ColorImage.
///
/// Any format the `image` crate decodes is accepted; the error carries the
/// path so batch reporting can name the offending file.
pub fn load_color_image(path: &Path) -> Result<ColorImage> {
    let img = image::open(path).map_err(|e| PairalignError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    if w == 0 || h == 0 {
        return Err(PairalignError::InvalidDimensions {
            width: w as usize,
            height: h as usize,
        });
    }

    let mut red = Array2::<f32>::zeros((h as usize, w as usize));
    let mut green = Array2::<f32>::zeros((h as usize, w as usize));
    let mut blue = Array2::<f32>::zeros((h as usize, w as usize));

    for row in 0..h as usize {
        for col in 0..w as usize {
            let pixel = rgb.get_pixel(col as u32, row as u32);
            red[[row, col]] = pixel.0[0] as f32 / 255.0;
            green[[row, col]] = pixel.0[1] as f32 / 255.0;
            blue[[row, col]] = pixel.0[2] as f32 / 255.0;
        }
    }

    Ok(ColorImage {
        red: Frame::new(red),
        green: Frame::new(green),
        blue: Frame::new(blue),
    })
}

/// Save a ColorImage as 8-bit RGB PNG.
pub fn save_color_png(color: &ColorImage, path: &Path) -> Result<()> {
    let h = color.height();
    let w = color.width();

    let mut img = image::RgbImage::new(w as u32, h as u32);
    for row in 0..h {
        for col in 0..w {
            let r = (color.red.data[[row, col]].clamp(0.0, 1.0) * 255.0).round() as u8;
            let g = (color.green.data[[row, col]].clamp(0.0, 1.0) * 255.0).round() as u8;
            let b = (color.blue.data[[row, col]].clamp(0.0, 1.0) * 255.0).round() as u8;
            img.put_pixel(col as u32, row as u32, Rgb([r, g, b]));
        }
    }

    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

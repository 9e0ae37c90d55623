use crate::frame::ColorImage;

/// Crop away borders whose max-channel luminance never exceeds `threshold`
/// (0-255 scale, matching 8-bit input conventions).
///
/// Rows and columns are trimmed from each edge up to the first row/column
/// containing a pixel above the threshold. A fully dark image collapses to
/// its top-left pixel rather than an empty crop.
pub fn autocrop_borders(image: &ColorImage, threshold: u8) -> ColorImage {
    let flat = image.max_channel();
    let (h, w) = flat.data.dim();
    let cutoff = threshold as f32 / 255.0;

    let col_bright: Vec<bool> = (0..w)
        .map(|col| (0..h).any(|row| flat.data[[row, col]] > cutoff))
        .collect();
    let row_bright: Vec<bool> = (0..h)
        .map(|row| (0..w).any(|col| flat.data[[row, col]] > cutoff))
        .collect();

    let first_col = col_bright.iter().position(|&b| b);
    let (x0, x1, y0, y1) = match first_col {
        Some(x0) => {
            let x1 = col_bright.iter().rposition(|&b| b).unwrap_or(x0);
            let y0 = row_bright.iter().position(|&b| b).unwrap_or(0);
            let y1 = row_bright.iter().rposition(|&b| b).unwrap_or(y0);
            (x0, x1, y0, y1)
        }
        None => (0, 0, 0, 0),
    };

    image.map_channels(|frame| {
        crate::frame::Frame::new(
            frame
                .data
                .slice(ndarray::s![y0..=y1, x0..=x1])
                .to_owned(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use ndarray::Array2;

    fn gray(data: Array2<f32>) -> ColorImage {
        ColorImage {
            red: Frame::new(data.clone()),
            green: Frame::new(data.clone()),
            blue: Frame::new(data),
        }
    }

    #[test]
    fn crops_dark_border() {
        let mut data = Array2::<f32>::zeros((6, 8));
        // Bright 2x3 block at rows 2..4, cols 3..6
        for row in 2..4 {
            for col in 3..6 {
                data[[row, col]] = 0.9;
            }
        }
        let cropped = autocrop_borders(&gray(data), 50);
        assert_eq!(cropped.height(), 2);
        assert_eq!(cropped.width(), 3);
    }

    #[test]
    fn dark_image_collapses_to_single_pixel() {
        let data = Array2::<f32>::zeros((5, 5));
        let cropped = autocrop_borders(&gray(data), 50);
        assert_eq!(cropped.height(), 1);
        assert_eq!(cropped.width(), 1);
    }

    #[test]
    fn bright_image_is_untouched() {
        let data = Array2::<f32>::from_elem((4, 7), 0.8);
        let cropped = autocrop_borders(&gray(data), 50);
        assert_eq!(cropped.height(), 4);
        assert_eq!(cropped.width(), 7);
    }
}

use ndarray::Array2;

/// A single grayscale image plane.
/// Pixel values are f32 in [0.0, 1.0].
#[derive(Clone, Debug)]
pub struct Frame {
    /// Pixel data, row-major, shape = (height, width)
    pub data: Array2<f32>,
}

impl Frame {
    pub fn new(data: Array2<f32>) -> Self {
        Self { data }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}

/// Color image composed of separate channel planes of equal dimensions.
#[derive(Clone, Debug)]
pub struct ColorImage {
    pub red: Frame,
    pub green: Frame,
    pub blue: Frame,
}

impl ColorImage {
    pub fn width(&self) -> usize {
        self.red.width()
    }

    pub fn height(&self) -> usize {
        self.red.height()
    }

    /// Rec. 601 luminance, used for feature detection and autocrop.
    pub fn luminance(&self) -> Frame {
        let (h, w) = self.red.data.dim();
        let mut data = Array2::<f32>::zeros((h, w));
        for row in 0..h {
            for col in 0..w {
                data[[row, col]] = 0.299 * self.red.data[[row, col]]
                    + 0.587 * self.green.data[[row, col]]
                    + 0.114 * self.blue.data[[row, col]];
            }
        }
        Frame::new(data)
    }

    /// Per-pixel maximum over the three channels.
    pub fn max_channel(&self) -> Frame {
        let (h, w) = self.red.data.dim();
        let mut data = Array2::<f32>::zeros((h, w));
        for row in 0..h {
            for col in 0..w {
                data[[row, col]] = self.red.data[[row, col]]
                    .max(self.green.data[[row, col]])
                    .max(self.blue.data[[row, col]]);
            }
        }
        Frame::new(data)
    }

    /// Apply `f` to each channel.
    pub fn map_channels(&self, mut f: impl FnMut(&Frame) -> Frame) -> ColorImage {
        ColorImage {
            red: f(&self.red),
            green: f(&self.green),
            blue: f(&self.blue),
        }
    }
}

/// A 2D point in image pixel coordinates (x = column, y = row).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Index-aligned point correspondences between two images.
///
/// `source[i]` and `target[i]` are believed to depict the same physical
/// location; the two vectors always have equal length.
#[derive(Clone, Debug, Default)]
pub struct PointMatches {
    pub source: Vec<Point>,
    pub target: Vec<Point>,
}

impl PointMatches {
    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}

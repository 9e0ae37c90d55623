#![allow(dead_code)]

use ndarray::Array2;

use pairalign_core::error::Result;
use pairalign_core::features::CorrespondenceFinder;
use pairalign_core::frame::{ColorImage, Frame, Point, PointMatches};

/// Synthetic image with smooth per-channel texture so resampling and
/// matching have gradients to work with.
pub fn textured_image(h: usize, w: usize) -> ColorImage {
    let make = |phase: f32| {
        let data = Array2::from_shape_fn((h, w), |(row, col)| {
            let v = ((row as f32 * 0.31 + phase).sin() + (col as f32 * 0.17 - phase).cos()) * 0.25
                + 0.5;
            v.clamp(0.0, 1.0)
        });
        Frame::new(data)
    };
    ColorImage {
        red: make(0.0),
        green: make(1.3),
        blue: make(2.6),
    }
}

/// Produces exact correspondences under the assumption that both images
/// depict the same scene at possibly different resolutions. Lets pipeline
/// tests run without exercising the feature detector.
pub struct ScaledGridFinder;

impl CorrespondenceFinder for ScaledGridFinder {
    fn find(&self, a: &Frame, b: &Frame) -> Result<PointMatches> {
        let sx = b.width() as f64 / a.width() as f64;
        let sy = b.height() as f64 / a.height() as f64;
        let mut matches = PointMatches::default();
        for row in 1..6 {
            for col in 1..6 {
                let x = a.width() as f64 * col as f64 / 6.0;
                let y = a.height() as f64 * row as f64 / 6.0;
                matches.source.push(Point::new(x, y));
                matches.target.push(Point::new(x * sx, y * sy));
            }
        }
        Ok(matches)
    }
}

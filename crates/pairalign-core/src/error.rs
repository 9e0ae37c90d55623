use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PairalignError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Too few correspondences: found {found}, need at least {needed}")]
    Correspondence { found: usize, needed: usize },

    #[error("Transform fit rejected the input: {0}")]
    TransformFit(String),

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Cancelled by operator")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, PairalignError>;

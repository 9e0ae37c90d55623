//! Per-pair alignment: crop-window extraction and the warp pipeline.

pub mod aligner;
pub mod rectangle;

pub use aligner::{align_pair, AlignConfig, AlignMode, AlignedPair};
pub use rectangle::{largest_rectangle, Rect};

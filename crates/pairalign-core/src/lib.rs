pub mod error;
pub mod frame;
pub mod io;
pub mod filters;
pub mod resample;
pub mod features;
pub mod transform;
pub mod align;
pub mod score;
pub mod batch;

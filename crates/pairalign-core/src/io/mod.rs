pub mod autocrop;
pub mod image_io;

//! I/O modules for LUTs and key-value coefficient files

pub mod lut_reader;
pub mod properties;

pub use lut_reader::{LutEncoding, LutReader};
pub use properties::{default_lut_folder, PropertyMap};

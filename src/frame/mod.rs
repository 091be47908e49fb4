//! Frame-level inputs: camera model, image pyramid, pixel selection.

pub mod camera;
pub mod pyramid;
pub mod selection;

pub use camera::{CameraModel, PyramidCalibration};
pub use pyramid::{ImagePyramid, PyramidLevel};
pub use selection::{GradientSelector, PixelSelector, SelectionMap};

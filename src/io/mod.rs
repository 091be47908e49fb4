//! Frame sources.

pub mod synthetic;

pub use synthetic::{SyntheticScene, ValueNoise};

//! Geometry utilities: SE3 transforms, SO3 Jacobians, affine brightness.

pub mod affine;
pub mod se3;
pub mod so3;

pub use affine::AffineBrightness;
pub use se3::SE3;

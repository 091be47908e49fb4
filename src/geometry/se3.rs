//! SE3: rigid-body transformation (rotation + translation).
//!
//! Twists are 6-vectors ordered `[υ (translation), ω (rotation)]`. Increments
//! are applied on the left: `T_new = exp(δ) · T`.

use nalgebra::{Matrix3, UnitQuaternion, Vector3, Vector6};

use super::so3::{left_jacobian_so3, left_jacobian_so3_inv};

/// Rigid transformation acting on points as `p' = R * p + t`.
#[derive(Debug, Clone, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl SE3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Pure translation.
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation,
        }
    }

    /// Exponential map from a twist `[υ, ω]`.
    ///
    /// ```text
    /// R = exp([ω]×),  t = Jl(ω) υ
    /// ```
    pub fn exp(xi: &Vector6<f64>) -> Self {
        let upsilon = Vector3::new(xi[0], xi[1], xi[2]);
        let omega = Vector3::new(xi[3], xi[4], xi[5]);
        Self {
            rotation: UnitQuaternion::from_scaled_axis(omega),
            translation: left_jacobian_so3(&omega) * upsilon,
        }
    }

    /// Logarithm map, inverse of [`SE3::exp`].
    pub fn log(&self) -> Vector6<f64> {
        let omega = self.rotation.scaled_axis();
        let upsilon = left_jacobian_so3_inv(&omega) * self.translation;
        Vector6::new(upsilon.x, upsilon.y, upsilon.z, omega.x, omega.y, omega.z)
    }

    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Compose two transforms: `self ∘ other`.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }
}

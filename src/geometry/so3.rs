//! SO(3) helpers used by the SE(3) exponential and logarithm maps.
//!
//! Provides skew-symmetric matrix construction and the left Jacobian Jl(φ)
//! that couples the rotation vector to the translational part of a twist.

use nalgebra::{Matrix3, Vector3};

/// Below this rotation angle the series expansions are used.
const SMALL_ANGLE: f64 = 1e-6;

/// Cross-product matrix: `skew(v) * u == v × u`.
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Computes the left Jacobian Jl(φ) of SO(3).
///
/// ```text
/// Jl(φ) = I + (1 - cos|φ|)/|φ|² [φ]× + (|φ| - sin|φ|)/|φ|³ [φ]×²
/// ```
///
/// For small angles:
/// ```text
/// Jl(φ) ≈ I + 0.5 [φ]×
/// ```
pub fn left_jacobian_so3(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let skew_phi = skew(phi);

    if theta < SMALL_ANGLE {
        return Matrix3::identity() + 0.5 * skew_phi;
    }

    let theta_sq = theta * theta;
    let theta_cu = theta_sq * theta;

    Matrix3::identity()
        + ((1.0 - theta.cos()) / theta_sq) * skew_phi
        + ((theta - theta.sin()) / theta_cu) * skew_phi * skew_phi
}

/// Computes the inverse of the left Jacobian Jl⁻¹(φ).
///
/// ```text
/// Jl⁻¹(φ) = I - 0.5 [φ]× + (1/|φ|² - (1 + cos|φ|)/(2|φ| sin|φ|)) [φ]×²
/// ```
pub fn left_jacobian_so3_inv(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let skew_phi = skew(phi);

    if theta < SMALL_ANGLE {
        return Matrix3::identity() - 0.5 * skew_phi + (1.0 / 12.0) * skew_phi * skew_phi;
    }

    let theta_sq = theta * theta;
    let coeff = 1.0 / theta_sq - (1.0 + theta.cos()) / (2.0 * theta * theta.sin());

    Matrix3::identity() - 0.5 * skew_phi + coeff * skew_phi * skew_phi
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_skew_cross_product() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let u = Vector3::new(4.0, 5.0, 6.0);

        assert_relative_eq!(v.cross(&u), skew(&v) * u, epsilon = 1e-12);
    }

    #[test]
    fn test_left_jacobian_identity_at_zero() {
        let phi = Vector3::zeros();

        assert_relative_eq!(left_jacobian_so3(&phi), Matrix3::identity(), epsilon = 1e-10);
        assert_relative_eq!(left_jacobian_so3_inv(&phi), Matrix3::identity(), epsilon = 1e-10);
    }

    #[test]
    fn test_left_jacobian_inverse_relationship() {
        let phi = Vector3::new(0.3, -0.2, 0.5);
        let product = left_jacobian_so3(&phi) * left_jacobian_so3_inv(&phi);

        assert_relative_eq!(product, Matrix3::identity(), epsilon = 1e-10);
    }

    #[test]
    fn test_left_jacobian_small_angle_branch_is_continuous() {
        let below = Vector3::new(5e-7, 0.0, 0.0);
        let above = Vector3::new(5e-6, 0.0, 0.0);

        assert_relative_eq!(
            left_jacobian_so3(&below),
            left_jacobian_so3(&above),
            epsilon = 1e-5
        );
    }
}

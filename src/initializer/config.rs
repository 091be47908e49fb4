//! Tuning constants of the coarse initializer.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Configuration for [`CoarseInitializer`](super::CoarseInitializer).
///
/// Per-level arrays are indexed finest level first. Every field has a default,
/// so a YAML file only needs the values it overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InitializerConfig {
    /// Number of pyramid levels optimized.
    pub pyramid_levels: usize,
    /// Point density per level, as a fraction of the level-0 pixel count.
    pub densities: Vec<f64>,
    /// LM iteration cap per level.
    pub max_iterations: Vec<usize>,

    /// Translation energy cap per point (`alphaK`).
    pub alpha_k: f64,
    /// Translation / drift-to-one prior weight (`alphaW`).
    pub alpha_w: f64,
    /// Mixing weight of the neighbourhood median in the depth regularizer.
    pub reg_weight: f64,
    /// Weight coupling inverse depth to its regularized estimate once snapped.
    pub coupling_weight: f64,

    /// Huber threshold on the photometric residual.
    pub huber_threshold: f64,
    /// Per-tap outlier energy; a point's threshold is this times the pattern size.
    pub outlier_threshold: f64,
    /// A point is an outlier when its energy exceeds this multiple of its threshold.
    pub outlier_multiplier: f64,

    pub initial_lambda: f64,
    pub min_lambda: f64,
    pub max_lambda: f64,
    pub lambda_decrease: f64,
    pub lambda_increase: f64,
    /// Iteration stops once the increment norm is at or below this.
    pub convergence_eps: f64,
    /// Consecutive rejected steps that end a level.
    pub max_failures: usize,

    /// Depth step bound, as a fraction of the per-point maximum step.
    pub max_pixel_step: f64,
    pub min_idepth: f64,
    pub max_idepth: f64,
    /// Parents with less depth curvature are not propagated down.
    pub min_parent_hessian: f64,

    /// Parameter scaling for the three translational twist components.
    pub scale_translation: f64,
    /// Parameter scaling for the three rotational twist components.
    pub scale_rotation: f64,
    pub scale_a: f64,
    pub scale_b: f64,
    /// Keep the affine brightness fixed and only solve for the pose.
    pub fix_affine: bool,

    /// Frames that must pass after snapping before initialization is reported.
    pub snap_frames: usize,
    /// Decay of the neighbour affinity `exp(-d² · factor)`.
    pub neighbour_dist_factor: f64,
}

impl Default for InitializerConfig {
    fn default() -> Self {
        Self {
            pyramid_levels: 5,
            densities: vec![0.03, 0.05, 0.15, 0.5, 1.0],
            max_iterations: vec![5, 5, 10, 30, 50],
            alpha_k: 2.5 * 2.5,
            alpha_w: 150.0 * 150.0,
            reg_weight: 0.8,
            coupling_weight: 1.0,
            huber_threshold: 9.0,
            outlier_threshold: 12.0 * 12.0,
            outlier_multiplier: 20.0,
            initial_lambda: 0.1,
            min_lambda: 1e-4,
            max_lambda: 1e4,
            lambda_decrease: 0.5,
            lambda_increase: 4.0,
            convergence_eps: 1e-4,
            max_failures: 2,
            max_pixel_step: 0.25,
            min_idepth: 1e-3,
            max_idepth: 50.0,
            min_parent_hessian: 0.1,
            scale_translation: 1.0,
            scale_rotation: 0.5,
            scale_a: 10.0,
            scale_b: 1000.0,
            fix_affine: true,
            snap_frames: 5,
            neighbour_dist_factor: 0.05,
        }
    }
}

impl InitializerConfig {
    /// Load a (partial) configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let config: Self = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.pyramid_levels == 0 {
            bail!("pyramid_levels must be at least 1");
        }
        if self.pyramid_levels >= usize::BITS as usize {
            bail!(
                "pyramid_levels must be below {}, got {}",
                usize::BITS,
                self.pyramid_levels
            );
        }
        if self.densities.len() < self.pyramid_levels {
            bail!(
                "Expected {} densities, got {}",
                self.pyramid_levels,
                self.densities.len()
            );
        }
        if self.max_iterations.len() < self.pyramid_levels {
            bail!(
                "Expected {} iteration caps, got {}",
                self.pyramid_levels,
                self.max_iterations.len()
            );
        }
        if !(self.min_lambda > 0.0 && self.min_lambda <= self.max_lambda) {
            bail!(
                "Invalid damping range [{}, {}]",
                self.min_lambda,
                self.max_lambda
            );
        }
        if !(self.min_idepth > 0.0 && self.min_idepth < self.max_idepth) {
            bail!(
                "Invalid inverse depth range [{}, {}]",
                self.min_idepth,
                self.max_idepth
            );
        }
        Ok(())
    }

    /// Diagonal scaling of the 8 shared parameters.
    pub fn parameter_scaling(&self) -> [f64; 8] {
        let t = self.scale_translation;
        let r = self.scale_rotation;
        [t, t, t, r, r, r, self.scale_a, self.scale_b]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = InitializerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_iterations[4], 50);
        assert!(config.fix_affine);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "pyramid_levels: 3\nreg_weight: 0.5\nfix_affine: false\n";
        let config: InitializerConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.pyramid_levels, 3);
        assert_eq!(config.reg_weight, 0.5);
        assert!(!config.fix_affine);
        assert_eq!(config.alpha_k, 6.25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_level_arrays() {
        let config = InitializerConfig {
            pyramid_levels: 6,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_absurd_level_count() {
        let config = InitializerConfig {
            pyramid_levels: 70,
            densities: vec![0.1; 70],
            max_iterations: vec![5; 70],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_depth_range() {
        let config = InitializerConfig {
            min_idepth: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

//! Pinhole camera model and its per-level pyramid derivation.

use nalgebra::{Matrix3, Vector2, Vector3};

/// Pinhole intrinsics for one image resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: usize,
    pub height: usize,
}

impl CameraModel {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, width: usize, height: usize) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        }
    }

    pub fn k(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    pub fn k_inv(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.fx,
            0.0,
            -self.cx / self.fx,
            0.0,
            1.0 / self.fy,
            -self.cy / self.fy,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Project a camera-frame point to pixel coordinates.
    pub fn project(&self, p: &Vector3<f64>) -> Vector2<f64> {
        Vector2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        )
    }

    /// Intrinsics one octave down: focal length halved, principal point
    /// remapped so pixel centres stay aligned.
    fn downscaled(&self, level: usize, base: &CameraModel) -> Self {
        let scale = (1usize << level) as f64;
        Self {
            fx: self.fx * 0.5,
            fy: self.fy * 0.5,
            cx: (base.cx + 0.5) / scale - 0.5,
            cy: (base.cy + 0.5) / scale - 0.5,
            width: base.width >> level,
            height: base.height >> level,
        }
    }
}

/// Intrinsics for every pyramid level, derived once from level 0.
#[derive(Debug, Clone)]
pub struct PyramidCalibration {
    levels: Vec<CameraModel>,
}

impl PyramidCalibration {
    pub fn new(base: CameraModel, num_levels: usize) -> Self {
        let mut levels = Vec::with_capacity(num_levels.max(1));
        levels.push(base);
        for level in 1..num_levels {
            let next = levels[level - 1].downscaled(level, &base);
            levels.push(next);
        }
        Self { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Intrinsics at `level`; `None` past the coarsest level.
    pub fn get(&self, level: usize) -> Option<&CameraModel> {
        self.levels.get(level)
    }

    pub fn levels(&self) -> &[CameraModel] {
        &self.levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_k_inverse() {
        let cam = CameraModel::new(250.0, 260.0, 159.5, 119.5, 320, 240);
        assert_relative_eq!(cam.k() * cam.k_inv(), Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_pyramid_intrinsics() {
        let cam = CameraModel::new(400.0, 400.0, 319.5, 239.5, 640, 480);
        let calib = PyramidCalibration::new(cam, 4);

        assert_eq!(calib.num_levels(), 4);
        let l2 = calib.get(2).unwrap();
        assert_relative_eq!(l2.fx, 100.0);
        assert_relative_eq!(l2.cx, (319.5 + 0.5) / 4.0 - 0.5);
        assert_relative_eq!(l2.cy, (239.5 + 0.5) / 4.0 - 0.5);
        assert_eq!((l2.width, l2.height), (160, 120));
        assert!(calib.get(4).is_none());
    }

    #[test]
    fn test_project_principal_ray() {
        let cam = CameraModel::new(300.0, 300.0, 160.0, 120.0, 320, 240);
        let uv = cam.project(&Vector3::new(0.0, 0.0, 2.0));
        assert_relative_eq!(uv, Vector2::new(160.0, 120.0));
    }
}

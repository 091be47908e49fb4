//! Dense image pyramid holding intensity and gradient per pixel.
//!
//! Level 0 is the input resolution; every further level halves both
//! dimensions with a 2x2 box filter. Gradients are central differences and
//! zero on the one-pixel border.

use anyhow::{Result, bail};
use nalgebra::Vector3;

/// Minimum side length of the coarsest level.
const MIN_LEVEL_SIZE: usize = 8;

/// One pyramid level: `[intensity, dI/dx, dI/dy]` per pixel, row major.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    width: usize,
    height: usize,
    data: Vec<Vector3<f64>>,
}

impl PyramidLevel {
    fn from_intensity(width: usize, height: usize, intensity: Vec<f64>) -> Self {
        let mut data: Vec<Vector3<f64>> = intensity
            .iter()
            .map(|&i| Vector3::new(i, 0.0, 0.0))
            .collect();

        for y in 1..height.saturating_sub(1) {
            for x in 1..width.saturating_sub(1) {
                let idx = x + y * width;
                data[idx][1] = 0.5 * (intensity[idx + 1] - intensity[idx - 1]);
                data[idx][2] = 0.5 * (intensity[idx + width] - intensity[idx - width]);
            }
        }

        Self {
            width,
            height,
            data,
        }
    }

    fn downsample(&self) -> Self {
        let width = self.width / 2;
        let height = self.height / 2;
        let mut intensity = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let top = 2 * x + 2 * y * self.width;
                let bottom = top + self.width;
                intensity.push(
                    0.25 * (self.data[top][0]
                        + self.data[top + 1][0]
                        + self.data[bottom][0]
                        + self.data[bottom + 1][0]),
                );
            }
        }
        Self::from_intensity(width, height, intensity)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// `[intensity, gx, gy]` at an integer pixel.
    pub fn at(&self, x: usize, y: usize) -> Option<&Vector3<f64>> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(x + y * self.width)
    }

    /// Squared gradient magnitude at an integer pixel (0 outside the image).
    pub fn gradient_sq_norm(&self, x: usize, y: usize) -> f64 {
        self.at(x, y)
            .map(|v| v[1] * v[1] + v[2] * v[2])
            .unwrap_or(0.0)
    }

    /// Bilinear interpolation of intensity and gradient.
    ///
    /// Returns `None` when the 2x2 support leaves the image.
    pub fn interpolate(&self, x: f64, y: f64) -> Option<Vector3<f64>> {
        let (idx, dx, dy) = self.support(x, y)?;
        let dxdy = dx * dy;
        let w = self.width;
        Some(
            self.data[idx + 1 + w] * dxdy
                + self.data[idx + w] * (dy - dxdy)
                + self.data[idx + 1] * (dx - dxdy)
                + self.data[idx] * (1.0 - dx - dy + dxdy),
        )
    }

    /// Bilinear interpolation of the intensity channel only.
    pub fn interpolate_intensity(&self, x: f64, y: f64) -> Option<f64> {
        let (idx, dx, dy) = self.support(x, y)?;
        let dxdy = dx * dy;
        let w = self.width;
        Some(
            dxdy * self.data[idx + 1 + w][0]
                + (dy - dxdy) * self.data[idx + w][0]
                + (dx - dxdy) * self.data[idx + 1][0]
                + (1.0 - dx - dy + dxdy) * self.data[idx][0],
        )
    }

    fn support(&self, x: f64, y: f64) -> Option<(usize, f64, f64)> {
        if !(x >= 0.0 && y >= 0.0) {
            return None;
        }
        let ix = x.floor();
        let iy = y.floor();
        if ix + 1.0 >= self.width as f64 || iy + 1.0 >= self.height as f64 {
            return None;
        }
        Some((ix as usize + iy as usize * self.width, x - ix, y - iy))
    }
}

/// Multi-resolution intensity/gradient pyramid of one frame.
#[derive(Debug, Clone)]
pub struct ImagePyramid {
    levels: Vec<PyramidLevel>,
    exposure: f64,
}

impl ImagePyramid {
    /// Build a pyramid from a row-major grey image.
    ///
    /// `exposure` is the frame's exposure time; non-positive means unknown.
    pub fn from_intensity(
        width: usize,
        height: usize,
        intensity: &[f32],
        num_levels: usize,
        exposure: f64,
    ) -> Result<Self> {
        if num_levels == 0 {
            bail!("Pyramid needs at least one level");
        }
        if intensity.len() != width * height {
            bail!(
                "Image buffer has {} pixels, expected {}x{}",
                intensity.len(),
                width,
                height
            );
        }
        let shift = (num_levels - 1) as u32;
        let coarsest = width
            .checked_shr(shift)
            .unwrap_or(0)
            .min(height.checked_shr(shift).unwrap_or(0));
        if coarsest < MIN_LEVEL_SIZE {
            bail!(
                "Image {}x{} too small for {} pyramid levels",
                width,
                height,
                num_levels
            );
        }

        let mut levels = Vec::with_capacity(num_levels);
        levels.push(PyramidLevel::from_intensity(
            width,
            height,
            intensity.iter().map(|&v| v as f64).collect(),
        ));
        for lvl in 1..num_levels {
            let next = levels[lvl - 1].downsample();
            levels.push(next);
        }

        Ok(Self { levels, exposure })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> Option<&PyramidLevel> {
        self.levels.get(level)
    }

    pub fn exposure(&self) -> f64 {
        self.exposure
    }

    pub fn width(&self) -> usize {
        self.levels[0].width
    }

    pub fn height(&self) -> usize {
        self.levels[0].height
    }
}

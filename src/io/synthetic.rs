//! Synthetic textured plane rendered from two viewpoints.
//!
//! The texture is attached to the plane through the reference camera: a plane
//! point that projects to reference pixel `(u, v)` has intensity
//! `texture(u, v)`. Rendering another viewpoint casts a ray per pixel,
//! intersects it with the plane and looks the texture up at the reference
//! projection of the hit point, so both images are exactly consistent with the
//! plane geometry and the ground-truth inverse depth is known in closed form.

use anyhow::Result;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::frame::{CameraModel, ImagePyramid, PyramidCalibration};
use crate::geometry::{AffineBrightness, SE3};

const LATTICE: usize = 256;

/// Two-octave value noise.
#[derive(Debug, Clone)]
pub struct ValueNoise {
    perm: Vec<usize>,
    values: Vec<f64>,
    /// `(cell size in pixels, amplitude)` per octave.
    octaves: Vec<(f64, f64)>,
    base: f64,
}

impl ValueNoise {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut perm: Vec<usize> = (0..LATTICE).collect();
        perm.shuffle(&mut rng);
        let values = (0..LATTICE).map(|_| rng.gen::<f64>()).collect();
        Self {
            perm,
            values,
            octaves: vec![(24.0, 120.0), (7.0, 60.0)],
            base: 110.0,
        }
    }

    fn lattice(&self, ix: i64, iy: i64) -> f64 {
        let hx = self.perm[ix.rem_euclid(LATTICE as i64) as usize];
        let h = self.perm[(hx + iy.rem_euclid(LATTICE as i64) as usize) % LATTICE];
        self.values[h]
    }

    fn octave(&self, x: f64, y: f64, cell: f64) -> f64 {
        let (gx, gy) = (x / cell, y / cell);
        let (fx, fy) = (gx.floor(), gy.floor());
        let (ix, iy) = (fx as i64, fy as i64);
        let smooth = |t: f64| t * t * (3.0 - 2.0 * t);
        let (sx, sy) = (smooth(gx - fx), smooth(gy - fy));

        let top = self.lattice(ix, iy) * (1.0 - sx) + self.lattice(ix + 1, iy) * sx;
        let bottom = self.lattice(ix, iy + 1) * (1.0 - sx) + self.lattice(ix + 1, iy + 1) * sx;
        top * (1.0 - sy) + bottom * sy
    }

    /// Intensity at a (sub-)pixel position.
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        self.octaves
            .iter()
            .map(|&(cell, amp)| amp * (self.octave(x, y, cell) - 0.5))
            .sum::<f64>()
            + self.base
    }
}

/// Plane `n · X = offset` in the reference camera frame, seen by a pinhole camera.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    camera: CameraModel,
    normal: Vector3<f64>,
    offset: f64,
    texture: ValueNoise,
    levels: usize,
}

impl SyntheticScene {
    pub fn new(
        camera: CameraModel,
        normal: Vector3<f64>,
        offset: f64,
        seed: u64,
        levels: usize,
    ) -> Self {
        Self {
            camera,
            normal,
            offset,
            texture: ValueNoise::new(seed),
            levels,
        }
    }

    /// Plane slanted about the vertical axis, depth 1 on the optical axis.
    ///
    /// Focal length scales with the image width; five pyramid levels.
    pub fn slanted_plane(width: usize, height: usize, seed: u64) -> Self {
        let f = 250.0 * width as f64 / 320.0;
        let camera = CameraModel::new(
            f,
            f,
            (width as f64 - 1.0) / 2.0,
            (height as f64 - 1.0) / 2.0,
            width,
            height,
        );
        Self::new(camera, Vector3::new(0.8, 0.0, 1.0), 1.0, seed, 5)
    }

    pub fn width(&self) -> usize {
        self.camera.width
    }

    pub fn height(&self) -> usize {
        self.camera.height
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    pub fn calibration(&self) -> PyramidCalibration {
        PyramidCalibration::new(self.camera, self.levels)
    }

    /// Ground-truth inverse depth of reference pixel `(u, v)`.
    pub fn idepth_at(&self, u: f64, v: f64) -> f64 {
        let ray = self.camera.k_inv() * Vector3::new(u, v, 1.0);
        self.normal.dot(&ray) / self.offset
    }

    /// Render the view of a camera at `pose` (`T_cam_ref`), with `brightness`
    /// applied to the texture. Pixels whose ray misses the plane are black.
    pub fn render(&self, pose: &SE3, brightness: AffineBrightness) -> Vec<f32> {
        let (w, h) = (self.width(), self.height());
        let rot_t = pose.rotation.inverse();
        let center = -(rot_t * pose.translation);
        let k_inv = self.camera.k_inv();
        let center_dist = self.offset - self.normal.dot(&center);

        let mut image = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                let dir = rot_t * (k_inv * Vector3::new(x as f64, y as f64, 1.0));
                let denom = self.normal.dot(&dir);
                let s = center_dist / denom;
                let hit = center + dir * s;

                let value = if denom.abs() > 1e-12 && s > 0.0 && hit.z > 0.0 {
                    let uv = self.camera.project(&hit);
                    brightness.apply(self.texture.sample(uv.x, uv.y))
                } else {
                    0.0
                };
                image.push(value as f32);
            }
        }
        image
    }

    /// Rendered view at `pose` as an image pyramid.
    pub fn frame(
        &self,
        pose: &SE3,
        brightness: AffineBrightness,
        exposure: f64,
    ) -> Result<ImagePyramid> {
        let image = self.render(pose, brightness);
        ImagePyramid::from_intensity(self.width(), self.height(), &image, self.levels, exposure)
    }
}

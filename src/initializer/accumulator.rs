//! Photometric residuals and Schur-reduced normal equations for one level.
//!
//! # Theory
//!
//! Every point contributes 8 pattern residuals
//!
//! ```text
//! r = I_new(π(T, p, ρ)) - exp(a)·I_ref(p) - b
//! ```
//!
//! with Jacobians w.r.t. the 8 shared parameters `x = [υ, ω, a, b]` and its own
//! inverse depth `ρ`. The joint system
//!
//! ```text
//! | H    w  | |δx|   |b |
//! | wᵀ   hρ | |δρ| = |bρ|
//! ```
//!
//! is reduced per point by eliminating `δρ`: the primary terms `H`, `b` are
//! summed as usual while `w wᵀ / hρ` and `w bρ / hρ` go into a separate Schur
//! accumulator, so the solver can damp both parts independently. The
//! per-point `[w, bρ, 1/hρ]` row is kept to re-substitute `δρ` after solving.

use nalgebra::{Matrix3, SMatrix, SVector, Vector2, Vector3};
use rayon::prelude::*;

use super::config::InitializerConfig;
use super::point::{DepthState, TrackedPoint, PATTERN};
use crate::frame::{CameraModel, PyramidLevel};
use crate::geometry::{AffineBrightness, SE3};

pub type Matrix8 = SMatrix<f64, 8, 8>;
pub type Vector8 = SVector<f64, 8>;
/// `[Σ J_k·J_d (8), Σ r·J_d, depth curvature]`.
pub type DepthRow = SVector<f64, 10>;

type Row9 = SVector<f64, 9>;
type Matrix9 = SMatrix<f64, 9, 9>;

/// Upper bound of the per-point depth step before any tap constrains it.
const UNBOUNDED_STEP: f64 = 1e10;

/// Reference and new image of one level together with its intrinsics.
#[derive(Clone, Copy)]
pub struct LevelFrames<'a> {
    pub reference: &'a PyramidLevel,
    pub target: &'a PyramidLevel,
    pub camera: &'a CameraModel,
}

/// Linearization of a single point under one hypothesis.
#[derive(Debug, Clone)]
pub struct PointLinearization {
    /// State the point takes if the hypothesis is accepted.
    pub trial: DepthState,
    /// Largest inverse-depth change that keeps the reprojection within a pixel.
    pub max_step: f64,
    /// Depth-contracted row; entry 9 holds the inverted curvature.
    pub jb: DepthRow,
}

/// Everything one evaluation of a level produces.
#[derive(Debug, Clone)]
pub struct LevelLinearization {
    pub points: Vec<PointLinearization>,
    pub h: Matrix8,
    pub b: Vector8,
    pub h_sc: Matrix8,
    pub b_sc: Vector8,
    /// Robust photometric energy plus per-point depth prior energy.
    pub energy: f64,
    /// Translation prior energy, capped at `alpha_k · N`.
    pub alpha_energy: f64,
    /// The translation prior hit its cap and was switched off.
    pub cap_applied: bool,
    /// Points that stayed valid under this hypothesis.
    pub num_good: usize,
}

impl LevelLinearization {
    pub fn total_energy(&self) -> f64 {
        self.energy + self.alpha_energy
    }
}

/// Residual terms of a point whose taps all projected successfully.
struct PointResidual {
    energy: f64,
    rows: [Row9; PATTERN.len()],
    jb: DepthRow,
    max_step: f64,
}

/// Evaluate all taps of one point; `None` when any tap is unusable.
fn evaluate_point(
    point: &TrackedPoint,
    idepth: f64,
    frames: &LevelFrames,
    rk_inv: &Matrix3<f64>,
    t: &Vector3<f64>,
    affine: AffineBrightness,
    huber: f64,
) -> Option<PointResidual> {
    let cam = frames.camera;
    let wl = frames.target.width() as f64;
    let hl = frames.target.height() as f64;
    let gain = affine.gain();

    let mut out = PointResidual {
        energy: 0.0,
        rows: [Row9::zeros(); PATTERN.len()],
        jb: DepthRow::zeros(),
        max_step: UNBOUNDED_STEP,
    };

    for (idx, &(dx, dy)) in PATTERN.iter().enumerate() {
        let pt = rk_inv * Vector3::new(point.u + dx, point.v + dy, 1.0) + t * idepth;
        let x = pt.x / pt.z;
        let y = pt.y / pt.z;
        let ku = cam.fx * x + cam.cx;
        let kv = cam.fy * y + cam.cy;
        let new_idepth = idepth / pt.z;

        if !(ku > 1.0 && kv > 1.0 && ku < wl - 2.0 && kv < hl - 2.0 && new_idepth > 0.0) {
            return None;
        }

        let hit = frames.target.interpolate(ku, kv)?;
        let ref_intensity = frames
            .reference
            .interpolate_intensity(point.u + dx, point.v + dy)?;
        if !ref_intensity.is_finite() || !hit[0].is_finite() {
            return None;
        }

        let residual = hit[0] - gain * ref_intensity - affine.b;
        let mut hw = if residual.abs() < huber {
            1.0
        } else {
            huber / residual.abs()
        };
        out.energy += hw * residual * residual * (2.0 - hw);

        let dxdd = (t.x - t.z * x) / pt.z;
        let dydd = (t.y - t.z * y) / pt.z;

        if hw < 1.0 {
            hw = hw.sqrt();
        }
        let gx = hw * hit[1] * cam.fx;
        let gy = hw * hit[2] * cam.fy;

        let row = Row9::from_column_slice(&[
            new_idepth * gx,
            new_idepth * gy,
            -new_idepth * (x * gx + y * gy),
            -x * y * gx - (1.0 + y * y) * gy,
            (1.0 + x * x) * gx + x * y * gy,
            -y * gx + x * gy,
            -hw * gain * ref_intensity,
            -hw,
            hw * residual,
        ]);
        let dd = gx * dxdd + gy * dydd;

        out.jb.fixed_rows_mut::<9>(0).axpy(dd, &row, 1.0);
        out.jb[9] += dd * dd;
        out.rows[idx] = row;

        let max_step = 1.0 / Vector2::new(dxdd * cam.fx, dydd * cam.fy).norm();
        if max_step < out.max_step {
            out.max_step = max_step;
        }
    }

    Some(out)
}

/// Linearize a whole level around `pose`, `affine` and the trial inverse depths.
///
/// Points whose committed state is bad, whose taps leave the image, or whose
/// energy exceeds `outlier_multiplier · outlier_th` are invalid for this
/// hypothesis: they keep their committed energy and stay out of the normal
/// equations.
pub fn accumulate(
    points: &[TrackedPoint],
    trial_idepth: &[f64],
    frames: &LevelFrames,
    pose: &SE3,
    affine: AffineBrightness,
    config: &InitializerConfig,
) -> LevelLinearization {
    let rk_inv = pose.rotation_matrix() * frames.camera.k_inv();
    let t = pose.translation;

    let residuals: Vec<Option<PointResidual>> = points
        .par_iter()
        .zip(trial_idepth.par_iter())
        .map(|(point, &idepth)| {
            if !point.state.is_good {
                return None;
            }
            evaluate_point(
                point,
                idepth,
                frames,
                &rk_inv,
                &t,
                affine,
                config.huber_threshold,
            )
            .filter(|res| res.energy <= point.outlier_th * config.outlier_multiplier)
        })
        .collect();

    let mut acc = Matrix9::zeros();
    let mut energy = 0.0;
    let mut num_good = 0;
    let mut linearized: Vec<PointLinearization> = Vec::with_capacity(points.len());

    for ((point, &idepth), residual) in points.iter().zip(trial_idepth).zip(residuals) {
        match residual {
            Some(res) => {
                for row in &res.rows {
                    acc += row * row.transpose();
                }
                let prior = (idepth - 1.0) * (idepth - 1.0);
                energy += res.energy + prior;
                num_good += 1;
                linearized.push(PointLinearization {
                    trial: DepthState {
                        idepth,
                        energy: Vector2::new(res.energy, prior),
                        last_hessian: res.jb[9],
                        is_good: true,
                    },
                    max_step: res.max_step,
                    jb: res.jb,
                });
            }
            None => {
                energy += point.state.energy[0] + point.state.energy[1];
                linearized.push(PointLinearization {
                    trial: DepthState {
                        idepth,
                        is_good: false,
                        ..point.state
                    },
                    max_step: UNBOUNDED_STEP,
                    jb: DepthRow::zeros(),
                });
            }
        }
    }

    let npts = points.len() as f64;
    let mut alpha_energy = config.alpha_w * t.norm_squared() * npts;
    let cap_applied = alpha_energy > config.alpha_k * npts;
    let alpha_opt = if cap_applied {
        alpha_energy = config.alpha_k * npts;
        0.0
    } else {
        config.alpha_w
    };

    let mut acc_sc = Matrix9::zeros();
    for (point, lin) in points.iter().zip(linearized.iter_mut()) {
        if !lin.trial.is_good {
            continue;
        }
        let idepth = lin.trial.idepth;
        lin.jb[8] += alpha_opt * (idepth - 1.0);
        lin.jb[9] += alpha_opt;
        if alpha_opt == 0.0 {
            lin.jb[8] += config.coupling_weight * (idepth - point.ir);
            lin.jb[9] += config.coupling_weight;
        }
        lin.jb[9] = 1.0 / (1.0 + lin.jb[9]);

        let v: Row9 = lin.jb.fixed_rows::<9>(0).into_owned();
        acc_sc += v * v.transpose() * lin.jb[9];
    }

    let mut h: Matrix8 = acc.fixed_view::<8, 8>(0, 0).into_owned();
    let mut b: Vector8 = acc.fixed_view::<8, 1>(0, 8).into_owned();
    let h_sc: Matrix8 = acc_sc.fixed_view::<8, 8>(0, 0).into_owned();
    let b_sc: Vector8 = acc_sc.fixed_view::<8, 1>(0, 8).into_owned();

    let log_t = pose.log();
    for i in 0..3 {
        h[(i, i)] += alpha_opt * npts;
        b[i] += log_t[i] * alpha_opt * npts;
    }

    LevelLinearization {
        points: linearized,
        h,
        b,
        h_sc,
        b_sc,
        energy,
        alpha_energy,
        cap_applied,
        num_good,
    }
}

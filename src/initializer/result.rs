//! Per-call results and diagnostics of the initializer.

use crate::geometry::{AffineBrightness, SE3};

/// One LM step on one level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepRecord {
    /// Damping used to compute the step.
    pub lambda: f64,
    /// Total energy of the committed hypothesis.
    pub energy_old: f64,
    /// Total energy of the trial hypothesis.
    pub energy_new: f64,
    pub accepted: bool,
    pub increment_norm: f64,
}

/// Optimization summary of one pyramid level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelReport {
    pub level: usize,
    pub num_points: usize,
    /// Points valid after the last accepted evaluation.
    pub num_good: usize,
    pub initial_energy: f64,
    pub final_energy: f64,
    pub final_lambda: f64,
    pub steps: Vec<StepRecord>,
}

impl LevelReport {
    pub fn iterations(&self) -> usize {
        self.steps.len()
    }

    pub fn accepted_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.accepted).count()
    }
}

/// Outcome of tracking one frame against the reference frame.
#[derive(Debug, Clone)]
pub struct TrackOutcome {
    /// Geometry snapped long enough ago to hand over to the tracker.
    pub initialized: bool,
    pub snapped: bool,
    /// Number of frames tracked since the reference frame was set.
    pub frame_index: usize,
    /// Pose of the new frame relative to the reference frame.
    pub pose: SE3,
    pub affine: AffineBrightness,
    /// Reports in processing order, coarsest level first.
    pub levels: Vec<LevelReport>,
}

impl TrackOutcome {
    pub fn level(&self, level: usize) -> Option<&LevelReport> {
        self.levels.iter().find(|r| r.level == level)
    }
}

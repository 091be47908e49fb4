//! Per-level arena of tracked points.
//!
//! Points reference each other only by index into the arena of their own level
//! (neighbours) or of the next-coarser level (parent). The arena is replaced as a
//! whole when a new reference frame is set, and the graph is rebuilt with it.

use nalgebra::Vector2;

use crate::frame::SelectionMap;

/// Same-level neighbours stored per point.
pub const NUM_NEIGHBOURS: usize = 10;

/// Sample pattern offsets around each point.
pub const PATTERN: [(f64, f64); 8] = [
    (0.0, -2.0),
    (-1.0, -1.0),
    (1.0, -1.0),
    (-2.0, 0.0),
    (0.0, 0.0),
    (2.0, 0.0),
    (-1.0, 1.0),
    (0.0, 2.0),
];

/// Largest absolute pattern offset.
pub const PATTERN_PADDING: usize = 2;

/// Inverse depth and quality of one point, either committed or trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthState {
    pub idepth: f64,
    /// `[photometric, prior]` energy.
    pub energy: Vector2<f64>,
    /// Curvature of the depth variable from the last linearization.
    pub last_hessian: f64,
    pub is_good: bool,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            idepth: 1.0,
            energy: Vector2::zeros(),
            last_hessian: 0.0,
            is_good: true,
        }
    }
}

/// One selected pixel of the reference frame at one pyramid level.
#[derive(Debug, Clone)]
pub struct TrackedPoint {
    pub u: f64,
    pub v: f64,
    /// Committed state.
    pub state: DepthState,
    /// Regularized inverse depth target.
    pub ir: f64,
    pub outlier_th: f64,
    /// Selection priority reported by the pixel selector.
    pub tier: u8,
    pub neighbours: [Option<usize>; NUM_NEIGHBOURS],
    pub neighbour_dist: [f64; NUM_NEIGHBOURS],
    /// Nearest point in the next-coarser level.
    pub parent: Option<usize>,
    pub parent_dist: f64,
}

impl TrackedPoint {
    pub fn new(u: f64, v: f64, tier: u8, outlier_th: f64) -> Self {
        Self {
            u,
            v,
            state: DepthState::default(),
            ir: 1.0,
            outlier_th,
            tier,
            neighbours: [None; NUM_NEIGHBOURS],
            neighbour_dist: [0.0; NUM_NEIGHBOURS],
            parent: None,
            parent_dist: 0.0,
        }
    }

    pub fn position(&self) -> [f64; 2] {
        [self.u, self.v]
    }
}

/// Points of every pyramid level, finest first.
#[derive(Debug, Clone, Default)]
pub struct PointStore {
    levels: Vec<Vec<TrackedPoint>>,
}

impl PointStore {
    /// Store with `num_levels` empty levels.
    pub fn new(num_levels: usize) -> Self {
        Self {
            levels: vec![Vec::new(); num_levels],
        }
    }

    /// Create points for every selected pixel that keeps the whole pattern
    /// inside the image, one level per selection map.
    pub fn from_selections(maps: &[SelectionMap], outlier_th: f64) -> Self {
        let pad = PATTERN_PADDING;
        let levels = maps
            .iter()
            .map(|map| {
                let (w, h) = (map.width(), map.height());
                let mut points = Vec::new();
                for y in (pad + 1)..h.saturating_sub(pad + 2) {
                    for x in (pad + 1)..w.saturating_sub(pad + 2) {
                        let tier = map.tier(x, y);
                        if tier != 0 {
                            points.push(TrackedPoint::new(
                                x as f64 + 0.1,
                                y as f64 + 0.1,
                                tier,
                                outlier_th,
                            ));
                        }
                    }
                }
                points
            })
            .collect();
        Self { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &[TrackedPoint] {
        &self.levels[level]
    }

    pub fn level_mut(&mut self, level: usize) -> &mut [TrackedPoint] {
        &mut self.levels[level]
    }

    /// Mutable access to `fine` and `fine + 1` at the same time.
    pub fn adjacent_mut(&mut self, fine: usize) -> (&mut [TrackedPoint], &mut [TrackedPoint]) {
        let (lower, upper) = self.levels.split_at_mut(fine + 1);
        (&mut lower[fine], &mut upper[0])
    }

    pub fn num_points(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, Vec::len)
    }

    pub fn total_points(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }
}

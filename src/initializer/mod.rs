//! Photometric coarse-to-fine initializer for monocular visual odometry.
//!
//! Estimates the relative pose, affine brightness and per-point inverse depth
//! between a fixed reference frame and each new frame, until enough parallax
//! has been observed to hand the geometry over to a tracker.

pub mod accumulator;
pub mod config;
pub mod neighbors;
pub mod point;
pub mod regularization;
pub mod result;
pub mod solver;

pub use accumulator::{accumulate, LevelFrames, LevelLinearization, PointLinearization};
pub use config::InitializerConfig;
pub use neighbors::{build_neighbour_graph, RTreeIndex, SpatialIndex};
pub use point::{DepthState, PointStore, TrackedPoint, NUM_NEIGHBOURS, PATTERN};
pub use result::{LevelReport, StepRecord, TrackOutcome};
pub use solver::{CoarseInitializer, LmDamping};

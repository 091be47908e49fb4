//! Depth regularization within a level and propagation between levels.

use super::accumulator::PointLinearization;
use super::config::InitializerConfig;
use super::point::{PointStore, TrackedPoint, NUM_NEIGHBOURS};

/// Pull every good point's regularized depth towards the median of its good
/// neighbours.
///
/// Before the geometry has snapped the regularizer carries no information and
/// every target is reset to 1. Points are updated in place, so later points
/// see the already regularized values of earlier ones.
pub fn opt_reg(points: &mut [TrackedPoint], snapped: bool, reg_weight: f64) {
    if !snapped {
        for p in points.iter_mut() {
            p.ir = 1.0;
        }
        return;
    }

    let mut values = [0.0; NUM_NEIGHBOURS];
    for i in 0..points.len() {
        if !points[i].state.is_good {
            continue;
        }

        let mut n = 0;
        for &j in points[i].neighbours.iter().flatten() {
            let other = &points[j];
            if other.state.is_good {
                values[n] = other.ir;
                n += 1;
            }
        }

        if n > 2 {
            let (_, median, _) =
                values[..n].select_nth_unstable_by(n / 2, |a, b| a.total_cmp(b));
            let median = *median;
            let point = &mut points[i];
            point.ir = (1.0 - reg_weight) * point.state.idepth + reg_weight * median;
        }
    }
}

/// Curvature-weighted average of the children of every point in `fine + 1`.
///
/// Coarser points that receive no weight keep their previous state.
pub fn propagate_up(
    store: &mut PointStore,
    fine: usize,
    snapped: bool,
    config: &InitializerConfig,
) {
    let (children, parents) = store.adjacent_mut(fine);

    let mut sums = vec![(0.0, 0.0); parents.len()];
    for child in children.iter().filter(|p| p.state.is_good) {
        let Some(parent) = child.parent else {
            continue;
        };
        if let Some(sum) = sums.get_mut(parent) {
            sum.0 += child.ir * child.state.last_hessian;
            sum.1 += child.state.last_hessian;
        }
    }

    for (parent, (weighted, weight)) in parents.iter_mut().zip(sums) {
        if weight > 0.0 {
            let idepth = weighted / weight;
            parent.ir = idepth;
            parent.state.idepth = idepth;
            parent.state.is_good = true;
        }
    }

    opt_reg(parents, snapped, config.reg_weight);
}

/// Seed the points of `coarse - 1` from their parents in `coarse`.
pub fn propagate_down(
    store: &mut PointStore,
    coarse: usize,
    snapped: bool,
    config: &InitializerConfig,
) {
    if coarse == 0 {
        return;
    }
    let (children, parents) = store.adjacent_mut(coarse - 1);

    for child in children.iter_mut() {
        let Some(parent) = child.parent.and_then(|i| parents.get(i)) else {
            continue;
        };
        if !parent.state.is_good || parent.state.last_hessian < config.min_parent_hessian {
            continue;
        }

        if !child.state.is_good {
            child.ir = parent.ir;
            child.state.idepth = parent.ir;
            child.state.is_good = true;
            child.state.last_hessian = 0.0;
        } else {
            let h = child.state.last_hessian * 2.0;
            let hp = parent.state.last_hessian;
            let ir = (child.ir * h + parent.ir * hp) / (h + hp);
            child.ir = ir;
            child.state.idepth = ir;
        }
    }

    opt_reg(children, snapped, config.reg_weight);
}

/// Clear committed energies before a level is optimized.
///
/// On the coarsest level bad points are revived from the mean regularized
/// depth of their good neighbours.
pub fn reset_points(points: &mut [TrackedPoint], coarsest: bool) {
    for p in points.iter_mut() {
        p.state.energy.fill(0.0);
    }
    if !coarsest {
        return;
    }

    for i in 0..points.len() {
        if points[i].state.is_good {
            continue;
        }
        let (sum, count) = points[i]
            .neighbours
            .iter()
            .flatten()
            .map(|&j| &points[j])
            .filter(|other| other.state.is_good)
            .fold((0.0, 0usize), |(s, c), other| (s + other.ir, c + 1));

        if count > 0 {
            let idepth = sum / count as f64;
            let point = &mut points[i];
            point.state.is_good = true;
            point.ir = idepth;
            point.state.idepth = idepth;
        }
    }
}

/// Coupling energy `Σ (ρ - ir)²` of the committed and trial depths over the
/// points that are valid in `trial`.
pub fn coupling_energy(
    points: &[TrackedPoint],
    trial: &[PointLinearization],
    coupling_weight: f64,
) -> (f64, f64) {
    let (old, new) = points
        .iter()
        .zip(trial)
        .filter(|(_, lin)| lin.trial.is_good)
        .fold((0.0, 0.0), |(old, new), (p, lin)| {
            let r_old = p.state.idepth - p.ir;
            let r_new = lin.trial.idepth - p.ir;
            (old + r_old * r_old, new + r_new * r_new)
        });
    (coupling_weight * old, coupling_weight * new)
}

//! Nearest-neighbour graph over the points of each pyramid level.

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use super::point::{PointStore, NUM_NEIGHBOURS};

/// Read-only k-NN service over 2-D positions.
pub trait SpatialIndex {
    fn build(points: &[[f64; 2]]) -> Self
    where
        Self: Sized;

    /// Up to `k` nearest points as `(index, squared distance)`, closest first.
    fn nearest_k(&self, query: [f64; 2], k: usize) -> Vec<(usize, f64)>;
}

/// Point position tagged with its arena index.
#[derive(Debug, Clone, Copy)]
struct IndexedPixel {
    index: usize,
    position: [f64; 2],
}

impl RTreeObject for IndexedPixel {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for IndexedPixel {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx * dx + dy * dy
    }
}

/// R*-tree backed [`SpatialIndex`].
pub struct RTreeIndex {
    tree: RTree<IndexedPixel>,
}

impl SpatialIndex for RTreeIndex {
    fn build(points: &[[f64; 2]]) -> Self {
        let indexed: Vec<IndexedPixel> = points
            .iter()
            .enumerate()
            .map(|(index, &position)| IndexedPixel { index, position })
            .collect();
        Self {
            tree: RTree::bulk_load(indexed),
        }
    }

    fn nearest_k(&self, query: [f64; 2], k: usize) -> Vec<(usize, f64)> {
        self.tree
            .nearest_neighbor_iter_with_distance_2(&query)
            .take(k)
            .map(|(p, d2)| (p.index, d2))
            .collect()
    }
}

/// Fill neighbour and parent links of every level.
///
/// Neighbour affinities are `exp(-d² · decay)` renormalized to sum to
/// [`NUM_NEIGHBOURS`]. The parent is searched at the point's position mapped
/// into the next-coarser level.
pub fn build_neighbour_graph<I: SpatialIndex>(store: &mut PointStore, decay: f64) {
    let num_levels = store.num_levels();
    let positions: Vec<Vec<[f64; 2]>> = (0..num_levels)
        .map(|lvl| store.level(lvl).iter().map(|p| p.position()).collect())
        .collect();

    for lvl in 0..num_levels {
        let index = I::build(&positions[lvl]);
        let coarser = positions
            .get(lvl + 1)
            .filter(|pts| !pts.is_empty())
            .map(|pts| I::build(pts));

        for (point, &pos) in store.level_mut(lvl).iter_mut().zip(&positions[lvl]) {
            point.neighbours = [None; NUM_NEIGHBOURS];
            point.neighbour_dist = [0.0; NUM_NEIGHBOURS];

            let found = index.nearest_k(pos, NUM_NEIGHBOURS);
            let mut sum = 0.0;
            for (slot, &(idx, d2)) in found.iter().enumerate() {
                let affinity = (-d2 * decay).exp();
                point.neighbours[slot] = Some(idx);
                point.neighbour_dist[slot] = affinity;
                sum += affinity;
            }
            if sum > 0.0 {
                for w in point.neighbour_dist.iter_mut().take(found.len()) {
                    *w *= NUM_NEIGHBOURS as f64 / sum;
                }
            }

            let parent = coarser.as_ref().and_then(|tree| {
                let query = [pos[0] * 0.5 - 0.25, pos[1] * 0.5 - 0.25];
                tree.nearest_k(query, 1).first().copied()
            });
            match parent {
                Some((idx, d2)) => {
                    point.parent = Some(idx);
                    point.parent_dist = (-d2 * decay).exp();
                }
                None => {
                    point.parent = None;
                    point.parent_dist = 0.0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SelectionMap;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_store(counts: &[usize], seed: u64) -> PointStore {
        let mut rng = StdRng::seed_from_u64(seed);
        let maps: Vec<SelectionMap> = counts
            .iter()
            .enumerate()
            .map(|(lvl, &count)| {
                let side = 128 >> lvl;
                let mut map = SelectionMap::empty(side, side);
                let mut placed = 0;
                while placed < count {
                    let x = rng.gen_range(3..side - 4);
                    let y = rng.gen_range(3..side - 4);
                    if map.tier(x, y) == 0 {
                        map.set(x, y, 1);
                        placed += 1;
                    }
                }
                map
            })
            .collect();
        PointStore::from_selections(&maps, 1.0)
    }

    #[test]
    fn test_rtree_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let points: Vec<[f64; 2]> = (0..200)
            .map(|_| [rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)])
            .collect();
        let index = RTreeIndex::build(&points);

        let query = [42.0, 17.5];
        let found = index.nearest_k(query, 10);

        let mut brute: Vec<(usize, f64)> = points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, (p[0] - query[0]).powi(2) + (p[1] - query[1]).powi(2)))
            .collect();
        brute.sort_by(|a, b| a.1.total_cmp(&b.1));

        assert_eq!(found.len(), 10);
        for (f, b) in found.iter().zip(&brute) {
            assert_relative_eq!(f.1, b.1, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_graph_indices_are_valid_and_unique() {
        let mut store = random_store(&[300, 120, 40], 3);
        build_neighbour_graph::<RTreeIndex>(&mut store, 0.05);

        for lvl in 0..store.num_levels() {
            let n = store.num_points(lvl);
            for p in store.level(lvl) {
                let ids: Vec<usize> = p.neighbours.iter().flatten().copied().collect();
                assert_eq!(ids.len(), NUM_NEIGHBOURS.min(n));
                assert!(ids.iter().all(|&i| i < n));
                let mut dedup = ids.clone();
                dedup.sort_unstable();
                dedup.dedup();
                assert_eq!(dedup.len(), ids.len());

                assert_relative_eq!(p.neighbour_dist.iter().sum::<f64>(), 10.0, epsilon = 1e-9);

                if lvl + 1 < store.num_levels() {
                    let parent = p.parent.unwrap();
                    assert!(parent < store.num_points(lvl + 1));
                    assert!(p.parent_dist > 0.0 && p.parent_dist <= 1.0);
                } else {
                    assert!(p.parent.is_none());
                }
            }
        }
    }

    #[test]
    fn test_point_is_its_own_nearest_neighbour() {
        let mut store = random_store(&[50], 11);
        build_neighbour_graph::<RTreeIndex>(&mut store, 0.05);

        for (i, p) in store.level(0).iter().enumerate() {
            assert_eq!(p.neighbours[0], Some(i));
        }
    }

    #[test]
    fn test_sparse_level_fills_only_available_slots() {
        let mut store = random_store(&[4, 0], 5);
        build_neighbour_graph::<RTreeIndex>(&mut store, 0.05);

        for p in store.level(0) {
            assert_eq!(p.neighbours.iter().flatten().count(), 4);
            assert!(p.neighbours[4..].iter().all(Option::is_none));
            // empty coarser level
            assert!(p.parent.is_none());
        }
    }
}

//! Policy deciding when and how the spatial index reshapes itself.

use super::spatialindex::{Node, SplitPlane};
use crate::{
    math::{self as m, Unit, Vec3},
    physics::EntityId,
};

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::hash::{Hash, Hasher};

/// Thresholds for splitting and merging spatial index nodes.
///
/// This holds no state beyond its configuration, so the same strategy
/// makes the same decisions for the same tree.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-types",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct BalanceStrategy {
    /// A leaf splits when it holds more markers than this.
    pub split_threshold: usize,
    /// Leaves at this depth or deeper never split.
    pub max_depth: usize,
    /// Two leaf siblings are merged into their parent when the three nodes
    /// together hold fewer markers than this.
    pub merge_threshold: usize,
    /// How many entities to sample when placing a split plane.
    pub sample_size: usize,
    /// Mixed into the random choices of split planes.
    pub seed: u64,
}

impl Default for BalanceStrategy {
    fn default() -> Self {
        Self {
            split_threshold: 10,
            max_depth: 5,
            merge_threshold: 15,
            sample_size: 8,
            seed: 0,
        }
    }
}

impl BalanceStrategy {
    pub fn should_split(&self, node: &Node) -> bool {
        let count = node.marker_count();
        node.is_leaf() && count >= 2 && count > self.split_threshold && node.depth() < self.max_depth
    }

    pub fn should_merge(&self, node: &Node, children: [&Node; 2]) -> bool {
        let [c0, c1] = children;
        c0.is_leaf()
            && c1.is_leaf()
            && node.marker_count() + c0.marker_count() + c1.marker_count() < self.merge_threshold
    }

    /// Random source for splitting a node.
    ///
    /// Seeded from the node's depth and contents, so that splitting
    /// the same set of entities at the same depth always picks the same plane.
    /// This keeps a merge immediately followed by a re-split from changing the tree.
    pub(crate) fn rng_for(&self, depth: usize, ids: impl Iterator<Item = EntityId>) -> StdRng {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.seed.hash(&mut hasher);
        depth.hash(&mut hasher);
        for id in ids {
            id.hash(&mut hasher);
        }
        StdRng::seed_from_u64(hasher.finish())
    }

    /// Pick a plane to split a node with the given entity centers.
    ///
    /// The anchor is the centroid of a random sample of the centers.
    /// Three random normals roughly orthogonal to `parent_normal` are tried
    /// and the one dividing the sample most evenly wins.
    /// Cheap and far from optimal.
    pub fn compute_split_plane(
        &self,
        parent_normal: Unit<Vec3>,
        centers: &[Vec3],
        rng: &mut impl Rng,
    ) -> SplitPlane {
        let sample: Vec<Vec3> = if centers.len() <= self.sample_size {
            centers.to_vec()
        } else {
            centers
                .choose_multiple(rng, self.sample_size)
                .copied()
                .collect()
        };
        let anchor = if sample.is_empty() {
            Vec3::zero()
        } else {
            sample.iter().fold(Vec3::zero(), |acc, c| acc + *c) / sample.len() as f64
        };

        let candidates: [Unit<Vec3>; 3] =
            std::array::from_fn(|_| candidate_normal(parent_normal, rng));
        let (normal, _) = candidates[1..].iter().fold(
            (candidates[0], imbalance(&sample, anchor, candidates[0])),
            |best, &cand| {
                let score = imbalance(&sample, anchor, cand);
                if score < best.1 {
                    (cand, score)
                } else {
                    best
                }
            },
        );

        SplitPlane { normal, anchor }
    }
}

fn candidate_normal(parent_normal: Unit<Vec3>, rng: &mut impl Rng) -> Unit<Vec3> {
    let random = Vec3::new(
        rng.gen_range(-1.0..=1.0),
        rng.gen_range(-1.0..=1.0),
        rng.gen_range(-1.0..=1.0),
    );
    Unit::try_new(parent_normal.cross(random)).unwrap_or_else(|| {
        log::warn!("degenerate split plane candidate, using an arbitrary orthogonal direction");
        m::any_orthogonal(*parent_normal)
    })
}

/// Absolute difference between the number of points in front of
/// and behind the plane.
fn imbalance(points: &[Vec3], anchor: Vec3, normal: Unit<Vec3>) -> f64 {
    points
        .iter()
        .map(|p| {
            let proj = (*p - anchor).dot(*normal);
            if proj > 0.0 {
                1.0
            } else if proj < 0.0 {
                -1.0
            } else {
                0.0
            }
        })
        .sum::<f64>()
        .abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_plane_is_orthogonal_to_parent_and_balanced() {
        let strategy = BalanceStrategy::default();
        // points spread along x and z, parent normal along y
        let centers: Vec<Vec3> = (0..6)
            .flat_map(|i| {
                let x = i as f64 - 2.5;
                [Vec3::new(x, 0.0, 1.0), Vec3::new(x, 0.0, -1.0)]
            })
            .collect();
        let mut rng = strategy.rng_for(0, (0..12).map(EntityId));
        let plane = strategy.compute_split_plane(Unit::unit_y(), &centers, &mut rng);
        assert!(plane.normal.dot(Vec3::unit_y()).abs() < 1e-9);

        let front = centers
            .iter()
            .filter(|c| (**c - plane.anchor).dot(*plane.normal) > 0.0)
            .count();
        // not guaranteed to be perfect, but never everything on one side
        assert!(front > 0 && front < centers.len());
    }

    #[test]
    fn anchor_is_the_sample_centroid() {
        let strategy = BalanceStrategy::default();
        let centers = [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(3.0, 0.0, 0.0),
            Vec3::new(2.0, 3.0, 0.0),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let plane = strategy.compute_split_plane(Unit::unit_z(), &centers, &mut rng);
        assert!((plane.anchor - Vec3::new(2.0, 1.0, 0.0)).mag() < 1e-12);
    }

    #[test]
    fn same_contents_same_plane() {
        let strategy = BalanceStrategy::default();
        let centers: Vec<Vec3> = (0..20)
            .map(|i| Vec3::new(i as f64, (i * 7 % 5) as f64, (i * 3 % 4) as f64))
            .collect();
        let plane = |depth| {
            let mut rng = strategy.rng_for(depth, (0..20).map(EntityId));
            strategy.compute_split_plane(Unit::unit_x(), &centers, &mut rng)
        };
        assert_eq!(plane(2), plane(2));
    }

    #[test]
    fn imbalance_counts_sides() {
        let points = [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(0.0, 5.0, 0.0),
        ];
        assert_eq!(imbalance(&points, Vec3::zero(), Unit::unit_x()), 1.0);
        assert_eq!(imbalance(&points, Vec3::zero(), Unit::unit_y()), 1.0);
        // everything behind a far away plane
        assert_eq!(imbalance(&points, Vec3::new(10.0, 0.0, 0.0), Unit::unit_x()), 4.0);
        assert_eq!(imbalance(&points, Vec3::new(1.5, 0.0, 0.0), Unit::unit_x()), 2.0);
    }
}

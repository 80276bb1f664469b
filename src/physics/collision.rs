//! Broad phase spatial partitioning and narrow phase intersection tests.

pub mod balance;
pub use balance::BalanceStrategy;

pub mod spatialindex;
pub use spatialindex::{IndexRayHit, IndexStats, NodeKey, QueryToken, SpatialIndex, SplitPlane};

pub mod narrowphase;
pub use narrowphase::{intersection_check, Intersection};

use crate::math::{Unit, Vec3};

/// A half-line starting from `start` and extending infinitely in direction `dir`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub start: Vec3,
    pub dir: Unit<Vec3>,
}

impl Ray {
    /// Create a ray, normalizing the direction.
    /// Returns `None` if the direction has no length.
    pub fn new(start: Vec3, dir: Vec3) -> Option<Self> {
        Unit::try_new(dir).map(|dir| Ray { start, dir })
    }

    #[inline]
    pub fn point_at_t(&self, t: f64) -> Vec3 {
        self.start + *self.dir * t
    }
}

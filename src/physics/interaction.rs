//! Continuous forces between pairs of entities.

use super::Entity;
use crate::math::Vec3;

/// A force or constraint between two entities that acts every step,
/// whether or not they are touching.
///
/// Attach one with [`PhysicsWorld::add_interaction`][super::PhysicsWorld::add_interaction].
/// While attached, it keeps the pair's contact edge alive.
pub trait Interaction: std::fmt::Debug {
    /// Apply this step's effect as impulses on `a` and `b`.
    /// `a` always has the lower entity id.
    fn solve(&self, a: &mut Entity, b: &mut Entity, dt: f64);
}

/// Newtonian attraction between the two entities.
///
/// Static entities have no finite mass; they attract as if they had unit mass.
#[derive(Clone, Copy, Debug)]
pub struct Gravity {
    pub constant: f64,
}

impl Gravity {
    pub fn new(constant: f64) -> Self {
        Self { constant }
    }
}

impl Interaction for Gravity {
    fn solve(&self, a: &mut Entity, b: &mut Entity, dt: f64) {
        let dist = b.center() - a.center();
        let dist_sq = dist.mag_sq();
        if dist_sq < crate::math::DEGENERATE_EPSILON {
            return;
        }
        let m_a = a.mass().value().unwrap_or(1.0);
        let m_b = b.mass().value().unwrap_or(1.0);
        let force = self.constant * m_a * m_b / dist_sq;
        let impulse = dist * (force * dt / dist_sq.sqrt());
        a.add_impulse(impulse);
        b.add_impulse(-impulse);
    }
}

/// A damped spring between the centers of the two entities.
#[derive(Clone, Copy, Debug)]
pub struct Spring {
    pub rest_length: f64,
    pub stiffness: f64,
    pub damping: f64,
}

impl Interaction for Spring {
    fn solve(&self, a: &mut Entity, b: &mut Entity, dt: f64) {
        let dist = b.center() - a.center();
        let len = dist.mag();
        if len < crate::math::DEGENERATE_EPSILON {
            return;
        }
        let dir = dist / len;
        let stretch = len - self.rest_length;
        let closing_speed: f64 = (b.velocity() - a.velocity()).dot(dir);
        let force = self.stiffness * stretch + self.damping * closing_speed;
        let impulse: Vec3 = dir * (force * dt);
        a.add_impulse(impulse);
        b.add_impulse(-impulse);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{EntityBuilder, EntityId, Shape};

    fn pair(distance: f64) -> (Entity, Entity) {
        let a = EntityBuilder::new_dynamic(Shape::new_sphere(0.5))
            .with_mass(1.0)
            .build(EntityId(0))
            .unwrap();
        let b = EntityBuilder::new_dynamic(Shape::new_sphere(0.5))
            .with_mass(1.0)
            .with_position(Vec3::new(distance, 0.0, 0.0))
            .build(EntityId(1))
            .unwrap();
        (a, b)
    }

    #[test]
    fn gravity_pulls_together() {
        let (mut a, mut b) = pair(2.0);
        Gravity::new(4.0).solve(&mut a, &mut b, 0.5);
        // F = 4 * 1 * 1 / 4 = 1, J = 0.5
        assert!((a.velocity() - Vec3::new(0.5, 0.0, 0.0)).mag() < 1e-12);
        assert!((b.velocity() - Vec3::new(-0.5, 0.0, 0.0)).mag() < 1e-12);
    }

    #[test]
    fn spring_restores_rest_length() {
        let (mut a, mut b) = pair(3.0);
        let spring = Spring {
            rest_length: 2.0,
            stiffness: 1.0,
            damping: 0.0,
        };
        spring.solve(&mut a, &mut b, 1.0);
        assert!(a.velocity().x > 0.0 && b.velocity().x < 0.0);

        let (mut a, mut b) = pair(1.0);
        spring.solve(&mut a, &mut b, 1.0);
        assert!(a.velocity().x < 0.0 && b.velocity().x > 0.0);
    }
}

//! Time integration of entity motion.

use crate::math::{Bivec3, Rotor3, Unit, Vec3};

/// Moves positions and orientations forward in time given their velocities.
///
/// The world calls this once per dynamic entity per step,
/// after the previous step's impulses have already been applied to velocities.
pub trait Integrator {
    fn integrate_position(&self, position: Vec3, velocity: Vec3, dt: f64) -> Vec3;
    fn integrate_rotation(&self, orientation: Rotor3, angular_velocity: Vec3, dt: f64) -> Rotor3;
}

/// Semi-implicit Euler: velocities are updated by impulses before positions
/// are advanced with the new velocity.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymplecticEuler;

impl Integrator for SymplecticEuler {
    #[inline]
    fn integrate_position(&self, position: Vec3, velocity: Vec3, dt: f64) -> Vec3 {
        position + velocity * dt
    }

    fn integrate_rotation(&self, orientation: Rotor3, angular_velocity: Vec3, dt: f64) -> Rotor3 {
        let Some(axis) = Unit::try_new(angular_velocity) else {
            return orientation;
        };
        let angle = angular_velocity.mag() * dt;
        let delta = Rotor3::from_angle_plane(angle, Bivec3::from_normalized_axis(*axis));
        // renormalize to keep rounding errors from accumulating
        (delta * orientation).normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::approx_eq;
    use std::f64::consts::PI;

    #[test]
    fn constant_velocity() {
        let p = SymplecticEuler.integrate_position(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(-1.0, 0.0, 2.0),
            0.5,
        );
        assert_eq!(p, Vec3::new(0.5, 2.0, 4.0));
    }

    #[test]
    fn quarter_turn_in_steps() {
        let mut rot = Rotor3::identity();
        let omega = Vec3::new(0.0, 0.0, PI / 2.0);
        for _ in 0..100 {
            rot = SymplecticEuler.integrate_rotation(rot, omega, 0.01);
        }
        let v = rot * Vec3::unit_x();
        // rotated a quarter turn around z, stays unit length
        assert!(approx_eq(v.x, 0.0, 1e-9));
        assert!(approx_eq(v.y.abs(), 1.0, 1e-9));
        assert!(approx_eq(v.z, 0.0, 1e-9));
        assert!(approx_eq(rot.mag_sq(), 1.0, 1e-12));
    }

    #[test]
    fn no_spin_no_change() {
        let rot = Rotor3::from_angle_plane(0.4, Bivec3::from_normalized_axis(Vec3::unit_x()));
        assert_eq!(SymplecticEuler.integrate_rotation(rot, Vec3::zero(), 1.0), rot);
    }
}

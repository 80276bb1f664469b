//! Intersection tests between pairs of shapes.
//!
//! Spheres, triangles and planes have exact closed form tests.
//! Every other pair of bounded shapes goes through GJK and EPA.

mod gjk;

use crate::{
    math::{Pose, Unit, Vec3},
    physics::shape::{closest_point_on_triangle, Shape, ShapeKind},
};

/// Result of testing two posed shapes for intersection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intersection {
    /// Whether the shapes overlap.
    pub contact: bool,
    /// Point of contact in world space, halfway between the two surfaces.
    pub point: Vec3,
    /// The normal, facing away from the second shape toward the first.
    pub normal: Unit<Vec3>,
    /// Penetration depth. Zero when not in contact.
    pub depth: f64,
}

impl Default for Intersection {
    fn default() -> Self {
        Self::separate()
    }
}

impl Intersection {
    pub fn separate() -> Self {
        Self {
            contact: false,
            point: Vec3::zero(),
            normal: Unit::unit_x(),
            depth: 0.0,
        }
    }

    fn touching(point: Vec3, normal: Unit<Vec3>, depth: f64) -> Self {
        Self {
            contact: true,
            point,
            normal,
            depth,
        }
    }

    fn flipped(self) -> Self {
        Self {
            normal: -self.normal,
            ..self
        }
    }
}

/// Check two posed shapes for intersection.
///
/// Panics on pairs of shapes that have no intersection test,
/// which are two unbounded shapes such as two planes.
pub fn intersection_check(
    pose_a: &Pose,
    shape_a: &Shape,
    pose_b: &Pose,
    shape_b: &Shape,
) -> Intersection {
    use ShapeKind::*;
    match (shape_a.kind(), shape_b.kind()) {
        (Proxy { shape, offset }, _) => {
            intersection_check(&(*pose_a * *offset), shape, pose_b, shape_b)
        }
        (_, Proxy { shape, offset }) => {
            intersection_check(pose_a, shape_a, &(*pose_b * *offset), shape)
        }
        (Sphere { r: r_a }, Sphere { r: r_b }) => {
            sphere_sphere(pose_a.translation, *r_a, pose_b.translation, *r_b)
        }
        (Sphere { r }, Triangle { verts }) => sphere_triangle(pose_a.translation, *r, pose_b, verts),
        (Triangle { verts }, Sphere { r }) => {
            sphere_triangle(pose_b.translation, *r, pose_a, verts).flipped()
        }
        (Plane { .. }, Plane { .. }) => impossible(shape_a, shape_b),
        (_, Plane { normal }) => plane_shape(pose_b, *normal, pose_a, shape_a),
        (Plane { normal }, _) => plane_shape(pose_a, *normal, pose_b, shape_b).flipped(),
        _ if gjk::is_bounded(shape_a) && gjk::is_bounded(shape_b) => {
            gjk::convex_convex(pose_a, shape_a, pose_b, shape_b)
        }
        _ => impossible(shape_a, shape_b),
    }
}

fn impossible(shape_a: &Shape, shape_b: &Shape) -> ! {
    panic!(
        "impossible: no intersection test between {} and {}",
        shape_a.kind_name(),
        shape_b.kind_name()
    )
}

fn sphere_sphere(center_a: Vec3, r_a: f64, center_b: Vec3, r_b: f64) -> Intersection {
    let dist = center_a - center_b;
    let dist_sq = dist.mag_sq();
    let r_sum = r_a + r_b;
    if dist_sq >= r_sum * r_sum {
        return Intersection::separate();
    }

    let (normal, depth) = match Unit::try_new(dist) {
        Some(normal) => (normal, r_sum - dist_sq.sqrt()),
        // same position, consider penetration to be on x axis
        None => (Unit::unit_x(), r_sum),
    };
    let surface_a = center_a - *normal * r_a;
    let surface_b = center_b + *normal * r_b;
    Intersection::touching((surface_a + surface_b) * 0.5, normal, depth)
}

/// Normal faces from the triangle toward the sphere.
fn sphere_triangle(center: Vec3, r: f64, tri_pose: &Pose, verts: &[Vec3; 3]) -> Intersection {
    let [a, b, c] = verts.map(|v| tri_pose.transform_vec(v));
    let closest = closest_point_on_triangle(center, a, b, c);
    let dist = center - closest;
    let dist_sq = dist.mag_sq();
    if dist_sq >= r * r {
        return Intersection::separate();
    }

    let normal = Unit::try_new(dist)
        .or_else(|| {
            // center exactly on the triangle, push out along the face normal
            Unit::try_new((b - a).cross(c - a))
        })
        .unwrap_or_else(Unit::unit_x);
    let depth = r - dist_sq.sqrt();
    Intersection::touching(closest + *normal * (0.5 * depth), normal, depth)
}

/// Normal faces from the plane toward the other shape.
fn plane_shape(
    plane_pose: &Pose,
    plane_normal: Unit<Vec3>,
    pose: &Pose,
    shape: &Shape,
) -> Intersection {
    let normal = plane_pose.rotation * plane_normal;
    let Some(deepest) = shape.support_world(pose, -*normal) else {
        impossible(&Shape::new_plane(plane_normal), shape)
    };
    let signed_dist = (deepest - plane_pose.translation).dot(*normal);
    if signed_dist >= 0.0 {
        return Intersection::separate();
    }

    let depth = -signed_dist;
    Intersection::touching(deepest + *normal * (0.5 * depth), normal, depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{approx_eq, Bivec3, Rotor3};

    fn at(x: f64, y: f64, z: f64) -> Pose {
        Pose::new(Vec3::new(x, y, z), Rotor3::identity())
    }

    #[test]
    fn spheres() {
        let s = Shape::new_sphere(1.0);
        let isect = intersection_check(&at(-0.9, 0.0, 0.0), &s, &at(0.9, 0.0, 0.0), &s);
        assert!(isect.contact);
        assert!(approx_eq(isect.depth, 0.2, 1e-12));
        assert!(approx_eq(isect.normal.x, -1.0, 1e-12));
        assert!(isect.point.mag() < 1e-12);

        let apart = intersection_check(&at(-1.0, 0.0, 0.0), &s, &at(1.0, 0.0, 0.0), &s);
        assert!(!apart.contact);
        assert_eq!(apart, Intersection::separate());

        let same = intersection_check(&at(0.0, 0.0, 0.0), &s, &at(0.0, 0.0, 0.0), &s);
        assert!(same.contact);
        assert!(approx_eq(same.depth, 2.0, 1e-12));
    }

    #[test]
    fn sphere_on_triangle() {
        let tri = Shape::new_triangle(
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(0.0, 0.0, 1.0),
        );
        let ball = Shape::new_sphere(0.5);
        let isect = intersection_check(&at(0.0, 0.4, 0.0), &ball, &at(0.0, 0.0, 0.0), &tri);
        assert!(isect.contact);
        assert!(approx_eq(isect.normal.y, 1.0, 1e-12));
        assert!(approx_eq(isect.depth, 0.1, 1e-12));

        // reversed order flips the normal
        let flipped = intersection_check(&at(0.0, 0.0, 0.0), &tri, &at(0.0, 0.4, 0.0), &ball);
        assert!(approx_eq(flipped.normal.y, -1.0, 1e-12));
        assert_eq!(flipped.point, isect.point);

        // past the edge of the triangle
        let off = intersection_check(&at(3.0, 0.4, 0.0), &ball, &at(0.0, 0.0, 0.0), &tri);
        assert!(!off.contact);
    }

    #[test]
    fn things_on_planes() {
        let ground = Shape::new_plane(Unit::unit_y());
        let ball = Shape::new_sphere(1.0);
        let isect = intersection_check(&at(2.0, 0.75, 0.0), &ball, &at(0.0, 0.0, 0.0), &ground);
        assert!(isect.contact);
        assert!(approx_eq(isect.depth, 0.25, 1e-12));
        assert!(approx_eq(isect.normal.y, 1.0, 1e-12));

        let tri = Shape::new_triangle(
            Vec3::new(0.0, -0.1, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 1.0),
        );
        let isect = intersection_check(&at(0.0, 0.0, 0.0), &ground, &at(0.0, 0.0, 0.0), &tri);
        assert!(isect.contact);
        assert!(approx_eq(isect.depth, 0.1, 1e-12));
        // plane is the first shape here, so the normal faces into it
        assert!(approx_eq(isect.normal.y, -1.0, 1e-12));

        // tilted plane: rotate the ground a quarter turn so its normal faces +x
        let tilt = Rotor3::from_angle_plane(
            -std::f64::consts::FRAC_PI_2,
            Bivec3::from_normalized_axis(Vec3::unit_z()),
        );
        let wall = Pose::new(Vec3::zero(), tilt);
        let normal = tilt * Vec3::unit_y();
        let ball_pose = Pose::new(normal * 0.5, Rotor3::identity());
        let isect = intersection_check(&ball_pose, &ball, &wall, &ground);
        assert!(isect.contact);
        assert!(approx_eq(isect.depth, 0.5, 1e-9));
    }

    #[test]
    fn proxies_are_offset() {
        let inner = Shape::new_sphere(0.5);
        let proxy = Shape::new_proxy(inner.clone(), at(2.0, 0.0, 0.0));
        let isect = intersection_check(&at(0.0, 0.0, 0.0), &proxy, &at(2.8, 0.0, 0.0), &inner);
        assert!(isect.contact);
        assert!(approx_eq(isect.depth, 0.2, 1e-12));
        assert!(approx_eq(isect.normal.x, -1.0, 1e-12));

        let miss = intersection_check(&at(0.0, 0.0, 0.0), &inner, &at(0.0, 0.0, 0.0), &proxy);
        assert!(!miss.contact);
    }

    #[test]
    #[should_panic(expected = "impossible")]
    fn two_planes_are_impossible() {
        let p = Shape::new_plane(Unit::unit_y());
        intersection_check(&at(0.0, 0.0, 0.0), &p, &at(0.0, 1.0, 0.0), &p);
    }

    #[test]
    fn crossing_triangles() {
        let flat = Shape::new_triangle(
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        );
        let upright = Shape::new_triangle(
            Vec3::new(0.0, -0.5, -1.0),
            Vec3::new(0.0, -0.5, 1.0),
            Vec3::new(0.0, 0.5, 0.0),
        );
        let isect = intersection_check(&at(0.0, 0.0, 0.0), &flat, &at(0.0, 0.0, 0.0), &upright);
        assert!(isect.contact);
        // sliding the upright one 0.75 along x gets them apart, so that's an upper bound
        assert!(isect.depth > 0.0 && isect.depth <= 0.75 + 1e-6);

        let apart = intersection_check(&at(0.0, 0.0, 0.0), &flat, &at(2.0, 0.0, 0.0), &upright);
        assert!(!apart.contact);
    }

    #[test]
    fn sphere_against_ellipsoid() {
        let ball = Shape::new_sphere(1.0);
        let ellipsoid = Shape::new_distorted(
            Shape::new_sphere(1.0),
            crate::math::diagonal(Vec3::new(3.0, 1.0, 1.0)),
        );
        let isect = intersection_check(&at(0.0, 0.0, 0.0), &ball, &at(3.5, 0.0, 0.0), &ellipsoid);
        assert!(isect.contact);
        assert!(approx_eq(isect.depth, 0.5, 1e-2));
        assert!(isect.normal.x < -0.95);

        let flipped =
            intersection_check(&at(3.5, 0.0, 0.0), &ellipsoid, &at(0.0, 0.0, 0.0), &ball);
        assert!(flipped.contact);
        assert!(flipped.normal.x > 0.95);

        let apart = intersection_check(&at(0.0, 0.0, 0.0), &ball, &at(5.0, 0.0, 0.0), &ellipsoid);
        assert!(!apart.contact);
    }

    #[test]
    #[should_panic(expected = "impossible")]
    fn distorted_plane_is_impossible() {
        let slab = Shape::new_distorted(
            Shape::new_plane(Unit::unit_y()),
            crate::math::diagonal(Vec3::new(1.0, 2.0, 1.0)),
        );
        let ball = Shape::new_sphere(1.0);
        intersection_check(&at(0.0, 0.0, 0.0), &ball, &at(0.0, 0.0, 0.0), &slab);
    }
}

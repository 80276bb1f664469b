//! Generic intersection test for any two bounded convex shapes,
//! using only their support mappings.
//!
//! GJK finds out whether the Minkowski difference `A - B` contains the origin,
//! and if it does, EPA expands the final simplex to find the penetration depth.

use super::Intersection;
use crate::{
    math::{self as m, Pose, Unit, Vec3},
    physics::shape::Shape,
};

const GJK_MAX_ITERS: usize = 64;
const EPA_MAX_ITERS: usize = 64;
const EPA_TOLERANCE: f64 = 1e-9;
/// Points closer than this count as the same support point.
const DUPLICATE_EPSILON: f64 = 1e-18;

/// Two posed shapes, seen through the support function of `A - B`.
struct MinkowskiDiff<'a> {
    pose_a: &'a Pose,
    shape_a: &'a Shape,
    pose_b: &'a Pose,
    shape_b: &'a Shape,
}

impl<'a> MinkowskiDiff<'a> {
    fn support_a(&self, dir: Vec3) -> Vec3 {
        self.shape_a
            .support_world(self.pose_a, dir)
            .expect(UNBOUNDED_ERR)
    }

    fn support_b(&self, dir: Vec3) -> Vec3 {
        self.shape_b
            .support_world(self.pose_b, dir)
            .expect(UNBOUNDED_ERR)
    }

    fn support(&self, dir: Vec3) -> Vec3 {
        self.support_a(dir) - self.support_b(-dir)
    }
}

const UNBOUNDED_ERR: &str = "support mapped collision on an unbounded shape";

/// Whether a shape can go through [`convex_convex`].
pub(super) fn is_bounded(shape: &Shape) -> bool {
    shape.support(Vec3::unit_x()).is_some()
}

/// Intersection of two bounded convex shapes, normal facing from B toward A.
///
/// Only strict overlap counts as contact. Touching or coplanar flat shapes
/// with no volume in common are reported as separate.
pub(super) fn convex_convex(
    pose_a: &Pose,
    shape_a: &Shape,
    pose_b: &Pose,
    shape_b: &Shape,
) -> Intersection {
    let diff = MinkowskiDiff {
        pose_a,
        shape_a,
        pose_b,
        shape_b,
    };
    let Some(tetra) = enclose_origin(&diff) else {
        return Intersection::separate();
    };
    let (pen_dir, depth) = expand_polytope(&diff, tetra);
    if depth <= 0.0 {
        return Intersection::separate();
    }

    // `pen_dir` is the direction A has to be pushed *against* to get out of B
    let surface_a = diff.support_a(*pen_dir);
    let surface_b = diff.support_b(-*pen_dir);
    Intersection {
        contact: true,
        point: (surface_a + surface_b) * 0.5,
        normal: -pen_dir,
        depth,
    }
}

//
// GJK
//

/// Points ordered from oldest to newest, the newest one being "A"
/// in the usual naming of the simplex cases.
type Simplex = Vec<Vec3>;

fn enclose_origin(diff: &MinkowskiDiff) -> Option<[Vec3; 4]> {
    let initial = diff.pose_a.translation - diff.pose_b.translation;
    let initial = if initial.mag_sq() < m::DEGENERATE_EPSILON {
        Vec3::unit_x()
    } else {
        initial
    };
    let first = diff.support(initial);
    let mut simplex: Simplex = Vec::with_capacity(4);
    simplex.push(first);
    let mut dir = -first;

    for _ in 0..GJK_MAX_ITERS {
        if dir.mag_sq() < m::DEGENERATE_EPSILON {
            // origin on the boundary of the simplex, which is as close as touching gets
            return None;
        }
        let next = diff.support(dir);
        if next.dot(dir) <= 0.0 {
            return None;
        }
        if simplex
            .iter()
            .any(|p| (*p - next).mag_sq() < DUPLICATE_EPSILON)
        {
            // no progress, the difference is flat or we're exactly touching
            return None;
        }
        simplex.push(next);
        if update_simplex(&mut simplex, &mut dir) {
            return Some([simplex[0], simplex[1], simplex[2], simplex[3]]);
        }
    }
    None
}

/// Reduce the simplex to the feature closest to the origin and point `dir` at the origin.
/// Returns true if the simplex is a tetrahedron containing the origin.
fn update_simplex(simplex: &mut Simplex, dir: &mut Vec3) -> bool {
    match simplex.len() {
        2 => {
            line_case(simplex, dir);
            false
        }
        3 => {
            triangle_case(simplex, dir);
            false
        }
        4 => tetrahedron_case(simplex, dir),
        _ => false,
    }
}

fn line_case(simplex: &mut Simplex, dir: &mut Vec3) {
    let a = simplex[1];
    let b = simplex[0];
    let ab = b - a;
    let ao = -a;
    if ab.dot(ao) > 0.0 {
        let toward = ab.cross(ao).cross(ab);
        *dir = if toward.mag_sq() < m::DEGENERATE_EPSILON {
            // origin on the segment
            *m::any_orthogonal(ab)
        } else {
            toward
        };
    } else {
        *simplex = vec![a];
        *dir = ao;
    }
}

fn triangle_case(simplex: &mut Simplex, dir: &mut Vec3) {
    let a = simplex[2];
    let b = simplex[1];
    let c = simplex[0];
    let ab = b - a;
    let ac = c - a;
    let ao = -a;
    let abc = ab.cross(ac);

    if abc.mag_sq() < m::DEGENERATE_EPSILON {
        // collinear, forget the oldest point
        *simplex = vec![b, a];
        line_case(simplex, dir);
        return;
    }

    if abc.cross(ac).dot(ao) > 0.0 {
        if ac.dot(ao) > 0.0 {
            *simplex = vec![c, a];
            *dir = ac.cross(ao).cross(ac);
        } else {
            edge_ab_or_vertex(simplex, dir, a, b);
        }
    } else if ab.cross(abc).dot(ao) > 0.0 {
        edge_ab_or_vertex(simplex, dir, a, b);
    } else if abc.dot(ao) > 0.0 {
        *dir = abc;
    } else {
        *simplex = vec![b, c, a];
        *dir = -abc;
    }
}

fn edge_ab_or_vertex(simplex: &mut Simplex, dir: &mut Vec3, a: Vec3, b: Vec3) {
    let ab = b - a;
    let ao = -a;
    if ab.dot(ao) > 0.0 {
        *simplex = vec![b, a];
        *dir = ab.cross(ao).cross(ab);
    } else {
        *simplex = vec![a];
        *dir = ao;
    }
}

fn tetrahedron_case(simplex: &mut Simplex, dir: &mut Vec3) -> bool {
    let a = simplex[3];
    let b = simplex[2];
    let c = simplex[1];
    let d = simplex[0];
    let ao = -a;

    if (b - a).cross(c - a).dot(d - a).abs() < m::DEGENERATE_EPSILON {
        // flat tetrahedron, drop the oldest point and look again
        *simplex = vec![c, b, a];
        triangle_case(simplex, dir);
        return false;
    }

    // each face containing A, with the vertex opposite to it
    for (p, q, opposite) in [(b, c, d), (c, d, b), (d, b, c)] {
        let normal = outward_normal(a, p, q, opposite);
        if normal.dot(ao) > 0.0 {
            *simplex = vec![q, p, a];
            triangle_case(simplex, dir);
            return false;
        }
    }
    true
}

/// Normal of the triangle `abc` facing away from `opposite`. Not normalized.
fn outward_normal(a: Vec3, b: Vec3, c: Vec3, opposite: Vec3) -> Vec3 {
    let n = (b - a).cross(c - a);
    if n.dot(opposite - a) > 0.0 {
        -n
    } else {
        n
    }
}

//
// EPA
//

/// Triangle of the polytope, wound so that its normal faces outward.
type Face = [usize; 3];

fn face_plane(points: &[Vec3], face: &Face) -> Option<(Unit<Vec3>, f64)> {
    let [a, b, c] = face.map(|i| points[i]);
    let normal = Unit::try_new((b - a).cross(c - a))?;
    Some((normal, normal.dot(a)))
}

fn expand_polytope(diff: &MinkowskiDiff, tetra: [Vec3; 4]) -> (Unit<Vec3>, f64) {
    let mut points = tetra.to_vec();
    let centroid = (tetra[0] + tetra[1] + tetra[2] + tetra[3]) * 0.25;
    let mut faces: Vec<Face> = [[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]]
        .into_iter()
        .map(|[i, j, k]| {
            let n = (points[j] - points[i]).cross(points[k] - points[i]);
            if n.dot(points[i] - centroid) < 0.0 {
                [i, k, j]
            } else {
                [i, j, k]
            }
        })
        .collect();

    let mut best = (Unit::unit_x(), 0.0);
    for _ in 0..EPA_MAX_ITERS {
        let Some((normal, dist)) = faces
            .iter()
            .filter_map(|f| face_plane(&points, f))
            .min_by(|(_, d1), (_, d2)| d1.total_cmp(d2))
        else {
            break;
        };
        best = (normal, dist);

        let new_point = diff.support(*normal);
        if new_point.dot(*normal) - dist < EPA_TOLERANCE {
            break;
        }

        // remove every face the new point can see and stitch the hole shut
        let mut horizon: Vec<[usize; 2]> = Vec::new();
        faces.retain(|face| {
            let visible = match face_plane(&points, face) {
                Some((n, d)) => n.dot(new_point) - d > 0.0,
                None => false,
            };
            if visible {
                for edge in [[face[0], face[1]], [face[1], face[2]], [face[2], face[0]]] {
                    let reversed = [edge[1], edge[0]];
                    if let Some(shared) = horizon.iter().position(|e| *e == reversed) {
                        horizon.swap_remove(shared);
                    } else {
                        horizon.push(edge);
                    }
                }
            }
            !visible
        });
        if horizon.is_empty() {
            break;
        }

        let new_idx = points.len();
        points.push(new_point);
        faces.extend(horizon.into_iter().map(|[i, j]| [i, j, new_idx]));
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{approx_eq, Rotor3};

    fn at(x: f64, y: f64, z: f64) -> Pose {
        Pose::new(Vec3::new(x, y, z), Rotor3::identity())
    }

    #[test]
    fn agrees_with_exact_spheres() {
        let s = Shape::new_sphere(1.0);
        let isect = convex_convex(&at(-0.9, 0.0, 0.0), &s, &at(0.9, 0.0, 0.0), &s);
        assert!(isect.contact);
        assert!(approx_eq(isect.depth, 0.2, 1e-2));
        assert!(isect.normal.x < -0.95);
        // symmetric setup, so the midpoint lands on the origin whatever the normal
        assert!(isect.point.x.abs() < 1e-9);

        let apart = convex_convex(&at(-1.5, 0.0, 0.0), &s, &at(1.5, 0.0, 0.0), &s);
        assert!(!apart.contact);
    }

    #[test]
    fn tetrahedron_keeps_origin() {
        let mut simplex = vec![
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(-1.0, 1.0, -1.0),
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
        ];
        let mut dir = Vec3::zero();
        assert!(update_simplex(&mut simplex, &mut dir));
        assert_eq!(simplex.len(), 4);

        // shift everything so the origin is outside
        let mut shifted: Simplex = simplex.iter().map(|p| *p + Vec3::new(5.0, 0.0, 0.0)).collect();
        assert!(!update_simplex(&mut shifted, &mut dir));
        assert!(shifted.len() < 4);
        let newest = *shifted.last().expect("simplex never empties");
        assert!(dir.dot(-newest) > 0.0);
    }

    #[test]
    fn unbounded_shapes_are_detected() {
        assert!(is_bounded(&Shape::new_sphere(1.0)));
        assert!(!is_bounded(&Shape::new_plane(Unit::unit_y())));
        assert!(!is_bounded(&Shape::new_distorted(
            Shape::new_plane(Unit::unit_y()),
            m::diagonal(Vec3::new(2.0, 1.0, 1.0)),
        )));
    }
}

//! Geometric shapes attached to entities, and the queries the broad phase,
//! narrow phase and raycasts need from them.
//!
//! All shapes are defined in the local space of their entity,
//! with the origin at the entity's center of mass.

use super::collision::Ray;
use crate::math::{self as m, Mat3, Pose, Unit, Vec3};

use rand::Rng;

/// Default thickness of the tolerance shell around every shape.
pub const DEFAULT_SHELL: f64 = 0.01;

/// The physical shape of an entity.
#[derive(Clone, Debug)]
pub struct Shape {
    kind: ShapeKind,
    shell: f64,
}

/// The closed set of shape variants the engine knows how to handle.
#[derive(Clone, Debug)]
pub enum ShapeKind {
    Sphere {
        r: f64,
    },
    Triangle {
        verts: [Vec3; 3],
    },
    /// Infinite half-space through the local origin, solid behind the normal.
    /// Only makes sense on static entities.
    Plane {
        normal: Unit<Vec3>,
    },
    /// Another shape displaced by a local pose.
    Proxy {
        shape: Box<Shape>,
        offset: Pose,
    },
    /// Another shape under a linear map, for stretched and sheared shapes.
    Distorted {
        shape: Box<Shape>,
        map: Mat3,
    },
}

/// Which side of a plane a shape is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaneSide {
    Front,
    Behind,
    Intersects,
}

/// The first point where a ray enters a shape.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Distance along the ray.
    pub t: f64,
    pub point: Vec3,
    /// Surface normal at the hit point, facing against the ray where that makes sense.
    pub normal: Unit<Vec3>,
}

impl Shape {
    pub fn new(kind: ShapeKind) -> Self {
        Shape {
            kind,
            shell: DEFAULT_SHELL,
        }
    }

    pub fn new_sphere(radius: f64) -> Self {
        Self::new(ShapeKind::Sphere { r: radius })
    }

    pub fn new_triangle(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self::new(ShapeKind::Triangle { verts: [a, b, c] })
    }

    pub fn new_plane(normal: Unit<Vec3>) -> Self {
        Self::new(ShapeKind::Plane { normal })
    }

    pub fn new_proxy(shape: Shape, offset: Pose) -> Self {
        Self::new(ShapeKind::Proxy {
            shape: Box::new(shape),
            offset,
        })
    }

    pub fn new_distorted(shape: Shape, map: Mat3) -> Self {
        Self::new(ShapeKind::Distorted {
            shape: Box::new(shape),
            map,
        })
    }

    /// Replace the default tolerance shell thickness in a builder-like chain.
    pub fn with_shell(mut self, shell: f64) -> Self {
        self.shell = shell.max(0.0);
        self
    }

    #[inline]
    pub fn kind(&self) -> &ShapeKind {
        &self.kind
    }

    #[inline]
    pub fn shell(&self) -> f64 {
        self.shell
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self.kind {
            ShapeKind::Sphere { .. } => "sphere",
            ShapeKind::Triangle { .. } => "triangle",
            ShapeKind::Plane { .. } => "plane",
            ShapeKind::Proxy { .. } => "proxy",
            ShapeKind::Distorted { .. } => "distorted",
        }
    }

    pub fn vertex_count(&self) -> usize {
        match &self.kind {
            ShapeKind::Sphere { .. } | ShapeKind::Plane { .. } => 0,
            ShapeKind::Triangle { .. } => 3,
            ShapeKind::Proxy { shape, .. } | ShapeKind::Distorted { shape, .. } => {
                shape.vertex_count()
            }
        }
    }

    /// Get a vertex in local space. Panics if `idx >= self.vertex_count()`.
    pub fn vertex(&self, idx: usize) -> Vec3 {
        match &self.kind {
            ShapeKind::Triangle { verts } => verts[idx],
            ShapeKind::Proxy { shape, offset } => offset.transform_vec(shape.vertex(idx)),
            ShapeKind::Distorted { shape, map } => *map * shape.vertex(idx),
            ShapeKind::Sphere { .. } | ShapeKind::Plane { .. } => {
                panic!("{} has no vertices", self.kind_name())
            }
        }
    }

    pub fn volume(&self) -> f64 {
        match &self.kind {
            ShapeKind::Sphere { r } => 4.0 / 3.0 * std::f64::consts::PI * r * r * r,
            ShapeKind::Triangle { .. } => 0.0,
            ShapeKind::Plane { .. } => f64::INFINITY,
            ShapeKind::Proxy { shape, .. } => shape.volume(),
            ShapeKind::Distorted { shape, map } => shape.volume() * map.determinant().abs(),
        }
    }

    /// Inertia tensor for a body of unit mass with this shape,
    /// about the local origin.
    pub fn unit_inertia(&self) -> Mat3 {
        // from https://en.wikipedia.org/wiki/List_of_moments_of_inertia
        // and the covariance form I = tr(C) * Id - C for everything composite
        match &self.kind {
            ShapeKind::Sphere { r } => m::diagonal(Vec3::broadcast(0.4 * r * r)),
            ShapeKind::Triangle { verts: [a, b, c] } => {
                // second moment of a uniform triangle lamina
                let s = *a + *b + *c;
                let cov = m::scaled_mat(
                    m::outer(*a, *a) + m::outer(*b, *b) + m::outer(*c, *c) + m::outer(s, s),
                    1.0 / 12.0,
                );
                inertia_from_covariance(cov)
            }
            ShapeKind::Plane { .. } => Mat3::identity(),
            ShapeKind::Proxy { shape, offset } => {
                let rotated = m::rotate_tensor(shape.unit_inertia(), offset.rotation);
                // parallel axis theorem
                let d = offset.translation;
                m::sub_mat(rotated + m::diagonal(Vec3::broadcast(d.mag_sq())), m::outer(d, d))
            }
            ShapeKind::Distorted { shape, map } => {
                let cov = covariance_from_inertia(shape.unit_inertia());
                inertia_from_covariance(*map * cov * map.transposed())
            }
        }
    }

    /// The point of the shape farthest along `dir`, in local space.
    /// `None` for unbounded shapes.
    pub fn support(&self, dir: Vec3) -> Option<Vec3> {
        match &self.kind {
            ShapeKind::Sphere { r } => Some(match Unit::try_new(dir) {
                Some(d) => *d * *r,
                None => Vec3::zero(),
            }),
            ShapeKind::Triangle { verts } => verts
                .iter()
                .copied()
                .max_by(|a, b| a.dot(dir).total_cmp(&b.dot(dir))),
            ShapeKind::Plane { .. } => None,
            ShapeKind::Proxy { shape, offset } => {
                let local_dir = offset.rotation.reversed() * dir;
                shape.support(local_dir).map(|p| offset.transform_vec(p))
            }
            ShapeKind::Distorted { shape, map } => {
                shape.support(map.transposed() * dir).map(|p| *map * p)
            }
        }
    }

    /// The support point along a world space direction for a shape at `pose`.
    pub fn support_world(&self, pose: &Pose, dir: Vec3) -> Option<Vec3> {
        let local_dir = pose.rotation.reversed() * dir;
        self.support(local_dir).map(|p| pose.transform_vec(p))
    }

    /// Cheaply find out which side of a world space plane this shape lies on,
    /// with the shell thickness as slack in favor of `Intersects`.
    pub fn fast_plane_classify(&self, pose: &Pose, normal: Vec3, anchor: Vec3) -> PlaneSide {
        let normal = match Unit::try_new(normal) {
            Some(n) => *n,
            None => {
                log::warn!("plane classification with a degenerate normal");
                return PlaneSide::Intersects;
            }
        };
        let (Some(far), Some(near)) = (
            self.support_world(pose, normal),
            self.support_world(pose, -normal),
        ) else {
            return PlaneSide::Intersects;
        };
        let max_dist = (far - anchor).dot(normal);
        let min_dist = (near - anchor).dot(normal);
        if min_dist - self.shell > 0.0 {
            PlaneSide::Front
        } else if max_dist + self.shell < 0.0 {
            PlaneSide::Behind
        } else {
            PlaneSide::Intersects
        }
    }

    /// Check whether a world space point is inside the shape (shell included).
    pub fn contains_point(&self, pose: &Pose, point: Vec3) -> bool {
        let local = pose.rotation.reversed() * (point - pose.translation);
        self.contains_local(local)
    }

    fn contains_local(&self, p: Vec3) -> bool {
        match &self.kind {
            ShapeKind::Sphere { r } => p.mag_sq() <= (r + self.shell) * (r + self.shell),
            ShapeKind::Triangle { verts: [a, b, c] } => {
                (closest_point_on_triangle(p, *a, *b, *c) - p).mag_sq() <= self.shell * self.shell
            }
            ShapeKind::Plane { normal } => p.dot(**normal) <= self.shell,
            ShapeKind::Proxy { shape, offset } => {
                let inner = offset.rotation.reversed() * (p - offset.translation);
                shape.contains_local(inner)
            }
            ShapeKind::Distorted { shape, map } => {
                if map.determinant().abs() < m::DEGENERATE_EPSILON {
                    return false;
                }
                shape.contains_local(map.inversed() * p)
            }
        }
    }

    /// Cast a world space ray against the shape at `pose`.
    pub fn intersect_ray(&self, pose: &Pose, ray: &Ray) -> Option<RayHit> {
        let inv_rot = pose.rotation.reversed();
        let start = inv_rot * (ray.start - pose.translation);
        let dir = inv_rot * *ray.dir;
        let (t, point, normal) = self.ray_local(start, dir)?;
        Some(RayHit {
            t,
            point: pose.transform_vec(point),
            normal: pose.rotation * normal,
        })
    }

    /// Ray test in local space. `dir` need not be normalized,
    /// `t` is always in units of `dir`.
    fn ray_local(&self, start: Vec3, dir: Vec3) -> Option<(f64, Vec3, Unit<Vec3>)> {
        match &self.kind {
            ShapeKind::Sphere { r } => {
                let a = dir.mag_sq();
                if a < m::DEGENERATE_EPSILON {
                    return None;
                }
                let b = start.dot(dir);
                let c = start.mag_sq() - r * r;
                let disc = b * b - a * c;
                if disc < 0.0 {
                    return None;
                }
                let sqrt_disc = disc.sqrt();
                let t_enter = (-b - sqrt_disc) / a;
                let t_exit = (-b + sqrt_disc) / a;
                let t = if t_enter >= 0.0 {
                    t_enter
                } else if t_exit >= 0.0 {
                    // started inside
                    0.0
                } else {
                    return None;
                };
                let point = start + dir * t;
                let normal = Unit::try_new(point).unwrap_or_else(|| -Unit::new_normalize(dir));
                Some((t, point, normal))
            }
            ShapeKind::Triangle { verts: [a, b, c] } => {
                // Möller-Trumbore
                let e1 = *b - *a;
                let e2 = *c - *a;
                let p = dir.cross(e2);
                let det = e1.dot(p);
                if det.abs() < m::DEGENERATE_EPSILON {
                    return None;
                }
                let inv_det = 1.0 / det;
                let s = start - *a;
                let u = s.dot(p) * inv_det;
                if !(0.0..=1.0).contains(&u) {
                    return None;
                }
                let q = s.cross(e1);
                let v = dir.dot(q) * inv_det;
                if v < 0.0 || u + v > 1.0 {
                    return None;
                }
                let t = e2.dot(q) * inv_det;
                if t < 0.0 {
                    return None;
                }
                let face = Unit::try_new(e1.cross(e2))?;
                let normal = if face.dot(dir) > 0.0 { -face } else { face };
                Some((t, start + dir * t, normal))
            }
            ShapeKind::Plane { normal } => {
                let denom = normal.dot(dir);
                if denom.abs() < m::DEGENERATE_EPSILON {
                    return None;
                }
                let t = -normal.dot(start) / denom;
                if t < 0.0 {
                    return None;
                }
                Some((t, start + dir * t, *normal))
            }
            ShapeKind::Proxy { shape, offset } => {
                let inv_rot = offset.rotation.reversed();
                let inner_start = inv_rot * (start - offset.translation);
                let inner_dir = inv_rot * dir;
                let (t, p, n) = shape.ray_local(inner_start, inner_dir)?;
                Some((t, offset.transform_vec(p), offset.rotation * n))
            }
            ShapeKind::Distorted { shape, map } => {
                if map.determinant().abs() < m::DEGENERATE_EPSILON {
                    return None;
                }
                let inv = map.inversed();
                // t is preserved by the linear map since dir isn't renormalized
                let (t, p, n) = shape.ray_local(inv * start, inv * dir)?;
                let normal = Unit::try_new(inv.transposed() * *n)?;
                Some((t, *map * p, normal))
            }
        }
    }

    /// A uniformly distributed random point in local space:
    /// in the interior for solids, on the surface for flat shapes
    /// (within a unit square around the origin for planes).
    pub fn random_point(&self, rng: &mut impl Rng) -> Vec3 {
        match &self.kind {
            ShapeKind::Sphere { r } => loop {
                let p = Vec3::new(
                    rng.gen_range(-1.0..=1.0),
                    rng.gen_range(-1.0..=1.0),
                    rng.gen_range(-1.0..=1.0),
                );
                if p.mag_sq() <= 1.0 {
                    break p * *r;
                }
            },
            ShapeKind::Triangle { verts: [a, b, c] } => {
                let r1: f64 = rng.gen_range(0.0..=1.0);
                let r2: f64 = rng.gen_range(0.0..=1.0);
                let sqrt_r1 = r1.sqrt();
                *a * (1.0 - sqrt_r1) + *b * (sqrt_r1 * (1.0 - r2)) + *c * (sqrt_r1 * r2)
            }
            ShapeKind::Plane { normal } => {
                let u = m::any_orthogonal(**normal);
                let v = normal.cross(*u);
                let (s, t): (f64, f64) = (rng.gen_range(-1.0..=1.0), rng.gen_range(-1.0..=1.0));
                *u * s + v * t
            }
            ShapeKind::Proxy { shape, offset } => offset.transform_vec(shape.random_point(rng)),
            ShapeKind::Distorted { shape, map } => *map * shape.random_point(rng),
        }
    }
}

fn inertia_from_covariance(cov: Mat3) -> Mat3 {
    let trace = cov.cols[0].x + cov.cols[1].y + cov.cols[2].z;
    m::sub_mat(m::diagonal(Vec3::broadcast(trace)), cov)
}

fn covariance_from_inertia(inertia: Mat3) -> Mat3 {
    let trace = inertia.cols[0].x + inertia.cols[1].y + inertia.cols[2].z;
    m::sub_mat(m::diagonal(Vec3::broadcast(trace * 0.5)), inertia)
}

/// Closest point to `p` on the triangle `abc`.
/// From Ericson, Real-Time Collision Detection, section 5.1.5.
pub(crate) fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

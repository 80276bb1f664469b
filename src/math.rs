//! Types, aliases and helper operations for doing math with `ultraviolet`.
pub use ultraviolet as uv;

/// A Pose has a rotation and a translation, no scaling.
///
/// This is the transformation type used for every body in the world
/// because the physics engine does not support scaling transforms.
/// Scaling and shearing of shapes goes through
/// [`ShapeKind::Distorted`][crate::ShapeKind::Distorted] instead.
pub type Pose = uv::DIsometry3;
pub type Vec3 = uv::DVec3;
pub type Mat3 = uv::DMat3;
/// Rotors play the role of orientation quaternions.
pub type Rotor3 = uv::DRotor3;
pub type Bivec3 = uv::DBivec3;

/// Squared lengths below this are treated as zero-length directions.
pub const DEGENERATE_EPSILON: f64 = 1e-12;

/// A wrapper type to indicate a vector should always be normalized.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Unit<T>(T);

impl Unit<Vec3> {
    pub fn new_normalize(v: Vec3) -> Self {
        Unit(v.normalized())
    }

    /// Normalize a vector, returning `None` if it's too short to have a direction.
    pub fn try_new(v: Vec3) -> Option<Self> {
        let mag_sq = v.mag_sq();
        if mag_sq < DEGENERATE_EPSILON || !mag_sq.is_finite() {
            None
        } else {
            Some(Unit(v / mag_sq.sqrt()))
        }
    }

    pub const fn new_unchecked(v: Vec3) -> Self {
        Unit(v)
    }

    pub fn unit_x() -> Self {
        Unit(Vec3::unit_x())
    }

    pub fn unit_y() -> Self {
        Unit(Vec3::unit_y())
    }

    pub fn unit_z() -> Self {
        Unit(Vec3::unit_z())
    }

    #[inline]
    pub fn into_inner(self) -> Vec3 {
        self.0
    }
}

impl std::ops::Mul<Unit<Vec3>> for Rotor3 {
    type Output = Unit<Vec3>;

    fn mul(self, rhs: Unit<Vec3>) -> Self::Output {
        Unit(self * rhs.0)
    }
}

impl<T> std::ops::Deref for Unit<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> std::ops::Neg for Unit<T>
where
    T: std::ops::Neg,
{
    type Output = Unit<<T as std::ops::Neg>::Output>;

    fn neg(self) -> Self::Output {
        Unit(-self.0)
    }
}

// Vec3 utils

/// Some unit vector orthogonal to `v`. Which one is unspecified,
/// but it's stable for a given input.
pub fn any_orthogonal(v: Vec3) -> Unit<Vec3> {
    // cross with whichever axis is least aligned with v
    let abs = Vec3::new(v.x.abs(), v.y.abs(), v.z.abs());
    let axis = if abs.x <= abs.y && abs.x <= abs.z {
        Vec3::unit_x()
    } else if abs.y <= abs.z {
        Vec3::unit_y()
    } else {
        Vec3::unit_z()
    };
    Unit::try_new(v.cross(axis)).unwrap_or_else(Unit::unit_x)
}

/// Outer product `a * b^T`, used to build inertia tensors.
#[inline]
pub fn outer(a: Vec3, b: Vec3) -> Mat3 {
    Mat3::new(a * b.x, a * b.y, a * b.z)
}

#[inline]
pub fn scaled_mat(m: Mat3, s: f64) -> Mat3 {
    Mat3::new(m.cols[0] * s, m.cols[1] * s, m.cols[2] * s)
}

/// `a - b`, column by column.
#[inline]
pub fn sub_mat(a: Mat3, b: Mat3) -> Mat3 {
    Mat3::new(
        a.cols[0] - b.cols[0],
        a.cols[1] - b.cols[1],
        a.cols[2] - b.cols[2],
    )
}

#[inline]
pub fn diagonal(d: Vec3) -> Mat3 {
    Mat3::new(
        Vec3::new(d.x, 0.0, 0.0),
        Vec3::new(0.0, d.y, 0.0),
        Vec3::new(0.0, 0.0, d.z),
    )
}

/// Express a tensor given in a body's local space in world space.
#[inline]
pub fn rotate_tensor(tensor: Mat3, rotation: Rotor3) -> Mat3 {
    let r = rotation.into_matrix();
    r * tensor * r.transposed()
}

#[inline]
pub fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
    (a - b).abs() <= eps
}

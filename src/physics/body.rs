use super::{integrator::Integrator, PhysicsError, Shape, Velocity};
use crate::math::{self as m, Mat3, Pose, Rotor3, Vec3};

/// Identifier of an entity, assigned once in increasing order and never reused.
///
/// Unlike [`EntityKey`][super::EntityKey], which is a handle into storage,
/// this is what orders the two sides of a contact pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub(crate) u64);

impl EntityId {
    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether an entity moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum BodyKind {
    /// Responds to impulses and moves according to its velocity.
    Dynamic,
    /// Never moves. Velocity stays zero and orientation stays fixed.
    Static,
}

/// Mass or moment of inertia of a body, which can be infinite.
///
/// This stores both a mass value and its inverse, because calculating inverse mass
/// is expensive and needed a lot in physics calculations.
#[derive(Clone, Copy, Debug)]
pub enum Mass {
    Finite { mass: f64, inverse: f64 },
    Infinite,
}

impl From<f64> for Mass {
    #[inline]
    fn from(mass: f64) -> Self {
        Mass::Finite {
            mass,
            inverse: 1.0 / mass,
        }
    }
}

impl Mass {
    /// Get the inverse of the mass, which is zero if the mass is infinite.
    #[inline]
    pub fn inv(&self) -> f64 {
        match self {
            Mass::Finite { inverse, .. } => *inverse,
            Mass::Infinite => 0.0,
        }
    }

    /// Get the mass value, if finite.
    #[inline]
    pub fn value(&self) -> Option<f64> {
        match self {
            Mass::Finite { mass, .. } => Some(*mass),
            Mass::Infinite => None,
        }
    }
}

/// Surface and medium properties of an entity.
///
/// The contact solver uses a single restitution coefficient for every pair
/// (see [`ContactParams`][super::ContactParams]); these values are here
/// for interactions and user code that want per-entity behavior.
/// `resistance` acts as linear drag during integration.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Material {
    pub restitution: f64,
    pub friction: f64,
    pub resistance: f64,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            restitution: 0.5,
            friction: 0.5,
            resistance: 0.0,
        }
    }
}

/// Impulse received since the last integration.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Impulse {
    pub linear: Vec3,
    /// Angular impulse (torque integrated over time) about the center of mass.
    pub angular: Vec3,
}

/// A rigid or static body living in a [`PhysicsWorld`][super::PhysicsWorld].
///
/// Entities are created through an [`EntityBuilder`] passed to
/// [`PhysicsWorld::add`][super::PhysicsWorld::add].
#[derive(Clone, Debug)]
pub struct Entity {
    id: EntityId,
    kind: BodyKind,
    shape: Shape,
    pose: Pose,
    velocity: Velocity,
    mass: Mass,
    inv_inertia_local: Mat3,
    material: Material,
    pending: Impulse,
    user_data: u64,
    // pose the entity had when it was last placed in the spatial index
    pub(crate) placed_pose: Pose,
}

impl Entity {
    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> BodyKind {
        self.kind
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.kind == BodyKind::Static
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[inline]
    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        self.pose.translation
    }

    #[inline]
    pub fn orientation(&self) -> Rotor3 {
        self.pose.rotation
    }

    #[inline]
    pub fn velocity(&self) -> Vec3 {
        self.velocity.linear
    }

    #[inline]
    pub fn angular_velocity(&self) -> Vec3 {
        self.velocity.angular
    }

    /// Linear velocity of a world space point attached to the body.
    #[inline]
    pub fn point_velocity(&self, point: Vec3) -> Vec3 {
        self.velocity.point_velocity(point - self.center())
    }

    #[inline]
    pub fn mass(&self) -> Mass {
        self.mass
    }

    #[inline]
    pub fn inverse_mass(&self) -> f64 {
        self.mass.inv()
    }

    /// Inverse inertia tensor in world space. Zero for static entities.
    pub fn inverse_inertia_world(&self) -> Mat3 {
        m::rotate_tensor(self.inv_inertia_local, self.pose.rotation)
    }

    #[inline]
    pub fn material(&self) -> &Material {
        &self.material
    }

    /// Opaque value set with [`EntityBuilder::with_user_data`]. Never read by the engine.
    #[inline]
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    #[inline]
    pub fn set_user_data(&mut self, data: u64) {
        self.user_data = data;
    }

    /// Impulse received since the last integration step.
    #[inline]
    pub fn pending_impulse(&self) -> Impulse {
        self.pending
    }

    /// Move the entity. It gets re-placed in the spatial index on the next step.
    /// No effect on static entities.
    pub fn set_position(&mut self, position: Vec3) {
        if !self.is_static() {
            self.pose.translation = position;
        }
    }

    /// No effect on static entities.
    pub fn set_velocity(&mut self, velocity: Vec3) {
        if !self.is_static() {
            self.velocity.linear = velocity;
        }
    }

    /// No effect on static entities.
    pub fn set_angular_velocity(&mut self, angular: Vec3) {
        if !self.is_static() {
            self.velocity.angular = angular;
        }
    }

    /// Apply a linear impulse through the center of mass.
    ///
    /// The velocity changes immediately; the impulse is also recorded
    /// until the next integration step.
    pub fn add_impulse(&mut self, impulse: Vec3) {
        if self.is_static() {
            return;
        }
        self.velocity.linear += impulse * self.mass.inv();
        self.pending.linear += impulse;
    }

    /// Apply an impulse at a world space point, affecting both linear and angular velocity.
    pub fn add_impulse_at(&mut self, impulse: Vec3, point: Vec3) {
        if self.is_static() {
            return;
        }
        let angular = (point - self.center()).cross(impulse);
        self.velocity.linear += impulse * self.mass.inv();
        self.velocity.angular += self.inverse_inertia_world() * angular;
        self.pending.linear += impulse;
        self.pending.angular += angular;
    }

    /// Move the entity forward in time by `dt` and clear the pending impulse.
    pub fn advance(&mut self, integrator: &dyn Integrator, dt: f64) {
        self.pending = Impulse::default();
        if self.is_static() {
            return;
        }
        if self.material.resistance > 0.0 {
            let keep = (1.0 - self.material.resistance * dt).max(0.0);
            self.velocity.linear *= keep;
        }
        self.pose.translation =
            integrator.integrate_position(self.pose.translation, self.velocity.linear, dt);
        self.pose.rotation =
            integrator.integrate_rotation(self.pose.rotation, self.velocity.angular, dt);
    }

    /// Whether the pose has changed since the entity was last placed in the spatial index.
    #[inline]
    pub(crate) fn has_moved(&self) -> bool {
        self.pose.translation != self.placed_pose.translation
            || self.pose.rotation != self.placed_pose.rotation
    }

    #[inline]
    pub(crate) fn mark_placed(&mut self) {
        self.placed_pose = self.pose;
    }
}

#[inline]
fn zero_mat() -> Mat3 {
    Mat3::new(Vec3::zero(), Vec3::zero(), Vec3::zero())
}

#[derive(Clone, Copy, Debug)]
enum MassSource {
    Density(f64),
    Total(f64),
}

/// Builder for [`Entity`]. Nothing exists in the world until the builder is
/// handed to [`PhysicsWorld::add`][super::PhysicsWorld::add].
#[derive(Clone, Debug)]
pub struct EntityBuilder {
    kind: BodyKind,
    shape: Shape,
    position: Vec3,
    orientation: Rotor3,
    velocity: Velocity,
    mass: MassSource,
    material: Material,
    user_data: u64,
}

impl EntityBuilder {
    /// Dynamic bodies respond to impulses and are allowed to rotate.
    /// Mass is computed from the shape's volume with unit density
    /// unless set otherwise.
    pub fn new_dynamic(shape: Shape) -> Self {
        Self {
            kind: BodyKind::Dynamic,
            shape,
            position: Vec3::zero(),
            orientation: Rotor3::identity(),
            velocity: Velocity::default(),
            mass: MassSource::Density(1.0),
            material: Material::default(),
            user_data: 0,
        }
    }

    /// Static bodies never move and have infinite mass.
    pub fn new_static(shape: Shape) -> Self {
        Self {
            kind: BodyKind::Static,
            ..Self::new_dynamic(shape)
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_orientation(mut self, orientation: Rotor3) -> Self {
        self.orientation = orientation.normalized();
        self
    }

    /// Ignored for static bodies.
    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity.linear = velocity;
        self
    }

    /// Ignored for static bodies.
    pub fn with_angular_velocity(mut self, angular: Vec3) -> Self {
        self.velocity.angular = angular;
        self
    }

    pub fn with_density(mut self, density: f64) -> Self {
        self.mass = MassSource::Density(density);
        self
    }

    /// Set the total mass directly instead of computing it from density.
    /// Required for shapes with no volume, such as triangles.
    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = MassSource::Total(mass);
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_user_data(mut self, data: u64) -> Self {
        self.user_data = data;
        self
    }

    pub(crate) fn build(self, id: EntityId) -> Result<Entity, PhysicsError> {
        let pose = match self.kind {
            BodyKind::Dynamic => Pose::new(self.position, self.orientation),
            BodyKind::Static => Pose::new(self.position, Rotor3::identity()),
        };
        let (velocity, mass, inv_inertia_local) = match self.kind {
            BodyKind::Static => (Velocity::default(), Mass::Infinite, zero_mat()),
            BodyKind::Dynamic => {
                let mass = match self.mass {
                    MassSource::Density(density) => density * self.shape.volume(),
                    MassSource::Total(mass) => mass,
                };
                if !(mass.is_finite() && mass > 0.0) {
                    return Err(PhysicsError::InvalidMass(mass));
                }
                let inertia = m::scaled_mat(self.shape.unit_inertia(), mass);
                let inv_inertia = if inertia.determinant().abs() < m::DEGENERATE_EPSILON {
                    log::warn!(
                        "{} entity {} has a singular inertia tensor, it will not rotate",
                        self.shape.kind_name(),
                        id
                    );
                    zero_mat()
                } else {
                    inertia.inversed()
                };
                (self.velocity, Mass::from(mass), inv_inertia)
            }
        };

        Ok(Entity {
            id,
            kind: self.kind,
            shape: self.shape,
            pose,
            velocity,
            mass,
            inv_inertia_local,
            material: self.material,
            pending: Impulse::default(),
            user_data: self.user_data,
            placed_pose: pose,
        })
    }
}

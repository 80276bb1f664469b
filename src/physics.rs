//! Rigid body simulation.
//!
//! A [`PhysicsWorld`] owns every entity along with the [`SpatialIndex`]
//! that finds entities close to each other and the [`ContactGraph`]
//! that tracks and resolves their contacts.

use crate::math::Vec3;

//

pub mod body;
pub use body::{BodyKind, Entity, EntityBuilder, EntityId, Impulse, Mass, Material};

pub mod collision;
pub use collision::{
    BalanceStrategy, IndexRayHit, IndexStats, Intersection, QueryToken, Ray, SpatialIndex,
};

pub mod contact_graph;
pub use contact_graph::{ContactEdge, ContactGraph, ContactParams, PairKey};

pub mod entity_set;
pub use entity_set::{EntityKey, EntitySet};

pub mod integrator;
pub use integrator::{Integrator, SymplecticEuler};

pub mod interaction;
pub use interaction::{Gravity, Interaction, Spring};

pub mod shape;
pub use shape::{PlaneSide, RayHit, Shape, ShapeKind};

//

const BAD_ENTITY_ERR: &str = "Spatial index returned an entity that does not exist";

/// Velocity of an entity.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Velocity {
    /// Linear velocity in metres per second.
    pub linear: Vec3,
    /// Angular velocity as an axis scaled by radians per second.
    pub angular: Vec3,
}

impl Velocity {
    /// Get the linear velocity of a point offset from the center of mass.
    #[inline]
    pub fn point_velocity(&self, offset: Vec3) -> Vec3 {
        self.linear + self.angular.cross(offset)
    }
}

impl std::ops::Add for Velocity {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            linear: self.linear + other.linear,
            angular: self.angular + other.angular,
        }
    }
}
impl std::ops::AddAssign for Velocity {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}
impl std::ops::Mul<f64> for Velocity {
    type Output = Velocity;

    fn mul(self, rhs: f64) -> Self::Output {
        Velocity {
            linear: self.linear * rhs,
            angular: self.angular * rhs,
        }
    }
}

/// Errors from operations on a [`PhysicsWorld`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum PhysicsError {
    #[error("Time step must be finite, got {0}")]
    NonFiniteTimestep(f64),
    #[error("Time step must not be negative, got {0}")]
    NegativeTimestep(f64),
    #[error("Entity does not exist in this world")]
    UnknownEntity,
    #[error("Mass must be finite and positive, got {0}")]
    InvalidMass(f64),
    #[error("Interaction between an entity and itself")]
    SamePair,
    #[error("Interaction between two static entities")]
    StaticPair,
}

/// Tuning parameters of a [`PhysicsWorld`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(
    feature = "serde-types",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct WorldParams {
    pub balance: BalanceStrategy,
    pub contact: ContactParams,
}

/// A world of entities that move and collide.
pub struct PhysicsWorld {
    params: WorldParams,
    entities: EntitySet,
    index: SpatialIndex,
    contacts: ContactGraph,
    integrator: Box<dyn Integrator>,
    last_token: QueryToken,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(WorldParams::default())
    }
}

impl PhysicsWorld {
    pub fn new(params: WorldParams) -> Self {
        Self {
            params,
            entities: EntitySet::new(),
            index: SpatialIndex::new(),
            contacts: ContactGraph::new(params.contact),
            integrator: Box::new(SymplecticEuler),
            last_token: QueryToken::NEVER,
        }
    }

    /// Replace the default [`SymplecticEuler`] integrator.
    pub fn with_integrator(mut self, integrator: impl Integrator + 'static) -> Self {
        self.integrator = Box::new(integrator);
        self
    }

    #[inline]
    pub fn params(&self) -> &WorldParams {
        &self.params
    }

    /// Build an entity and place it in the world.
    pub fn add(&mut self, builder: EntityBuilder) -> Result<EntityKey, PhysicsError> {
        let key = self.entities.insert(builder)?;
        let entity = self.entities.get(key).expect(BAD_ENTITY_ERR);
        let indexed = self.index.add(key, entity);
        debug_assert!(indexed, "fresh entity was already indexed");
        log::debug!("added entity {}", entity.id());
        Ok(key)
    }

    /// Take an entity out of the world, along with every edge it has in the contact graph.
    pub fn remove(&mut self, key: EntityKey) -> Result<Entity, PhysicsError> {
        if !self.entities.contains(key) {
            return Err(PhysicsError::UnknownEntity);
        }
        self.index.remove(key);
        let entity = self.entities.remove(key).ok_or(PhysicsError::UnknownEntity)?;
        let dropped = self.contacts.remove_entity(entity.id());
        log::debug!("removed entity {} and {} edges", entity.id(), dropped);
        Ok(entity)
    }

    #[inline]
    pub fn get(&self, key: EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    /// Entities moved through this are re-placed in the spatial index on the next step.
    #[inline]
    pub fn get_mut(&mut self, key: EntityKey) -> Option<&mut Entity> {
        self.entities.get_mut(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub fn entities(&self) -> &EntitySet {
        &self.entities
    }

    #[inline]
    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    #[inline]
    pub fn contacts(&self) -> &ContactGraph {
        &self.contacts
    }

    /// The contact graph edge between two entities, if there is one.
    pub fn edge_between(&self, a: EntityKey, b: EntityKey) -> Option<&ContactEdge> {
        let id_a = self.entities.get(a)?.id();
        let id_b = self.entities.get(b)?.id();
        self.contacts.edge(id_a, id_b)
    }

    /// Attach an interaction between two entities.
    /// It acts on them every step until removed with [`remove_interactions`][Self::remove_interactions]
    /// or until either entity is removed.
    pub fn add_interaction(
        &mut self,
        a: EntityKey,
        b: EntityKey,
        interaction: impl Interaction + 'static,
    ) -> Result<(), PhysicsError> {
        let (entity_a, entity_b) = self.pair(a, b)?;
        if entity_a.is_static() && entity_b.is_static() {
            return Err(PhysicsError::StaticPair);
        }
        self.contacts
            .add_interaction(&self.entities, a, b, Box::new(interaction));
        Ok(())
    }

    /// Detach every interaction between two entities, returning them.
    pub fn remove_interactions(
        &mut self,
        a: EntityKey,
        b: EntityKey,
    ) -> Result<Vec<Box<dyn Interaction>>, PhysicsError> {
        let (entity_a, entity_b) = self.pair(a, b)?;
        let (id_a, id_b) = (entity_a.id(), entity_b.id());
        Ok(self.contacts.remove_interactions(id_a, id_b))
    }

    fn pair(&self, a: EntityKey, b: EntityKey) -> Result<(&Entity, &Entity), PhysicsError> {
        if a == b {
            return Err(PhysicsError::SamePair);
        }
        let entity_a = self.entities.get(a).ok_or(PhysicsError::UnknownEntity)?;
        let entity_b = self.entities.get(b).ok_or(PhysicsError::UnknownEntity)?;
        Ok((entity_a, entity_b))
    }

    /// Step the simulation forward by `dt` seconds.
    ///
    /// Nothing is changed if `dt` is negative or not finite.
    pub fn advance(&mut self, dt: f64) -> Result<(), PhysicsError> {
        if !dt.is_finite() {
            return Err(PhysicsError::NonFiniteTimestep(dt));
        }
        if dt < 0.0 {
            return Err(PhysicsError::NegativeTimestep(dt));
        }
        let _span = tracy_span!("advance physics world", "advance");

        let Self {
            params,
            entities,
            index,
            contacts,
            integrator,
            ..
        } = self;

        {
            let _span = tracy_span!("integrate", "advance");
            for (_, entity) in entities.iter_mut() {
                entity.advance(integrator.as_ref(), dt);
            }
        }

        let mut relocated = 0;
        {
            let _span = tracy_span!("update spatial index", "advance");
            for (key, entity) in entities.iter_mut() {
                if entity.has_moved() {
                    index.relocate(key, entity);
                    entity.mark_placed();
                    relocated += 1;
                }
            }
            index.rebalance(&params.balance, entities);
        }

        let mut checked = 0;
        {
            let _span = tracy_span!("check contacts", "advance");
            for [a, b] in index.candidate_pairs() {
                let entity_a = entities.get(a).expect(BAD_ENTITY_ERR);
                let entity_b = entities.get(b).expect(BAD_ENTITY_ERR);
                if entity_a.is_static() && entity_b.is_static() {
                    continue;
                }
                contacts.check_ordered(entities, a, b);
                checked += 1;
            }
        }

        contacts.solve(entities, dt);
        contacts.advance();

        log::trace!(
            "advanced {} entities by {}: {} relocated, {} pairs checked, {} contacts, {} edges",
            entities.len(),
            dt,
            relocated,
            checked,
            contacts.contact_count(),
            contacts.len()
        );
        Ok(())
    }

    /// Find the nearest entity hit by a ray.
    pub fn query_with_ray(&mut self, ray: &Ray) -> Option<IndexRayHit> {
        self.last_token = self.last_token.next();
        self.index
            .query_with_ray(ray, self.last_token, &self.entities)
    }

    /// Shape of the spatial index, for diagnostics.
    #[inline]
    pub fn measure(&self) -> IndexStats {
        self.index.measure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Unit;

    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn sphere_bounces_off_static_sphere() {
        let mut world = PhysicsWorld::default();
        let mover = world
            .add(
                EntityBuilder::new_dynamic(Shape::new_sphere(1.0))
                    .with_position(Vec3::new(-3.0, 0.0, 0.0))
                    .with_velocity(Vec3::new(0.01, 0.0, 0.0)),
            )
            .unwrap();
        let wall = world
            .add(
                EntityBuilder::new_static(Shape::new_sphere(1.0))
                    .with_position(Vec3::new(3.0, 0.0, 0.0)),
            )
            .unwrap();

        let distance = |w: &PhysicsWorld| (w.get(wall).unwrap().center() - w.get(mover).unwrap().center()).mag();
        let mut steps = 0;
        while distance(&world) >= 2.0 {
            world.advance(0.05).unwrap();
            steps += 1;
            assert!(steps < 20_000, "spheres never got close");
        }

        let edge = world.edge_between(mover, wall).unwrap();
        assert!(edge.is_contact());
        // normal faces from the wall toward the mover
        assert!(edge.intersection().normal.x < 0.0);
        let vel = world.get(mover).unwrap().velocity();
        assert!(vel.x < 0.0);
        assert!((vel.x + 0.009).abs() < 1e-9);
        assert_eq!(world.get(wall).unwrap().center(), Vec3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn sphere_bounces_off_static_ellipsoid() {
        let mut world = PhysicsWorld::default();
        let ball = world
            .add(
                EntityBuilder::new_dynamic(Shape::new_sphere(1.0))
                    .with_velocity(Vec3::new(0.5, 0.0, 0.0)),
            )
            .unwrap();
        let ellipsoid = world
            .add(
                EntityBuilder::new_static(Shape::new_distorted(
                    Shape::new_sphere(1.0),
                    crate::math::diagonal(Vec3::new(3.0, 1.0, 1.0)),
                ))
                .with_position(Vec3::new(5.0, 0.0, 0.0)),
            )
            .unwrap();

        let mut steps = 0;
        while world.get(ball).unwrap().velocity().x > 0.0 {
            world.advance(0.05).unwrap();
            steps += 1;
            assert!(steps < 1000, "ball never bounced");
        }

        let edge = world.edge_between(ball, ellipsoid).unwrap();
        assert!(edge.is_contact());
        assert!(edge.intersection().normal.x < -0.9);
        assert!(world.get(ball).unwrap().center().x < 2.0);
        assert_eq!(world.get(ellipsoid).unwrap().center(), Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn gravity_acts_at_a_distance() {
        let mut world = PhysicsWorld::default();
        let a = world
            .add(EntityBuilder::new_dynamic(Shape::new_sphere(1.0)))
            .unwrap();
        let b = world
            .add(
                EntityBuilder::new_dynamic(Shape::new_sphere(1.0))
                    .with_position(Vec3::new(10.0, 0.0, 0.0)),
            )
            .unwrap();
        world.add_interaction(a, b, Gravity::new(1.0)).unwrap();
        world.advance(0.1).unwrap();

        assert!(world.get(a).unwrap().velocity().x > 0.0);
        assert!(world.get(b).unwrap().velocity().x < 0.0);
        assert_eq!(world.contacts().contact_count(), 0);
        let edge = world.edge_between(b, a).unwrap();
        assert!(!edge.is_contact());
        assert_eq!(edge.interactions().len(), 1);
    }

    #[test]
    fn ball_bounces_on_ground() {
        let mut world = PhysicsWorld::default();
        world
            .add(EntityBuilder::new_static(Shape::new_plane(Unit::unit_y())))
            .unwrap();
        let ball = world
            .add(
                EntityBuilder::new_dynamic(Shape::new_sphere(0.5))
                    .with_position(Vec3::new(0.0, 2.0, 0.0))
                    .with_velocity(Vec3::new(0.0, -1.0, 0.0)),
            )
            .unwrap();

        for _ in 0..200 {
            world.advance(0.05).unwrap();
            if world.get(ball).unwrap().velocity().y > 0.0 {
                break;
            }
        }
        let ball = world.get(ball).unwrap();
        assert!(ball.velocity().y > 0.0);
        assert!(ball.center().y > 0.0);
    }

    #[test]
    fn bad_timesteps_change_nothing() {
        let mut world = PhysicsWorld::default();
        let key = world
            .add(EntityBuilder::new_dynamic(Shape::new_sphere(1.0)).with_velocity(Vec3::unit_x()))
            .unwrap();
        assert_eq!(
            world.advance(-0.1),
            Err(PhysicsError::NegativeTimestep(-0.1))
        );
        assert!(matches!(
            world.advance(f64::NAN),
            Err(PhysicsError::NonFiniteTimestep(_))
        ));
        assert!(matches!(
            world.advance(f64::INFINITY),
            Err(PhysicsError::NonFiniteTimestep(_))
        ));
        assert_eq!(world.get(key).unwrap().center(), Vec3::zero());

        world.advance(0.0).unwrap();
        assert_eq!(world.get(key).unwrap().center(), Vec3::zero());
    }

    #[test]
    fn removing_entities_cleans_up() {
        let mut world = PhysicsWorld::default();
        let a = world
            .add(EntityBuilder::new_dynamic(Shape::new_sphere(1.0)))
            .unwrap();
        let b = world
            .add(
                EntityBuilder::new_dynamic(Shape::new_sphere(1.0))
                    .with_position(Vec3::new(1.5, 0.0, 0.0)),
            )
            .unwrap();
        world.advance(0.01).unwrap();
        assert!(world.edge_between(a, b).is_some());

        let removed = world.remove(a).unwrap();
        assert_eq!(removed.center(), Vec3::zero());
        assert!(world.contacts().is_empty());
        assert_eq!(world.len(), 1);
        assert_eq!(world.measure().markers, 1);
        assert!(matches!(world.remove(a), Err(PhysicsError::UnknownEntity)));
        world.advance(0.01).unwrap();
    }

    #[test]
    fn interaction_arguments_are_validated() {
        let mut world = PhysicsWorld::default();
        let a = world
            .add(EntityBuilder::new_dynamic(Shape::new_sphere(1.0)))
            .unwrap();
        let s1 = world
            .add(EntityBuilder::new_static(Shape::new_sphere(1.0)))
            .unwrap();
        let s2 = world
            .add(EntityBuilder::new_static(Shape::new_sphere(1.0)))
            .unwrap();
        let gone = world
            .add(EntityBuilder::new_dynamic(Shape::new_sphere(1.0)))
            .unwrap();
        world.remove(gone).unwrap();

        assert_eq!(world.add_interaction(a, a, Gravity::new(1.0)), Err(PhysicsError::SamePair));
        assert_eq!(world.add_interaction(s1, s2, Gravity::new(1.0)), Err(PhysicsError::StaticPair));
        assert_eq!(world.add_interaction(a, gone, Gravity::new(1.0)), Err(PhysicsError::UnknownEntity));
        assert!(world.add_interaction(a, s1, Gravity::new(1.0)).is_ok());
        assert_eq!(world.remove_interactions(s1, a).unwrap().len(), 1);

        let bad_mass = EntityBuilder::new_dynamic(Shape::new_sphere(1.0)).with_mass(f64::NAN);
        assert!(matches!(world.add(bad_mass), Err(PhysicsError::InvalidMass(_))));
    }

    #[test]
    fn ray_queries_find_the_nearest() {
        let mut world = PhysicsWorld::default();
        let keys: Vec<EntityKey> = (1..=5)
            .map(|i| {
                world
                    .add(
                        EntityBuilder::new_static(Shape::new_sphere(0.5))
                            .with_position(Vec3::new(0.0, 0.0, -3.0 * i as f64)),
                    )
                    .unwrap()
            })
            .collect();
        let ray = Ray::new(Vec3::new(0.0, 0.0, 1.0), -Vec3::unit_z()).unwrap();
        let hit = world.query_with_ray(&ray).unwrap();
        assert_eq!(hit.entity, keys[0]);
        assert!((hit.hit.t - 3.5).abs() < 1e-9);
        assert_eq!(world.query_with_ray(&ray), Some(hit));

        world.remove(keys[0]).unwrap();
        let hit = world.query_with_ray(&ray).unwrap();
        assert_eq!(hit.entity, keys[1]);
        assert!(world.index().last_query_tests() <= world.len());
    }

    #[test]
    fn crowd_stays_indexed() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut world = PhysicsWorld::new(WorldParams {
            balance: BalanceStrategy {
                seed: 42,
                ..Default::default()
            },
            ..Default::default()
        });
        for _ in 0..80 {
            let pos = Vec3::new(
                rng.gen_range(-15.0..15.0),
                rng.gen_range(-15.0..15.0),
                rng.gen_range(-15.0..15.0),
            );
            let vel = Vec3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-2.0..2.0),
            );
            world
                .add(
                    EntityBuilder::new_dynamic(Shape::new_sphere(0.5))
                        .with_position(pos)
                        .with_velocity(vel),
                )
                .unwrap();
        }

        for _ in 0..60 {
            world.advance(0.05).unwrap();
            let stats = world.measure();
            assert_eq!(stats.entities, 80);
            assert_eq!(stats.markers, 80);
        }
        assert!(world.measure().leaves > 1);
        // every edge joins two live entities in id order
        for (key, edge) in world.contacts().edges() {
            let [a, b] = edge.entities();
            assert_eq!(key.ids(), [world.get(a).unwrap().id(), world.get(b).unwrap().id()]);
        }
    }

    #[cfg(feature = "serde-types")]
    #[test]
    fn params_from_ron() {
        let params: WorldParams = ron::from_str(
            "(balance: (split_threshold: 4, seed: 7), contact: (restitution: 0.5))",
        )
        .unwrap();
        assert_eq!(params.balance.split_threshold, 4);
        assert_eq!(params.balance.seed, 7);
        assert_eq!(params.balance.max_depth, 5);
        assert_eq!(params.contact.restitution, 0.5);
        assert_eq!(params.contact.edge_life, 10);
    }
}

//! Persistent relationships between pairs of entities
//! that are touching, close to touching, or bound by an [`Interaction`].

use super::{
    collision::{intersection_check, Intersection},
    Entity, EntityId, EntityKey, EntitySet, Interaction,
};

use std::collections::{btree_map::Entry, BTreeMap};

const BAD_ENTITY_ERR: &str = "Contact edge referred to an entity missing from the entity set";

/// Identifies the edge between two entities.
/// Always ordered so that the lower id comes first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    lo: EntityId,
    hi: EntityId,
}

impl PairKey {
    pub fn new(a: EntityId, b: EntityId) -> Self {
        if a <= b {
            Self { lo: a, hi: b }
        } else {
            Self { lo: b, hi: a }
        }
    }

    #[inline]
    pub fn ids(&self) -> [EntityId; 2] {
        [self.lo, self.hi]
    }

    #[inline]
    pub fn contains(&self, id: EntityId) -> bool {
        self.lo == id || self.hi == id
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.lo, self.hi)
    }
}

/// Tuning for contact edges and the contact solver.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-types",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct ContactParams {
    /// Coefficient of restitution used for every contact.
    /// 1 is perfectly elastic, 0 perfectly inelastic.
    pub restitution: f64,
    /// Number of steps an edge survives without its pair being checked again.
    pub edge_life: u32,
}

impl Default for ContactParams {
    fn default() -> Self {
        Self {
            restitution: 0.9,
            edge_life: 10,
        }
    }
}

/// The relationship between a pair of entities.
#[derive(Debug)]
pub struct ContactEdge {
    // in the same order as the pair key
    keys: [EntityKey; 2],
    intersection: Intersection,
    life: u32,
    interactions: Vec<Box<dyn Interaction>>,
}

impl ContactEdge {
    /// Keys of the two entities, lower id first.
    #[inline]
    pub fn entities(&self) -> [EntityKey; 2] {
        self.keys
    }

    /// Result of the latest intersection check of the pair.
    #[inline]
    pub fn intersection(&self) -> &Intersection {
        &self.intersection
    }

    #[inline]
    pub fn is_contact(&self) -> bool {
        self.intersection.contact
    }

    /// Remaining steps before the edge expires,
    /// unless its pair gets checked or it has interactions.
    #[inline]
    pub fn life(&self) -> u32 {
        self.life
    }

    #[inline]
    pub fn interactions(&self) -> &[Box<dyn Interaction>] {
        &self.interactions
    }
}

/// Every edge between entities in a world, and the solver that acts on them.
#[derive(Debug, Default)]
pub struct ContactGraph {
    edges: BTreeMap<PairKey, ContactEdge>,
    params: ContactParams,
}

impl ContactGraph {
    pub fn new(params: ContactParams) -> Self {
        Self {
            edges: BTreeMap::new(),
            params,
        }
    }

    #[inline]
    pub fn params(&self) -> &ContactParams {
        &self.params
    }

    /// Number of edges, including ones only kept alive by interactions.
    #[inline]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Number of edges whose entities are currently touching.
    pub fn contact_count(&self) -> usize {
        self.edges.values().filter(|e| e.is_contact()).count()
    }

    /// The edge between two entities, in either order.
    pub fn edge(&self, a: EntityId, b: EntityId) -> Option<&ContactEdge> {
        self.edges.get(&PairKey::new(a, b))
    }

    /// Every edge in order of pair key.
    pub fn edges(&self) -> impl '_ + Iterator<Item = (PairKey, &ContactEdge)> {
        self.edges.iter().map(|(k, e)| (*k, e))
    }

    /// Check a pair for intersection in whichever order, refreshing or creating its edge.
    pub fn check(&mut self, entities: &EntitySet, a: EntityKey, b: EntityKey) {
        let id_a = entities.get(a).expect(BAD_ENTITY_ERR).id();
        let id_b = entities.get(b).expect(BAD_ENTITY_ERR).id();
        if id_a < id_b {
            self.check_ordered(entities, a, b);
        } else {
            self.check_ordered(entities, b, a);
        }
    }

    /// Check a pair for intersection, refreshing or creating its edge.
    ///
    /// Panics unless `a` has a lower id than `b`.
    pub fn check_ordered(&mut self, entities: &EntitySet, a: EntityKey, b: EntityKey) {
        let entity_a = entities.get(a).expect(BAD_ENTITY_ERR);
        let entity_b = entities.get(b).expect(BAD_ENTITY_ERR);
        assert!(
            entity_a.id() < entity_b.id(),
            "Contact check between {} and {} out of order",
            entity_a.id(),
            entity_b.id()
        );

        let intersection = intersection_check(
            entity_a.pose(),
            entity_a.shape(),
            entity_b.pose(),
            entity_b.shape(),
        );
        let life = self.params.edge_life;
        match self.edges.entry(PairKey::new(entity_a.id(), entity_b.id())) {
            Entry::Occupied(mut occupied) => {
                let edge = occupied.get_mut();
                edge.intersection = intersection;
                edge.life = life;
            }
            Entry::Vacant(vacant) => {
                log::debug!("new contact edge {}", vacant.key());
                vacant.insert(ContactEdge {
                    keys: [a, b],
                    intersection,
                    life,
                    interactions: Vec::new(),
                });
            }
        }
    }

    /// Attach an interaction to the edge between two entities, creating it if needed.
    /// Edges created this way only live as long as they have interactions
    /// or their entities are found close to each other.
    pub fn add_interaction(
        &mut self,
        entities: &EntitySet,
        a: EntityKey,
        b: EntityKey,
        interaction: Box<dyn Interaction>,
    ) {
        let id_a = entities.get(a).expect(BAD_ENTITY_ERR).id();
        let id_b = entities.get(b).expect(BAD_ENTITY_ERR).id();
        let key = PairKey::new(id_a, id_b);
        let keys = if id_a < id_b { [a, b] } else { [b, a] };
        self.edges
            .entry(key)
            .or_insert_with(|| {
                log::debug!("new interaction edge {}", key);
                ContactEdge {
                    keys,
                    intersection: Intersection::separate(),
                    life: 0,
                    interactions: Vec::new(),
                }
            })
            .interactions
            .push(interaction);
    }

    /// Detach and return every interaction between two entities.
    /// The edge then expires normally.
    pub fn remove_interactions(&mut self, a: EntityId, b: EntityId) -> Vec<Box<dyn Interaction>> {
        self.edges
            .get_mut(&PairKey::new(a, b))
            .map(|edge| std::mem::take(&mut edge.interactions))
            .unwrap_or_default()
    }

    /// Drop every edge involving an entity. Returns the number of edges dropped.
    pub fn remove_entity(&mut self, id: EntityId) -> usize {
        let before = self.edges.len();
        self.edges.retain(|key, _| !key.contains(id));
        before - self.edges.len()
    }

    /// Apply contact impulses to every touching pair,
    /// then apply every interaction whether touching or not.
    pub fn solve(&mut self, entities: &mut EntitySet, dt: f64) {
        let _span = tracy_span!("solve contacts", "solve");

        let restitution = self.params.restitution;
        for edge in self.edges.values() {
            let [a, b] = edge.keys;
            let (entity_a, entity_b) = match entities.get2_mut(a, b) {
                (Some(entity_a), Some(entity_b)) => (entity_a, entity_b),
                _ => panic!("{}", BAD_ENTITY_ERR),
            };
            if edge.intersection.contact {
                contact_impulse(entity_a, entity_b, &edge.intersection, restitution);
            }
            for interaction in &edge.interactions {
                interaction.solve(entity_a, entity_b, dt);
            }
        }
    }

    /// Age every edge by one step and drop the ones that run out of life
    /// and have no interactions.
    pub fn advance(&mut self) {
        self.edges.retain(|key, edge| {
            edge.life = edge.life.saturating_sub(1);
            let keep = edge.life > 0 || !edge.interactions.is_empty();
            if !keep {
                log::debug!("contact edge {} expired", key);
            }
            keep
        });
    }
}

/// Resolve a contact with a single restitution impulse.
/// Returns the magnitude of the impulse, if one was applied.
fn contact_impulse(
    a: &mut Entity,
    b: &mut Entity,
    isect: &Intersection,
    restitution: f64,
) -> Option<f64> {
    let normal = *isect.normal;
    let point = isect.point;
    let closing_vel = (a.point_velocity(point) - b.point_velocity(point)).dot(normal);
    let numerator = -(1.0 + restitution) * closing_vel;
    if numerator <= 0.0 {
        // already separating
        return None;
    }

    let r_a = point - a.center();
    let r_b = point - b.center();
    let ang_a = (a.inverse_inertia_world() * r_a.cross(normal)).cross(r_a);
    let ang_b = (b.inverse_inertia_world() * r_b.cross(normal)).cross(r_b);
    let denominator = a.inverse_mass() + b.inverse_mass() + normal.dot(ang_a + ang_b);
    if denominator <= 0.0 {
        return None;
    }

    let magnitude = numerator / denominator;
    a.add_impulse_at(normal * magnitude, point);
    b.add_impulse_at(-normal * magnitude, point);
    Some(magnitude)
}

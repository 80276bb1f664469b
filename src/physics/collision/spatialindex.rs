//! The spatial index is responsible for detecting pairs of possibly
//! intersecting entities for further, more accurate narrow phase inspection.
//!
//! It's a binary space partitioning tree that reshapes itself as entities move.
//! Every internal node splits space with a plane. Entities cleanly on one side of it
//! go down into that side's child, while entities straddling it stay at the node.
//! Thus any two entities that could touch are found either at the same node
//! or with one of them at an ancestor of the other's node.

use super::{BalanceStrategy, Ray};
use crate::{
    math::{Unit, Vec3},
    physics::{
        shape::{PlaneSide, RayHit},
        Entity, EntityId, EntityKey, EntitySet,
    },
};

use std::collections::{BTreeMap, HashMap};
use thunderdome as td;

const BAD_NODE_ERR: &str = "Node key pointed to a nonexistent node";
const BAD_MARKER_ERR: &str = "Marker key pointed to a nonexistent marker";
const BAD_ENTITY_ERR: &str = "Spatial index referred to an entity missing from the entity set";

/// Key to look up a node of the [`SpatialIndex`].
///
/// Nodes are created and destroyed by rebalancing,
/// so keys are only meaningful until the next [`SpatialIndex::rebalance`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeKey(td::Index);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct MarkerKey(td::Index);

/// Identifies a single ray query.
/// Every query must get a token greater than any used before it,
/// which [`QueryToken::next`] provides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryToken(u64);

impl QueryToken {
    /// The token newly placed markers are stamped with. Never passed to a query.
    pub const NEVER: QueryToken = QueryToken(0);

    pub fn next(self) -> Self {
        QueryToken(
            self.0
                .checked_add(1)
                .expect("Ran out of ray query tokens"),
        )
    }
}

/// A plane dividing the space of a node in two.
/// Child 0 is in front of it (in the direction of the normal), child 1 behind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SplitPlane {
    pub normal: Unit<Vec3>,
    pub anchor: Vec3,
}

impl SplitPlane {
    #[inline]
    fn classify(&self, entity: &Entity) -> PlaneSide {
        entity
            .shape()
            .fast_plane_classify(entity.pose(), *self.normal, self.anchor)
    }

    /// Which sides of the plane a ray can reach, as `(front, behind)`.
    fn ray_reach(&self, ray: &Ray) -> (bool, bool) {
        let start_dist = (ray.start - self.anchor).dot(*self.normal);
        let dir_dot = ray.dir.dot(*self.normal);
        if !(start_dist.is_finite() && dir_dot.is_finite()) {
            return (true, true);
        }
        let front = start_dist >= 0.0 || dir_dot > 0.0;
        let behind = start_dist <= 0.0 || dir_dot < 0.0;
        (front, behind)
    }
}

#[derive(Clone, Copy, Debug)]
struct Split {
    plane: SplitPlane,
    children: [NodeKey; 2],
}

/// A node of the spatial index tree.
///
/// Has either zero or two children. Holds markers for the entities placed at it,
/// which are all of the entities within if it's a leaf
/// and the ones straddling its split plane if it isn't.
#[derive(Clone, Debug)]
pub struct Node {
    split: Option<Split>,
    markers: BTreeMap<EntityId, MarkerKey>,
    depth: usize,
    // normal of the parent's split plane, which new split planes are made orthogonal to
    parent_normal: Unit<Vec3>,
}

impl Node {
    fn new(depth: usize, parent_normal: Unit<Vec3>) -> Self {
        Self {
            split: None,
            markers: BTreeMap::new(),
            depth,
            parent_normal,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.split.is_none()
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of entities placed directly at this node, not counting descendants.
    #[inline]
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    #[inline]
    pub fn children(&self) -> Option<[NodeKey; 2]> {
        self.split.map(|s| s.children)
    }

    #[inline]
    pub fn split_plane(&self) -> Option<SplitPlane> {
        self.split.map(|s| s.plane)
    }

    /// Ids of the entities placed at this node, in increasing order.
    pub fn entities(&self) -> impl '_ + Iterator<Item = EntityId> {
        self.markers.keys().copied()
    }
}

/// Binding of an entity to the node it's placed at.
#[derive(Clone, Copy, Debug)]
struct Marker {
    entity: EntityKey,
    id: EntityId,
    node: NodeKey,
    stamp: QueryToken,
}

/// The nearest entity found by [`SpatialIndex::query_with_ray`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndexRayHit {
    pub entity: EntityKey,
    pub hit: RayHit,
}

/// Shape of the tree, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IndexStats {
    /// Entities known to the index.
    pub entities: usize,
    /// Nodes other than the root.
    pub children: usize,
    pub leaves: usize,
    /// Markers found in the tree. Equal to `entities` unless something is badly wrong.
    pub markers: usize,
    pub mean_leaf_depth: f64,
}

impl std::fmt::Display for IndexStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} entities, {} markers in {} nodes ({} leaves, mean leaf depth {:.2})",
            self.entities,
            self.markers,
            self.children + 1,
            self.leaves,
            self.mean_leaf_depth
        )
    }
}

/// A self-balancing binary space partitioning tree over entities.
///
/// The index only stores where entities are placed, not the entities themselves,
/// so operations that need geometry take the [`EntitySet`] the keys point into.
#[derive(Clone, Debug)]
pub struct SpatialIndex {
    nodes: td::Arena<Node>,
    markers: td::Arena<Marker>,
    root: NodeKey,
    by_entity: HashMap<EntityKey, MarkerKey>,
    last_token: QueryToken,
    last_query_tests: usize,
    /// Kept around so that we don't need to
    /// allocate a new one for every traversal.
    shared_stack: Vec<NodeKey>,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialIndex {
    pub fn new() -> Self {
        let mut nodes = td::Arena::new();
        // there's no parent plane for the root, any direction will do
        let root = NodeKey(nodes.insert(Node::new(0, Unit::unit_y())));
        Self {
            nodes,
            markers: td::Arena::new(),
            root,
            by_entity: HashMap::new(),
            last_token: QueryToken::NEVER,
            last_query_tests: 0,
            shared_stack: Vec::new(),
        }
    }

    #[inline]
    pub fn root(&self) -> NodeKey {
        self.root
    }

    #[inline]
    pub fn get_node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key.0)
    }

    #[inline]
    pub fn contains(&self, entity: EntityKey) -> bool {
        self.by_entity.contains_key(&entity)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }

    /// The node an entity is currently placed at.
    pub fn node_of(&self, entity: EntityKey) -> Option<NodeKey> {
        let marker = self.by_entity.get(&entity)?;
        Some(self.markers.get(marker.0).expect(BAD_MARKER_ERR).node)
    }

    /// Number of entities whose geometry was tested by the latest ray query.
    #[inline]
    pub fn last_query_tests(&self) -> usize {
        self.last_query_tests
    }

    /// Place a new entity in the tree.
    /// Returns false without doing anything if it's already there.
    pub fn add(&mut self, key: EntityKey, entity: &Entity) -> bool {
        if self.by_entity.contains_key(&key) {
            return false;
        }
        let marker = MarkerKey(self.markers.insert(Marker {
            entity: key,
            id: entity.id(),
            node: self.root,
            stamp: QueryToken::NEVER,
        }));
        self.by_entity.insert(key, marker);
        self.place(self.root, marker, entity);
        true
    }

    /// Take an entity out of the tree. Returns false if it wasn't there.
    pub fn remove(&mut self, key: EntityKey) -> bool {
        let Some(marker_key) = self.by_entity.remove(&key) else {
            return false;
        };
        let marker = self.markers.remove(marker_key.0).expect(BAD_MARKER_ERR);
        self.nodes
            .get_mut(marker.node.0)
            .expect(BAD_NODE_ERR)
            .markers
            .remove(&marker.id);
        true
    }

    /// Detach an entity from its node and place it again from the root,
    /// after it has moved. Returns false if it isn't in the tree.
    pub fn relocate(&mut self, key: EntityKey, entity: &Entity) -> bool {
        let Some(&marker_key) = self.by_entity.get(&key) else {
            return false;
        };
        let marker = self.markers.get(marker_key.0).expect(BAD_MARKER_ERR);
        let (node, id) = (marker.node, marker.id);
        self.nodes
            .get_mut(node.0)
            .expect(BAD_NODE_ERR)
            .markers
            .remove(&id);
        self.place(self.root, marker_key, entity);
        true
    }

    /// Push a marker down from `start` as deep as its entity cleanly fits.
    fn place(&mut self, start: NodeKey, marker_key: MarkerKey, entity: &Entity) -> NodeKey {
        let mut curr = start;
        while let Some(split) = self.nodes.get(curr.0).expect(BAD_NODE_ERR).split {
            curr = match split.plane.classify(entity) {
                PlaneSide::Front => split.children[0],
                PlaneSide::Behind => split.children[1],
                PlaneSide::Intersects => break,
            };
        }

        let marker = self.markers.get_mut(marker_key.0).expect(BAD_MARKER_ERR);
        marker.node = curr;
        self.nodes
            .get_mut(curr.0)
            .expect(BAD_NODE_ERR)
            .markers
            .insert(marker.id, marker_key);
        curr
    }

    /// Split overfull leaves and merge sparse branches according to the strategy.
    pub fn rebalance(&mut self, strategy: &BalanceStrategy, entities: &EntitySet) {
        self.rebalance_node(self.root, strategy, entities);
    }

    fn rebalance_node(&mut self, key: NodeKey, strategy: &BalanceStrategy, entities: &EntitySet) {
        let node = self.nodes.get(key.0).expect(BAD_NODE_ERR);
        match node.split {
            Some(Split {
                children: [c0, c1],
                ..
            }) => {
                let child0 = self.nodes.get(c0.0).expect(BAD_NODE_ERR);
                let child1 = self.nodes.get(c1.0).expect(BAD_NODE_ERR);
                if strategy.should_merge(node, [child0, child1]) {
                    self.merge(key);
                    // the merged node may be full enough to need another split
                    if strategy.should_split(self.nodes.get(key.0).expect(BAD_NODE_ERR)) {
                        self.split(key, strategy, entities);
                    }
                } else {
                    self.rebalance_node(c0, strategy, entities);
                    self.rebalance_node(c1, strategy, entities);
                }
            }
            None => {
                if strategy.should_split(node) {
                    self.split(key, strategy, entities);
                }
            }
        }
    }

    /// Give a leaf two children and push its entities down into them where possible.
    fn split(&mut self, key: NodeKey, strategy: &BalanceStrategy, entities: &EntitySet) {
        let node = self.nodes.get(key.0).expect(BAD_NODE_ERR);
        debug_assert!(node.is_leaf(), "Tried to split a node that already has children");

        let placed: Vec<(MarkerKey, &Entity)> = node
            .markers
            .values()
            .map(|mk| {
                let marker = self.markers.get(mk.0).expect(BAD_MARKER_ERR);
                (*mk, entities.get(marker.entity).expect(BAD_ENTITY_ERR))
            })
            .collect();
        let centers: Vec<Vec3> = placed.iter().map(|(_, e)| e.center()).collect();
        let mut rng = strategy.rng_for(node.depth, node.markers.keys().copied());
        let plane = strategy.compute_split_plane(node.parent_normal, &centers, &mut rng);
        let depth = node.depth + 1;

        let children = [
            NodeKey(self.nodes.insert(Node::new(depth, plane.normal))),
            NodeKey(self.nodes.insert(Node::new(depth, plane.normal))),
        ];
        let node = self.nodes.get_mut(key.0).expect(BAD_NODE_ERR);
        node.split = Some(Split { plane, children });
        node.markers.clear();

        for (marker_key, entity) in placed {
            self.place(key, marker_key, entity);
        }

        log::debug!(
            "split node at depth {}: {} stay, {} in front, {} behind",
            depth - 1,
            self.nodes.get(key.0).map_or(0, Node::marker_count),
            self.nodes.get(children[0].0).map_or(0, Node::marker_count),
            self.nodes.get(children[1].0).map_or(0, Node::marker_count),
        );

        for child in children {
            self.rebalance_node(child, strategy, entities);
        }
    }

    /// Absorb every marker below a node into the node itself and drop its children.
    fn merge(&mut self, key: NodeKey) {
        let Self {
            nodes,
            markers,
            shared_stack,
            ..
        } = self;

        let Some(split) = nodes.get_mut(key.0).expect(BAD_NODE_ERR).split.take() else {
            return;
        };
        let mut absorbed = BTreeMap::new();
        shared_stack.clear();
        shared_stack.extend(split.children);
        while let Some(child_key) = shared_stack.pop() {
            let child = nodes.remove(child_key.0).expect(BAD_NODE_ERR);
            if let Some(grandchildren) = child.split {
                shared_stack.extend(grandchildren.children);
            }
            for (id, marker_key) in child.markers {
                markers.get_mut(marker_key.0).expect(BAD_MARKER_ERR).node = key;
                absorbed.insert(id, marker_key);
            }
        }

        let node = nodes.get_mut(key.0).expect(BAD_NODE_ERR);
        log::debug!(
            "merged {} markers into node at depth {}",
            absorbed.len(),
            node.depth
        );
        node.markers.append(&mut absorbed);
    }

    /// Find the nearest entity hit by a ray.
    ///
    /// Only the sides of split planes the ray can reach are visited,
    /// and every entity is tested at most once.
    /// Panics if `token` isn't newer than the previous query's token.
    pub fn query_with_ray(
        &mut self,
        ray: &Ray,
        token: QueryToken,
        entities: &EntitySet,
    ) -> Option<IndexRayHit> {
        assert!(
            token > self.last_token,
            "Ray query token reused, every query needs a fresh one"
        );
        self.last_token = token;

        let Self {
            nodes,
            markers,
            root,
            shared_stack,
            last_query_tests,
            ..
        } = self;

        let mut nearest: Option<(f64, IndexRayHit)> = None;
        let mut tests = 0;
        shared_stack.clear();
        shared_stack.push(*root);
        while let Some(node_key) = shared_stack.pop() {
            let node = nodes.get(node_key.0).expect(BAD_NODE_ERR);
            for marker_key in node.markers.values() {
                let marker = markers.get_mut(marker_key.0).expect(BAD_MARKER_ERR);
                if marker.stamp == token {
                    continue;
                }
                marker.stamp = token;
                tests += 1;

                let entity = entities.get(marker.entity).expect(BAD_ENTITY_ERR);
                let Some(hit) = entity.shape().intersect_ray(entity.pose(), ray) else {
                    continue;
                };
                let dist_sq = (hit.point - ray.start).mag_sq();
                if nearest.map_or(true, |(best, _)| dist_sq < best) {
                    nearest = Some((
                        dist_sq,
                        IndexRayHit {
                            entity: marker.entity,
                            hit,
                        },
                    ));
                }
            }

            if let Some(split) = node.split {
                let (front, behind) = split.plane.ray_reach(ray);
                if behind {
                    shared_stack.push(split.children[1]);
                }
                if front {
                    shared_stack.push(split.children[0]);
                }
            }
        }

        *last_query_tests = tests;
        nearest.map(|(_, hit)| hit)
    }

    /// Count things in the tree.
    pub fn measure(&self) -> IndexStats {
        let mut stats = IndexStats {
            entities: self.by_entity.len(),
            ..Default::default()
        };
        let mut depth_sum = 0;
        let mut stack = vec![self.root];
        while let Some(key) = stack.pop() {
            let node = self.nodes.get(key.0).expect(BAD_NODE_ERR);
            stats.markers += node.markers.len();
            match node.split {
                Some(split) => {
                    stats.children += 2;
                    stack.extend(split.children);
                }
                None => {
                    stats.leaves += 1;
                    depth_sum += node.depth;
                }
            }
        }
        stats.mean_leaf_depth = depth_sum as f64 / stats.leaves as f64;
        stats
    }

    /// Every pair of entities the tree considers close enough to possibly touch,
    /// each ordered by entity id.
    ///
    /// These are the pairs placed at the same node
    /// and the pairs where one is placed at an ancestor of the other's node.
    pub fn candidate_pairs(&self) -> Vec<[EntityKey; 2]> {
        let mut pairs = Vec::new();
        let mut ancestors = Vec::new();
        self.collect_pairs(self.root, &mut ancestors, &mut pairs);
        pairs
    }

    fn collect_pairs(
        &self,
        key: NodeKey,
        ancestors: &mut Vec<(EntityId, EntityKey)>,
        pairs: &mut Vec<[EntityKey; 2]>,
    ) {
        let node = self.nodes.get(key.0).expect(BAD_NODE_ERR);
        let base_len = ancestors.len();
        for (&id, marker_key) in &node.markers {
            let entity = self.markers.get(marker_key.0).expect(BAD_MARKER_ERR).entity;
            for &(other_id, other) in ancestors.iter() {
                pairs.push(if other_id < id {
                    [other, entity]
                } else {
                    [entity, other]
                });
            }
            ancestors.push((id, entity));
        }
        if let Some(split) = node.split {
            for child in split.children {
                self.collect_pairs(child, ancestors, pairs);
            }
        }
        ancestors.truncate(base_len);
    }
}

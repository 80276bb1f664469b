use super::{Entity, EntityBuilder, EntityId, PhysicsError};

use thunderdome as td;

/// Key type to look up an entity stored in the physics world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityKey(pub(super) td::Index);

impl EntityKey {
    /// Get the underlying [`thunderdome::Index`][thunderdome::Index] of this key.
    /// Useful for creating your own mappings from entities to other things.
    #[inline]
    pub fn index(&self) -> td::Index {
        self.0
    }
}

/// Storage for every live entity in a world,
/// and the source of their identifiers.
#[derive(Default)]
pub struct EntitySet {
    entities: td::Arena<Entity>,
    // ids are handed out in increasing order and never reused,
    // even though arena slots are
    next_id: u64,
}

impl EntitySet {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Build an entity and give it the next identifier.
    pub(crate) fn insert(&mut self, builder: EntityBuilder) -> Result<EntityKey, PhysicsError> {
        let entity = builder.build(EntityId(self.next_id))?;
        self.next_id += 1;
        Ok(EntityKey(self.entities.insert(entity)))
    }

    #[inline]
    pub fn get(&self, key: EntityKey) -> Option<&Entity> {
        self.entities.get(key.0)
    }

    #[inline]
    pub fn get_mut(&mut self, key: EntityKey) -> Option<&mut Entity> {
        self.entities.get_mut(key.0)
    }

    /// Mutably access two different entities at once.
    ///
    /// Panics if both keys point to the same slot.
    #[inline]
    pub fn get2_mut(
        &mut self,
        a: EntityKey,
        b: EntityKey,
    ) -> (Option<&mut Entity>, Option<&mut Entity>) {
        self.entities.get2_mut(a.0, b.0)
    }

    #[inline]
    pub fn contains(&self, key: EntityKey) -> bool {
        self.entities.contains(key.0)
    }

    #[inline]
    pub(crate) fn remove(&mut self, key: EntityKey) -> Option<Entity> {
        self.entities.remove(key.0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = (EntityKey, &Entity)> {
        self.entities.iter().map(|(k, e)| (EntityKey(k), e))
    }

    pub(crate) fn iter_mut(&mut self) -> impl '_ + Iterator<Item = (EntityKey, &mut Entity)> {
        self.entities.iter_mut().map(|(k, e)| (EntityKey(k), e))
    }
}

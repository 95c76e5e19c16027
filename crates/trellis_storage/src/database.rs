//! The complete data state of a store.
//!
//! The `Database` is the unified interface to every collection. All of its
//! state lives in persistent structures, so cloning it is cheap and a clone
//! is a complete snapshot that can be restored later.

use std::sync::Arc;

use trellis_foundation::{EntityId, EntityRef, Error, Result, Stamp, Value};

use crate::collection::Collection;
use crate::dependency::Dependency;
use crate::record::Record;
use crate::relationship::{resolve, Relations};
use crate::schema::CollectionSchema;

/// Every collection of a store plus the entity sequence counter.
///
/// Clone is O(1) in the number of entities.
#[derive(Clone, Debug)]
pub struct Database {
    collections: im::OrdMap<Arc<str>, Collection>,
    relations: Arc<Relations>,
    /// Last sequence number handed out to an entity or registered reaction.
    seq: u64,
}

impl Database {
    /// Creates an empty database for `schemas`.
    ///
    /// Relationships are resolved here; a `has_many` without a suitable
    /// declared index gets one synthesized on its child collection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` for duplicate collection names or inconsistent
    /// relationships.
    pub fn new(schemas: Vec<CollectionSchema>) -> Result<Self> {
        for (i, schema) in schemas.iter().enumerate() {
            if schemas[..i].iter().any(|s| s.name == schema.name) {
                return Err(Error::invalid_schema(format!(
                    "collection {} is declared more than once",
                    schema.name
                )));
            }
        }
        let (relations, mut indexes) = resolve(&schemas)?;
        let collections = schemas
            .into_iter()
            .map(|schema| {
                let specs = indexes.remove(&schema.name).unwrap_or_default();
                (schema.name.clone(), Collection::new(Arc::new(schema), specs))
            })
            .collect();
        Ok(Self {
            collections,
            relations: Arc::new(relations),
            seq: 0,
        })
    }

    /// Returns the resolved relationships.
    #[must_use]
    pub fn relations(&self) -> &Relations {
        &self.relations
    }

    /// Returns a collection by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` if there is no such collection.
    pub fn collection(&self, name: &str) -> Result<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| Error::unknown_collection(name))
    }

    fn collection_mut(&mut self, name: &str) -> Result<&mut Collection> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| Error::unknown_collection(name))
    }

    /// Iterates over collections in name order.
    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.values()
    }

    /// Returns the record of a live entity.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection`, `UnknownEntity` or `InertEntity`.
    pub fn record(&self, entity: &EntityRef) -> Result<&Record> {
        self.collection(&entity.collection)?.record(&entity.id)
    }

    /// Returns true if the entity is live.
    #[must_use]
    pub fn is_live(&self, entity: &EntityRef) -> bool {
        self.collections
            .get(&*entity.collection)
            .is_some_and(|c| c.contains(&entity.id))
    }

    /// Returns the sequence number of a live entity.
    #[must_use]
    pub fn seq_of(&self, entity: &EntityRef) -> Option<u64> {
        self.collections.get(&*entity.collection)?.seq_of(&entity.id)
    }

    /// Hands out the next sequence number.
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Adds an entity, returning its reference and sequence number.
    ///
    /// Without an explicit id, one is generated from the sequence number.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` and the errors of [`Collection::insert`].
    pub fn add(
        &mut self,
        collection: &str,
        id: Option<EntityId>,
        fields: Vec<(Arc<str>, Value)>,
        now: Stamp,
        touched: &mut Vec<Dependency>,
    ) -> Result<(EntityRef, u64)> {
        self.collection(collection)?;
        let mut seq = self.next_seq();
        let id = match id {
            Some(id) => id,
            None => loop {
                let candidate = EntityId::generated(seq);
                if !self.collection(collection)?.knows(&candidate) {
                    break candidate;
                }
                seq = self.next_seq();
            },
        };
        let entity = self
            .collection_mut(collection)?
            .insert(id, seq, fields, now, touched)?;
        Ok((entity, seq))
    }

    /// Removes an entity. Returns `None` if it was already removed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` or `UnknownEntity`.
    pub fn remove(&mut self, entity: &EntityRef, now: Stamp, touched: &mut Vec<Dependency>) -> Result<Option<Record>> {
        self.collection_mut(&entity.collection)?
            .remove(&entity.id, now, touched)
    }

    /// Writes one field. Returns `None` for a no-op write, else the old value.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` and the errors of [`Collection::write`].
    pub fn write(
        &mut self,
        entity: &EntityRef,
        field: &str,
        value: Value,
        now: Stamp,
        touched: &mut Vec<Dependency>,
    ) -> Result<Option<Option<Value>>> {
        self.collection_mut(&entity.collection)?
            .write(&entity.id, field, value, now, touched)
    }

    /// Deletes one field, returning the removed value.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` and the errors of [`Collection::delete`].
    pub fn delete(
        &mut self,
        entity: &EntityRef,
        field: &str,
        now: Stamp,
        touched: &mut Vec<Dependency>,
    ) -> Result<Option<Value>> {
        self.collection_mut(&entity.collection)?
            .delete(&entity.id, field, now, touched)
    }

    /// Current stamp of a storage key. Selector keys are not storage keys
    /// and always report zero here.
    #[must_use]
    pub fn stamp_of(&self, dep: &Dependency) -> Stamp {
        let collection = match dep {
            Dependency::Field { entity, .. } | Dependency::Shape(entity) | Dependency::Entity(entity) => {
                &entity.collection
            }
            Dependency::Members(collection) | Dependency::Index { collection, .. } => collection,
            Dependency::Selector(_) => return Stamp::ZERO,
        };
        self.collections
            .get(&**collection)
            .map_or(Stamp::ZERO, |c| c.stamp_of(dep))
    }
}

//! Collections of live entities of one type.
//!
//! A [`Collection`] owns the records of its members, keeps every declared
//! index consistent with them, and remembers removed ids as tombstones so
//! that removal is idempotent and ids are never handed out twice.

use std::sync::Arc;

use trellis_foundation::{EntityId, EntityRef, Error, LtVec, Result, Stamp, Value};

use crate::dependency::Dependency;
use crate::index::{compare_keys, Index, IndexSpec, SortLevel};
use crate::record::{Descriptor, Record, ID_FIELD};
use crate::schema::CollectionSchema;

#[derive(Clone, Debug)]
enum Slot {
    Live { seq: u64, record: Record },
    Removed { stamp: Stamp },
}

/// The live members of one entity type plus their indexes.
///
/// A removed id keeps a tombstone so its id is never reused and stale reads
/// of it can still be stamped. Tombstones are never collected, so a store
/// that churns through many entities holds one small slot per id it has
/// ever seen.
#[derive(Clone, Debug)]
pub struct Collection {
    schema: Arc<CollectionSchema>,
    slots: im::HashMap<EntityId, Slot>,
    /// Live members by sequence number.
    order: im::OrdMap<u64, EntityId>,
    indexes: Vec<Index>,
    members_stamp: Stamp,
}

impl Collection {
    /// Creates an empty collection maintaining `indexes`.
    #[must_use]
    pub fn new(schema: Arc<CollectionSchema>, indexes: Vec<IndexSpec>) -> Self {
        Self {
            schema,
            slots: im::HashMap::new(),
            order: im::OrdMap::new(),
            indexes: indexes.into_iter().map(Index::new).collect(),
            members_stamp: Stamp::ZERO,
        }
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.schema.name
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    /// Number of live members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if there are no live members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Builds a reference to a member of this collection.
    #[must_use]
    pub fn entity_ref(&self, id: &EntityId) -> EntityRef {
        EntityRef {
            collection: self.schema.name.clone(),
            id: id.clone(),
        }
    }

    /// Returns true if `id` is a live member.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        matches!(self.slots.get(id), Some(Slot::Live { .. }))
    }

    /// Returns true if `id` was a member and has been removed.
    #[must_use]
    pub fn is_removed(&self, id: &EntityId) -> bool {
        matches!(self.slots.get(id), Some(Slot::Removed { .. }))
    }

    /// Returns true if `id` was ever used in this collection.
    #[must_use]
    pub fn knows(&self, id: &EntityId) -> bool {
        self.slots.contains_key(id)
    }

    /// Returns the record of a live member.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` for ids never added and `InertEntity` for
    /// removed ones.
    pub fn record(&self, id: &EntityId) -> Result<&Record> {
        match self.slots.get(id) {
            Some(Slot::Live { record, .. }) => Ok(record),
            Some(Slot::Removed { .. }) => Err(Error::inert_entity(self.entity_ref(id))),
            None => Err(Error::unknown_entity(self.entity_ref(id))),
        }
    }

    /// Returns the sequence number a live member was added with.
    #[must_use]
    pub fn seq_of(&self, id: &EntityId) -> Option<u64> {
        match self.slots.get(id) {
            Some(Slot::Live { seq, .. }) => Some(*seq),
            _ => None,
        }
    }

    /// Iterates over live members in the order they were added.
    pub fn members(&self) -> impl Iterator<Item = EntityRef> + '_ {
        self.order.values().map(|id| self.entity_ref(id))
    }

    /// Adds a record under `id`.
    ///
    /// Declared fields missing from `fields` get their defaults. Every key
    /// whose observers must re-run is pushed onto `touched`.
    ///
    /// # Errors
    ///
    /// Returns `UniqueConstraintViolation` if `id` was used before or a unique
    /// index collides, `UnknownMember` for undeclared fields of a strict
    /// collection, and `IllegalMutation` if `fields` tries to set the id.
    pub fn insert(
        &mut self,
        id: EntityId,
        seq: u64,
        fields: Vec<(Arc<str>, Value)>,
        now: Stamp,
        touched: &mut Vec<Dependency>,
    ) -> Result<EntityRef> {
        let entity = self.entity_ref(&id);
        if self.knows(&id) {
            return Err(Error::unique_violation(self.name(), ID_FIELD, &Value::from(&id)));
        }
        let mut values: Vec<(Arc<str>, Value)> = self
            .schema
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.default.clone()))
            .collect();
        for (name, value) in fields {
            if &*name == ID_FIELD {
                return Err(Error::illegal_mutation(format!(
                    "the id of {entity} is assigned when it is added"
                )));
            }
            if !self.schema.accepts(&name) {
                return Err(Error::unknown_member(self.name().to_string(), name.to_string()));
            }
            match values.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = value,
                None => values.push((name, value)),
            }
        }
        values.push((ID_FIELD.into(), Value::from(&id)));
        let record = Record::new(values, now);

        for index in &self.indexes {
            if let Some(key) = index.conflict(&entity, &record) {
                return Err(Error::unique_violation(self.name(), &index.spec().to_string(), &key));
            }
        }
        for slot in 0..self.indexes.len() {
            if let Some(path) = self.indexes[slot].insert(&entity, &record, now) {
                self.touch_index(slot, &path, touched);
            }
        }

        touched.extend(record.keys().into_iter().map(|field| Dependency::Field {
            entity: entity.clone(),
            field,
        }));
        touched.push(Dependency::Shape(entity.clone()));
        touched.push(Dependency::Entity(entity.clone()));
        touched.push(Dependency::Members(self.name().clone()));

        self.slots.insert(id.clone(), Slot::Live { seq, record });
        self.order.insert(seq, id);
        self.members_stamp = now;
        Ok(entity)
    }

    /// Removes a live member, returning its final record.
    ///
    /// Removing an already-removed member is a no-op and returns `None`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` if `id` was never added.
    pub fn remove(&mut self, id: &EntityId, now: Stamp, touched: &mut Vec<Dependency>) -> Result<Option<Record>> {
        let entity = self.entity_ref(id);
        let (seq, record) = match self.slots.get(id) {
            Some(Slot::Live { seq, record }) => (*seq, record.clone()),
            Some(Slot::Removed { .. }) => return Ok(None),
            None => return Err(Error::unknown_entity(entity)),
        };

        for slot in 0..self.indexes.len() {
            if let Some(path) = self.indexes[slot].remove(&entity, &record, now) {
                self.touch_index(slot, &path, touched);
            }
        }

        touched.extend(record.keys().into_iter().map(|field| Dependency::Field {
            entity: entity.clone(),
            field,
        }));
        touched.push(Dependency::Shape(entity.clone()));
        touched.push(Dependency::Entity(entity));
        touched.push(Dependency::Members(self.name().clone()));

        self.slots.insert(id.clone(), Slot::Removed { stamp: now });
        self.order.remove(&seq);
        self.members_stamp = now;
        Ok(Some(record))
    }

    /// Writes one field of a live member.
    ///
    /// Returns `None` for a no-op write, else the previous value.
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` for the id field, `UnknownMember` for an
    /// undeclared field of a strict collection, `UniqueConstraintViolation`
    /// on a unique index collision, and the lookup errors of [`Collection::record`].
    pub fn write(
        &mut self,
        id: &EntityId,
        field: &str,
        value: Value,
        now: Stamp,
        touched: &mut Vec<Dependency>,
    ) -> Result<Option<Option<Value>>> {
        let entity = self.entity_ref(id);
        self.check_writable(&entity, field)?;
        let (seq, before) = self.live(id)?;
        let mut after = before.clone();
        let Some(old) = after.write(field, value, now) else {
            return Ok(None);
        };
        self.commit(&entity, seq, field, &before, after, now, touched)?;
        if old.is_none() {
            touched.push(Dependency::Shape(entity));
        }
        Ok(Some(old))
    }

    /// Deletes one field of a live member, returning the removed value.
    ///
    /// # Errors
    ///
    /// As for [`Collection::write`].
    pub fn delete(
        &mut self,
        id: &EntityId,
        field: &str,
        now: Stamp,
        touched: &mut Vec<Dependency>,
    ) -> Result<Option<Value>> {
        let entity = self.entity_ref(id);
        self.check_writable(&entity, field)?;
        let (seq, before) = self.live(id)?;
        let mut after = before.clone();
        let Some(old) = after.delete(field, now) else {
            return Ok(None);
        };
        self.commit(&entity, seq, field, &before, after, now, touched)?;
        touched.push(Dependency::Shape(entity));
        Ok(Some(old))
    }

    fn check_writable(&self, entity: &EntityRef, field: &str) -> Result<()> {
        if field == ID_FIELD {
            return Err(Error::illegal_mutation(format!("the id of {entity} cannot be reassigned")));
        }
        if !self.schema.accepts(field) {
            return Err(Error::unknown_member(self.name().to_string(), field));
        }
        Ok(())
    }

    fn live(&self, id: &EntityId) -> Result<(u64, Record)> {
        let record = self.record(id)?.clone();
        let seq = self.seq_of(id).unwrap_or_default();
        Ok((seq, record))
    }

    #[allow(clippy::too_many_arguments)]
    fn commit(
        &mut self,
        entity: &EntityRef,
        seq: u64,
        field: &str,
        before: &Record,
        after: Record,
        now: Stamp,
        touched: &mut Vec<Dependency>,
    ) -> Result<()> {
        for index in self.indexes.iter().filter(|i| i.spec().mentions(field)) {
            if let Some(key) = index.conflict(entity, &after) {
                return Err(Error::unique_violation(self.name(), &index.spec().to_string(), &key));
            }
        }
        for slot in 0..self.indexes.len() {
            if !self.indexes[slot].spec().mentions(field) {
                continue;
            }
            for path in self.indexes[slot].update(entity, before, &after, now) {
                self.touch_index(slot, &path, touched);
            }
        }
        touched.push(Dependency::field(entity, field));
        touched.push(Dependency::Entity(entity.clone()));
        self.slots.insert(entity.id.clone(), Slot::Live { seq, record: after });
        Ok(())
    }

    /// Every prefix of a changed bucket's path changed as well.
    fn touch_index(&self, slot: usize, path: &[Value], touched: &mut Vec<Dependency>) {
        for len in 0..=path.len() {
            let dep = Dependency::Index {
                collection: self.name().clone(),
                index: slot,
                path: path[..len].to_vec(),
            };
            if !touched.contains(&dep) {
                touched.push(dep);
            }
        }
    }

    /// Describes a stored field of a live member.
    ///
    /// # Errors
    ///
    /// The lookup errors of [`Collection::record`].
    pub fn descriptor(&self, id: &EntityId, field: &str) -> Result<Option<Descriptor>> {
        Ok(self.record(id)?.descriptor(field))
    }

    /// Returns the maintained indexes, declared ones first.
    #[must_use]
    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    /// Returns the slot of the index declared as `spec`.
    #[must_use]
    pub fn index_slot(&self, spec: &IndexSpec) -> Option<usize> {
        self.indexes.iter().position(|i| i.spec() == spec)
    }

    /// Returns the index in `slot`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` for a slot this collection does not have.
    pub fn index(&self, slot: usize) -> Result<&Index> {
        self.indexes
            .get(slot)
            .ok_or_else(|| Error::internal(format!("{} has no index in slot {slot}", self.name())))
    }

    /// Orders `members` by `levels`, ties broken by id.
    ///
    /// Members that are not live references of this collection are dropped.
    #[must_use]
    pub fn sorted(&self, members: &LtVec<Value>, levels: &[SortLevel]) -> LtVec<Value> {
        let mut rows: Vec<(Vec<Value>, EntityRef)> = members
            .iter()
            .filter_map(Value::as_entity)
            .filter_map(|e| {
                let record = self.record(&e.id).ok()?;
                let keys = levels.iter().map(|l| record.value(&l.field)).collect();
                Some((keys, e.clone()))
            })
            .collect();
        rows.sort_by(|a, b| compare_keys(&a.0, &b.0, levels).then_with(|| a.1.id.cmp(&b.1.id)));
        rows.into_iter().map(|(_, e)| Value::Ref(e)).collect()
    }

    /// Current stamp of a key owned by this collection.
    #[must_use]
    pub fn stamp_of(&self, dep: &Dependency) -> Stamp {
        match dep {
            Dependency::Field { entity, field } => self.slot_stamp(&entity.id, |r| r.field_stamp(field)),
            Dependency::Shape(entity) => self.slot_stamp(&entity.id, Record::shape_stamp),
            Dependency::Entity(entity) => self.slot_stamp(&entity.id, Record::revision),
            Dependency::Members(_) => self.members_stamp,
            Dependency::Index { index, path, .. } => {
                self.indexes.get(*index).map_or(Stamp::ZERO, |i| i.stamp_at(path))
            }
            Dependency::Selector(_) => Stamp::ZERO,
        }
    }

    fn slot_stamp(&self, id: &EntityId, f: impl Fn(&Record) -> Stamp) -> Stamp {
        match self.slots.get(id) {
            Some(Slot::Live { record, .. }) => f(record),
            Some(Slot::Removed { stamp }) => *stamp,
            None => Stamp::ZERO,
        }
    }
}

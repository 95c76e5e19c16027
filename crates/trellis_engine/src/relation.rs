//! Relationships between entities.
//!
//! Foreign keys on the child are the only stored truth. A `has_many` member
//! is read from the index that serves it and a `belongs_to` member is
//! resolved through the owner's primary key. Assigning either side, or
//! editing a `has_many` list element by element, is translated into foreign
//! key writes so both sides always agree.

use std::sync::Arc;

use trellis_foundation::{EntityId, EntityRef, Error, LtVec, Result, Value};
use trellis_storage::{
    Database, Dependency, Dependent, ResolvedBelongsTo, ResolvedHasMany, ID_FIELD,
};

use crate::store::Store;

impl Store {
    // =========================================================================
    // Reads
    // =========================================================================

    /// Children of `owner` through the `has_many` named `name`, sorted.
    ///
    /// The list keeps its identity until the set or order of children
    /// changes.
    pub(crate) fn related(&self, owner: &EntityRef, name: &str) -> Result<LtVec<Value>> {
        let rel = self.has_many_of(owner, name)?;
        let pk = self.state.borrow().db.record(owner)?.value(&rel.spec.primary_key);
        self.observe(Dependency::field(owner, &rel.spec.primary_key));
        if pk.is_nil() {
            return Ok(self.empty_list());
        }

        let path = vec![pk];
        let (list, sort_reads) = {
            let state = self.state.borrow();
            let target = state.db.collection(&rel.spec.target)?;
            let index = target.index(rel.index)?;
            match index.lookup(&path) {
                None => (self.empty_list(), Vec::new()),
                Some(bucket) if rel.exact => (bucket, Vec::new()),
                Some(bucket) => {
                    // Levels beyond the index order are read from the children.
                    let reads: Vec<Dependency> = bucket
                        .iter()
                        .filter_map(Value::as_entity)
                        .flat_map(|child| rel.sort.iter().map(|l| Dependency::field(child, &l.field)))
                        .collect();
                    let stamp = reads
                        .iter()
                        .map(|dep| target.stamp_of(dep))
                        .fold(index.stamp_at(&path), std::cmp::max);
                    let key = (rel.spec.target.clone(), rel.index, path.clone(), rel.spec.sort.clone());
                    let list = self.memoized(key, stamp, || target.sorted(&bucket, &rel.sort));
                    (list, reads)
                }
            }
        };
        self.observe(Dependency::Index {
            collection: rel.spec.target.clone(),
            index: rel.index,
            path,
        });
        for dep in sort_reads {
            self.observe(dep);
        }
        Ok(list)
    }

    /// Owner of `child` through the `belongs_to` named `name`.
    pub(crate) fn owner_of(&self, child: &EntityRef, name: &str) -> Result<Option<EntityRef>> {
        let rel = self.belongs_to_of(child, name)?;
        let fk = self.state.borrow().db.record(child)?.value(&rel.spec.foreign_key);
        self.observe(Dependency::field(child, &rel.spec.foreign_key));
        if fk.is_nil() {
            return Ok(None);
        }
        match rel.index {
            None => {
                let Some(id) = fk.as_str() else {
                    return Ok(None);
                };
                let owner = EntityRef::new(rel.spec.target.clone(), EntityId::new(id));
                let live = self.state.borrow().db.is_live(&owner);
                self.observe(Dependency::field(&owner, ID_FIELD));
                Ok(live.then_some(owner))
            }
            Some(slot) => {
                let path = vec![fk];
                let owner = {
                    let state = self.state.borrow();
                    state
                        .db
                        .collection(&rel.spec.target)?
                        .index(slot)?
                        .lookup(&path)
                        .and_then(|list| list.first().and_then(Value::as_entity).cloned())
                };
                self.observe(Dependency::Index {
                    collection: rel.spec.target.clone(),
                    index: slot,
                    path,
                });
                Ok(owner)
            }
        }
    }

    fn has_many_of(&self, owner: &EntityRef, name: &str) -> Result<ResolvedHasMany> {
        self.state
            .borrow()
            .db
            .relations()
            .has_many(&owner.collection, name)
            .cloned()
            .ok_or_else(|| Error::unknown_member(owner.collection.to_string(), name))
    }

    fn belongs_to_of(&self, child: &EntityRef, name: &str) -> Result<ResolvedBelongsTo> {
        self.state
            .borrow()
            .db
            .relations()
            .belongs_to(&child.collection, name)
            .cloned()
            .ok_or_else(|| Error::unknown_member(child.collection.to_string(), name))
    }

    /// Current children without recording a read.
    fn children(&self, owner: &EntityRef, rel: &ResolvedHasMany) -> Result<Vec<EntityRef>> {
        let state = self.state.borrow();
        let pk = state.db.record(owner)?.value(&rel.spec.primary_key);
        if pk.is_nil() {
            return Ok(Vec::new());
        }
        let target = state.db.collection(&rel.spec.target)?;
        let Some(bucket) = target.index(rel.index)?.lookup(std::slice::from_ref(&pk)) else {
            return Ok(Vec::new());
        };
        let list = if rel.exact {
            bucket
        } else {
            target.sorted(&bucket, &rel.sort)
        };
        Ok(list.iter().filter_map(Value::as_entity).cloned().collect())
    }

    /// Primary key value children must hold to belong to `owner`.
    fn owner_key(&self, owner: &EntityRef, rel: &ResolvedHasMany) -> Result<Value> {
        let pk = self.state.borrow().db.record(owner)?.value(&rel.spec.primary_key);
        if pk.is_nil() {
            return Err(Error::illegal_mutation(format!(
                "{owner}.{} is nil, so {owner}.{} cannot hold children",
                rel.spec.primary_key, rel.spec.name
            )));
        }
        Ok(pk)
    }

    fn check_child(rel: &ResolvedHasMany, owner: &EntityRef, child: &EntityRef) -> Result<()> {
        if child.collection != rel.spec.target {
            return Err(Error::illegal_mutation(format!(
                "{child} cannot be a member of {owner}.{}, which holds {}",
                rel.spec.name, rel.spec.target
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    /// Makes the children of `owner` exactly the entities in `value`.
    pub(crate) fn assign_related(&self, owner: &EntityRef, name: &str, value: Value) -> Result<()> {
        let rel = self.has_many_of(owner, name)?;
        let wanted: Vec<EntityRef> = match &value {
            Value::Nil => Vec::new(),
            Value::List(items) => items
                .iter()
                .map(|item| match item {
                    Value::Ref(child) => Self::check_child(&rel, owner, child).map(|()| child.clone()),
                    other => Err(Error::illegal_mutation(format!(
                        "{owner}.{name} only holds {} entities, not {other}",
                        rel.spec.target
                    ))),
                })
                .collect::<Result<_>>()?,
            other => {
                return Err(Error::illegal_mutation(format!(
                    "{owner}.{name} must be assigned a list, not {other}"
                )));
            }
        };

        let current = self.children(owner, &rel)?;
        for child in current.iter().filter(|c| !wanted.contains(c)) {
            self.write_field(child, &rel.spec.foreign_key, Value::Nil)?;
        }
        if wanted.is_empty() {
            return Ok(());
        }
        let pk = self.owner_key(owner, &rel)?;
        for child in &wanted {
            self.write_field(child, &rel.spec.foreign_key, pk.clone())?;
        }
        Ok(())
    }

    /// Points the foreign key of `child` at the owner in `value`.
    pub(crate) fn assign_owner(&self, child: &EntityRef, name: &str, value: Value) -> Result<()> {
        let rel = self.belongs_to_of(child, name)?;
        let key = match &value {
            Value::Nil => Value::Nil,
            Value::Ref(owner) if owner.collection == rel.spec.target => {
                let pk = self.state.borrow().db.record(owner)?.value(&rel.spec.primary_key);
                if pk.is_nil() {
                    return Err(Error::illegal_mutation(format!(
                        "{owner}.{} is nil, so {child}.{name} cannot refer to it",
                        rel.spec.primary_key
                    )));
                }
                pk
            }
            other => {
                return Err(Error::illegal_mutation(format!(
                    "{child}.{name} must be a {} entity or nil, not {other}",
                    rel.spec.target
                )));
            }
        };
        self.write_field(child, &rel.spec.foreign_key, key).map(|_| ())
    }

    // =========================================================================
    // List Operations
    // =========================================================================

    /// Adds `child` to the `has_many` named `name` on `owner`.
    ///
    /// The child lands where the relationship's sort puts it.
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` outside an action, for a child of the wrong
    /// collection, or if the owner's primary key is nil.
    pub fn push_related(&self, owner: &EntityRef, name: &str, child: &EntityRef) -> Result<()> {
        self.require_action(|| format!("cannot modify {owner}.{name}"))?;
        let rel = self.has_many_of(owner, name)?;
        Self::check_child(&rel, owner, child)?;
        let pk = self.owner_key(owner, &rel)?;
        self.write_field(child, &rel.spec.foreign_key, pk).map(|_| ())
    }

    /// Detaches the last child of the `has_many` named `name` and returns it.
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` outside an action.
    pub fn pop_related(&self, owner: &EntityRef, name: &str) -> Result<Option<EntityRef>> {
        self.require_action(|| format!("cannot modify {owner}.{name}"))?;
        let rel = self.has_many_of(owner, name)?;
        let Some(child) = self.children(owner, &rel)?.pop() else {
            return Ok(None);
        };
        self.write_field(&child, &rel.spec.foreign_key, Value::Nil)?;
        Ok(Some(child))
    }

    /// Detaches the child at `index` and returns it.
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` outside an action or if `index` is out of range.
    pub fn remove_related_at(&self, owner: &EntityRef, name: &str, index: usize) -> Result<EntityRef> {
        self.require_action(|| format!("cannot modify {owner}.{name}"))?;
        let rel = self.has_many_of(owner, name)?;
        let children = self.children(owner, &rel)?;
        let Some(child) = children.get(index) else {
            return Err(Error::illegal_mutation(format!(
                "{owner}.{name} has {} members, no index {index}",
                children.len()
            )));
        };
        self.write_field(child, &rel.spec.foreign_key, Value::Nil)?;
        Ok(child.clone())
    }

    /// Replaces the child at `index` with `child`, or detaches it for `None`.
    ///
    /// An index equal to the length appends. The new child takes the place
    /// the relationship's sort gives it, not necessarily `index`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` outside an action, past the end of the
    /// list, or for a child of the wrong collection.
    pub fn set_related_at(
        &self,
        owner: &EntityRef,
        name: &str,
        index: usize,
        child: Option<&EntityRef>,
    ) -> Result<()> {
        self.require_action(|| format!("cannot modify {owner}.{name}"))?;
        let rel = self.has_many_of(owner, name)?;
        let children = self.children(owner, &rel)?;
        if index > children.len() {
            return Err(Error::illegal_mutation(format!(
                "{owner}.{name} has {} members, no index {index}",
                children.len()
            )));
        }
        if let Some(child) = child {
            Self::check_child(&rel, owner, child)?;
        }
        if let Some(previous) = children.get(index) {
            if Some(previous) != child {
                self.write_field(previous, &rel.spec.foreign_key, Value::Nil)?;
            }
        }
        if let Some(child) = child {
            let pk = self.owner_key(owner, &rel)?;
            self.write_field(child, &rel.spec.foreign_key, pk)?;
        }
        Ok(())
    }

    // =========================================================================
    // Removal Policies
    // =========================================================================

    /// Applies the removal policy of every relationship touching `entity`.
    pub(crate) fn cascade(&self, entity: &EntityRef) -> Result<()> {
        let (owned, declared) = {
            let state = self.state.borrow();
            let relations = state.db.relations();
            let owned: Vec<ResolvedHasMany> = relations
                .owned_by(&entity.collection)
                .filter(|r| r.spec.dependent != Dependent::None)
                .cloned()
                .collect();
            let declared: Vec<ResolvedBelongsTo> = relations
                .declared_on(&entity.collection)
                .filter(|r| r.spec.dependent == Dependent::Remove)
                .cloned()
                .collect();
            (owned, declared)
        };

        for rel in owned {
            for child in self.children(entity, &rel)? {
                match rel.spec.dependent {
                    Dependent::Remove => self.remove(&child)?,
                    Dependent::Nullify => {
                        self.write_field(&child, &rel.spec.foreign_key, Value::Nil)?;
                    }
                    Dependent::None => {}
                }
            }
        }
        for rel in declared {
            let owner = {
                let state = self.state.borrow();
                let fk = state.db.record(entity)?.value(&rel.spec.foreign_key);
                owners_with(&state.db, &rel.spec.target, &rel.spec.primary_key, &fk)
                    .into_iter()
                    .next()
            };
            if let Some(owner) = owner {
                self.remove(&owner)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Change Bookkeeping
    // =========================================================================

    /// Records which relationship members a field change affects.
    ///
    /// A foreign key change alters the `has_many` of the old and new owners
    /// and the `belongs_to` of the child; a primary key change alters the
    /// owner's `has_many`.
    pub(crate) fn note_relations(&self, entity: &EntityRef, field: &str, old: &Value, new: &Value) -> Result<()> {
        let mut derived: Vec<(EntityRef, Arc<str>)> = Vec::new();
        {
            let state = self.state.borrow();
            let relations = state.db.relations();
            for rel in relations.has_many_by_foreign_key(&entity.collection, field) {
                for key in [old, new] {
                    for owner in owners_with(&state.db, &rel.owner, &rel.spec.primary_key, key) {
                        derived.push((owner, rel.spec.name.clone()));
                    }
                }
            }
            for rel in relations
                .declared_on(&entity.collection)
                .filter(|r| &*r.spec.foreign_key == field)
            {
                derived.push((entity.clone(), rel.spec.name.clone()));
            }
            for rel in relations.has_many_by_primary_key(&entity.collection, field) {
                derived.push((entity.clone(), rel.spec.name.clone()));
            }
        }
        if derived.is_empty() {
            return Ok(());
        }
        self.with_tx(|tx| {
            for (entity, name) in derived {
                tx.note_derived(entity, name);
            }
        })
    }
}

/// Live members of `collection` whose `field` holds `key`.
fn owners_with(db: &Database, collection: &str, field: &str, key: &Value) -> Vec<EntityRef> {
    if key.is_nil() {
        return Vec::new();
    }
    let Ok(c) = db.collection(collection) else {
        return Vec::new();
    };
    if field == ID_FIELD {
        return key
            .as_str()
            .map(EntityId::new)
            .filter(|id| c.contains(id))
            .map(|id| c.entity_ref(&id))
            .into_iter()
            .collect();
    }
    let by_index = c.indexes().iter().find(|i| {
        let hash = i.spec().hash_fields();
        hash.len() == 1 && &*hash[0] == field
    });
    if let Some(index) = by_index {
        return index
            .lookup(std::slice::from_ref(key))
            .map(|list| list.iter().filter_map(Value::as_entity).cloned().collect())
            .unwrap_or_default();
    }
    c.members()
        .filter(|e| c.record(&e.id).is_ok_and(|r| r.get(field) == Some(key)))
        .collect()
}

//! The store: entity access, membership, and index queries.
//!
//! Entities are plain records behind stable [`EntityRef`] handles. Every
//! access goes through the store, which is where reads are recorded for the
//! running reactive unit and where writes are checked, stamped, indexed,
//! and turned into invalidations. This takes the place of intercepting
//! property access on the entity itself.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use trellis_foundation::{Clock, EntityId, EntityRef, Error, LtVec, Result, Stamp, Value};
use trellis_storage::{Database, Dependency, Descriptor, IndexSpec, UnitId, ID_FIELD};

use crate::action::Transaction;
use crate::config::{ChangeListener, StoreConfig, TraceListener};
use crate::graph::ReactiveGraph;
use crate::model::{Draft, EntityModel, ReactionFn, ServiceModel};
use crate::trace::TraceEvent;
use crate::tracker::Tracker;
use crate::view::Subscriber;

/// Everything an action may change; restored wholesale on failure.
#[derive(Clone, Debug)]
pub(crate) struct State {
    pub db: Database,
    pub graph: ReactiveGraph,
}

/// Memoized derived lists: collection, index slot, hash path, sort.
type ViewKey = (Arc<str>, usize, Vec<Value>, Arc<str>);

/// A reactive relational object store.
///
/// All methods take `&self`; callbacks registered with the store receive
/// the same `&Store` and may read and (inside actions) write through it.
pub struct Store {
    pub(crate) models: HashMap<Arc<str>, EntityModel>,
    pub(crate) services: HashMap<Arc<str>, ServiceModel>,
    pub(crate) state: RefCell<State>,
    pub(crate) tracker: RefCell<Tracker>,
    pub(crate) tx: RefCell<Option<Transaction>>,
    pub(crate) clock: Clock,
    pub(crate) actions: Cell<u64>,
    pub(crate) baseline: State,
    pub(crate) views: RefCell<HashMap<ViewKey, (Stamp, LtVec<Value>)>>,
    pub(crate) listeners: Vec<ChangeListener>,
    pub(crate) subscriptions: RefCell<BTreeMap<u64, Subscriber>>,
    pub(crate) next_subscription: Cell<u64>,
    pub(crate) max_reaction_runs: usize,
    debug: Option<TraceListener>,
    next_unit: Cell<u64>,
    empty: LtVec<Value>,
}

impl Store {
    /// Builds a store and runs every service reaction once.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` for inconsistent models, and any error raised
    /// by a service reaction.
    pub fn new(config: StoreConfig) -> Result<Self> {
        let mut models = HashMap::new();
        let mut schemas = Vec::with_capacity(config.collections.len());
        for model in config.collections {
            model.validate()?;
            schemas.push(model.schema.clone());
            models.insert(model.name().clone(), model);
        }

        let mut services = HashMap::new();
        let mut service_reactions: Vec<(Arc<str>, ReactionFn)> = Vec::new();
        for service in config.services {
            if models.contains_key(service.name()) || services.contains_key(service.name()) {
                return Err(Error::invalid_schema(format!(
                    "{} is declared more than once",
                    service.name()
                )));
            }
            for (name, body) in &service.reactions {
                service_reactions.push((format!("{}.{name}", service.name()).into(), body.clone()));
            }
            services.insert(service.name().clone(), service);
        }

        let db = Database::new(schemas)?;
        let state = State {
            db,
            graph: ReactiveGraph::default(),
        };
        let mut store = Self {
            models,
            services,
            baseline: state.clone(),
            state: RefCell::new(state),
            tracker: RefCell::new(Tracker::default()),
            tx: RefCell::new(None),
            clock: Clock::new(),
            actions: Cell::new(0),
            views: RefCell::new(HashMap::new()),
            listeners: config.listeners,
            subscriptions: RefCell::new(BTreeMap::new()),
            next_subscription: Cell::new(0),
            max_reaction_runs: config.max_reaction_runs,
            debug: config.debug,
            next_unit: Cell::new(0),
            empty: LtVec::new(),
        };
        store.trace_synthesized_indexes();

        store.run_action(Some("init".into()), false, |store| {
            for (name, body) in service_reactions {
                let seq = store.state.borrow_mut().db.next_seq();
                let id = store.register_reaction(name, (seq, 0), None, body);
                store.schedule((seq, 0), id, Vec::new())?;
            }
            Ok(())
        })?;
        let baseline = store.state.borrow().clone();
        store.baseline = baseline;
        Ok(store)
    }

    fn trace_synthesized_indexes(&self) {
        if self.debug.is_none() {
            return;
        }
        let state = self.state.borrow();
        let relations = state.db.relations();
        for collection in state.db.collections() {
            for rel in relations.owned_by(collection.name()).filter(|r| r.synthesized) {
                let spec = state
                    .db
                    .collection(&rel.spec.target)
                    .and_then(|c| c.index(rel.index))
                    .map(|i| i.spec().to_string())
                    .unwrap_or_default();
                self.trace(|| TraceEvent::IndexSynthesized {
                    collection: rel.spec.target.clone(),
                    spec,
                });
            }
        }
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    pub(crate) fn trace(&self, event: impl FnOnce() -> TraceEvent) {
        if let Some(listener) = &self.debug {
            listener(&event());
        }
    }

    pub(crate) fn model(&self, collection: &str) -> Result<&EntityModel> {
        self.models
            .get(collection)
            .ok_or_else(|| Error::unknown_collection(collection))
    }

    pub(crate) fn next_unit_id(&self) -> UnitId {
        self.next_unit.set(self.next_unit.get() + 1);
        UnitId(self.next_unit.get())
    }

    /// Current stamp of any key, selectors included.
    pub(crate) fn stamp_of(&self, dep: &Dependency) -> Stamp {
        let state = self.state.borrow();
        match dep {
            Dependency::Selector(id) => state.graph.unit(*id).map_or(Stamp::ZERO, |u| u.value_stamp()),
            _ => state.db.stamp_of(dep),
        }
    }

    /// Records a read with the innermost evaluating unit, if any.
    pub(crate) fn observe(&self, dep: Dependency) {
        if !self.tracker.borrow().is_tracking() {
            return;
        }
        let stamp = self.stamp_of(&dep);
        self.tracker.borrow_mut().record(dep, stamp);
    }

    /// Applies a database mutation and invalidates whatever it touched.
    pub(crate) fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Database, Stamp, &mut Vec<Dependency>) -> Result<T>,
    ) -> Result<T> {
        let mut touched = Vec::new();
        let result = {
            let mut state = self.state.borrow_mut();
            f(&mut state.db, self.clock.tick(), &mut touched)
        };
        if !touched.is_empty() {
            self.forget_emptied_views(&touched);
            self.invalidate(&touched)?;
        }
        result
    }

    /// An empty list that keeps its identity across reads.
    pub(crate) fn empty_list(&self) -> LtVec<Value> {
        self.empty.clone()
    }

    /// Returns the cached list for `key` if it was built at `stamp`.
    pub(crate) fn memoized(&self, key: ViewKey, stamp: Stamp, build: impl FnOnce() -> LtVec<Value>) -> LtVec<Value> {
        let mut views = self.views.borrow_mut();
        if let Some((cached, list)) = views.get(&key) {
            if *cached == stamp {
                return list.clone();
            }
        }
        let list = build();
        views.insert(key, (stamp, list.clone()));
        list
    }

    /// Drops cached lists of buckets that `touched` left empty.
    fn forget_emptied_views(&self, touched: &[Dependency]) {
        let state = self.state.borrow();
        let gone: Vec<(&Arc<str>, usize, &Vec<Value>)> = touched
            .iter()
            .filter_map(|dep| match dep {
                Dependency::Index { collection, index, path } => {
                    let stamp = state.db.collection(collection).ok()?.index(*index).ok()?.stamp_at(path);
                    (stamp == Stamp::ZERO).then_some((collection, *index, path))
                }
                _ => None,
            })
            .collect();
        if gone.is_empty() {
            return;
        }
        self.views.borrow_mut().retain(|(collection, slot, path, _), _| {
            !gone.iter().any(|&(c, i, p)| c == collection && i == *slot && p == path)
        });
    }

    fn is_computed(model: &EntityModel, name: &str) -> bool {
        model.selector(name).is_some() || model.reaction_names().any(|n| &**n == name)
    }

    // =========================================================================
    // Entity Access
    // =========================================================================

    /// Reads a member of an entity: a data field, a selector, or a relationship.
    ///
    /// # Errors
    ///
    /// Returns `InertEntity` for removed entities, `UnknownEntity` for unknown
    /// ones, and `UnknownMember` for undeclared fields of strict collections.
    pub fn get(&self, entity: &EntityRef, name: &str) -> Result<Value> {
        let model = self.model(&entity.collection)?;
        if model.selector(name).is_some() {
            return self.select(entity, name);
        }
        if model.has_many(name) {
            return self.related(entity, name).map(Value::List);
        }
        if model.belongs_to(name) {
            return Ok(self.owner_of(entity, name)?.map_or(Value::Nil, Value::Ref));
        }
        if !model.schema.accepts(name) {
            return Err(Error::unknown_member(entity.collection.to_string(), name));
        }
        let value = self.state.borrow().db.record(entity)?.value(name);
        self.observe(Dependency::field(entity, name));
        Ok(value)
    }

    /// Writes a member of an entity.
    ///
    /// Writing the current value is a no-op: nothing is stamped and no
    /// reaction or hook runs. Assigning a relationship reconciles the
    /// foreign keys of the related entities.
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` outside an action or for computed members
    /// and the id, plus the errors of the underlying write.
    pub fn set(&self, entity: &EntityRef, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.require_action(|| format!("cannot write {entity}.{name}"))?;
        let model = self.model(&entity.collection)?;
        if Self::is_computed(model, name) {
            return Err(Error::illegal_mutation(format!(
                "{entity}.{name} is computed and cannot be assigned"
            )));
        }
        if model.has_many(name) {
            return self.assign_related(entity, name, value);
        }
        if model.belongs_to(name) {
            return self.assign_owner(entity, name, value);
        }
        self.write_field(entity, name, value).map(|_| ())
    }

    /// Deletes a data field. Returns false if it was not present.
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` outside an action or for members that are
    /// not data fields.
    pub fn delete(&self, entity: &EntityRef, name: &str) -> Result<bool> {
        self.require_action(|| format!("cannot delete {entity}.{name}"))?;
        let model = self.model(&entity.collection)?;
        if Self::is_computed(model, name) || model.schema.is_relation(name) {
            return Err(Error::illegal_mutation(format!("{entity}.{name} cannot be deleted")));
        }
        let old = self.mutate(|db, now, touched| db.delete(entity, name, now, touched))?;
        let Some(old) = old else {
            return Ok(false);
        };
        self.trace(|| TraceEvent::PropertyWritten {
            entity: entity.clone(),
            field: name.into(),
            old: old.clone(),
            new: Value::Nil,
        });
        self.with_tx(|tx| tx.note_write(entity.clone(), name.into(), old.clone()))?;
        self.note_relations(entity, name, &old, &Value::Nil)?;
        Ok(true)
    }

    /// Returns true if `name` is a member of the entity.
    ///
    /// # Errors
    ///
    /// Returns `InertEntity` or `UnknownEntity` if the entity is not live.
    pub fn has(&self, entity: &EntityRef, name: &str) -> Result<bool> {
        let model = self.model(&entity.collection)?;
        let present = self.state.borrow().db.record(entity)?.has(name);
        if Self::is_computed(model, name) || model.schema.is_relation(name) {
            return Ok(true);
        }
        self.observe(Dependency::field(entity, name));
        Ok(present)
    }

    /// Names of the data fields present on the entity, sorted.
    ///
    /// # Errors
    ///
    /// Returns `InertEntity` or `UnknownEntity` if the entity is not live.
    pub fn keys(&self, entity: &EntityRef) -> Result<Vec<Arc<str>>> {
        let keys = self.state.borrow().db.record(entity)?.keys();
        self.observe(Dependency::Shape(entity.clone()));
        Ok(keys)
    }

    /// Describes a member of the entity.
    ///
    /// Computed members and relationships are not enumerable and carry no
    /// stored value.
    ///
    /// # Errors
    ///
    /// Returns `InertEntity` or `UnknownEntity` if the entity is not live.
    pub fn descriptor(&self, entity: &EntityRef, name: &str) -> Result<Option<Descriptor>> {
        let model = self.model(&entity.collection)?;
        let stored = self.state.borrow().db.record(entity)?.descriptor(name);
        if Self::is_computed(model, name) || model.schema.is_relation(name) {
            return Ok(Some(Descriptor {
                value: None,
                writable: model.schema.is_relation(name),
                enumerable: false,
            }));
        }
        self.observe(Dependency::field(entity, name));
        Ok(stored)
    }

    /// Redefining a member is not a supported mutation path.
    ///
    /// # Errors
    ///
    /// Always returns `IllegalMutation`.
    pub fn define_property(&self, entity: &EntityRef, name: &str, _descriptor: Descriptor) -> Result<()> {
        Err(Error::illegal_mutation(format!(
            "cannot redefine property {name} of {entity}"
        )))
    }

    /// Changing the type of an entity is not a supported mutation path.
    ///
    /// # Errors
    ///
    /// Always returns `IllegalMutation`.
    pub fn retype(&self, entity: &EntityRef, collection: &str) -> Result<()> {
        Err(Error::illegal_mutation(format!(
            "cannot change the type of {entity} to {collection}"
        )))
    }

    /// Returns the current version of an entity, or `None` once removed.
    ///
    /// The snapshot changes identity on every committed write to the entity.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` or `UnknownEntity`.
    pub fn current_entity(&self, entity: &EntityRef) -> Result<Option<EntitySnapshot>> {
        let snapshot = {
            let state = self.state.borrow();
            let collection = state.db.collection(&entity.collection)?;
            if collection.is_removed(&entity.id) {
                None
            } else {
                let revision = collection.record(&entity.id)?.revision();
                Some(EntitySnapshot {
                    entity: entity.clone(),
                    revision,
                })
            }
        };
        self.observe(Dependency::Entity(entity.clone()));
        Ok(snapshot)
    }

    pub(crate) fn write_field(&self, entity: &EntityRef, field: &str, value: Value) -> Result<bool> {
        self.require_action(|| format!("cannot write {entity}.{field}"))?;
        let new = value.clone();
        let old = self.mutate(|db, now, touched| db.write(entity, field, value, now, touched))?;
        let Some(old) = old else {
            return Ok(false);
        };
        let old = old.unwrap_or_default();
        self.trace(|| TraceEvent::PropertyWritten {
            entity: entity.clone(),
            field: field.into(),
            old: old.clone(),
            new: new.clone(),
        });
        self.with_tx(|tx| tx.note_write(entity.clone(), field.into(), old.clone()))?;
        self.note_relations(entity, field, &old, &new)?;
        Ok(true)
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Adds an entity built from `draft` to `collection`.
    ///
    /// The id comes from the draft or is generated. Declared fields missing
    /// from the draft get their defaults, relationship members in the draft
    /// are assigned once the entity is live, the entity's reactions are
    /// queued, and `afterAdd` hooks run.
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` outside an action or when the draft assigns
    /// a computed member, `UniqueConstraintViolation` for a taken id or a
    /// unique index collision, and `UnknownMember` for undeclared fields of
    /// a strict collection.
    pub fn add(&self, collection: &str, draft: Draft) -> Result<EntityRef> {
        self.require_action(|| format!("cannot add to {collection}"))?;
        let model = self.model(collection)?;
        let (id, members) = draft.into_parts();
        let mut fields = Vec::new();
        let mut relations = Vec::new();
        for (name, value) in members {
            if Self::is_computed(model, &name) {
                return Err(Error::illegal_mutation(format!(
                    "{collection}.{name} is computed and cannot be assigned"
                )));
            }
            if model.schema.is_relation(&name) {
                relations.push((name, value));
            } else {
                fields.push((name, value));
            }
        }

        let (entity, seq) = self.mutate(|db, now, touched| db.add(collection, id, fields, now, touched))?;
        self.with_tx(|tx| tx.note_added(entity.clone()))?;
        self.trace(|| TraceEvent::EntityAdded { entity: entity.clone() });

        let record = self.state.borrow().db.record(&entity)?.clone();
        for (field, value) in record.iter().filter(|(_, v)| !v.is_nil()) {
            self.note_relations(&entity, field, &Value::Nil, value)?;
        }

        let chain = self.tracker.borrow().reaction_chain();
        for (decl, (name, body)) in model.reactions.iter().enumerate() {
            let owner = entity.clone();
            let body = body.clone();
            let id = self.register_reaction(
                format!("{entity}.{name}").into(),
                (seq, decl),
                Some(entity.clone()),
                Rc::new(move |store: &Store| body(store, &owner)),
            );
            self.schedule((seq, decl), id, chain.clone())?;
        }

        for (name, value) in relations {
            self.set(&entity, &name, value)?;
        }
        for hook in &model.after_add {
            hook(self, &entity).map_err(|e| e.with_frame(format!("{entity}.afterAdd")))?;
        }
        Ok(entity)
    }

    /// Removes an entity from its collection.
    ///
    /// Relationship cascades run first, then `afterRemove` hooks, then the
    /// entity leaves its collection and every index. Removing an entity that
    /// is already removed (or whose removal is in progress) does nothing.
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` outside an action and `UnknownEntity` for
    /// ids never added.
    pub fn remove(&self, entity: &EntityRef) -> Result<()> {
        self.require_action(|| format!("cannot remove {entity}"))?;
        let model = self.model(&entity.collection)?;
        {
            let state = self.state.borrow();
            let collection = state.db.collection(&entity.collection)?;
            if collection.is_removed(&entity.id) {
                return Ok(());
            }
            if !collection.contains(&entity.id) {
                return Err(Error::unknown_entity(entity.clone()));
            }
        }
        if !self.with_tx(|tx| tx.cascade.insert(entity.clone()))? {
            return Ok(());
        }

        self.cascade(entity)?;
        for hook in &model.after_remove {
            hook(self, entity).map_err(|e| e.with_frame(format!("{entity}.afterRemove")))?;
        }

        let Some(record) = self.mutate(|db, now, touched| db.remove(entity, now, touched))? else {
            return Ok(());
        };
        for (field, value) in record.iter().filter(|(_, v)| !v.is_nil()) {
            self.note_relations(entity, field, value, &Value::Nil)?;
        }
        self.with_tx(|tx| tx.note_removed(entity.clone()))?;
        self.state.borrow_mut().graph.dispose_owned(entity);
        self.trace(|| TraceEvent::EntityRemoved { entity: entity.clone() });
        Ok(())
    }

    // =========================================================================
    // Collection Queries
    // =========================================================================

    /// Live members of a collection in the order they were added.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection`.
    pub fn all(&self, collection: &str) -> Result<Vec<EntityRef>> {
        let (name, members) = {
            let state = self.state.borrow();
            let c = state.db.collection(collection)?;
            (c.name().clone(), c.members().collect())
        };
        self.observe(Dependency::Members(name));
        Ok(members)
    }

    /// Finds a live member by id.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection`.
    pub fn find(&self, collection: &str, id: impl Into<EntityId>) -> Result<Option<EntityRef>> {
        let id = id.into();
        let entity = {
            let state = self.state.borrow();
            let c = state.db.collection(collection)?;
            let entity = c.entity_ref(&id);
            c.contains(&id).then_some(entity)
        };
        let key = EntityRef::new(collection, id);
        self.observe(Dependency::field(&key, ID_FIELD));
        Ok(entity)
    }

    /// Number of live members.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection`.
    pub fn len(&self, collection: &str) -> Result<usize> {
        let (name, len) = {
            let state = self.state.borrow();
            let c = state.db.collection(collection)?;
            (c.name().clone(), c.len())
        };
        self.observe(Dependency::Members(name));
        Ok(len)
    }

    /// Returns true if the entity is live.
    #[must_use]
    pub fn contains(&self, entity: &EntityRef) -> bool {
        let live = self.state.borrow().db.is_live(entity);
        self.observe(Dependency::field(entity, ID_FIELD));
        live
    }

    /// Members under `path` in the index declared as `index` (for example
    /// `"=user_id, -num"` or `"unique =email"`), in index order.
    ///
    /// The returned list keeps its identity until the members under `path`
    /// change.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection`, `InvalidSchema` for a malformed
    /// declaration, and `UnknownMember` if no such index is maintained.
    pub fn lookup(&self, collection: &str, index: &str, path: &[Value]) -> Result<LtVec<Value>> {
        let (name, slot) = self.index_slot(collection, index)?;
        let (list, stamp, bucket) = {
            let state = self.state.borrow();
            let idx = state.db.collection(collection)?.index(slot)?;
            (
                idx.lookup(path),
                idx.stamp_at(path),
                path.len() >= idx.spec().hash_fields().len(),
            )
        };
        self.observe(Dependency::Index {
            collection: name.clone(),
            index: slot,
            path: path.to_vec(),
        });
        Ok(match list {
            None => self.empty_list(),
            Some(list) if bucket => list,
            Some(list) => self.memoized((name, slot, path.to_vec(), "".into()), stamp, || list),
        })
    }

    /// Hash keys one level below `path` in the index declared as `index`, sorted.
    ///
    /// # Errors
    ///
    /// As for [`Store::lookup`].
    pub fn index_keys(&self, collection: &str, index: &str, path: &[Value]) -> Result<Vec<Value>> {
        let (name, slot) = self.index_slot(collection, index)?;
        let keys = self
            .state
            .borrow()
            .db
            .collection(collection)?
            .index(slot)?
            .keys_at(path);
        self.observe(Dependency::Index {
            collection: name,
            index: slot,
            path: path.to_vec(),
        });
        Ok(keys)
    }

    fn index_slot(&self, collection: &str, index: &str) -> Result<(Arc<str>, usize)> {
        let wanted = match index.trim().strip_prefix("unique ") {
            Some(rest) => IndexSpec::unique(rest)?,
            None => IndexSpec::parse(index)?,
        };
        let state = self.state.borrow();
        let c = state.db.collection(collection)?;
        let slot = c
            .index_slot(&wanted)
            .ok_or_else(|| Error::unknown_member(collection, format!("index {wanted}")))?;
        Ok((c.name().clone(), slot))
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Store")
            .field("collections", &state.db.collections().map(|c| c.name().clone()).collect::<Vec<_>>())
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .field("units", &state.graph.len())
            .field("actions", &self.actions.get())
            .field("in_action", &self.in_action())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Entity Snapshot
// =============================================================================

/// One committed version of an entity.
///
/// Two snapshots are [`same`](EntitySnapshot::same) only if no write to the
/// entity was committed between them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntitySnapshot {
    entity: EntityRef,
    revision: Stamp,
}

impl EntitySnapshot {
    /// The entity this is a version of.
    #[must_use]
    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    /// Stamp of the write that produced this version.
    #[must_use]
    pub const fn revision(&self) -> Stamp {
        self.revision
    }

    /// Identity comparison.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        self == other
    }
}

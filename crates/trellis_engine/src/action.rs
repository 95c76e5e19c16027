//! Actions: transactional batches of mutations.
//!
//! A top-level action snapshots the store, runs its body, then settles:
//! reactions run to a fixpoint, change hooks fire, and the two alternate
//! until neither has work left. On success a [`ChangeSummary`] goes to every
//! listener. On failure the snapshot is restored and no listener is called.
//!
//! Nested `action` calls run inline in the enclosing action.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use trellis_foundation::{EntityRef, Error, Result, Value};
use trellis_storage::UnitId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::store::{State, Store};
use crate::trace::TraceEvent;

// =============================================================================
// Change Summary
// =============================================================================

/// What one committed action did.
///
/// Entities added and removed within the same action appear in neither
/// list. Added entities are never listed as changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChangeSummary {
    /// Action number, counting from 1.
    pub action: u64,
    /// Name given to the action, if any.
    pub name: Option<String>,
    /// Entities that became live, sorted.
    pub added: Vec<EntityRef>,
    /// Entities that were removed, sorted.
    pub removed: Vec<EntityRef>,
    /// Entities whose members changed, sorted.
    pub changed: Vec<EntityChange>,
}

impl ChangeSummary {
    /// Returns true if the action changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Names of the changed members of `entity`, if it changed.
    #[must_use]
    pub fn changes_of(&self, entity: &EntityRef) -> Option<&[String]> {
        self.changed
            .iter()
            .find(|c| &c.entity == entity)
            .map(|c| c.properties.as_slice())
    }
}

/// One changed entity and its changed member names, sorted.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityChange {
    /// The entity.
    pub entity: EntityRef,
    /// Changed data properties and relationship names.
    pub properties: Vec<String>,
}

// =============================================================================
// Transaction
// =============================================================================

/// Scheduling key of a queued reaction.
pub(crate) type QueueKey = (u64, usize, UnitId);

/// Hooks owed to one entity: changed properties with their old values, and
/// whether `afterChange` is still due.
pub(crate) type HookBatch = Vec<(EntityRef, Vec<(Arc<str>, Value)>, bool)>;

/// Bookkeeping for the action in progress.
#[derive(Debug)]
pub(crate) struct Transaction {
    pub number: u64,
    pub name: Option<Arc<str>>,
    snapshot: State,
    /// Reactions awaiting the fixpoint, with the chain that triggered them.
    queue: BTreeMap<QueueKey, Vec<UnitId>>,
    pub runs: usize,
    added: BTreeSet<EntityRef>,
    removed: BTreeSet<EntityRef>,
    changed: BTreeMap<EntityRef, BTreeSet<Arc<str>>>,
    pending_props: BTreeMap<EntityRef, Vec<(Arc<str>, Value)>>,
    hooked_props: HashSet<(EntityRef, Arc<str>)>,
    pending_change: BTreeSet<EntityRef>,
    hooked: HashSet<EntityRef>,
    /// Entities whose removal has started in this action.
    pub cascade: HashSet<EntityRef>,
}

impl Transaction {
    pub(crate) fn new(number: u64, name: Option<Arc<str>>, snapshot: State) -> Self {
        Self {
            number,
            name,
            snapshot,
            queue: BTreeMap::new(),
            runs: 0,
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
            changed: BTreeMap::new(),
            pending_props: BTreeMap::new(),
            hooked_props: HashSet::new(),
            pending_change: BTreeSet::new(),
            hooked: HashSet::new(),
            cascade: HashSet::new(),
        }
    }

    /// Queues a reaction. The first trigger path wins.
    pub(crate) fn enqueue(&mut self, key: QueueKey, path: Vec<UnitId>) -> bool {
        if self.queue.contains_key(&key) {
            return false;
        }
        self.queue.insert(key, path);
        true
    }

    pub(crate) fn pop(&mut self) -> Option<(UnitId, Vec<UnitId>)> {
        self.queue.pop_first().map(|((_, _, id), path)| (id, path))
    }

    pub(crate) fn note_added(&mut self, entity: EntityRef) {
        self.added.insert(entity);
    }

    pub(crate) fn note_removed(&mut self, entity: EntityRef) {
        self.changed.remove(&entity);
        self.pending_props.remove(&entity);
        self.pending_change.remove(&entity);
        self.removed.insert(entity);
    }

    fn is_fresh(&self, entity: &EntityRef) -> bool {
        self.added.contains(entity) || self.removed.contains(entity)
    }

    /// Records a data property change; `old` is the value before the write.
    pub(crate) fn note_write(&mut self, entity: EntityRef, field: Arc<str>, old: Value) {
        if self.is_fresh(&entity) {
            return;
        }
        self.changed.entry(entity.clone()).or_default().insert(field.clone());
        if !self.hooked_props.contains(&(entity.clone(), field.clone())) {
            let pending = self.pending_props.entry(entity.clone()).or_default();
            if !pending.iter().any(|(name, _)| *name == field) {
                pending.push((field, old));
            }
        }
        if !self.hooked.contains(&entity) {
            self.pending_change.insert(entity);
        }
    }

    /// Records a change to a relationship-derived member.
    pub(crate) fn note_derived(&mut self, entity: EntityRef, name: Arc<str>) {
        if self.is_fresh(&entity) {
            return;
        }
        self.changed.entry(entity.clone()).or_default().insert(name);
        if !self.hooked.contains(&entity) {
            self.pending_change.insert(entity);
        }
    }

    /// Drains the hooks owed so far; each is owed at most once per action.
    pub(crate) fn take_hooks(&mut self) -> HookBatch {
        let mut entities: BTreeSet<EntityRef> = self.pending_props.keys().cloned().collect();
        entities.extend(self.pending_change.iter().cloned());
        let mut batch = Vec::with_capacity(entities.len());
        for entity in entities {
            let props = self.pending_props.remove(&entity).unwrap_or_default();
            for (name, _) in &props {
                self.hooked_props.insert((entity.clone(), name.clone()));
            }
            let change = self.pending_change.remove(&entity);
            if change {
                self.hooked.insert(entity.clone());
            }
            batch.push((entity, props, change));
        }
        batch
    }

    pub(crate) fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            action: self.number,
            name: self.name.as_deref().map(str::to_string),
            added: self.added.difference(&self.removed).cloned().collect(),
            removed: self.removed.difference(&self.added).cloned().collect(),
            changed: self
                .changed
                .iter()
                .filter(|(entity, _)| !self.is_fresh(entity))
                .map(|(entity, props)| EntityChange {
                    entity: entity.clone(),
                    properties: props.iter().map(|p| p.to_string()).collect(),
                })
                .collect(),
        }
    }

    pub(crate) fn into_snapshot(self) -> State {
        self.snapshot
    }
}

// =============================================================================
// Store Entry Points
// =============================================================================

impl Store {
    /// Runs `body` as an action.
    ///
    /// Mutations are only legal inside an action. A call made while another
    /// action is running joins it. A top-level call settles reactions and
    /// hooks before returning and then notifies listeners.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by the body, a reaction, a hook, or the
    /// fixpoint. The store is restored to its state before the action.
    pub fn action<T>(&self, body: impl FnOnce(&Store) -> Result<T>) -> Result<T> {
        self.run_action(None, true, body)
    }

    /// Runs `body` as an action whose summary carries `name`.
    ///
    /// # Errors
    ///
    /// As for [`Store::action`].
    pub fn named_action<T>(&self, name: &str, body: impl FnOnce(&Store) -> Result<T>) -> Result<T> {
        self.run_action(Some(name.into()), true, body)
    }

    /// Returns true while an action is running.
    #[must_use]
    pub fn in_action(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Resets every collection and service to the state right after the
    /// store was built. No listener is called.
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` inside an action.
    pub fn clear_state(&self) -> Result<()> {
        if self.in_action() {
            return Err(Error::illegal_mutation("cannot clear the store inside an action"));
        }
        *self.state.borrow_mut() = self.baseline.clone();
        self.views.borrow_mut().clear();
        Ok(())
    }

    pub(crate) fn run_action<T>(
        &self,
        name: Option<Arc<str>>,
        notify: bool,
        body: impl FnOnce(&Store) -> Result<T>,
    ) -> Result<T> {
        if self.in_action() {
            return body(self);
        }
        let number = if notify {
            self.actions.set(self.actions.get() + 1);
            self.actions.get()
        } else {
            0
        };
        let snapshot = self.state.borrow().clone();
        *self.tx.borrow_mut() = Some(Transaction::new(number, name.clone(), snapshot));
        self.trace(|| TraceEvent::ActionStarted { action: number, name });

        let result = body(self).and_then(|value| self.settle().map(|()| value));

        let Some(tx) = self.tx.borrow_mut().take() else {
            return Err(Error::internal("action state was lost"));
        };
        match result {
            Ok(value) => {
                let summary = tx.summary();
                self.trace(|| TraceEvent::ActionCommitted {
                    action: number,
                    reactions: tx.runs,
                });
                if notify {
                    self.notify(&summary);
                }
                Ok(value)
            }
            Err(err) => {
                *self.state.borrow_mut() = tx.into_snapshot();
                self.trace(|| TraceEvent::ActionRolledBack {
                    action: number,
                    error: err.to_string(),
                });
                Err(with_action(err, number))
            }
        }
    }

    /// Alternates the reaction fixpoint with change hooks until both are idle.
    fn settle(&self) -> Result<()> {
        loop {
            self.fixpoint()?;
            if !self.run_hooks()? {
                return Ok(());
            }
        }
    }

    fn run_hooks(&self) -> Result<bool> {
        let batch = self.with_tx(Transaction::take_hooks)?;
        if batch.is_empty() {
            return Ok(false);
        }
        for (entity, props, change) in batch {
            if !self.state.borrow().db.is_live(&entity) {
                continue;
            }
            let model = self.model(&entity.collection)?;
            for (name, old) in &props {
                for hook in &model.after_property_change {
                    hook(self, &entity, name, old)
                        .map_err(|e| e.with_frame(format!("{entity}.afterPropertyChange({name})")))?;
                }
            }
            if change {
                for hook in &model.after_change {
                    hook(self, &entity).map_err(|e| e.with_frame(format!("{entity}.afterChange")))?;
                }
            }
        }
        Ok(true)
    }

    pub(crate) fn with_tx<T>(&self, f: impl FnOnce(&mut Transaction) -> T) -> Result<T> {
        self.tx
            .borrow_mut()
            .as_mut()
            .map(f)
            .ok_or_else(|| Error::illegal_mutation("no action is running"))
    }

    pub(crate) fn require_action(&self, what: impl FnOnce() -> String) -> Result<()> {
        if self.tracker.borrow().in_selector() {
            return Err(Error::illegal_mutation(format!(
                "{}: selectors may not mutate the store",
                what()
            )));
        }
        if !self.in_action() {
            return Err(Error::illegal_mutation(format!("{} outside an action", what())));
        }
        Ok(())
    }
}

fn with_action(mut err: Error, number: u64) -> Error {
    let context = err.context.take().unwrap_or_default().with_action(number);
    err.with_context(context)
}

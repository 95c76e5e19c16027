//! The reactive graph: selectors, reactions, and who depends on what.
//!
//! Every reactive unit remembers the keys it read during its last evaluation
//! together with the stamp each key had at that moment. A unit is stale when
//! any of those stamps moved. The reverse map from key to readers lets a
//! mutation find the reactions it must schedule without scanning every unit.
//!
//! All state is held in persistent maps so the graph can be snapshotted
//! alongside the database and restored when an action fails.

use std::fmt;
use std::sync::Arc;

use trellis_foundation::{EntityRef, Stamp, Value};
use trellis_storage::{Dependency, UnitId};

use crate::model::{ReactionFn, SelectorFn};

// =============================================================================
// Units
// =============================================================================

/// Where a selector lives.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Scope {
    Entity(EntityRef),
    Collection(Arc<str>),
    Service(Arc<str>),
}

impl Scope {
    pub(crate) fn unit_name(&self, member: &str) -> Arc<str> {
        match self {
            Self::Entity(entity) => format!("{entity}.{member}").into(),
            Self::Collection(name) | Self::Service(name) => format!("{name}.{member}").into(),
        }
    }
}

/// Cached state of a selector.
#[derive(Clone)]
pub(crate) struct SelectorState {
    pub body: SelectorFn,
    pub value: Value,
    /// Stamp of the last evaluation that produced a different value.
    pub value_stamp: Stamp,
    /// Clock reading at which the cached value was last confirmed current.
    pub verified_at: Option<Stamp>,
}

#[derive(Clone)]
pub(crate) enum UnitKind {
    Reaction(ReactionFn),
    Selector(SelectorState),
}

/// One selector or reaction.
#[derive(Clone)]
pub(crate) struct Unit {
    pub name: Arc<str>,
    /// Scheduling key: owner sequence number, then declaration position.
    pub order: (u64, usize),
    pub owner: Option<EntityRef>,
    pub kind: UnitKind,
    pub deps: Vec<(Dependency, Stamp)>,
    pub ran: bool,
}

impl Unit {
    pub(crate) fn reaction(name: Arc<str>, order: (u64, usize), owner: Option<EntityRef>, body: ReactionFn) -> Self {
        Self {
            name,
            order,
            owner,
            kind: UnitKind::Reaction(body),
            deps: Vec::new(),
            ran: false,
        }
    }

    pub(crate) fn selector(name: Arc<str>, owner: Option<EntityRef>, body: SelectorFn) -> Self {
        Self {
            name,
            order: (0, 0),
            owner,
            kind: UnitKind::Selector(SelectorState {
                body,
                value: Value::Nil,
                value_stamp: Stamp::ZERO,
                verified_at: None,
            }),
            deps: Vec::new(),
            ran: false,
        }
    }

    pub(crate) const fn is_reaction(&self) -> bool {
        matches!(self.kind, UnitKind::Reaction(_))
    }

    pub(crate) fn value_stamp(&self) -> Stamp {
        match &self.kind {
            UnitKind::Selector(state) => state.value_stamp,
            UnitKind::Reaction(_) => Stamp::ZERO,
        }
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("reaction", &self.is_reaction())
            .field("deps", &self.deps.len())
            .field("ran", &self.ran)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Graph
// =============================================================================

/// Every live reactive unit plus the reverse dependency map.
#[derive(Clone, Debug, Default)]
pub(crate) struct ReactiveGraph {
    units: im::OrdMap<UnitId, Unit>,
    dependents: im::HashMap<Dependency, im::OrdSet<UnitId>>,
    selectors: im::HashMap<(Scope, Arc<str>), UnitId>,
    owned: im::HashMap<EntityRef, im::Vector<UnitId>>,
}

impl ReactiveGraph {
    pub(crate) fn insert(&mut self, id: UnitId, unit: Unit) {
        if let Some(owner) = &unit.owner {
            self.owned.entry(owner.clone()).or_default().push_back(id);
        }
        self.units.insert(id, unit);
    }

    pub(crate) fn insert_selector(&mut self, scope: Scope, member: Arc<str>, id: UnitId, unit: Unit) {
        self.selectors.insert((scope, member), id);
        self.insert(id, unit);
    }

    pub(crate) fn selector_id(&self, scope: &Scope, member: &str) -> Option<UnitId> {
        self.selectors.get(&(scope.clone(), Arc::from(member))).copied()
    }

    pub(crate) fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id)
    }

    pub(crate) fn unit_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.get_mut(&id)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: UnitId) -> bool {
        self.units.contains_key(&id)
    }

    pub(crate) fn name(&self, id: UnitId) -> Arc<str> {
        self.units
            .get(&id)
            .map_or_else(|| Arc::from(id.to_string()), |u| u.name.clone())
    }

    /// Replaces a unit's dependencies, keeping the reverse map in step.
    pub(crate) fn set_deps(&mut self, id: UnitId, deps: Vec<(Dependency, Stamp)>) {
        let Some(unit) = self.units.get_mut(&id) else {
            return;
        };
        let old = std::mem::replace(&mut unit.deps, deps.clone());
        unit.ran = true;
        for (dep, _) in old {
            self.unlink(&dep, id);
        }
        for (dep, _) in deps {
            self.dependents.entry(dep).or_default().insert(id);
        }
    }

    fn unlink(&mut self, dep: &Dependency, id: UnitId) {
        let empty = match self.dependents.get_mut(dep) {
            Some(readers) => {
                readers.remove(&id);
                readers.is_empty()
            }
            None => false,
        };
        if empty {
            self.dependents.remove(dep);
        }
    }

    /// Units whose last evaluation read `dep`.
    pub(crate) fn dependents_of(&self, dep: &Dependency) -> Vec<UnitId> {
        self.dependents
            .get(dep)
            .map(|readers| readers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Removes a unit. Returns false if it did not exist.
    pub(crate) fn remove(&mut self, id: UnitId) -> bool {
        let Some(unit) = self.units.remove(&id) else {
            return false;
        };
        for (dep, _) in &unit.deps {
            self.unlink(dep, id);
        }
        self.selectors.retain(|_, unit_id| *unit_id != id);
        true
    }

    /// Removes every unit owned by `entity`.
    pub(crate) fn dispose_owned(&mut self, entity: &EntityRef) -> usize {
        let Some(ids) = self.owned.remove(entity) else {
            return 0;
        };
        ids.into_iter().filter(|id| self.remove(*id)).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.units.len()
    }
}

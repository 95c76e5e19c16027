//! Selectors: memoized derived values.
//!
//! A selector is evaluated lazily on first read and cached with the keys it
//! read. Later reads re-evaluate only if one of those keys moved; a result
//! that is [`same`](Value::same) as the cached one keeps the old value and
//! stamp, so readers downstream do not see a change.

use std::rc::Rc;
use std::sync::Arc;

use trellis_foundation::{EntityRef, Error, Result, Value};
use trellis_storage::{Dependency, UnitId};

use crate::graph::{Scope, SelectorState, Unit, UnitKind};
use crate::model::SelectorFn;
use crate::store::Store;
use crate::trace::TraceEvent;
use crate::tracker::Frame;

impl Store {
    /// Reads a selector declared on an entity's collection.
    ///
    /// [`Store::get`] reaches the same value by member name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMember` if no such selector is declared, `InertEntity`
    /// for removed entities, and whatever the selector body raises.
    pub fn select(&self, entity: &EntityRef, name: &str) -> Result<Value> {
        let model = self.model(&entity.collection)?;
        let Some(body) = model.selector(name).cloned() else {
            return Err(Error::unknown_member(entity.collection.to_string(), name));
        };
        self.state.borrow().db.record(entity)?;
        let owner = entity.clone();
        self.read_selector(Scope::Entity(entity.clone()), name, Some(entity.clone()), move || {
            Rc::new(move |store: &Store| body(store, &owner))
        })
    }

    /// Reads a selector declared on a whole collection.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection`, `UnknownMember` if no such selector is
    /// declared, and whatever the selector body raises.
    pub fn collection_select(&self, collection: &str, name: &str) -> Result<Value> {
        let model = self.model(collection)?;
        let Some(body) = model.collection_selector(name).cloned() else {
            return Err(Error::unknown_member(collection, name));
        };
        self.read_selector(Scope::Collection(model.name().clone()), name, None, move || body)
    }

    /// Reads a selector declared on a service.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` for an unknown service, `UnknownMember`
    /// if no such selector is declared, and whatever the selector body
    /// raises.
    pub fn service_select(&self, service: &str, name: &str) -> Result<Value> {
        let Some(model) = self.services.get(service) else {
            return Err(Error::unknown_collection(service));
        };
        let Some(body) = model.selector(name).cloned() else {
            return Err(Error::unknown_member(service, name));
        };
        self.read_selector(Scope::Service(model.name().clone()), name, None, move || body)
    }

    fn read_selector(
        &self,
        scope: Scope,
        member: &str,
        owner: Option<EntityRef>,
        make: impl FnOnce() -> SelectorFn,
    ) -> Result<Value> {
        let existing = self.state.borrow().graph.selector_id(&scope, member);
        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.next_unit_id();
                let unit = Unit::selector(scope.unit_name(member), owner, make());
                self.state
                    .borrow_mut()
                    .graph
                    .insert_selector(scope, Arc::from(member), id, unit);
                id
            }
        };
        let value = self.refresh(id)?;
        self.observe(Dependency::Selector(id));
        Ok(value)
    }

    /// Brings a selector up to date and returns its value.
    pub(crate) fn refresh(&self, id: UnitId) -> Result<Value> {
        let cycle = self.tracker.borrow().stack_from(id);
        if let Some(stack) = cycle {
            let state = self.state.borrow();
            let chain = stack.iter().map(|u| state.graph.name(*u).to_string()).collect();
            return Err(Error::circular_dependency(chain));
        }

        let (name, body, value, verified_at, ran, deps) = {
            let state = self.state.borrow();
            let Some(unit) = state.graph.unit(id) else {
                return Ok(Value::Nil);
            };
            let UnitKind::Selector(selector) = &unit.kind else {
                return Ok(Value::Nil);
            };
            (
                unit.name.clone(),
                selector.body.clone(),
                selector.value.clone(),
                selector.verified_at,
                unit.ran,
                unit.deps.clone(),
            )
        };

        let now = self.clock.now();
        if verified_at == Some(now) {
            return Ok(value);
        }
        if ran && !self.deps_changed(&deps)? {
            self.with_selector(id, |selector| selector.verified_at = Some(now));
            self.trace(|| TraceEvent::SelectorReused { selector: name });
            return Ok(value);
        }

        self.tracker.borrow_mut().push(Frame::selector(id));
        let result = body(self);
        let frame = self.tracker.borrow_mut().pop();
        let computed = result.map_err(|e| e.with_frame(name.to_string()))?;

        let reads = frame.map(|f| f.reads).unwrap_or_default();
        self.state.borrow_mut().graph.set_deps(id, reads);
        let changed = !ran || !computed.same(&value);
        let current = if changed {
            let stamp = self.clock.tick();
            let verified = self.clock.now();
            let stored = computed.clone();
            self.with_selector(id, move |selector| {
                selector.value = stored;
                selector.value_stamp = stamp;
                selector.verified_at = Some(verified);
            });
            computed
        } else {
            let verified = self.clock.now();
            self.with_selector(id, |selector| selector.verified_at = Some(verified));
            value
        };
        self.trace(|| TraceEvent::SelectorComputed {
            selector: name,
            changed,
        });
        Ok(current)
    }

    fn with_selector(&self, id: UnitId, f: impl FnOnce(&mut SelectorState)) {
        let mut state = self.state.borrow_mut();
        if let Some(UnitKind::Selector(selector)) = state.graph.unit_mut(id).map(|u| &mut u.kind) {
            f(selector);
        }
    }
}

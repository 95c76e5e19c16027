//! Reactions and the fixpoint loop.
//!
//! A mutation reports the keys it touched. Every reaction that read one of
//! those keys, directly or through a chain of selectors, is queued together
//! with the chain of reactions that caused the write. The fixpoint pops the
//! queue in scheduling order and re-runs each reaction whose dependencies
//! really changed. A reaction that appears in its own trigger chain is a
//! cycle and fails the action.

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use trellis_foundation::{EntityRef, Error, Result, SemanticLimit, Stamp};
use trellis_storage::{Dependency, UnitId};

use crate::action::Transaction;
use crate::graph::{Unit, UnitKind};
use crate::model::ReactionFn;
use crate::store::Store;
use crate::trace::TraceEvent;
use crate::tracker::Frame;

impl Store {
    /// Registers a free-standing reaction and runs it once right away.
    ///
    /// The reaction re-runs whenever something it read during its last run
    /// changes. Outside an action the first run is wrapped in one.
    ///
    /// # Errors
    ///
    /// Returns whatever the first run raises; the reaction is then not
    /// registered.
    pub fn reaction(&self, name: &str, body: impl Fn(&Store) -> Result<()> + 'static) -> Result<UnitId> {
        self.action(|store| {
            let seq = store.state.borrow_mut().db.next_seq();
            let id = store.register_reaction(name.into(), (seq, 0), None, Rc::new(body));
            let path = store.tracker.borrow().reaction_chain();
            store.run_reaction(id, path)?;
            Ok(id)
        })
    }

    /// Disposes a reaction so it never runs again. Returns false if there
    /// was no such reaction.
    pub fn dispose_reaction(&self, id: UnitId) -> bool {
        let mut state = self.state.borrow_mut();
        if !state.graph.unit(id).is_some_and(Unit::is_reaction) {
            return false;
        }
        state.graph.remove(id)
    }

    pub(crate) fn register_reaction(
        &self,
        name: Arc<str>,
        order: (u64, usize),
        owner: Option<EntityRef>,
        body: ReactionFn,
    ) -> UnitId {
        let id = self.next_unit_id();
        self.state
            .borrow_mut()
            .graph
            .insert(id, Unit::reaction(name, order, owner, body));
        id
    }

    pub(crate) fn schedule(&self, order: (u64, usize), id: UnitId, path: Vec<UnitId>) -> Result<()> {
        if self.with_tx(|tx| tx.enqueue((order.0, order.1, id), path))? {
            self.trace(|| TraceEvent::ReactionScheduled {
                reaction: self.state.borrow().graph.name(id),
            });
        }
        Ok(())
    }

    /// Queues every reaction affected by a write to `touched`.
    pub(crate) fn invalidate(&self, touched: &[Dependency]) -> Result<()> {
        let mut found: Vec<((u64, usize), UnitId)> = Vec::new();
        let mut keys: Vec<Dependency> = touched.to_vec();
        {
            let state = self.state.borrow();
            let mut pending = touched.to_vec();
            let mut visited: HashSet<UnitId> = HashSet::new();
            while let Some(dep) = pending.pop() {
                let readers = state.graph.dependents_of(&dep);
                if readers.is_empty() {
                    continue;
                }
                self.trace(|| TraceEvent::Invalidated {
                    dependency: dep.clone(),
                    units: readers.len(),
                });
                for id in readers {
                    let Some(unit) = state.graph.unit(id) else {
                        continue;
                    };
                    if unit.is_reaction() {
                        found.push((unit.order, id));
                    } else if visited.insert(id) {
                        pending.push(Dependency::Selector(id));
                        keys.push(Dependency::Selector(id));
                    }
                }
            }

            // A running reaction has not published its reads yet.
            let tracker = self.tracker.borrow();
            for key in &keys {
                for id in tracker.running_readers(key) {
                    if let Some(unit) = state.graph.unit(id) {
                        found.push((unit.order, id));
                    }
                }
            }
        }

        if found.is_empty() {
            return Ok(());
        }
        let chain = self.tracker.borrow().reaction_chain();
        for (order, id) in found {
            self.schedule(order, id, chain.clone())?;
        }
        Ok(())
    }

    /// Runs queued reactions until none is left.
    pub(crate) fn fixpoint(&self) -> Result<()> {
        while let Some((id, path)) = self.with_tx(Transaction::pop)? {
            let Some(name) = self.state.borrow().graph.unit(id).map(|u| u.name.clone()) else {
                continue;
            };
            if !self.reaction_is_stale(id)? {
                self.trace(|| TraceEvent::ReactionSkipped { reaction: name });
                continue;
            }
            if let Some(pos) = path.iter().position(|u| *u == id) {
                let state = self.state.borrow();
                let chain = path[pos..]
                    .iter()
                    .map(|u| state.graph.name(*u).to_string())
                    .collect();
                return Err(Error::circular_dependency(chain));
            }
            self.run_reaction(id, path)?;
        }
        Ok(())
    }

    fn reaction_is_stale(&self, id: UnitId) -> Result<bool> {
        let (ran, deps) = {
            let state = self.state.borrow();
            match state.graph.unit(id) {
                Some(unit) => (unit.ran, unit.deps.clone()),
                None => return Ok(false),
            }
        };
        if !ran {
            return Ok(true);
        }
        self.deps_changed(&deps)
    }

    /// Returns true if any key moved since it was read. Selector keys are
    /// brought up to date first.
    pub(crate) fn deps_changed(&self, deps: &[(Dependency, Stamp)]) -> Result<bool> {
        for (dep, stamp) in deps {
            if let Dependency::Selector(id) = dep {
                self.refresh(*id)?;
            }
            if self.stamp_of(dep) != *stamp {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Runs one reaction with `path` as the chain that triggered it.
    pub(crate) fn run_reaction(&self, id: UnitId, path: Vec<UnitId>) -> Result<()> {
        let (name, body) = {
            let state = self.state.borrow();
            match state.graph.unit(id).map(|u| (&u.name, &u.kind)) {
                Some((name, UnitKind::Reaction(body))) => (name.clone(), body.clone()),
                _ => return Ok(()),
            }
        };

        let runs = self.with_tx(|tx| {
            tx.runs += 1;
            tx.runs
        })?;
        if runs > self.max_reaction_runs {
            return Err(Error::limit_exceeded(SemanticLimit::MaxReactionRuns {
                limit: self.max_reaction_runs,
                reaction: Some(name.to_string()),
            }));
        }

        self.tracker.borrow_mut().push(Frame::reaction(id, path));
        let result = body(self);
        let frame = self.tracker.borrow_mut().pop();
        result.map_err(|e| e.with_frame(name.to_string()))?;

        let reads = frame.map(|f| f.reads).unwrap_or_default();
        let count = reads.len();
        self.state.borrow_mut().graph.set_deps(id, reads);
        self.trace(|| TraceEvent::ReactionRun {
            reaction: name,
            reads: count,
        });
        Ok(())
    }
}

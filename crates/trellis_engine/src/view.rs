//! The boundary towards view layers.
//!
//! A view runs a read-only computation under [`Store::track`] and keeps the
//! resulting [`Observation`]. After each action it can ask the observation
//! whether anything it read changed, or let the store do that with
//! [`Store::watch`]. Plain subscribers get the change summary of every
//! committed action.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use trellis_foundation::{Result, Stamp, Value};
use trellis_storage::Dependency;

use crate::action::ChangeSummary;
use crate::store::Store;
use crate::trace::TraceEvent;
use crate::tracker::Frame;

/// The keys a tracked computation read, with their stamps at the time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observation {
    reads: Vec<(Dependency, Stamp)>,
}

impl Observation {
    /// Returns true if anything read has changed since.
    ///
    /// Selectors that were read are brought up to date first; one that
    /// fails counts as changed.
    #[must_use]
    pub fn is_stale(&self, store: &Store) -> bool {
        store.deps_changed(&self.reads).unwrap_or(true)
    }

    /// Number of distinct keys read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    /// Returns true if nothing was read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    /// The keys read, in first-read order.
    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.reads.iter().map(|(dep, _)| dep)
    }
}

/// A value together with what was read to compute it.
#[derive(Clone, Debug)]
pub struct Tracked<T> {
    /// The computed value.
    pub value: T,
    /// What the computation read.
    pub observation: Observation,
}

/// Handle returned by [`Store::subscribe`] and [`Store::watch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type WatchCompute = Rc<dyn Fn(&Store) -> Result<Value>>;
type WatchCallback = Rc<dyn Fn(&Result<Value>)>;

pub(crate) struct Watch {
    compute: WatchCompute,
    on_change: WatchCallback,
    observation: Observation,
}

#[derive(Clone)]
pub(crate) enum Subscriber {
    Changes(Rc<dyn Fn(&ChangeSummary)>),
    Watch(Rc<RefCell<Watch>>),
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Changes(_) => f.write_str("Changes"),
            Self::Watch(watch) => f
                .debug_struct("Watch")
                .field("reads", &watch.borrow().observation.len())
                .finish_non_exhaustive(),
        }
    }
}

impl Store {
    /// Runs `compute` and records what it read.
    ///
    /// # Errors
    ///
    /// Returns whatever `compute` raises.
    pub fn track<T>(&self, compute: impl FnOnce(&Store) -> Result<T>) -> Result<Tracked<T>> {
        let (result, observation) = self.observe_with(compute);
        result.map(|value| Tracked { value, observation })
    }

    fn observe_with<T>(&self, compute: impl FnOnce(&Store) -> Result<T>) -> (Result<T>, Observation) {
        self.tracker.borrow_mut().push(Frame::view());
        let result = compute(self);
        let reads = self
            .tracker
            .borrow_mut()
            .pop()
            .map(|frame| frame.reads)
            .unwrap_or_default();
        (result, Observation { reads })
    }

    /// Calls `callback` with the summary of every committed top-level action.
    pub fn subscribe(&self, callback: impl Fn(&ChangeSummary) + 'static) -> SubscriptionId {
        self.add_subscriber(Subscriber::Changes(Rc::new(callback)))
    }

    /// Removes a subscription or watch. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.borrow_mut().remove(&id.0).is_some()
    }

    /// Runs `compute` now, then again after every committed action in which
    /// something it read changed, passing each new result to `on_change`.
    ///
    /// # Errors
    ///
    /// Returns the error of the first run; nothing is registered then.
    pub fn watch(
        &self,
        compute: impl Fn(&Store) -> Result<Value> + 'static,
        on_change: impl Fn(&Result<Value>) + 'static,
    ) -> Result<SubscriptionId> {
        let compute: WatchCompute = Rc::new(compute);
        let (result, observation) = self.observe_with(|store| compute(store));
        result?;
        let watch = Watch {
            compute,
            on_change: Rc::new(on_change),
            observation,
        };
        Ok(self.add_subscriber(Subscriber::Watch(Rc::new(RefCell::new(watch)))))
    }

    fn add_subscriber(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = self.next_subscription.get() + 1;
        self.next_subscription.set(id);
        self.subscriptions.borrow_mut().insert(id, subscriber);
        SubscriptionId(id)
    }

    /// Delivers a committed action to listeners, subscribers and watches.
    pub(crate) fn notify(&self, summary: &ChangeSummary) {
        for listener in &self.listeners {
            listener(summary);
        }
        let subscribers: Vec<Subscriber> = self.subscriptions.borrow().values().cloned().collect();
        let mut called = self.listeners.len();
        let mut stale = 0;
        for subscriber in subscribers {
            match subscriber {
                Subscriber::Changes(callback) => {
                    called += 1;
                    callback(summary);
                }
                Subscriber::Watch(watch) => {
                    let (compute, on_change, observation) = {
                        let w = watch.borrow();
                        (w.compute.clone(), w.on_change.clone(), w.observation.clone())
                    };
                    if !observation.is_stale(self) {
                        continue;
                    }
                    stale += 1;
                    let (result, observation) = self.observe_with(|store| compute(store));
                    watch.borrow_mut().observation = observation;
                    on_change(&result);
                }
            }
        }
        self.trace(|| TraceEvent::Notified {
            action: summary.action,
            subscribers: called,
            watches: stale,
        });
    }
}

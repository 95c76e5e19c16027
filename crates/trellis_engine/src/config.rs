//! Store configuration.

use std::fmt;
use std::rc::Rc;

use crate::action::ChangeSummary;
use crate::model::{EntityModel, ServiceModel};
use crate::trace::TraceEvent;

/// Receives one summary per committed top-level action.
pub type ChangeListener = Rc<dyn Fn(&ChangeSummary)>;

/// Receives fine-grained trace events.
pub type TraceListener = Rc<dyn Fn(&TraceEvent)>;

/// Default cap on reaction evaluations per action.
pub const DEFAULT_MAX_REACTION_RUNS: usize = 10_000;

/// Everything needed to build a [`Store`](crate::Store).
#[derive(Clone)]
pub struct StoreConfig {
    pub(crate) collections: Vec<EntityModel>,
    pub(crate) services: Vec<ServiceModel>,
    pub(crate) listeners: Vec<ChangeListener>,
    pub(crate) debug: Option<TraceListener>,
    pub(crate) max_reaction_runs: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            collections: Vec::new(),
            services: Vec::new(),
            listeners: Vec::new(),
            debug: None,
            max_reaction_runs: DEFAULT_MAX_REACTION_RUNS,
        }
    }
}

impl StoreConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity collection.
    #[must_use]
    pub fn with_collection(mut self, model: EntityModel) -> Self {
        self.collections.push(model);
        self
    }

    /// Adds a service.
    #[must_use]
    pub fn with_service(mut self, service: ServiceModel) -> Self {
        self.services.push(service);
        self
    }

    /// Adds a transaction listener.
    #[must_use]
    pub fn with_listener(mut self, listener: impl Fn(&ChangeSummary) + 'static) -> Self {
        self.listeners.push(Rc::new(listener));
        self
    }

    /// Installs the debug listener, replacing any previous one.
    #[must_use]
    pub fn with_debug_listener(mut self, listener: impl Fn(&TraceEvent) + 'static) -> Self {
        self.debug = Some(Rc::new(listener));
        self
    }

    /// Sets the kill switch for runaway reaction fixpoints.
    #[must_use]
    pub fn with_max_reaction_runs(mut self, max: usize) -> Self {
        self.max_reaction_runs = max;
        self
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("collections", &self.collections)
            .field("services", &self.services)
            .field("listeners", &self.listeners.len())
            .field("debug", &self.debug.is_some())
            .field("max_reaction_runs", &self.max_reaction_runs)
            .finish()
    }
}

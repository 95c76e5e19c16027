//! Structured trace events.
//!
//! The store reports what it is doing through an optional debug listener.
//! Events are only constructed when a listener is installed.

use std::sync::Arc;

use trellis_foundation::{EntityRef, Value};
use trellis_storage::Dependency;

/// A fine-grained event emitted by the store.
#[derive(Clone, Debug, PartialEq)]
pub enum TraceEvent {
    /// A top-level action began.
    ActionStarted {
        /// Action number.
        action: u64,
        /// Optional action name.
        name: Option<Arc<str>>,
    },
    /// A top-level action finished and its changes are visible.
    ActionCommitted {
        /// Action number.
        action: u64,
        /// Reaction evaluations performed during the action.
        reactions: usize,
    },
    /// A top-level action failed and the store was restored.
    ActionRolledBack {
        /// Action number.
        action: u64,
        /// The error, rendered.
        error: String,
    },
    /// An entity became live.
    EntityAdded {
        /// The new entity.
        entity: EntityRef,
    },
    /// An entity was removed from its collection.
    EntityRemoved {
        /// The removed entity.
        entity: EntityRef,
    },
    /// A property write changed a value.
    PropertyWritten {
        /// The written entity.
        entity: EntityRef,
        /// Property name.
        field: Arc<str>,
        /// Previous value (`Nil` if absent).
        old: Value,
        /// New value (`Nil` for a delete).
        new: Value,
    },
    /// A reaction was queued for the fixpoint.
    ReactionScheduled {
        /// Reaction name.
        reaction: Arc<str>,
    },
    /// A reaction ran.
    ReactionRun {
        /// Reaction name.
        reaction: Arc<str>,
        /// Number of distinct dependencies it read.
        reads: usize,
    },
    /// A queued reaction was dropped because none of its dependencies changed.
    ReactionSkipped {
        /// Reaction name.
        reaction: Arc<str>,
    },
    /// A selector evaluated its body.
    SelectorComputed {
        /// Selector name.
        selector: Arc<str>,
        /// False when the result was identical to the cached value.
        changed: bool,
    },
    /// A selector was read and its cached value reused.
    SelectorReused {
        /// Selector name.
        selector: Arc<str>,
    },
    /// An index was built to serve a relationship.
    IndexSynthesized {
        /// Collection holding the index.
        collection: Arc<str>,
        /// The index declaration, rendered.
        spec: String,
    },
    /// A mutation touched a key that reactive units had read.
    Invalidated {
        /// The touched key.
        dependency: Dependency,
        /// Number of units reading it directly.
        units: usize,
    },
    /// Listeners were told about a committed action.
    Notified {
        /// Action number.
        action: u64,
        /// Number of transaction listeners and subscriptions called.
        subscribers: usize,
        /// Number of watches whose observation was stale.
        watches: usize,
    },
}

impl TraceEvent {
    /// Short name of the event kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ActionStarted { .. } => "action-started",
            Self::ActionCommitted { .. } => "action-committed",
            Self::ActionRolledBack { .. } => "action-rolled-back",
            Self::EntityAdded { .. } => "entity-added",
            Self::EntityRemoved { .. } => "entity-removed",
            Self::PropertyWritten { .. } => "property-written",
            Self::ReactionScheduled { .. } => "reaction-scheduled",
            Self::ReactionRun { .. } => "reaction-run",
            Self::ReactionSkipped { .. } => "reaction-skipped",
            Self::SelectorComputed { .. } => "selector-computed",
            Self::SelectorReused { .. } => "selector-reused",
            Self::IndexSynthesized { .. } => "index-synthesized",
            Self::Invalidated { .. } => "invalidated",
            Self::Notified { .. } => "notified",
        }
    }
}

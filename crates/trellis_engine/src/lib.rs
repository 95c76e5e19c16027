//! Dependency tracking, selectors, reactions, relationships, and actions for Trellis.
//!
//! This crate provides:
//! - [`Store`] - Entity access, membership, index queries, and relationships
//! - [`EntityModel`] / [`ServiceModel`] - Declarations of collections and services
//! - [`Store::action`] - Transactional batches with full rollback
//! - [`Store::reaction`] and selectors - Reactive units re-evaluated on change
//! - [`Store::track`] / [`Store::watch`] - The boundary towards view layers
//! - [`TraceEvent`] - Structured events for an optional debug listener

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod action;
mod config;
mod graph;
mod model;
mod reaction;
mod relation;
mod selector;
mod store;
mod trace;
mod tracker;
mod view;

pub use action::{ChangeSummary, EntityChange};
pub use config::{ChangeListener, StoreConfig, TraceListener, DEFAULT_MAX_REACTION_RUNS};
pub use model::{
    Draft, EntityFn, EntityModel, EntitySelectorFn, PropertyHookFn, ReactionFn, SelectorFn, ServiceModel,
};
pub use store::{EntitySnapshot, Store};
pub use trace::TraceEvent;
pub use trellis_storage::UnitId;
pub use view::{Observation, SubscriptionId, Tracked};

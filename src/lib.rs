//! Trellis - In-process reactive relational object store
//!
//! This crate re-exports all layers of the Trellis system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: trellis_debug      — Trace buffer, change log, formatting
//! Layer 2: trellis_engine     — Store, actions, reactions, selectors, relationships
//! Layer 1: trellis_storage    — Records, collections, indexes, relationship declarations
//! Layer 0: trellis_foundation — Core types (Value, EntityRef, Stamp, Error)
//! ```

pub use trellis_debug as debug;
pub use trellis_engine as engine;
pub use trellis_foundation as foundation;
pub use trellis_storage as storage;

pub use trellis_engine::{Draft, EntityModel, ServiceModel, Store, StoreConfig};
pub use trellis_foundation::{EntityRef, Error, ErrorKind, Result, Value};

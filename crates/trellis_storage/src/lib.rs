//! Records, indexes, collections, and relationship declarations for Trellis.
//!
//! This crate provides:
//! - [`Record`] - Observable property storage for one entity
//! - [`Index`] and [`IndexSpec`] - Hash, sort, and unique indexes
//! - [`Collection`] - Live members of one entity type with tombstones
//! - [`HasMany`] / [`BelongsTo`] - Relationship declarations and index selection
//! - [`Database`] - Snapshot-able state of every collection
//! - [`Dependency`] - Keys that reactive units read and mutations touch

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod collection;
pub mod database;
pub mod dependency;
pub mod index;
pub mod record;
pub mod relationship;
pub mod schema;

pub use collection::Collection;
pub use database::Database;
pub use dependency::{Dependency, UnitId};
pub use index::{compare_keys, parse_sort, Index, IndexSpec, SortLevel};
pub use record::{Descriptor, Record, ID_FIELD};
pub use relationship::{
    select_index, BelongsTo, Dependent, HasMany, Relations, ResolvedBelongsTo, ResolvedHasMany,
};
pub use schema::{CollectionSchema, FieldSchema};

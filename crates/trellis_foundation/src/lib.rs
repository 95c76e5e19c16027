//! Core values, entity identifiers, stamps, and errors for Trellis.
//!
//! This crate provides:
//! - [`Value`] - The dynamic value type stored in entity fields
//! - [`EntityId`] and [`EntityRef`] - Stable entity identity
//! - [`Stamp`] and [`Clock`] - Monotonic change stamps used for identity-on-change
//! - [`Error`] - Rich error types with context
//! - Persistent collections ([`LtVec`], [`LtMap`])

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod collections;
pub mod entity;
pub mod error;
pub mod stamp;
pub mod value;

pub use collections::{LtMap, LtVec};
pub use entity::{EntityId, EntityRef};
pub use error::{Error, ErrorContext, ErrorKind, SemanticLimit};
pub use stamp::{Clock, Stamp};
pub use value::Value;

/// Result type alias using Trellis's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

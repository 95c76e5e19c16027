//! Dependency keys shared by storage and the reactive engine.
//!
//! Every observable piece of state has a [`Dependency`] key. Reads register
//! keys with the running reactive unit; mutations report the keys they
//! touched so the engine can invalidate whoever read them.

use std::fmt;
use std::sync::Arc;

use trellis_foundation::{EntityRef, Value};

/// Identifier of a reactive unit (selector or reaction).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit{}", self.0)
    }
}

/// Something a reactive unit can depend on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// One property of one entity.
    Field {
        /// The entity read.
        entity: EntityRef,
        /// The property name.
        field: Arc<str>,
    },
    /// The set of property names present on an entity.
    Shape(EntityRef),
    /// The entity as a whole; changes on any write to it.
    Entity(EntityRef),
    /// Membership of a collection.
    Members(Arc<str>),
    /// The subtree of an index reached by following `path` through its hash levels.
    Index {
        /// Collection owning the index.
        collection: Arc<str>,
        /// Position of the index in the collection.
        index: usize,
        /// Hash keys from the root; empty for the whole index.
        path: Vec<Value>,
    },
    /// The cached value of a selector.
    Selector(UnitId),
}

impl Dependency {
    /// Convenience constructor for a field key.
    #[must_use]
    pub fn field(entity: &EntityRef, field: &str) -> Self {
        Self::Field {
            entity: entity.clone(),
            field: field.into(),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field { entity, field } => write!(f, "{entity}.{field}"),
            Self::Shape(entity) => write!(f, "{entity}.<keys>"),
            Self::Entity(entity) => write!(f, "{entity}"),
            Self::Members(collection) => write!(f, "{collection}.<members>"),
            Self::Index {
                collection,
                index,
                path,
            } => {
                write!(f, "{collection}.<index {index}>")?;
                for key in path {
                    write!(f, "[{key:?}]")?;
                }
                Ok(())
            }
            Self::Selector(id) => write!(f, "{id}"),
        }
    }
}

//! Entity identifiers and collection-qualified entity references.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identity of an entity within its collection.
///
/// Identifiers are either supplied by the caller when the entity is added
/// or generated by the store. They never change for the lifetime of the
/// entity and are never reused within a collection.
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityId(Arc<str>);

impl EntityId {
    /// Creates an identifier from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Creates a store-generated identifier from a sequence number.
    #[must_use]
    pub fn generated(seq: u64) -> Self {
        Self(format!("e{seq}").into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stable handle to an entity: the collection it lives in plus its id.
///
/// Handles stay valid across mutations; reads through a handle always observe
/// the entity's current state. Once the entity is removed the handle becomes
/// inert and reads through it fail.
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityRef {
    /// Name of the owning collection.
    pub collection: Arc<str>,
    /// Identity within the collection.
    pub id: EntityId,
}

impl EntityRef {
    /// Creates a new entity reference.
    #[must_use]
    pub fn new(collection: impl Into<Arc<str>>, id: impl Into<EntityId>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityRef({}#{})", self.collection, self.id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.collection, self.id)
    }
}

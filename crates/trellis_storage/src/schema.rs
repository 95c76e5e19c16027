//! Schema definitions for collections.
//!
//! A schema lists the declared fields of an entity type (with defaults), the
//! indexes to maintain, and the relationships the type participates in. It
//! is evaluated once when the store is built.

use std::sync::Arc;

use trellis_foundation::Value;

use crate::index::IndexSpec;
use crate::record::ID_FIELD;
use crate::relationship::{BelongsTo, HasMany};

/// Schema definition for one collection.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionSchema {
    /// Collection name (e.g., `Users`).
    pub name: Arc<str>,
    /// Declared fields.
    pub fields: Vec<FieldSchema>,
    /// If true, writes to undeclared fields fail with `UnknownMember`.
    pub strict: bool,
    /// Declared indexes, in declaration order.
    pub indexes: Vec<IndexSpec>,
    /// One-to-many relationships owned by this type.
    pub has_many: Vec<HasMany>,
    /// Many-to-one relationships from this type.
    pub belongs_to: Vec<BelongsTo>,
}

impl CollectionSchema {
    /// Creates an open schema with no declared members.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            strict: false,
            indexes: Vec::new(),
            has_many: Vec::new(),
            belongs_to: Vec::new(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Rejects undeclared fields.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Adds a one-to-many relationship.
    #[must_use]
    pub fn with_has_many(mut self, relation: HasMany) -> Self {
        self.has_many.push(relation);
        self
    }

    /// Adds a many-to-one relationship.
    #[must_use]
    pub fn with_belongs_to(mut self, relation: BelongsTo) -> Self {
        self.belongs_to.push(relation);
        self
    }

    /// Returns the field schema by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    /// Returns true if `name` may be stored on records of this collection.
    #[must_use]
    pub fn accepts(&self, name: &str) -> bool {
        !self.strict || name == ID_FIELD || self.field(name).is_some()
    }

    /// Returns true if `name` is a relationship of this collection.
    #[must_use]
    pub fn is_relation(&self, name: &str) -> bool {
        self.has_many.iter().any(|r| &*r.name == name) || self.belongs_to.iter().any(|r| &*r.name == name)
    }
}

/// Schema definition for a field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSchema {
    /// Field name.
    pub name: Arc<str>,
    /// Value given to new records that do not supply one.
    pub default: Value,
}

impl FieldSchema {
    /// Creates a field with a default value.
    #[must_use]
    pub fn new(name: &str, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
        }
    }

    /// Creates a field defaulting to nil.
    #[must_use]
    pub fn optional(name: &str) -> Self {
        Self::new(name, Value::Nil)
    }
}

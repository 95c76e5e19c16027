//! Observable entity records.
//!
//! A [`Record`] is the plain property bag behind one entity. Every write goes
//! through [`Record::write`] or [`Record::delete`], which suppress no-op
//! writes and stamp whatever actually changed. Stamps are what the reactive
//! engine compares to decide whether a reader is stale, and the record's
//! revision stamp gives each committed version of the entity a distinct
//! identity even though the record itself is updated in place.

use std::sync::Arc;

use trellis_foundation::{LtMap, Stamp, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Name of the identity field every record carries.
pub const ID_FIELD: &str = "id";

/// Property storage for one entity.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Record {
    values: LtMap<Arc<str>, Value>,
    /// Last change per property name, kept after deletion.
    stamps: LtMap<Arc<str>, Stamp>,
    /// Last change to the set of present property names.
    shape: Stamp,
    /// Last change of any kind.
    revision: Stamp,
}

impl Record {
    /// Creates a record holding `fields`, all stamped with `stamp`.
    #[must_use]
    pub fn new(fields: impl IntoIterator<Item = (Arc<str>, Value)>, stamp: Stamp) -> Self {
        let values: LtMap<Arc<str>, Value> = fields.into_iter().collect();
        let stamps = values.keys().map(|k| (k.clone(), stamp)).collect();
        Self {
            values,
            stamps,
            shape: stamp,
            revision: stamp,
        }
    }

    /// Returns the value of a property, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Returns the value of a property, or `Nil` when absent.
    #[must_use]
    pub fn value(&self, field: &str) -> Value {
        self.get(field).cloned().unwrap_or_default()
    }

    /// Returns true if the property is present.
    #[must_use]
    pub fn has(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// Returns the present property names in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<Arc<str>> {
        let mut keys: Vec<_> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Describes a present property.
    #[must_use]
    pub fn descriptor(&self, field: &str) -> Option<Descriptor> {
        self.get(field).map(|value| Descriptor {
            value: Some(value.clone()),
            writable: field != ID_FIELD,
            enumerable: true,
        })
    }

    /// Writes a property.
    ///
    /// Returns `None` when `value` is the same as the current value; nothing
    /// is stamped in that case. Otherwise returns the previous value (`None`
    /// inside when the property was absent).
    pub fn write(&mut self, field: &str, value: Value, stamp: Stamp) -> Option<Option<Value>> {
        let old = self.values.get(field).cloned();
        if old.as_ref().is_some_and(|o| o.same(&value)) {
            return None;
        }
        let key: Arc<str> = Arc::from(field);
        if old.is_none() {
            self.shape = stamp;
        }
        self.values.set(key.clone(), value);
        self.stamps.set(key, stamp);
        self.revision = stamp;
        Some(old)
    }

    /// Deletes a property, returning its value if it was present.
    pub fn delete(&mut self, field: &str, stamp: Stamp) -> Option<Value> {
        let old = self.values.unset(field)?;
        self.stamps.set(Arc::from(field), stamp);
        self.shape = stamp;
        self.revision = stamp;
        Some(old)
    }

    /// Stamp of the last change to `field` (zero if never present).
    #[must_use]
    pub fn field_stamp(&self, field: &str) -> Stamp {
        self.stamps.get(field).copied().unwrap_or_default()
    }

    /// Stamp of the last change to the set of present properties.
    #[must_use]
    pub const fn shape_stamp(&self) -> Stamp {
        self.shape
    }

    /// Stamp of the last change of any kind; the record's identity.
    #[must_use]
    pub const fn revision(&self) -> Stamp {
        self.revision
    }

    /// Iterates over present properties in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.values.iter()
    }
}

/// Description of one member of an entity.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Descriptor {
    /// Stored value; `None` for computed members.
    pub value: Option<Value>,
    /// Whether `set` may target the member.
    pub writable: bool,
    /// Whether the member shows up in `keys`.
    pub enumerable: bool,
}

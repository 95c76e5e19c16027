//! Declared indexes over a collection.
//!
//! An index is declared as an ordered list of criteria, each either a hash
//! level (`=field`) or a sort level (`+field` ascending, `-field`
//! descending). Hash levels come first and nest: `=a, =b, -c` groups by `a`,
//! then by `b`, and keeps each group ordered by `c` descending. Ties are
//! always broken by entity id so the order is deterministic.
//!
//! A unique index has only hash levels, and each full key maps to at most one
//! entity. `Nil` keys are not indexed by unique indexes.
//!
//! Every node remembers the stamp of its last change. A bucket's member list
//! is kept alongside its sorted entries and is only replaced when membership
//! or order changes, so readers that hold on to it can tell cheaply whether
//! anything moved.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use trellis_foundation::{EntityRef, Error, LtVec, Result, Stamp, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// One sort criterion.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SortLevel {
    /// Field to sort by.
    pub field: Arc<str>,
    /// Sort descending instead of ascending.
    pub descending: bool,
}

impl SortLevel {
    /// Ascending order on `field`.
    #[must_use]
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    /// Descending order on `field`.
    #[must_use]
    pub fn desc(field: &str) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

impl fmt::Display for SortLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.descending { '-' } else { '+' };
        write!(f, "{sign}{}", self.field)
    }
}

/// Parses a sort specification such as `"-num, +name"`.
///
/// A bare field name sorts ascending. An empty string yields no levels.
///
/// # Errors
///
/// Returns `InvalidSchema` for hash criteria or empty field names.
pub fn parse_sort(text: &str) -> Result<Vec<SortLevel>> {
    let spec = IndexSpec::parse_criteria(text, true)?;
    if !spec.hash.is_empty() {
        return Err(Error::invalid_schema(format!(
            "sort specification {text:?} may not contain hash criteria"
        )));
    }
    Ok(spec.sort)
}

/// Declaration of an index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IndexSpec {
    hash: Vec<Arc<str>>,
    sort: Vec<SortLevel>,
    unique: bool,
}

impl IndexSpec {
    /// Parses an index declaration such as `"=a, =b, -c"`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if the declaration is empty, names an empty
    /// field, or places a hash level after a sort level.
    pub fn parse(text: &str) -> Result<Self> {
        let spec = Self::parse_criteria(text, false)?;
        if spec.hash.is_empty() && spec.sort.is_empty() {
            return Err(Error::invalid_schema("index declaration is empty"));
        }
        Ok(spec)
    }

    /// Parses a unique index declaration such as `"=email"`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if the declaration has sort levels or no hash levels.
    pub fn unique(text: &str) -> Result<Self> {
        let mut spec = Self::parse(text)?;
        if spec.hash.is_empty() || !spec.sort.is_empty() {
            return Err(Error::invalid_schema(format!(
                "unique index {text:?} must consist of hash levels only"
            )));
        }
        spec.unique = true;
        Ok(spec)
    }

    /// Builds a non-unique index from hash fields and sort levels.
    #[must_use]
    pub fn from_levels(hash: Vec<Arc<str>>, sort: Vec<SortLevel>) -> Self {
        Self {
            hash,
            sort,
            unique: false,
        }
    }

    fn parse_criteria(text: &str, bare_is_sort: bool) -> Result<Self> {
        let mut spec = Self::from_levels(Vec::new(), Vec::new());
        for raw in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (kind, field) = match raw.chars().next() {
                Some(c @ ('=' | '+' | '-')) => (c, raw[1..].trim()),
                _ if bare_is_sort => ('+', raw),
                _ => {
                    return Err(Error::invalid_schema(format!(
                        "index criterion {raw:?} must start with '=', '+' or '-'"
                    )));
                }
            };
            if field.is_empty() {
                return Err(Error::invalid_schema(format!(
                    "index criterion {raw:?} names no field"
                )));
            }
            match kind {
                '=' if !spec.sort.is_empty() => {
                    return Err(Error::invalid_schema(format!(
                        "hash level {raw:?} must precede every sort level in {text:?}"
                    )));
                }
                '=' => spec.hash.push(field.into()),
                '-' => spec.sort.push(SortLevel::desc(field)),
                _ => spec.sort.push(SortLevel::asc(field)),
            }
        }
        Ok(spec)
    }

    /// Fields of the hash levels, outermost first.
    #[must_use]
    pub fn hash_fields(&self) -> &[Arc<str>] {
        &self.hash
    }

    /// Sort levels applied inside each bucket.
    #[must_use]
    pub fn sort_levels(&self) -> &[SortLevel] {
        &self.sort
    }

    /// Returns true for unique indexes.
    #[must_use]
    pub const fn is_unique(&self) -> bool {
        self.unique
    }

    /// Returns true if any criterion reads `field`.
    #[must_use]
    pub fn mentions(&self, field: &str) -> bool {
        self.hash.iter().any(|f| &**f == field) || self.sort.iter().any(|l| &*l.field == field)
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unique {
            f.write_str("unique ")?;
        }
        let mut first = true;
        for field in &self.hash {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "={field}")?;
            first = false;
        }
        for level in &self.sort {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{level}")?;
            first = false;
        }
        Ok(())
    }
}

/// Compares two sort keys under `levels`, without the id tie-break.
#[must_use]
pub fn compare_keys(a: &[Value], b: &[Value], levels: &[SortLevel]) -> Ordering {
    for ((x, y), level) in a.iter().zip(b).zip(levels) {
        let ord = if level.descending { y.cmp(x) } else { x.cmp(y) };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[derive(Clone, Debug, PartialEq)]
struct Entry {
    sort: Vec<Value>,
    entity: EntityRef,
}

impl Entry {
    fn order(&self, other: &Self, levels: &[SortLevel]) -> Ordering {
        compare_keys(&self.sort, &other.sort, levels).then_with(|| self.entity.id.cmp(&other.entity.id))
    }
}

#[derive(Clone, Debug)]
enum Node {
    Hash {
        children: im::HashMap<Value, Node>,
        stamp: Stamp,
    },
    Leaf {
        entries: LtVec<Entry>,
        members: LtVec<Value>,
        stamp: Stamp,
    },
    Unique {
        members: LtVec<Value>,
        entity: EntityRef,
        stamp: Stamp,
    },
}

impl Node {
    fn hash() -> Self {
        Self::Hash {
            children: im::HashMap::new(),
            stamp: Stamp::ZERO,
        }
    }

    fn leaf() -> Self {
        Self::Leaf {
            entries: LtVec::new(),
            members: LtVec::new(),
            stamp: Stamp::ZERO,
        }
    }

    fn stamp(&self) -> Stamp {
        match self {
            Self::Hash { stamp, .. } | Self::Leaf { stamp, .. } | Self::Unique { stamp, .. } => *stamp,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Hash { children, .. } => children.is_empty(),
            Self::Leaf { entries, .. } => entries.is_empty(),
            Self::Unique { .. } => false,
        }
    }

    fn insert(&mut self, hash: &[Value], entry: Entry, levels: &[SortLevel], unique: bool, now: Stamp) {
        match self {
            Self::Hash { children, stamp } => {
                let Some((key, rest)) = hash.split_first() else {
                    return;
                };
                *stamp = now;
                if rest.is_empty() && unique {
                    let members = std::iter::once(Value::Ref(entry.entity.clone())).collect();
                    children.insert(
                        key.clone(),
                        Self::Unique {
                            members,
                            entity: entry.entity,
                            stamp: now,
                        },
                    );
                    return;
                }
                let child = children.entry(key.clone()).or_insert_with(|| {
                    if rest.is_empty() {
                        Self::leaf()
                    } else {
                        Self::hash()
                    }
                });
                child.insert(rest, entry, levels, unique, now);
            }
            Self::Leaf {
                entries,
                members,
                stamp,
            } => {
                let pos = entries
                    .binary_search_by(|e| e.order(&entry, levels))
                    .unwrap_or_else(|p| p);
                members.insert_at(pos, Value::Ref(entry.entity.clone()));
                entries.insert_at(pos, entry);
                *stamp = now;
            }
            Self::Unique { .. } => {}
        }
    }

    fn remove(&mut self, hash: &[Value], entry: &Entry, levels: &[SortLevel], now: Stamp) -> bool {
        match self {
            Self::Hash { children, stamp } => {
                let Some((key, rest)) = hash.split_first() else {
                    return false;
                };
                let Some(child) = children.get_mut(key) else {
                    return false;
                };
                let holder = match child {
                    Self::Unique { entity, .. } => Some(entity.clone()),
                    _ => None,
                };
                let found = match holder {
                    Some(holder) => holder == entry.entity,
                    None => child.remove(rest, entry, levels, now),
                };
                if !found {
                    return false;
                }
                if matches!(child, Self::Unique { .. }) || child.is_empty() {
                    children.remove(key);
                }
                *stamp = now;
                true
            }
            Self::Leaf {
                entries,
                members,
                stamp,
            } => match entries.binary_search_by(|e| e.order(entry, levels)) {
                Ok(pos) => {
                    entries.remove_at(pos);
                    members.remove_at(pos);
                    *stamp = now;
                    true
                }
                Err(_) => false,
            },
            Self::Unique { .. } => false,
        }
    }

    /// Swaps `old` for `new` in its bucket when the new sort key keeps the
    /// same position. Returns false if the entry would move.
    fn replace_in_place(&mut self, hash: &[Value], old: &Entry, new: &Entry, levels: &[SortLevel]) -> bool {
        match self {
            Self::Hash { children, .. } => {
                let Some((key, rest)) = hash.split_first() else {
                    return false;
                };
                children
                    .get_mut(key)
                    .is_some_and(|child| child.replace_in_place(rest, old, new, levels))
            }
            Self::Leaf { entries, .. } => {
                let Ok(pos) = entries.binary_search_by(|e| e.order(old, levels)) else {
                    return false;
                };
                let after_prev = pos == 0
                    || entries
                        .get(pos - 1)
                        .is_some_and(|prev| prev.order(new, levels) == Ordering::Less);
                let before_next = entries
                    .get(pos + 1)
                    .is_none_or(|next| next.order(new, levels) == Ordering::Greater);
                if !(after_prev && before_next) {
                    return false;
                }
                entries.set_at(pos, new.clone());
                true
            }
            Self::Unique { entity, .. } => *entity == new.entity,
        }
    }

    fn collect_into(&self, out: &mut Vec<Value>) {
        match self {
            Self::Hash { children, .. } => {
                let mut keys: Vec<&Value> = children.keys().collect();
                keys.sort();
                for key in keys {
                    if let Some(child) = children.get(key) {
                        child.collect_into(out);
                    }
                }
            }
            Self::Leaf { members, .. } | Self::Unique { members, .. } => {
                out.extend(members.iter().cloned());
            }
        }
    }
}

/// A maintained index over one collection.
#[derive(Clone, Debug)]
pub struct Index {
    spec: IndexSpec,
    root: Node,
}

impl Index {
    /// Creates an empty index.
    #[must_use]
    pub fn new(spec: IndexSpec) -> Self {
        let root = if spec.hash.is_empty() {
            Node::leaf()
        } else {
            Node::hash()
        };
        Self { spec, root }
    }

    /// Returns the declaration.
    #[must_use]
    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    fn key_of(&self, entity: &EntityRef, record: &Record) -> (Vec<Value>, Entry) {
        let hash = self.spec.hash.iter().map(|f| record.value(f)).collect();
        let sort = self.spec.sort.iter().map(|l| record.value(&l.field)).collect();
        (
            hash,
            Entry {
                sort,
                entity: entity.clone(),
            },
        )
    }

    fn skips(&self, hash: &[Value]) -> bool {
        self.spec.unique && hash.iter().any(Value::is_nil)
    }

    /// Returns the colliding key if inserting `record` would violate uniqueness.
    #[must_use]
    pub fn conflict(&self, entity: &EntityRef, record: &Record) -> Option<Value> {
        if !self.spec.unique {
            return None;
        }
        let (hash, _) = self.key_of(entity, record);
        if self.skips(&hash) {
            return None;
        }
        match self.node_at(&hash) {
            Some(Node::Unique { entity: other, .. }) if other != entity => Some(if hash.len() == 1 {
                hash[0].clone()
            } else {
                hash.into_iter().collect()
            }),
            _ => None,
        }
    }

    /// Inserts an entity, returning the hash path of the bucket it landed in.
    ///
    /// Callers check [`Index::conflict`] first; a colliding unique key
    /// replaces the previous holder.
    pub fn insert(&mut self, entity: &EntityRef, record: &Record, now: Stamp) -> Option<Vec<Value>> {
        let (hash, entry) = self.key_of(entity, record);
        if self.skips(&hash) {
            return None;
        }
        self.root
            .insert(&hash, entry, &self.spec.sort, self.spec.unique, now);
        Some(hash)
    }

    /// Removes an entity, returning the hash path of the bucket it left.
    pub fn remove(&mut self, entity: &EntityRef, record: &Record, now: Stamp) -> Option<Vec<Value>> {
        let (hash, entry) = self.key_of(entity, record);
        if self.skips(&hash) {
            return None;
        }
        self.root
            .remove(&hash, &entry, &self.spec.sort, now)
            .then_some(hash)
    }

    /// Moves an entity after its record changed from `old` to `new`.
    ///
    /// Returns the hash paths of every bucket whose contents changed. A sort
    /// key change that leaves the entity in place changes nothing visible.
    pub fn update(&mut self, entity: &EntityRef, old: &Record, new: &Record, now: Stamp) -> Vec<Vec<Value>> {
        let (old_hash, old_entry) = self.key_of(entity, old);
        let (new_hash, new_entry) = self.key_of(entity, new);
        if old_hash == new_hash && old_entry == new_entry {
            return Vec::new();
        }
        if old_hash == new_hash
            && !self.skips(&old_hash)
            && self
                .root
                .replace_in_place(&old_hash, &old_entry, &new_entry, &self.spec.sort)
        {
            return Vec::new();
        }
        let mut paths = Vec::new();
        if !self.skips(&old_hash) && self.root.remove(&old_hash, &old_entry, &self.spec.sort, now) {
            paths.push(old_hash);
        }
        if !self.skips(&new_hash) {
            self.root
                .insert(&new_hash, new_entry, &self.spec.sort, self.spec.unique, now);
            if paths.last() != Some(&new_hash) {
                paths.push(new_hash);
            }
        }
        paths
    }

    fn node_at(&self, path: &[Value]) -> Option<&Node> {
        let mut node = &self.root;
        for key in path {
            match node {
                Node::Hash { children, .. } => node = children.get(key)?,
                _ => return None,
            }
        }
        Some(node)
    }

    /// Returns the members under `path`, in index order.
    ///
    /// A path that reaches a bucket returns the bucket's own list, which keeps
    /// its identity until the bucket changes. A shorter path concatenates the
    /// buckets beneath it in key order.
    #[must_use]
    pub fn lookup(&self, path: &[Value]) -> Option<LtVec<Value>> {
        match self.node_at(path)? {
            Node::Leaf { members, .. } | Node::Unique { members, .. } => Some(members.clone()),
            node @ Node::Hash { .. } => {
                let mut out = Vec::new();
                node.collect_into(&mut out);
                Some(out.into_iter().collect())
            }
        }
    }

    /// Returns the hash keys one level below `path`, sorted.
    #[must_use]
    pub fn keys_at(&self, path: &[Value]) -> Vec<Value> {
        match self.node_at(path) {
            Some(Node::Hash { children, .. }) => {
                let mut keys: Vec<Value> = children.keys().cloned().collect();
                keys.sort();
                keys
            }
            _ => Vec::new(),
        }
    }

    /// Stamp of the last change under `path` (zero if nothing is there).
    #[must_use]
    pub fn stamp_at(&self, path: &[Value]) -> Stamp {
        self.node_at(path).map_or(Stamp::ZERO, Node::stamp)
    }
}

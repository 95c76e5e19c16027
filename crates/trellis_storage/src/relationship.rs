//! Relationship declarations and index selection.
//!
//! A relationship pairs an owner type with a child type through a foreign-key
//! field on the child that matches a primary-key field on the owner. The
//! `has_many` side is a live, sorted view of the matching children; it is
//! served by an index on the child collection. When the store is built each
//! `has_many` either adopts a declared index or gets a synthesized one.

use std::collections::HashMap;
use std::sync::Arc;

use trellis_foundation::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::index::{parse_sort, IndexSpec, SortLevel};
use crate::record::ID_FIELD;
use crate::schema::CollectionSchema;

/// What happens to related entities when one side is removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Dependent {
    /// Remove the related entities as well (cascade).
    Remove,
    /// Clear the foreign key of related children.
    Nullify,
    /// Leave related entities and their foreign keys untouched.
    None,
}

/// One-to-many relationship declared on the owner.
#[derive(Clone, Debug, PartialEq)]
pub struct HasMany {
    /// Property name on the owner.
    pub name: Arc<str>,
    /// Child collection.
    pub target: Arc<str>,
    /// Foreign-key field on the child.
    pub foreign_key: Arc<str>,
    /// Owner field matched against the foreign key.
    pub primary_key: Arc<str>,
    /// Sort specification for the children, e.g. `"-num"`.
    pub sort: Arc<str>,
    /// Policy applied to children when the owner is removed.
    pub dependent: Dependent,
}

impl HasMany {
    /// Declares `name` as the children of `target` whose `foreign_key` holds
    /// the owner's id.
    #[must_use]
    pub fn new(name: &str, target: &str, foreign_key: &str) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            foreign_key: foreign_key.into(),
            primary_key: ID_FIELD.into(),
            sort: "".into(),
            dependent: Dependent::Nullify,
        }
    }

    /// Sets the sort specification.
    #[must_use]
    pub fn with_sort(mut self, sort: &str) -> Self {
        self.sort = sort.into();
        self
    }

    /// Matches the foreign key against another owner field.
    #[must_use]
    pub fn with_primary_key(mut self, field: &str) -> Self {
        self.primary_key = field.into();
        self
    }

    /// Sets the removal policy.
    #[must_use]
    pub fn with_dependent(mut self, dependent: Dependent) -> Self {
        self.dependent = dependent;
        self
    }
}

/// Many-to-one relationship declared on the child.
#[derive(Clone, Debug, PartialEq)]
pub struct BelongsTo {
    /// Property name on the child.
    pub name: Arc<str>,
    /// Owner collection.
    pub target: Arc<str>,
    /// Foreign-key field on the child.
    pub foreign_key: Arc<str>,
    /// Owner field matched against the foreign key.
    pub primary_key: Arc<str>,
    /// Policy applied to the owner when the child is removed.
    pub dependent: Dependent,
}

impl BelongsTo {
    /// Declares `name` as the `target` entity whose id is held in `foreign_key`.
    #[must_use]
    pub fn new(name: &str, target: &str, foreign_key: &str) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            foreign_key: foreign_key.into(),
            primary_key: ID_FIELD.into(),
            dependent: Dependent::None,
        }
    }

    /// Matches the foreign key against another owner field.
    #[must_use]
    pub fn with_primary_key(mut self, field: &str) -> Self {
        self.primary_key = field.into();
        self
    }

    /// Sets the removal policy.
    #[must_use]
    pub fn with_dependent(mut self, dependent: Dependent) -> Self {
        self.dependent = dependent;
        self
    }
}

/// A `has_many` bound to the index that serves it.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedHasMany {
    /// Owner collection.
    pub owner: Arc<str>,
    /// The declaration.
    pub spec: HasMany,
    /// Parsed sort levels.
    pub sort: Vec<SortLevel>,
    /// Index slot in the child collection.
    pub index: usize,
    /// True if the index orders buckets by the full sort; otherwise reads re-sort.
    pub exact: bool,
    /// True if the index was created for this relationship.
    pub synthesized: bool,
}

/// A `belongs_to` bound to the way owners are looked up.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedBelongsTo {
    /// Child collection.
    pub child: Arc<str>,
    /// The declaration.
    pub spec: BelongsTo,
    /// Index slot in the owner collection, unless owners are found by id.
    pub index: Option<usize>,
}

/// Every relationship in a store, resolved against the collections.
#[derive(Clone, Debug, Default)]
pub struct Relations {
    has_many: Vec<ResolvedHasMany>,
    belongs_to: Vec<ResolvedBelongsTo>,
}

impl Relations {
    /// Looks up a `has_many` by owner collection and property name.
    #[must_use]
    pub fn has_many(&self, owner: &str, name: &str) -> Option<&ResolvedHasMany> {
        self.has_many
            .iter()
            .find(|r| &*r.owner == owner && &*r.spec.name == name)
    }

    /// Looks up a `belongs_to` by child collection and property name.
    #[must_use]
    pub fn belongs_to(&self, child: &str, name: &str) -> Option<&ResolvedBelongsTo> {
        self.belongs_to
            .iter()
            .find(|r| &*r.child == child && &*r.spec.name == name)
    }

    /// Every `has_many` whose owner lives in `collection`.
    pub fn owned_by<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = &'a ResolvedHasMany> + 'a {
        self.has_many.iter().filter(move |r| &*r.owner == collection)
    }

    /// Every `belongs_to` declared on `collection`.
    pub fn declared_on<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = &'a ResolvedBelongsTo> + 'a {
        self.belongs_to.iter().filter(move |r| &*r.child == collection)
    }

    /// Every `has_many` whose children are matched through `collection.field`.
    pub fn has_many_by_foreign_key<'a>(
        &'a self,
        collection: &'a str,
        field: &'a str,
    ) -> impl Iterator<Item = &'a ResolvedHasMany> + 'a {
        self.has_many
            .iter()
            .filter(move |r| &*r.spec.target == collection && &*r.spec.foreign_key == field)
    }

    /// Every `has_many` whose owners are matched through `collection.field`.
    pub fn has_many_by_primary_key<'a>(
        &'a self,
        collection: &'a str,
        field: &'a str,
    ) -> impl Iterator<Item = &'a ResolvedHasMany> + 'a {
        self.has_many
            .iter()
            .filter(move |r| &*r.owner == collection && &*r.spec.primary_key == field)
    }
}

/// Picks the declared index that can serve a `has_many`.
///
/// A candidate is a non-unique index whose only hash level is exactly
/// `=foreign_key` and whose sort levels are a prefix (same fields, same
/// directions) of `sort`. The longest prefix wins; ties go to the index
/// declared first. Returns the slot and the matched prefix length.
#[must_use]
pub fn select_index(indexes: &[IndexSpec], foreign_key: &str, sort: &[SortLevel]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    for (slot, spec) in indexes.iter().enumerate() {
        let levels = spec.sort_levels();
        let candidate = !spec.is_unique()
            && spec.hash_fields().len() == 1
            && &*spec.hash_fields()[0] == foreign_key
            && levels.len() <= sort.len()
            && levels == &sort[..levels.len()];
        if candidate && best.is_none_or(|(_, len)| levels.len() > len) {
            best = Some((slot, levels.len()));
        }
    }
    best
}

/// Resolves every relationship in `schemas`.
///
/// Returns the resolved relations and the full index list of each
/// collection, which is the declared indexes followed by synthesized ones.
///
/// # Errors
///
/// Returns `InvalidSchema` when a relationship names an unknown collection,
/// an invalid sort specification, a foreign key a strict child does not
/// declare, or a name that collides with another member.
pub fn resolve(schemas: &[CollectionSchema]) -> Result<(Relations, HashMap<Arc<str>, Vec<IndexSpec>>)> {
    let mut indexes: HashMap<Arc<str>, Vec<IndexSpec>> = schemas
        .iter()
        .map(|s| (s.name.clone(), s.indexes.clone()))
        .collect();
    let by_name: HashMap<&str, &CollectionSchema> = schemas.iter().map(|s| (&*s.name, s)).collect();
    let mut relations = Relations::default();

    for schema in schemas {
        check_member_names(schema)?;

        for relation in &schema.has_many {
            let child = lookup(&by_name, &relation.target, &schema.name, &relation.name)?;
            if !child.accepts(&relation.foreign_key) {
                return Err(Error::invalid_schema(format!(
                    "{}.{}: {} does not declare foreign key {}",
                    schema.name, relation.name, child.name, relation.foreign_key
                )));
            }
            let sort = parse_sort(&relation.sort)?;
            let specs = indexes.entry(child.name.clone()).or_default();
            let (index, exact, synthesized) = match select_index(specs, &relation.foreign_key, &sort) {
                Some((slot, len)) => (slot, len == sort.len(), false),
                None => {
                    specs.push(IndexSpec::from_levels(vec![relation.foreign_key.clone()], sort.clone()));
                    (specs.len() - 1, true, true)
                }
            };
            relations.has_many.push(ResolvedHasMany {
                owner: schema.name.clone(),
                spec: relation.clone(),
                sort,
                index,
                exact,
                synthesized,
            });
        }

        for relation in &schema.belongs_to {
            let owner = lookup(&by_name, &relation.target, &schema.name, &relation.name)?;
            if !schema.accepts(&relation.foreign_key) {
                return Err(Error::invalid_schema(format!(
                    "{}.{}: foreign key {} is not declared",
                    schema.name, relation.name, relation.foreign_key
                )));
            }
            let index = if &*relation.primary_key == ID_FIELD {
                None
            } else {
                let specs = indexes.entry(owner.name.clone()).or_default();
                let found = specs.iter().position(|s| {
                    s.hash_fields().len() == 1 && s.hash_fields()[0] == relation.primary_key
                });
                Some(found.unwrap_or_else(|| {
                    specs.push(IndexSpec::from_levels(vec![relation.primary_key.clone()], Vec::new()));
                    specs.len() - 1
                }))
            };
            relations.belongs_to.push(ResolvedBelongsTo {
                child: schema.name.clone(),
                spec: relation.clone(),
                index,
            });
        }
    }

    Ok((relations, indexes))
}

fn lookup<'a>(
    by_name: &HashMap<&str, &'a CollectionSchema>,
    target: &str,
    owner: &str,
    relation: &str,
) -> Result<&'a CollectionSchema> {
    by_name.get(target).copied().ok_or_else(|| {
        Error::invalid_schema(format!("{owner}.{relation} refers to unknown collection {target}"))
    })
}

fn check_member_names(schema: &CollectionSchema) -> Result<()> {
    let mut seen: Vec<&str> = schema.fields.iter().map(|f| &*f.name).collect();
    let relation_names = schema
        .has_many
        .iter()
        .map(|r| &*r.name)
        .chain(schema.belongs_to.iter().map(|r| &*r.name));
    for name in relation_names {
        if name == ID_FIELD || seen.contains(&name) {
            return Err(Error::invalid_schema(format!(
                "{}.{name} is declared more than once",
                schema.name
            )));
        }
        seen.push(name);
    }
    Ok(())
}

//! Entity and service models.
//!
//! A model is the builder-time description of one entity type: its storage
//! schema plus the reactions, selectors and lifecycle hooks attached to it.
//! Models are evaluated once when the [`Store`](crate::Store) is built.

use std::rc::Rc;
use std::sync::Arc;

use trellis_foundation::{EntityId, EntityRef, Error, Result, Value};
use trellis_storage::{BelongsTo, CollectionSchema, FieldSchema, HasMany, IndexSpec, ID_FIELD};

use crate::store::Store;

// =============================================================================
// Callback Types
// =============================================================================

/// A reaction or lifecycle hook attached to an entity.
pub type EntityFn = Rc<dyn Fn(&Store, &EntityRef) -> Result<()>>;

/// A selector computed for one entity.
pub type EntitySelectorFn = Rc<dyn Fn(&Store, &EntityRef) -> Result<Value>>;

/// A reaction with no owning entity.
pub type ReactionFn = Rc<dyn Fn(&Store) -> Result<()>>;

/// A selector with no owning entity (collection or service scoped).
pub type SelectorFn = Rc<dyn Fn(&Store) -> Result<Value>>;

/// Called with the entity, the property name and its value before the action.
pub type PropertyHookFn = Rc<dyn Fn(&Store, &EntityRef, &str, &Value) -> Result<()>>;

// =============================================================================
// Entity Model
// =============================================================================

/// Description of one entity type.
#[derive(Clone)]
pub struct EntityModel {
    /// Storage schema: fields, indexes and relationships.
    pub schema: CollectionSchema,
    pub(crate) reactions: Vec<(Arc<str>, EntityFn)>,
    pub(crate) selectors: Vec<(Arc<str>, EntitySelectorFn)>,
    pub(crate) collection_selectors: Vec<(Arc<str>, SelectorFn)>,
    pub(crate) after_add: Vec<EntityFn>,
    pub(crate) after_remove: Vec<EntityFn>,
    pub(crate) after_change: Vec<EntityFn>,
    pub(crate) after_property_change: Vec<PropertyHookFn>,
}

impl EntityModel {
    /// Creates a model for the collection `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self::from_schema(CollectionSchema::new(name))
    }

    /// Creates a model around an existing schema.
    #[must_use]
    pub fn from_schema(schema: CollectionSchema) -> Self {
        Self {
            schema,
            reactions: Vec::new(),
            selectors: Vec::new(),
            collection_selectors: Vec::new(),
            after_add: Vec::new(),
            after_remove: Vec::new(),
            after_change: Vec::new(),
            after_property_change: Vec::new(),
        }
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.schema.name
    }

    /// Declares a field.
    #[must_use]
    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.schema = self.schema.with_field(field);
        self
    }

    /// Rejects writes to undeclared fields.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.schema = self.schema.strict();
        self
    }

    /// Declares an index.
    #[must_use]
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.schema = self.schema.with_index(index);
        self
    }

    /// Declares a one-to-many relationship.
    #[must_use]
    pub fn with_has_many(mut self, relation: HasMany) -> Self {
        self.schema = self.schema.with_has_many(relation);
        self
    }

    /// Declares a many-to-one relationship.
    #[must_use]
    pub fn with_belongs_to(mut self, relation: BelongsTo) -> Self {
        self.schema = self.schema.with_belongs_to(relation);
        self
    }

    /// Attaches a reaction run for every member, in declaration order.
    #[must_use]
    pub fn with_reaction(
        mut self,
        name: &str,
        reaction: impl Fn(&Store, &EntityRef) -> Result<()> + 'static,
    ) -> Self {
        self.reactions.push((name.into(), Rc::new(reaction)));
        self
    }

    /// Attaches a memoized computed property.
    #[must_use]
    pub fn with_selector(
        mut self,
        name: &str,
        selector: impl Fn(&Store, &EntityRef) -> Result<Value> + 'static,
    ) -> Self {
        self.selectors.push((name.into(), Rc::new(selector)));
        self
    }

    /// Attaches a memoized computed value over the whole collection.
    #[must_use]
    pub fn with_collection_selector(
        mut self,
        name: &str,
        selector: impl Fn(&Store) -> Result<Value> + 'static,
    ) -> Self {
        self.collection_selectors.push((name.into(), Rc::new(selector)));
        self
    }

    /// Runs after a member is added.
    #[must_use]
    pub fn after_add(mut self, hook: impl Fn(&Store, &EntityRef) -> Result<()> + 'static) -> Self {
        self.after_add.push(Rc::new(hook));
        self
    }

    /// Runs before a member leaves the collection, after relationship cascades.
    #[must_use]
    pub fn after_remove(mut self, hook: impl Fn(&Store, &EntityRef) -> Result<()> + 'static) -> Self {
        self.after_remove.push(Rc::new(hook));
        self
    }

    /// Runs at most once per action for a member whose properties changed.
    #[must_use]
    pub fn after_change(mut self, hook: impl Fn(&Store, &EntityRef) -> Result<()> + 'static) -> Self {
        self.after_change.push(Rc::new(hook));
        self
    }

    /// Runs once per changed data property, receiving the value it had
    /// before the action.
    #[must_use]
    pub fn after_property_change(
        mut self,
        hook: impl Fn(&Store, &EntityRef, &str, &Value) -> Result<()> + 'static,
    ) -> Self {
        self.after_property_change.push(Rc::new(hook));
        self
    }

    pub(crate) fn reaction_names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.reactions.iter().map(|(name, _)| name)
    }

    pub(crate) fn selector(&self, name: &str) -> Option<&EntitySelectorFn> {
        self.selectors.iter().find(|(n, _)| &**n == name).map(|(_, f)| f)
    }

    pub(crate) fn collection_selector(&self, name: &str) -> Option<&SelectorFn> {
        self.collection_selectors
            .iter()
            .find(|(n, _)| &**n == name)
            .map(|(_, f)| f)
    }

    pub(crate) fn has_many(&self, name: &str) -> bool {
        self.schema.has_many.iter().any(|r| &*r.name == name)
    }

    pub(crate) fn belongs_to(&self, name: &str) -> bool {
        self.schema.belongs_to.iter().any(|r| &*r.name == name)
    }

    /// Selector and reaction names must not shadow stored members.
    pub(crate) fn validate(&self) -> Result<()> {
        let mut seen: Vec<&str> = vec![ID_FIELD];
        seen.extend(self.schema.fields.iter().map(|f| &*f.name));
        seen.extend(self.schema.has_many.iter().map(|r| &*r.name));
        seen.extend(self.schema.belongs_to.iter().map(|r| &*r.name));
        let members = self
            .selectors
            .iter()
            .map(|(n, _)| &**n)
            .chain(self.reactions.iter().map(|(n, _)| &**n));
        for name in members {
            if seen.contains(&name) {
                return Err(Error::invalid_schema(format!(
                    "{}.{name} is declared more than once",
                    self.schema.name
                )));
            }
            seen.push(name);
        }
        Ok(())
    }
}

impl std::fmt::Debug for EntityModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityModel")
            .field("schema", &self.schema)
            .field("reactions", &self.reactions.len())
            .field("selectors", &self.selectors.len())
            .field("collection_selectors", &self.collection_selectors.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Service Model
// =============================================================================

/// A singleton holder of selectors and reactions over one or more collections.
#[derive(Clone)]
pub struct ServiceModel {
    pub(crate) name: Arc<str>,
    pub(crate) selectors: Vec<(Arc<str>, SelectorFn)>,
    pub(crate) reactions: Vec<(Arc<str>, ReactionFn)>,
}

impl ServiceModel {
    /// Creates an empty service.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            selectors: Vec::new(),
            reactions: Vec::new(),
        }
    }

    /// Returns the service name.
    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Attaches a memoized computed value.
    #[must_use]
    pub fn with_selector(mut self, name: &str, selector: impl Fn(&Store) -> Result<Value> + 'static) -> Self {
        self.selectors.push((name.into(), Rc::new(selector)));
        self
    }

    /// Attaches a reaction that first runs when the store is built.
    #[must_use]
    pub fn with_reaction(mut self, name: &str, reaction: impl Fn(&Store) -> Result<()> + 'static) -> Self {
        self.reactions.push((name.into(), Rc::new(reaction)));
        self
    }

    pub(crate) fn selector(&self, name: &str) -> Option<&SelectorFn> {
        self.selectors.iter().find(|(n, _)| &**n == name).map(|(_, f)| f)
    }
}

impl std::fmt::Debug for ServiceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceModel")
            .field("name", &self.name)
            .field("selectors", &self.selectors.len())
            .field("reactions", &self.reactions.len())
            .finish()
    }
}

// =============================================================================
// Draft
// =============================================================================

/// An entity under construction, before it is added to a collection.
///
/// A draft may set data fields and relationship members; relationships are
/// applied once the entity is live.
#[derive(Clone, Debug, Default)]
pub struct Draft {
    id: Option<EntityId>,
    fields: Vec<(Arc<str>, Value)>,
}

impl Draft {
    /// Creates an empty draft.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a member. A later value for the same name replaces an earlier one.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| &**n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name.into(), value)),
        }
        self
    }

    /// Uses an explicit id instead of a generated one.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Returns the explicit id, if any.
    #[must_use]
    pub fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    /// Returns the members set so far.
    #[must_use]
    pub fn fields(&self) -> &[(Arc<str>, Value)] {
        &self.fields
    }

    pub(crate) fn into_parts(self) -> (Option<EntityId>, Vec<(Arc<str>, Value)>) {
        (self.id, self.fields)
    }
}

//! Error types for the Trellis store.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.
//! Every error fails the action in progress; nothing is retried internally.

use std::fmt;

use thiserror::Error;

use crate::entity::EntityRef;
use crate::value::Value;

/// The main error type for Trellis operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Appends a frame to this error's context, creating it if needed.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        let context = self.context.take().unwrap_or_default();
        self.context = Some(context.with_frame(frame));
        self
    }

    /// Creates an illegal mutation error.
    #[must_use]
    pub fn illegal_mutation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalMutation(message.into()))
    }

    /// Creates a circular dependency error from the chain of unit names.
    #[must_use]
    pub fn circular_dependency(chain: Vec<String>) -> Self {
        Self::new(ErrorKind::CircularDependency { chain })
    }

    /// Creates a unique constraint violation error.
    #[must_use]
    pub fn unique_violation(collection: &str, index: &str, key: &Value) -> Self {
        Self::new(ErrorKind::UniqueConstraintViolation {
            collection: collection.to_string(),
            index: index.to_string(),
            key: key.to_string(),
        })
    }

    /// Creates an unknown entity error.
    #[must_use]
    pub fn unknown_entity(entity: EntityRef) -> Self {
        Self::new(ErrorKind::UnknownEntity(entity))
    }

    /// Creates an inert (removed) entity error.
    #[must_use]
    pub fn inert_entity(entity: EntityRef) -> Self {
        Self::new(ErrorKind::InertEntity(entity))
    }

    /// Creates an unknown collection error.
    #[must_use]
    pub fn unknown_collection(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownCollection(name.into()))
    }

    /// Creates an unknown member error.
    #[must_use]
    pub fn unknown_member(collection: impl Into<String>, member: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownMember {
            collection: collection.into(),
            member: member.into(),
        })
    }

    /// Creates an invalid schema error.
    #[must_use]
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidSchema(message.into()))
    }

    /// Creates an error that aborts the current action on behalf of a callback.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected(message.into()))
    }

    /// Creates a semantic limit exceeded error.
    #[must_use]
    pub fn limit_exceeded(limit: SemanticLimit) -> Self {
        Self::new(ErrorKind::LimitExceeded(limit))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Mutation outside an action, or an unsupported structural operation.
    #[error("illegal mutation: {0}")]
    IllegalMutation(String),

    /// A reaction or selector re-entered a unit already on its own chain.
    #[error("Circular dependency detected while executing these reactions: {}", .chain.join(", "))]
    CircularDependency {
        /// Unit names in trigger order.
        chain: Vec<String>,
    },

    /// An insert collided with an existing key in a unique index.
    #[error("unique constraint violation: {collection} index {index} already holds key {key}")]
    UniqueConstraintViolation {
        /// The collection owning the index.
        collection: String,
        /// The index name.
        index: String,
        /// The colliding key, rendered.
        key: String,
    },

    /// The id is not present in the collection.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityRef),

    /// The entity was removed from its collection and is no longer live.
    #[error("entity has been removed: {0}")]
    InertEntity(EntityRef),

    /// No collection or service is registered under this name.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// The named member is not declared on the collection.
    #[error("unknown member {member} on {collection}")]
    UnknownMember {
        /// The collection that was accessed.
        collection: String,
        /// The member name that was not found.
        member: String,
    },

    /// A schema declaration is inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Semantic limit exceeded (kill switch triggered).
    #[error("limit exceeded: {0}")]
    LimitExceeded(SemanticLimit),

    /// A user callback aborted the action.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Semantic limits (kill switches) that can be exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticLimit {
    /// Maximum reaction evaluations per action exceeded.
    MaxReactionRuns {
        /// The configured limit.
        limit: usize,
        /// The reaction that would have exceeded it.
        reaction: Option<String>,
    },
}

impl fmt::Display for SemanticLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxReactionRuns { limit, reaction } => {
                write!(f, "max reaction runs ({limit}) exceeded")?;
                if let Some(name) = reaction {
                    write!(f, " at {name}")?;
                }
                Ok(())
            }
        }
    }
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Action number the error surfaced in.
    pub action: Option<u64>,
    /// Trail of units (reactions, selectors, hooks), innermost first.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the action number.
    #[must_use]
    pub fn with_action(mut self, action: u64) -> Self {
        self.action = Some(action);
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(action) = self.action {
            write!(f, "in action #{action}")?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}

//! Error types for the workspace model
//!
//! This module defines the validation and operation errors raised by the
//! in-memory engine. We use `thiserror` for automatic `Display` and `Error`
//! trait implementations.
//!
//! Consistency problems found by an explicit assertion pass are not errors;
//! they are reported as a diagnostic list by the storage crate.

use crate::types::EntityId;
use thiserror::Error;

/// Result type alias for workspace model operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the workspace model
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A mandatory field was never assigned a value
    #[error("Field {entity}#{field} should be initialized")]
    UninitializedField {
        /// Entity type name
        entity: String,
        /// Field name
        field: String,
    },

    /// A non-nullable parent reference is missing
    #[error("Field {entity}#{field} should be initialized: mandatory parent is missing")]
    MissingParent {
        /// Child entity type name
        entity: String,
        /// Parent reference field name
        field: String,
    },

    /// More than one candidate parent matches a singular parent slot
    #[error("Field {entity}#{field} is ambiguous: {candidates} candidate parents match")]
    AmbiguousParent {
        /// Child entity type name
        entity: String,
        /// Parent reference field name
        field: String,
        /// Number of matching candidates
        candidates: usize,
    },

    /// Another entity in the same storage already produces this persistent id
    #[error("Persistent id {persistent_id} is already used by {existing}")]
    DuplicatePersistentId {
        /// Presentable form of the persistent id
        persistent_id: String,
        /// Entity currently owning the id
        existing: EntityId,
    },

    /// A detached entity was attached to one builder and then offered to another
    #[error("Entity {entity} is already created in a different builder")]
    AttachedToDifferentBuilder {
        /// Entity type name
        entity: String,
    },

    /// Entity does not exist in the storage
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Entity type is not registered
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Value class is not registered
    #[error("Unknown value class: {0}")]
    UnknownValueClass(String),

    /// Field is not declared by the entity schema
    #[error("Unknown field {entity}#{field}")]
    UnknownField {
        /// Entity type name
        entity: String,
        /// Field name
        field: String,
    },

    /// Value does not conform to the declared field type
    #[error("Field {entity}#{field} expects {expected}")]
    FieldTypeMismatch {
        /// Entity type name
        entity: String,
        /// Field name
        field: String,
        /// Declared type
        expected: String,
    },

    /// Connection is not declared or does not accept the given entities
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    /// Abstract entity types cannot be instantiated
    #[error("Entity type {0} is abstract")]
    AbstractEntityType(String),

    /// Registry declarations are inconsistent
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
}

impl Error {
    /// True for errors raised because input violated a model invariant
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::UninitializedField { .. }
                | Error::MissingParent { .. }
                | Error::AmbiguousParent { .. }
                | Error::DuplicatePersistentId { .. }
                | Error::AttachedToDifferentBuilder { .. }
                | Error::FieldTypeMismatch { .. }
        )
    }
}

//! Error types for the record layer.

use oxide_record_core::QueryError;
use thiserror::Error;

/// Errors raised by entities, builders, relations and connections.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Malformed builder call or refused statement.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A named connection could not be opened or reused.
    #[error("connection `{name}` is unavailable: {reason}")]
    ConnectionUnavailable {
        /// Requested connection name.
        name: String,
        /// What went wrong.
        reason: String,
    },

    /// A lookup that must succeed found nothing.
    #[error("no matching {model} record: {key}")]
    RecordNotFound {
        /// Entity type name.
        model: String,
        /// Rendered key condition or query.
        key: String,
    },

    /// Mass assignment received keys outside the allow-list.
    #[error("add [{}] to the fillable attributes of {model} to allow mass assignment", .keys.join(", "))]
    MassAssignment {
        /// Entity type name.
        model: String,
        /// Rejected attribute names.
        keys: Vec<String>,
    },

    /// `with()` or `load()` named a relation the type never declared.
    #[error("call to undefined relation `{relation}` on {model}")]
    RelationNotDefined {
        /// Entity type name.
        model: String,
        /// Requested relation name.
        relation: String,
    },

    /// Attribute read that matched no relation and no attribute.
    #[error("undefined property `{property}` on {model}")]
    PropertyNotFound {
        /// Entity type name.
        model: String,
        /// Requested name.
        property: String,
    },

    /// Operation needs a primary-key value the entity does not have.
    #[error("{model} has no primary key value")]
    MissingPrimaryKey {
        /// Entity type name.
        model: String,
    },

    /// An attribute value could not be cast to its declared kind.
    #[error("cannot cast attribute `{attribute}`: {message}")]
    Cast {
        /// Attribute name.
        attribute: String,
        /// Reason.
        message: String,
    },

    /// Hashing a secret failed.
    #[error("failed to hash secret")]
    PasswordHash,

    /// Operation not allowed in the entity's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for record operations.
pub type Result<T> = std::result::Result<T, OrmError>;

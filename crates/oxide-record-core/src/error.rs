//! Error types for query construction.

use thiserror::Error;

/// Errors raised while accumulating or compiling clause state.
///
/// All of them are surfaced at the call that caused them; none is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Comparison operator outside the allowed set.
    #[error("invalid operator: {0}")]
    InvalidOperator(String),

    /// Malformed builder call (sort direction, bounds, operand shape).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An UPDATE was requested without any filter.
    #[error("update on `{table}` is missing a WHERE clause; refusing a mass update")]
    MissingWhereClause {
        /// Table the update targeted.
        table: String,
    },
}

/// Result type alias for query construction.
pub type Result<T> = std::result::Result<T, QueryError>;

//! # oxide-record-core
//!
//! IO-free query representation for the `oxide-record` data-access layer.
//!
//! This crate provides:
//! - [`Value`], the positional binding type, with inline rendering for
//!   diagnostics
//! - [`Query`], an accumulator of clause state (columns, filters, joins,
//!   ordering, paging) that compiles into a [`Statement`]
//! - Naming conventions deriving table and foreign-key names from type names
//!
//! ## Positional bindings
//!
//! Values never reach the SQL text. Every compiled statement carries one
//! binding per `?` placeholder, collected in the order select, filter,
//! join, order:
//!
//! ```rust
//! use oxide_record_core::{Query, Value};
//!
//! let user_input = "'; DROP TABLE users; --";
//! let stmt = Query::new("users").filter_eq("name", user_input).compile_select();
//!
//! assert_eq!(stmt.sql, "SELECT * FROM users WHERE name = ?");
//! assert_eq!(stmt.bindings, vec![Value::from(user_input)]);
//! ```

pub mod aggregate;
pub mod clause;
pub mod error;
pub mod inflect;
pub mod operator;
pub mod query;
pub mod statement;
pub mod value;

pub use aggregate::{Aggregate, AGGREGATE_ALIAS};
pub use clause::{Bindings, Join, Order, WhereClause};
pub use error::{QueryError, Result};
pub use operator::{Boolean, Direction, JoinKind, Operator};
pub use query::Query;
pub use statement::Statement;
pub use value::{Operand, Value, DATETIME_FORMAT};

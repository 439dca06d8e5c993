//! # oxide-record
//!
//! Active-record data access over SQLite.
//!
//! This crate provides:
//! - [`Model`], a per-type description (table, key, guards, casts,
//!   relations) declared once and cached
//! - [`Entity`], a row with attribute storage, dirty tracking,
//!   mass-assignment protection and persistence
//! - [`Builder`], a fluent query builder that materializes entities
//! - Four relation strategies with batched eager loading
//! - [`Collection`], the ordered result container
//! - [`ConnectionRegistry`], named connections resolved from [`Config`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use oxide_record::{attributes, ConnectionRegistry, Model, ModelSchema};
//!
//! struct Author;
//! struct Book;
//!
//! impl Model for Author {
//!     const NAME: &'static str = "Author";
//!
//!     fn define(schema: &mut ModelSchema) {
//!         schema.fillable(&["name"]);
//!         schema.has_many::<Book>("books");
//!     }
//! }
//!
//! impl Model for Book {
//!     const NAME: &'static str = "Book";
//!
//!     fn define(schema: &mut ModelSchema) {
//!         schema.fillable(&["title", "author_id"]);
//!         schema.belongs_to::<Author>("author");
//!     }
//! }
//!
//! async fn example(db: &ConnectionRegistry) -> oxide_record::Result<()> {
//!     let ada = Author::create(db, attributes! { "name" => "Ada" }).await?;
//!     Book::create(db, attributes! { "title" => "Notes", "author_id" => ada.key().cloned() }).await?;
//!
//!     // Two statements: one for authors, one for all of their books.
//!     let authors = Author::with(db, &["books"])?.get().await?;
//!     for author in &authors {
//!         let books = author.related_many("books");
//!     }
//!
//!     let recent = Book::query(db)
//!         .filter("title", "like", "N%")?
//!         .latest("id")
//!         .take(10)
//!         .get()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Filters and grouping
//!
//! Nested filters are parenthesized and joined with their own boolean, so
//! OR can never escape its group:
//!
//! ```ignore
//! let visible = Book::query(db)
//!     .filter_eq("published", true)
//!     .filter_nested(|q| Ok(q.filter_eq("author_id", 1).or_filter_eq("featured", true)))?;
//! // ... WHERE published = ? AND (author_id = ? OR featured = ?)
//! ```

pub mod builder;
pub mod cast;
pub mod collection;
pub mod config;
pub mod connection;
pub mod entity;
mod error;
pub mod model;
pub mod relations;
pub mod schema;

pub use builder::Builder;
pub use cast::Cast;
pub use collection::{Collection, HasAttributes, ToJson};
pub use config::{Config, ConnectionConfig, DatabaseConfig};
pub use connection::{Connection, ConnectionRegistry, ExecuteResult, Row};
pub use entity::{Attributes, Entity, EntityState, Property, Related};
pub use error::{OrmError, Result};
pub use model::Model;
pub use relations::{AnyRelation, BelongsTo, BelongsToMany, HasMany, HasOne, Relation};
pub use schema::{EventHandler, ModelEvent, ModelSchema, RelationDef, RelationKind};

// Re-export the query layer
pub use oxide_record_core::{
    Aggregate, Boolean, Direction, JoinKind, Operand, Operator, Query, QueryError, Statement,
    Value,
};

/// Builds an [`Attributes`] map from `key => value` pairs.
///
/// ```
/// use oxide_record::{attributes, Value};
///
/// let attrs = attributes! { "name" => "Ada", "age" => 36 };
/// assert_eq!(attrs["age"], Value::Int(36));
/// ```
#[macro_export]
macro_rules! attributes {
    () => {
        $crate::Attributes::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut attributes = $crate::Attributes::new();
        $(
            attributes.insert(::std::string::String::from($key), $crate::Value::from($value));
        )+
        attributes
    }};
}

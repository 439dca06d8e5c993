//! Model trait and static entry points.
//!
//! A model is a marker type that names an entity type and describes it once
//! through [`Model::define`]. Rows of that type are [`Entity`] values.

use std::sync::Arc;

use oxide_record_core::{Operand, Value};

use crate::builder::Builder;
use crate::collection::Collection;
use crate::connection::ConnectionRegistry;
use crate::entity::{Attributes, Entity};
use crate::error::Result;
use crate::schema::{self, ModelSchema};

/// An entity type.
///
/// # Example
///
/// ```ignore
/// use oxide_record::{attributes, Cast, Model, ModelSchema};
///
/// struct User;
///
/// impl Model for User {
///     const NAME: &'static str = "User";
///
///     fn define(schema: &mut ModelSchema) {
///         schema
///             .fillable(&["name", "email", "password"])
///             .hidden(&["password"])
///             .cast("password", Cast::Hashed);
///         schema.has_many::<Post>("posts");
///     }
/// }
///
/// let user = User::create(&db, attributes! { "name" => "Ada" }).await?;
/// let authors = User::with(&db, &["posts"])?.get().await?;
/// ```
#[allow(async_fn_in_trait)]
pub trait Model: Sized + Send + Sync + 'static {
    /// Type name. Drives the default table name and foreign-key names.
    const NAME: &'static str;

    /// Declares table overrides, guards, casts and relations.
    fn define(_schema: &mut ModelSchema) {}

    /// The cached registration table for this type.
    fn schema() -> Arc<ModelSchema> {
        schema::schema_for::<Self>()
    }

    /// A builder over every row of this type.
    fn query(db: &ConnectionRegistry) -> Builder {
        Builder::new(db.clone(), Self::schema())
    }

    /// A transient entity populated through mass assignment.
    ///
    /// # Errors
    ///
    /// Mass-assignment and cast failures.
    fn make(attributes: Attributes) -> Result<Entity> {
        Entity::make(Self::schema(), attributes)
    }

    /// A builder with one filter applied.
    ///
    /// # Errors
    ///
    /// Invalid operators and operand shapes.
    fn filter(
        db: &ConnectionRegistry,
        column: &str,
        operator: &str,
        value: impl Into<Operand>,
    ) -> Result<Builder> {
        Self::query(db).filter(column, operator, value)
    }

    /// A builder filtered by `column = value`.
    fn filter_eq(db: &ConnectionRegistry, column: &str, value: impl Into<Value>) -> Builder {
        Self::query(db).filter_eq(column, value)
    }

    /// A builder that eager loads `relations`.
    ///
    /// # Errors
    ///
    /// Undeclared relation names.
    fn with(db: &ConnectionRegistry, relations: &[&str]) -> Result<Builder> {
        Self::query(db).with(relations)
    }

    /// Every row.
    ///
    /// # Errors
    ///
    /// Connection, execution and cast failures.
    async fn all(db: &ConnectionRegistry) -> Result<Collection<Entity>> {
        Self::query(db).get().await
    }

    /// The row with the given primary key, if any.
    ///
    /// # Errors
    ///
    /// Connection, execution and cast failures.
    async fn find(db: &ConnectionRegistry, id: impl Into<Value>) -> Result<Option<Entity>> {
        Self::query(db).find(id).await
    }

    /// The row with the given primary key.
    ///
    /// # Errors
    ///
    /// [`crate::OrmError::RecordNotFound`] when no row has that key.
    async fn find_or_fail(db: &ConnectionRegistry, id: impl Into<Value>) -> Result<Entity> {
        Self::query(db).find_or_fail(id).await
    }

    /// Deletes the rows whose primary key is in `ids` with one statement.
    /// Returns the number of rows removed. Lifecycle hooks do not run.
    ///
    /// # Errors
    ///
    /// Connection and execution failures.
    async fn destroy<V: Into<Value>>(
        db: &ConnectionRegistry,
        ids: impl IntoIterator<Item = V>,
    ) -> Result<u64> {
        let schema = Self::schema();
        Self::query(db)
            .filter_in(&schema.primary_key, ids)
            .delete()
            .await
    }

    /// Mass assigns and saves a new entity.
    ///
    /// # Errors
    ///
    /// Mass-assignment, cast and execution failures.
    async fn create(db: &ConnectionRegistry, attributes: Attributes) -> Result<Entity> {
        Self::query(db).create(attributes).await
    }

    /// Updates the first row matching `search`, or creates one.
    ///
    /// # Errors
    ///
    /// Mass-assignment, cast and execution failures.
    async fn update_or_create(
        db: &ConnectionRegistry,
        search: Attributes,
        values: Attributes,
    ) -> Result<Entity> {
        Self::query(db).update_or_create(search, values).await
    }

    /// The first row matching `search`, or a newly created one.
    ///
    /// # Errors
    ///
    /// Mass-assignment, cast and execution failures.
    async fn first_or_create(
        db: &ConnectionRegistry,
        search: Attributes,
        values: Attributes,
    ) -> Result<Entity> {
        Self::query(db).first_or_create(search, values).await
    }
}

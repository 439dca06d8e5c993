//! Executing query builder bound to an entity type and its connection.
//!
//! A [`Builder`] wraps a [`Query`] with the entity type's schema and the
//! registry it runs against. Clause methods consume and return the builder;
//! terminal methods are `async` and issue exactly one statement each, plus
//! one statement per eager-loaded relation for [`Builder::get`].

use std::sync::Arc;

use oxide_record_core::{Aggregate, Boolean, Query, Statement, Value, AGGREGATE_ALIAS};
use tracing::debug;

use crate::collection::Collection;
use crate::connection::{Connection, ConnectionRegistry, Row};
use crate::entity::{Attributes, Entity};
use crate::error::{OrmError, Result};
use crate::relations::{AnyRelation, Relation};
use crate::schema::ModelSchema;

/// An in-progress query against one entity type.
#[derive(Debug, Clone)]
pub struct Builder {
    db: ConnectionRegistry,
    schema: Arc<ModelSchema>,
    query: Query,
    eager_load: Vec<String>,
}

impl Builder {
    /// A builder over every row of the schema's table.
    #[must_use]
    pub fn new(db: ConnectionRegistry, schema: Arc<ModelSchema>) -> Self {
        let query = Query::new(schema.table.clone());
        Self {
            db,
            schema,
            query,
            eager_load: Vec::new(),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.db
    }

    /// The accumulated clause state.
    #[must_use]
    pub const fn query(&self) -> &Query {
        &self.query
    }

    /// Relations queued for eager loading.
    #[must_use]
    pub fn eager_loads(&self) -> &[String] {
        &self.eager_load
    }

    /// An independent copy of this builder.
    #[must_use]
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// An empty builder on the same table, type and connection.
    #[must_use]
    pub fn fresh(&self) -> Self {
        Self::new(self.db.clone(), Arc::clone(&self.schema))
    }

    /// Compiled SELECT with bindings inlined. Diagnostics only.
    #[must_use]
    pub fn to_sql(&self) -> String {
        self.hydrating_query().to_sql()
    }

    /// Compiled SELECT with positional bindings.
    #[must_use]
    pub fn to_statement(&self) -> Statement {
        self.hydrating_query().compile_select()
    }

    /// The query entities are hydrated from. With joins and no explicit
    /// columns only the entity table's columns are selected, so a joined
    /// table's `id` cannot replace the entity's own.
    fn hydrating_query(&self) -> Query {
        if self.query.columns().is_empty() && !self.query.joins().is_empty() {
            self.query.fork().select(&[format!("{}.*", self.schema.table)])
        } else {
            self.query.fork()
        }
    }

    fn map(mut self, f: impl FnOnce(Query) -> Query) -> Self {
        self.query = f(self.query);
        self
    }

    fn try_map(mut self, f: impl FnOnce(Query) -> oxide_record_core::Result<Query>) -> Result<Self> {
        self.query = f(self.query)?;
        Ok(self)
    }

    // ==================== Columns ====================

    #[must_use]
    pub fn select<S: AsRef<str>>(self, columns: &[S]) -> Self {
        self.map(|q| q.select(columns))
    }

    #[must_use]
    pub fn add_select(self, column: &str) -> Self {
        self.map(|q| q.add_select(column))
    }

    #[must_use]
    pub fn select_raw(self, expression: &str, bindings: Vec<Value>) -> Self {
        self.map(|q| q.select_raw(expression, bindings))
    }

    // ==================== Filters ====================

    /// See [`Query::filter`].
    ///
    /// # Errors
    ///
    /// Invalid operators and list operands paired with scalar operators.
    pub fn filter(
        self,
        column: &str,
        operator: &str,
        value: impl Into<oxide_record_core::Operand>,
    ) -> Result<Self> {
        self.try_map(|q| q.filter(column, operator, value))
    }

    /// See [`Query::or_filter`].
    ///
    /// # Errors
    ///
    /// Same as [`Builder::filter`].
    pub fn or_filter(
        self,
        column: &str,
        operator: &str,
        value: impl Into<oxide_record_core::Operand>,
    ) -> Result<Self> {
        self.try_map(|q| q.or_filter(column, operator, value))
    }

    #[must_use]
    pub fn filter_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.map(|q| q.filter_eq(column, value))
    }

    #[must_use]
    pub fn or_filter_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.map(|q| q.or_filter_eq(column, value))
    }

    #[must_use]
    pub fn filter_in<V: Into<Value>>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.map(|q| q.filter_in(column, values))
    }

    #[must_use]
    pub fn or_filter_in<V: Into<Value>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.map(|q| q.or_filter_in(column, values))
    }

    #[must_use]
    pub fn filter_not_in<V: Into<Value>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.map(|q| q.filter_not_in(column, values))
    }

    #[must_use]
    pub fn or_filter_not_in<V: Into<Value>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.map(|q| q.or_filter_not_in(column, values))
    }

    #[must_use]
    pub fn filter_null(self, column: &str) -> Self {
        self.map(|q| q.filter_null(column))
    }

    #[must_use]
    pub fn or_filter_null(self, column: &str) -> Self {
        self.map(|q| q.or_filter_null(column))
    }

    #[must_use]
    pub fn filter_not_null(self, column: &str) -> Self {
        self.map(|q| q.filter_not_null(column))
    }

    #[must_use]
    pub fn or_filter_not_null(self, column: &str) -> Self {
        self.map(|q| q.or_filter_not_null(column))
    }

    #[must_use]
    pub fn filter_between(self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.map(|q| q.filter_between(column, low, high))
    }

    #[must_use]
    pub fn filter_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.map(|q| q.filter_raw(sql, bindings))
    }

    #[must_use]
    pub fn or_filter_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.map(|q| q.or_filter_raw(sql, bindings))
    }

    /// Runs `build` against a fresh builder and adds its filters as one
    /// parenthesised group joined with `AND`. Adds nothing when `build`
    /// adds no filters.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `build`.
    pub fn filter_nested<F>(self, build: F) -> Result<Self>
    where
        F: FnOnce(Self) -> Result<Self>,
    {
        self.nest_with(build, Boolean::And)
    }

    /// Like [`Builder::filter_nested`], joined with `OR`.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `build`.
    pub fn or_filter_nested<F>(self, build: F) -> Result<Self>
    where
        F: FnOnce(Self) -> Result<Self>,
    {
        self.nest_with(build, Boolean::Or)
    }

    fn nest_with<F>(self, build: F, boolean: Boolean) -> Result<Self>
    where
        F: FnOnce(Self) -> Result<Self>,
    {
        let child = build(self.fresh())?;
        Ok(self.map(|q| q.nest(child.query, boolean)))
    }

    // ==================== Joins ====================

    /// See [`Query::join`].
    ///
    /// Unless columns are selected, hydrated entities only carry this
    /// builder's own table columns. Select joined columns explicitly, under
    /// an alias when their names clash.
    ///
    /// # Errors
    ///
    /// Invalid or membership operators.
    pub fn join(self, table: &str, first: &str, operator: &str, second: &str) -> Result<Self> {
        self.try_map(|q| q.join(table, first, operator, second))
    }

    /// See [`Query::left_join`].
    ///
    /// # Errors
    ///
    /// Invalid or membership operators.
    pub fn left_join(self, table: &str, first: &str, operator: &str, second: &str) -> Result<Self> {
        self.try_map(|q| q.left_join(table, first, operator, second))
    }

    /// See [`Query::right_join`].
    ///
    /// # Errors
    ///
    /// Invalid or membership operators.
    pub fn right_join(self, table: &str, first: &str, operator: &str, second: &str) -> Result<Self> {
        self.try_map(|q| q.right_join(table, first, operator, second))
    }

    /// `INNER JOIN table ON first = second`.
    #[must_use]
    pub fn join_on(self, table: &str, first: &str, second: &str) -> Self {
        self.map(|q| q.join_on(table, first, second))
    }

    // ==================== Ordering & paging ====================

    /// See [`Query::order_by`].
    ///
    /// # Errors
    ///
    /// Directions other than `asc` and `desc`.
    pub fn order_by(self, column: &str, direction: &str) -> Result<Self> {
        self.try_map(|q| q.order_by(column, direction))
    }

    #[must_use]
    pub fn order_by_asc(self, column: &str) -> Self {
        self.map(|q| q.order_by_asc(column))
    }

    #[must_use]
    pub fn order_by_desc(self, column: &str) -> Self {
        self.map(|q| q.order_by_desc(column))
    }

    #[must_use]
    pub fn order_by_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.map(|q| q.order_by_raw(sql, bindings))
    }

    #[must_use]
    pub fn latest(self, column: &str) -> Self {
        self.map(|q| q.latest(column))
    }

    #[must_use]
    pub fn oldest(self, column: &str) -> Self {
        self.map(|q| q.oldest(column))
    }

    #[must_use]
    pub fn limit(self, limit: u64) -> Self {
        self.map(|q| q.limit(limit))
    }

    #[must_use]
    pub fn offset(self, offset: u64) -> Self {
        self.map(|q| q.offset(offset))
    }

    #[must_use]
    pub fn take(self, limit: u64) -> Self {
        self.limit(limit)
    }

    #[must_use]
    pub fn skip(self, offset: u64) -> Self {
        self.offset(offset)
    }

    // ==================== Eager loading ====================

    /// Queues relations to load for every result of [`Builder::get`], in
    /// the given order.
    ///
    /// # Errors
    ///
    /// [`OrmError::RelationNotDefined`] as soon as a name is not declared.
    pub fn with(mut self, relations: &[&str]) -> Result<Self> {
        for name in relations {
            self.schema.relation(name)?;
            if !self.eager_load.iter().any(|queued| queued == name) {
                self.eager_load.push(String::from(*name));
            }
        }
        Ok(self)
    }

    // ==================== Execution ====================

    async fn connection(&self) -> Result<Arc<Connection>> {
        self.db.connection(&self.schema.connection).await
    }

    fn key_column(&self) -> String {
        format!("{}.{}", self.schema.table, self.schema.primary_key)
    }

    async fn rows(&self, stmt: &Statement) -> Result<Vec<Row>> {
        self.connection().await?.select(stmt).await
    }

    /// Runs the query and hydrates entities, without eager loading.
    ///
    /// # Errors
    ///
    /// Connection, execution and cast failures.
    pub async fn fetch(&self) -> Result<Collection<Entity>> {
        let rows = self.rows(&self.to_statement()).await?;
        rows.into_iter()
            .map(|row| Entity::hydrate(Arc::clone(&self.schema), row))
            .collect()
    }

    /// Runs the query, hydrates entities and eager loads queued relations.
    ///
    /// # Errors
    ///
    /// Connection, execution and cast failures, from the main query or any
    /// relation query.
    pub async fn get(&self) -> Result<Collection<Entity>> {
        let mut entities = self.fetch().await?;
        if !entities.is_empty() {
            for name in &self.eager_load {
                let relation = AnyRelation::new(&self.schema, self.schema.relation(name)?);
                debug!(
                    model = %self.schema.name,
                    relation = %name,
                    parents = entities.len(),
                    "eager loading relation"
                );
                relation
                    .match_eager(&self.db, entities.as_mut_slice())
                    .await?;
            }
        }
        Ok(entities)
    }

    /// First result, if any.
    ///
    /// # Errors
    ///
    /// Same as [`Builder::get`].
    pub async fn first(&self) -> Result<Option<Entity>> {
        let results = self.fork().take(1).get().await?;
        Ok(results.into_iter().next())
    }

    /// First result, or [`OrmError::RecordNotFound`].
    ///
    /// # Errors
    ///
    /// [`OrmError::RecordNotFound`] when nothing matches.
    pub async fn first_or_fail(&self) -> Result<Entity> {
        self.first().await?.ok_or_else(|| OrmError::RecordNotFound {
            model: self.schema.name.clone(),
            key: self.query.to_sql(),
        })
    }

    /// The row with the given primary key, if any.
    ///
    /// # Errors
    ///
    /// Same as [`Builder::get`].
    pub async fn find(&self, id: impl Into<Value>) -> Result<Option<Entity>> {
        self.fork().filter_eq(&self.key_column(), id).first().await
    }

    /// The row with the given primary key, or [`OrmError::RecordNotFound`].
    ///
    /// # Errors
    ///
    /// [`OrmError::RecordNotFound`] when no row has that key.
    pub async fn find_or_fail(&self, id: impl Into<Value>) -> Result<Entity> {
        let id = id.into();
        let key = format!("{} = {}", self.schema.primary_key, id.to_sql_inline());
        self.find(id).await?.ok_or_else(|| OrmError::RecordNotFound {
            model: self.schema.name.clone(),
            key,
        })
    }

    /// Every row whose primary key is in `ids`.
    ///
    /// # Errors
    ///
    /// Same as [`Builder::get`].
    pub async fn find_many<V: Into<Value>>(
        &self,
        ids: impl IntoIterator<Item = V>,
    ) -> Result<Collection<Entity>> {
        self.fork().filter_in(&self.key_column(), ids).get().await
    }

    /// One column of the first row.
    ///
    /// # Errors
    ///
    /// Connection and execution failures.
    pub async fn value(&self, column: &str) -> Result<Option<Value>> {
        let stmt = self.query.fork().select(&[column]).take(1).compile_select();
        let rows = self.rows(&stmt).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_values().next()))
    }

    /// One column of every row.
    ///
    /// # Errors
    ///
    /// Connection and execution failures.
    pub async fn pluck(&self, column: &str) -> Result<Collection<Value>> {
        let stmt = self.query.fork().select(&[column]).compile_select();
        let rows = self.rows(&stmt).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_values().next().unwrap_or(Value::Null))
            .collect())
    }

    /// Runs an aggregate over the filtered rows.
    ///
    /// # Errors
    ///
    /// Connection and execution failures.
    pub async fn aggregate(&self, aggregate: &Aggregate) -> Result<Value> {
        let rows = self.rows(&self.query.compile_aggregate(aggregate)).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove(AGGREGATE_ALIAS))
            .unwrap_or(Value::Null))
    }

    /// Number of matching rows.
    ///
    /// # Errors
    ///
    /// Connection and execution failures.
    pub async fn count(&self) -> Result<i64> {
        let value = self.aggregate(&Aggregate::count_all()).await?;
        Ok(value.as_i64().unwrap_or(0))
    }

    /// # Errors
    ///
    /// Connection and execution failures.
    pub async fn max(&self, column: &str) -> Result<Value> {
        self.aggregate(&Aggregate::max(column)).await
    }

    /// # Errors
    ///
    /// Connection and execution failures.
    pub async fn min(&self, column: &str) -> Result<Value> {
        self.aggregate(&Aggregate::min(column)).await
    }

    /// # Errors
    ///
    /// Connection and execution failures.
    pub async fn sum(&self, column: &str) -> Result<Value> {
        self.aggregate(&Aggregate::sum(column)).await
    }

    /// # Errors
    ///
    /// Connection and execution failures.
    pub async fn avg(&self, column: &str) -> Result<Value> {
        self.aggregate(&Aggregate::avg(column)).await
    }

    /// Whether any row matches.
    ///
    /// # Errors
    ///
    /// Connection and execution failures.
    pub async fn exists(&self) -> Result<bool> {
        let stmt = self.query.fork().select(&["1 AS present"]).take(1).compile_select();
        Ok(!self.rows(&stmt).await?.is_empty())
    }

    /// Inserts one row as given, bypassing guards and casts.
    ///
    /// # Errors
    ///
    /// Connection and execution failures.
    pub async fn insert(&self, values: Attributes) -> Result<bool> {
        let stmt = self.query.compile_insert(&values);
        let result = self.connection().await?.execute(&stmt).await?;
        Ok(result.rows_affected > 0)
    }

    /// Inserts one row and returns its generated key.
    ///
    /// # Errors
    ///
    /// Connection and execution failures.
    pub async fn insert_get_id(&self, values: Attributes) -> Result<i64> {
        let stmt = self.query.compile_insert(&values);
        let result = self.connection().await?.execute(&stmt).await?;
        Ok(result.last_insert_id)
    }

    /// Updates every matching row. Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// [`oxide_record_core::QueryError::MissingWhereClause`] when no filter
    /// is set; nothing is executed in that case.
    pub async fn update(&self, values: Attributes) -> Result<u64> {
        let stmt = self.query.compile_update(&values)?;
        let result = self.connection().await?.execute(&stmt).await?;
        Ok(result.rows_affected)
    }

    /// Deletes every matching row; without filters, every row of the table.
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Connection and execution failures.
    pub async fn delete(&self) -> Result<u64> {
        let stmt = self.query.compile_delete();
        let result = self.connection().await?.execute(&stmt).await?;
        Ok(result.rows_affected)
    }

    /// Mass assigns `attributes` to a new entity and saves it. The entity
    /// comes back transient when a lifecycle hook cancels the save.
    ///
    /// # Errors
    ///
    /// Mass-assignment, cast and execution failures.
    pub async fn create(&self, attributes: Attributes) -> Result<Entity> {
        let mut entity = Entity::make(Arc::clone(&self.schema), attributes)?;
        entity.save(&self.db).await?;
        Ok(entity)
    }

    fn matching(&self, attributes: &Attributes) -> Self {
        attributes
            .iter()
            .fold(self.fork(), |builder, (column, value)| {
                builder.filter_eq(column, value)
            })
    }

    /// The first row matching every pair in `search`, or a new entity
    /// created from `search` and `values`.
    ///
    /// # Errors
    ///
    /// Mass-assignment, cast and execution failures.
    pub async fn first_or_create(&self, search: Attributes, values: Attributes) -> Result<Entity> {
        if let Some(existing) = self.matching(&search).first().await? {
            return Ok(existing);
        }
        let mut attributes = search;
        attributes.extend(values);
        self.create(attributes).await
    }

    /// Updates the first row matching `search` with `values`, or creates
    /// one from both.
    ///
    /// # Errors
    ///
    /// Mass-assignment, cast and execution failures.
    pub async fn update_or_create(&self, search: Attributes, values: Attributes) -> Result<Entity> {
        if let Some(mut existing) = self.matching(&search).first().await? {
            existing.fill(values)?;
            existing.save(&self.db).await?;
            return Ok(existing);
        }
        let mut attributes = search;
        attributes.extend(values);
        self.create(attributes).await
    }
}

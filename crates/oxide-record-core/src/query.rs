//! Clause accumulator and SQL compiler.
//!
//! A [`Query`] targets exactly one table. Builder methods append clause
//! state; the `compile_*` methods turn that state into a [`Statement`] whose
//! bindings line up one-to-one with its `?` placeholders.
//!
//! ```rust
//! use oxide_record_core::Query;
//!
//! let stmt = Query::new("users")
//!     .filter("age", ">", 18)?
//!     .filter_nested(|q| q.filter_eq("role", "admin").or_filter("role", "=", "owner"))?
//!     .order_by("name", "asc")?
//!     .take(10)
//!     .compile_select();
//!
//! assert_eq!(
//!     stmt.sql,
//!     "SELECT * FROM users WHERE age > ? AND (role = ? OR role = ?) ORDER BY name ASC LIMIT 10"
//! );
//! assert_eq!(stmt.bindings.len(), 3);
//! # Ok::<(), oxide_record_core::QueryError>(())
//! ```

use std::collections::BTreeMap;

use crate::aggregate::Aggregate;
use crate::clause::{Bindings, Join, Order, WhereClause};
use crate::error::{QueryError, Result};
use crate::operator::{Boolean, Direction, JoinKind, Operator};
use crate::statement::Statement;
use crate::value::{Operand, Value};

/// In-progress query against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    columns: Vec<String>,
    wheres: Vec<WhereClause>,
    joins: Vec<Join>,
    orders: Vec<Order>,
    limit: Option<u64>,
    offset: Option<u64>,
    bindings: Bindings,
}

impl Query {
    /// Creates an empty query selecting all columns of `table`.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            wheres: Vec::new(),
            joins: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            bindings: Bindings::default(),
        }
    }

    /// Returns an independent snapshot of this query.
    #[must_use]
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Returns an empty query on the same table.
    #[must_use]
    pub fn fresh(&self) -> Self {
        Self::new(self.table.clone())
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn wheres(&self) -> &[WhereClause] {
        &self.wheres
    }

    #[must_use]
    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    #[must_use]
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    #[must_use]
    pub const fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    #[must_use]
    pub const fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    #[must_use]
    pub const fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Whether at least one filter has been added.
    #[must_use]
    pub fn has_filters(&self) -> bool {
        !self.wheres.is_empty()
    }

    // ==================== Columns ====================

    /// Replaces the selected columns.
    #[must_use]
    pub fn select<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns.iter().map(|c| String::from(c.as_ref())).collect();
        self.bindings.select.clear();
        self
    }

    /// Appends one column to the selection.
    #[must_use]
    pub fn add_select(mut self, column: &str) -> Self {
        self.columns.push(String::from(column));
        self
    }

    /// Appends a raw select expression with its own bindings.
    #[must_use]
    pub fn select_raw(mut self, expression: &str, bindings: Vec<Value>) -> Self {
        self.columns.push(String::from(expression));
        self.bindings.select.extend(bindings);
        self
    }

    // ==================== Filters ====================

    /// Adds `column <operator> value`, joined with `AND`.
    ///
    /// `in`/`not in` with a list operand becomes a membership filter.
    ///
    /// # Errors
    ///
    /// [`QueryError::InvalidOperator`] for operators outside the allowed set
    /// and [`QueryError::InvalidArgument`] for a list operand paired with a
    /// scalar operator.
    pub fn filter(self, column: &str, operator: &str, value: impl Into<Operand>) -> Result<Self> {
        self.filter_with(column, operator, value, Boolean::And)
    }

    /// Adds `column <operator> value`, joined with `OR`.
    ///
    /// # Errors
    ///
    /// Same as [`Query::filter`].
    pub fn or_filter(
        self,
        column: &str,
        operator: &str,
        value: impl Into<Operand>,
    ) -> Result<Self> {
        self.filter_with(column, operator, value, Boolean::Or)
    }

    /// Adds a filter with an explicit conjunction.
    ///
    /// # Errors
    ///
    /// Same as [`Query::filter`].
    pub fn filter_with(
        self,
        column: &str,
        operator: &str,
        value: impl Into<Operand>,
        boolean: Boolean,
    ) -> Result<Self> {
        let operator: Operator = operator.parse()?;
        match (value.into(), operator.is_membership()) {
            (Operand::List(values), true) => {
                Ok(self.push_in(column, values, operator == Operator::NotIn, boolean))
            }
            (Operand::Single(value), true) => {
                Ok(self.push_in(column, vec![value], operator == Operator::NotIn, boolean))
            }
            (Operand::List(_), false) => Err(QueryError::InvalidArgument(format!(
                "operator {operator} does not accept a list of values"
            ))),
            (Operand::Single(value), false) => Ok(self.push_basic(column, operator, value, boolean)),
        }
    }

    /// Adds `column = value`, joined with `AND`.
    #[must_use]
    pub fn filter_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.push_basic(column, Operator::Eq, value.into(), Boolean::And)
    }

    /// Adds `column = value`, joined with `OR`.
    #[must_use]
    pub fn or_filter_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.push_basic(column, Operator::Eq, value.into(), Boolean::Or)
    }

    /// Adds `column IN (...)`, one binding per value.
    #[must_use]
    pub fn filter_in<V: Into<Value>>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push_in(column, values, false, Boolean::And)
    }

    #[must_use]
    pub fn or_filter_in<V: Into<Value>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push_in(column, values, false, Boolean::Or)
    }

    /// Adds `column NOT IN (...)`, one binding per value.
    #[must_use]
    pub fn filter_not_in<V: Into<Value>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push_in(column, values, true, Boolean::And)
    }

    #[must_use]
    pub fn or_filter_not_in<V: Into<Value>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push_in(column, values, true, Boolean::Or)
    }

    /// Adds `column IS NULL`.
    #[must_use]
    pub fn filter_null(self, column: &str) -> Self {
        self.push_null(column, false, Boolean::And)
    }

    #[must_use]
    pub fn or_filter_null(self, column: &str) -> Self {
        self.push_null(column, false, Boolean::Or)
    }

    /// Adds `column IS NOT NULL`.
    #[must_use]
    pub fn filter_not_null(self, column: &str) -> Self {
        self.push_null(column, true, Boolean::And)
    }

    #[must_use]
    pub fn or_filter_not_null(self, column: &str) -> Self {
        self.push_null(column, true, Boolean::Or)
    }

    /// Adds `column BETWEEN low AND high`.
    #[must_use]
    pub fn filter_between(self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.push_between(column, low.into(), high.into(), Boolean::And)
    }

    #[must_use]
    pub fn or_filter_between(
        self,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.push_between(column, low.into(), high.into(), Boolean::Or)
    }

    /// Adds a raw SQL predicate. Its `?` placeholders take `bindings`.
    #[must_use]
    pub fn filter_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.push(WhereClause::Raw {
            sql: String::from(sql),
            bindings,
            boolean: Boolean::And,
        })
    }

    #[must_use]
    pub fn or_filter_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.push(WhereClause::Raw {
            sql: String::from(sql),
            bindings,
            boolean: Boolean::Or,
        })
    }

    /// Runs `build` against a fresh query on the same table and adds its
    /// filters as one parenthesised group joined with `AND`.
    ///
    /// Nothing is added when the closure adds no filters.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `build`.
    pub fn filter_nested<F>(self, build: F) -> Result<Self>
    where
        F: FnOnce(Self) -> Result<Self>,
    {
        let child = build(self.fresh())?;
        Ok(self.nest(child, Boolean::And))
    }

    /// Like [`Query::filter_nested`], joined with `OR`.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `build`.
    pub fn or_filter_nested<F>(self, build: F) -> Result<Self>
    where
        F: FnOnce(Self) -> Result<Self>,
    {
        let child = build(self.fresh())?;
        Ok(self.nest(child, Boolean::Or))
    }

    /// Adds an already built child query as a parenthesised group.
    #[must_use]
    pub fn nest(self, child: Self, boolean: Boolean) -> Self {
        if !child.has_filters() {
            return self;
        }
        self.push(WhereClause::Nested {
            query: Box::new(child),
            boolean,
        })
    }

    fn push_basic(self, column: &str, operator: Operator, value: Value, boolean: Boolean) -> Self {
        self.push(WhereClause::Basic {
            column: String::from(column),
            operator,
            value,
            boolean,
        })
    }

    fn push_in(self, column: &str, values: Vec<Value>, negated: bool, boolean: Boolean) -> Self {
        self.push(WhereClause::In {
            column: String::from(column),
            values,
            negated,
            boolean,
        })
    }

    fn push_null(self, column: &str, negated: bool, boolean: Boolean) -> Self {
        self.push(WhereClause::Null {
            column: String::from(column),
            negated,
            boolean,
        })
    }

    fn push_between(self, column: &str, low: Value, high: Value, boolean: Boolean) -> Self {
        self.push(WhereClause::Between {
            column: String::from(column),
            low,
            high,
            boolean,
        })
    }

    fn push(mut self, clause: WhereClause) -> Self {
        self.bindings.filter.extend(clause.bindings());
        self.wheres.push(clause);
        self
    }

    // ==================== Joins ====================

    /// Adds `INNER JOIN table ON first <operator> second`.
    ///
    /// # Errors
    ///
    /// [`QueryError::InvalidOperator`] for operators outside the allowed set,
    /// [`QueryError::InvalidArgument`] for membership operators.
    pub fn join(self, table: &str, first: &str, operator: &str, second: &str) -> Result<Self> {
        self.join_with(JoinKind::Inner, table, first, operator, second)
    }

    /// Adds `LEFT JOIN table ON first <operator> second`.
    ///
    /// # Errors
    ///
    /// Same as [`Query::join`].
    pub fn left_join(self, table: &str, first: &str, operator: &str, second: &str) -> Result<Self> {
        self.join_with(JoinKind::Left, table, first, operator, second)
    }

    /// Adds `RIGHT JOIN table ON first <operator> second`.
    ///
    /// # Errors
    ///
    /// Same as [`Query::join`].
    pub fn right_join(
        self,
        table: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Result<Self> {
        self.join_with(JoinKind::Right, table, first, operator, second)
    }

    /// Adds `INNER JOIN table ON first = second`.
    #[must_use]
    pub fn join_on(mut self, table: &str, first: &str, second: &str) -> Self {
        self.joins.push(Join {
            kind: JoinKind::Inner,
            table: String::from(table),
            first: String::from(first),
            operator: Operator::Eq,
            second: String::from(second),
        });
        self
    }

    /// Adds a join of the given kind.
    ///
    /// # Errors
    ///
    /// Same as [`Query::join`].
    pub fn join_with(
        mut self,
        kind: JoinKind,
        table: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Result<Self> {
        let operator: Operator = operator.parse()?;
        if operator.is_membership() {
            return Err(QueryError::InvalidArgument(format!(
                "operator {operator} cannot be used in a join condition"
            )));
        }
        self.joins.push(Join {
            kind,
            table: String::from(table),
            first: String::from(first),
            operator,
            second: String::from(second),
        });
        Ok(self)
    }

    // ==================== Ordering & paging ====================

    /// Adds `ORDER BY column direction`.
    ///
    /// # Errors
    ///
    /// [`QueryError::InvalidArgument`] unless `direction` is `asc` or `desc`.
    pub fn order_by(mut self, column: &str, direction: &str) -> Result<Self> {
        let direction: Direction = direction.parse()?;
        self.orders.push(Order::Column {
            column: String::from(column),
            direction,
        });
        Ok(self)
    }

    #[must_use]
    pub fn order_by_asc(mut self, column: &str) -> Self {
        self.orders.push(Order::Column {
            column: String::from(column),
            direction: Direction::Asc,
        });
        self
    }

    #[must_use]
    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.orders.push(Order::Column {
            column: String::from(column),
            direction: Direction::Desc,
        });
        self
    }

    /// Adds a raw ORDER BY expression with its own bindings.
    #[must_use]
    pub fn order_by_raw(mut self, sql: &str, bindings: Vec<Value>) -> Self {
        self.orders.push(Order::Raw {
            sql: String::from(sql),
        });
        self.bindings.order.extend(bindings);
        self
    }

    /// Newest first by `column`.
    #[must_use]
    pub fn latest(self, column: &str) -> Self {
        self.order_by_desc(column)
    }

    /// Oldest first by `column`.
    #[must_use]
    pub fn oldest(self, column: &str) -> Self {
        self.order_by_asc(column)
    }

    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Alias for [`Query::limit`].
    #[must_use]
    pub const fn take(self, limit: u64) -> Self {
        self.limit(limit)
    }

    /// Alias for [`Query::offset`].
    #[must_use]
    pub const fn skip(self, offset: u64) -> Self {
        self.offset(offset)
    }

    // ==================== Compilation ====================

    /// Compiles the filter list without the `WHERE` keyword.
    ///
    /// The first clause carries no conjunction; every later clause is
    /// prefixed with its own `AND` or `OR`.
    #[must_use]
    pub fn compile_filters(&self) -> String {
        let mut sql = String::new();
        for (i, clause) in self.wheres.iter().enumerate() {
            if i > 0 {
                sql.push(' ');
                sql.push_str(clause.boolean().as_sql());
                sql.push(' ');
            }
            sql.push_str(&clause.to_sql());
        }
        sql
    }

    fn where_sql(&self) -> String {
        if self.wheres.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.compile_filters())
        }
    }

    /// Compiles a SELECT statement.
    #[must_use]
    pub fn compile_select(&self) -> Statement {
        let columns = if self.columns.is_empty() {
            String::from("*")
        } else {
            self.columns.join(", ")
        };
        let mut sql = format!("SELECT {columns} FROM {}", self.table);

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.to_sql());
        }

        sql.push_str(&self.where_sql());

        if !self.orders.is_empty() {
            let orders: Vec<String> = self.orders.iter().map(Order::to_sql).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        if let Some(offset) = self.offset {
            if self.limit.is_none() {
                // SQLite only accepts OFFSET after a LIMIT.
                sql.push_str(" LIMIT -1");
            }
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        Statement::new(sql, self.bindings.flatten())
    }

    /// Compiles the aggregate of this query: same filters and joins, select
    /// replaced by the aggregate expression, no ordering or offset, at most
    /// one row.
    #[must_use]
    pub fn compile_aggregate(&self, aggregate: &Aggregate) -> Statement {
        let mut query = self.fork().select(&[aggregate.to_sql()]);
        query.orders.clear();
        query.bindings.order.clear();
        query.offset = None;
        query.limit(1).compile_select()
    }

    /// Compiles an INSERT of one row. An empty row inserts defaults.
    #[must_use]
    pub fn compile_insert(&self, values: &BTreeMap<String, Value>) -> Statement {
        if values.is_empty() {
            return Statement::new(
                format!("INSERT INTO {} DEFAULT VALUES", self.table),
                Vec::new(),
            );
        }
        let columns: Vec<&str> = values.keys().map(String::as_str).collect();
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.table,
            columns.join(", ")
        );
        Statement::new(sql, values.values().cloned().collect())
    }

    /// Compiles an UPDATE of the filtered rows.
    ///
    /// SET bindings precede filter bindings.
    ///
    /// # Errors
    ///
    /// [`QueryError::MissingWhereClause`] when no filter is present, then
    /// [`QueryError::InvalidArgument`] when `values` is empty.
    pub fn compile_update(&self, values: &BTreeMap<String, Value>) -> Result<Statement> {
        if !self.has_filters() {
            return Err(QueryError::MissingWhereClause {
                table: self.table.clone(),
            });
        }
        if values.is_empty() {
            return Err(QueryError::InvalidArgument(String::from(
                "update requires at least one column",
            )));
        }
        let assignments: Vec<String> = values.keys().map(|c| format!("{c} = ?")).collect();
        let sql = format!(
            "UPDATE {} SET {}{}",
            self.table,
            assignments.join(", "),
            self.where_sql()
        );
        let mut bindings: Vec<Value> = values.values().cloned().collect();
        bindings.extend(self.bindings.filter.iter().cloned());
        Ok(Statement::new(sql, bindings))
    }

    /// Compiles a DELETE of the filtered rows. Without filters every row of
    /// the table is deleted.
    #[must_use]
    pub fn compile_delete(&self) -> Statement {
        let sql = format!("DELETE FROM {}{}", self.table, self.where_sql());
        Statement::new(sql, self.bindings.filter.clone())
    }

    /// Returns the compiled SELECT with bindings inlined, for diagnostics.
    #[must_use]
    pub fn to_sql(&self) -> String {
        self.compile_select().to_sql_inline()
    }
}

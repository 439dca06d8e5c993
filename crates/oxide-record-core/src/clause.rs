//! Clause model accumulated by [`Query`](crate::Query).

use crate::operator::{Boolean, Direction, JoinKind, Operator};
use crate::query::Query;
use crate::value::Value;

/// One filter in a WHERE clause, tagged with the conjunction that joins it
/// to the previous filter.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereClause {
    /// `column <op> ?`
    Basic {
        column: String,
        operator: Operator,
        value: Value,
        boolean: Boolean,
    },
    /// `column [NOT] IN (?, ?, ...)`
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
        boolean: Boolean,
    },
    /// `column IS [NOT] NULL`
    Null {
        column: String,
        negated: bool,
        boolean: Boolean,
    },
    /// `column BETWEEN ? AND ?`
    Between {
        column: String,
        low: Value,
        high: Value,
        boolean: Boolean,
    },
    /// A parenthesised group compiled from a child query.
    Nested { query: Box<Query>, boolean: Boolean },
    /// Caller-supplied SQL fragment with its own bindings.
    Raw {
        sql: String,
        bindings: Vec<Value>,
        boolean: Boolean,
    },
}

impl WhereClause {
    /// Conjunction joining this clause to the previous one.
    #[must_use]
    pub const fn boolean(&self) -> Boolean {
        match self {
            Self::Basic { boolean, .. }
            | Self::In { boolean, .. }
            | Self::Null { boolean, .. }
            | Self::Between { boolean, .. }
            | Self::Nested { boolean, .. }
            | Self::Raw { boolean, .. } => *boolean,
        }
    }

    /// Bindings this clause contributes, in placeholder order.
    #[must_use]
    pub fn bindings(&self) -> Vec<Value> {
        match self {
            Self::Basic { value, .. } => vec![value.clone()],
            Self::In { values, .. } => values.clone(),
            Self::Null { .. } => Vec::new(),
            Self::Between { low, high, .. } => vec![low.clone(), high.clone()],
            Self::Nested { query, .. } => query.bindings().filter.clone(),
            Self::Raw { bindings, .. } => bindings.clone(),
        }
    }

    /// Compiles the clause body, without its conjunction.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            Self::Basic {
                column, operator, ..
            } => format!("{column} {} ?", operator.as_sql()),
            Self::In {
                column,
                values,
                negated,
                ..
            } => {
                if values.is_empty() {
                    // An empty list matches nothing; its negation matches everything.
                    return String::from(if *negated { "1 = 1" } else { "0 = 1" });
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                let keyword = if *negated { "NOT IN" } else { "IN" };
                format!("{column} {keyword} ({placeholders})")
            }
            Self::Null {
                column, negated, ..
            } => {
                if *negated {
                    format!("{column} IS NOT NULL")
                } else {
                    format!("{column} IS NULL")
                }
            }
            Self::Between { column, .. } => format!("{column} BETWEEN ? AND ?"),
            Self::Nested { query, .. } => format!("({})", query.compile_filters()),
            Self::Raw { sql, .. } => sql.clone(),
        }
    }
}

/// A join between the query's table and another table on two columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub first: String,
    pub operator: Operator,
    pub second: String,
}

impl Join {
    #[must_use]
    pub fn to_sql(&self) -> String {
        format!(
            "{} {} ON {} {} {}",
            self.kind.as_sql(),
            self.table,
            self.first,
            self.operator.as_sql(),
            self.second
        )
    }
}

/// An ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub enum Order {
    /// `column ASC|DESC`
    Column { column: String, direction: Direction },
    /// Caller-supplied expression; its bindings live in the order bucket.
    Raw { sql: String },
}

impl Order {
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            Self::Column { column, direction } => format!("{column} {}", direction.as_sql()),
            Self::Raw { sql } => sql.clone(),
        }
    }
}

/// Positional bindings, bucketed by the clause that produced them.
///
/// Buckets are flattened in the order select, filter, join, order, which is
/// the order their placeholders appear in compiled SELECT statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    pub select: Vec<Value>,
    pub filter: Vec<Value>,
    pub join: Vec<Value>,
    pub order: Vec<Value>,
}

impl Bindings {
    /// All bindings in placeholder order.
    #[must_use]
    pub fn flatten(&self) -> Vec<Value> {
        self.select
            .iter()
            .chain(&self.filter)
            .chain(&self.join)
            .chain(&self.order)
            .cloned()
            .collect()
    }

    /// Total number of bindings across buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.select.len() + self.filter.len() + self.join.len() + self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

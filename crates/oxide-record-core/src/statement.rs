//! Compiled statements: SQL text plus its ordered positional bindings.

use crate::value::Value;

/// A compiled statement ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// One binding per placeholder, left to right.
    pub bindings: Vec<Value>,
}

impl Statement {
    /// Creates a statement.
    #[must_use]
    pub const fn new(sql: String, bindings: Vec<Value>) -> Self {
        Self { sql, bindings }
    }

    /// Number of `?` placeholders outside quoted literals.
    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        let mut in_literal = false;
        let mut count = 0;
        for c in self.sql.chars() {
            match c {
                '\'' => in_literal = !in_literal,
                '?' if !in_literal => count += 1,
                _ => {}
            }
        }
        count
    }

    /// Returns the SQL with every placeholder replaced by its binding's
    /// inline literal.
    ///
    /// For diagnostics only; never execute the result.
    #[must_use]
    pub fn to_sql_inline(&self) -> String {
        let mut out = String::with_capacity(self.sql.len());
        let mut bindings = self.bindings.iter();
        let mut in_literal = false;
        for c in self.sql.chars() {
            match c {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(c);
                }
                '?' if !in_literal => match bindings.next() {
                    Some(value) => out.push_str(&value.to_sql_inline()),
                    None => out.push(c),
                },
                _ => out.push(c),
            }
        }
        out
    }
}

//! Aggregate expressions used by the builder's count/max/min/sum/avg helpers.

/// Column alias the aggregate result is read back from.
pub const AGGREGATE_ALIAS: &str = "aggregate";

/// An aggregate function over one column, or `*` for row counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregate {
    Count { column: String },
    Sum { column: String },
    Avg { column: String },
    Max { column: String },
    Min { column: String },
}

impl Aggregate {
    /// `COUNT(*)`
    #[must_use]
    pub fn count_all() -> Self {
        Self::Count {
            column: String::from("*"),
        }
    }

    #[must_use]
    pub fn sum(column: &str) -> Self {
        Self::Sum {
            column: String::from(column),
        }
    }

    #[must_use]
    pub fn avg(column: &str) -> Self {
        Self::Avg {
            column: String::from(column),
        }
    }

    #[must_use]
    pub fn max(column: &str) -> Self {
        Self::Max {
            column: String::from(column),
        }
    }

    #[must_use]
    pub fn min(column: &str) -> Self {
        Self::Min {
            column: String::from(column),
        }
    }

    /// Returns the select expression, aliased to [`AGGREGATE_ALIAS`].
    #[must_use]
    pub fn to_sql(&self) -> String {
        let expr = match self {
            Self::Count { column } => format!("COUNT({column})"),
            Self::Sum { column } => format!("SUM({column})"),
            Self::Avg { column } => format!("AVG({column})"),
            Self::Max { column } => format!("MAX({column})"),
            Self::Min { column } => format!("MIN({column})"),
        };
        format!("{expr} AS {AGGREGATE_ALIAS}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_sql() {
        assert_eq!(Aggregate::count_all().to_sql(), "COUNT(*) AS aggregate");
        assert_eq!(Aggregate::max("age").to_sql(), "MAX(age) AS aggregate");
        assert_eq!(Aggregate::avg("score").to_sql(), "AVG(score) AS aggregate");
    }
}

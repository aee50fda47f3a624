//! Decomposition of a join condition into the join key and extra filters.
//!
//! A join that crosses a partition boundary cannot be evaluated by either
//! database, so its condition is taken apart:
//!
//! ```text
//!   f.fileid = s.file_source AND s.share_type = 0 AND f.storage = :st
//!   └── join key ──────────┘     └─ to side ─────┘     └─ from side ┘
//! ```
//!
//! The join key becomes an `IN` restriction on the sub-query, the extra
//! filters are pushed down to whichever query owns the columns they mention.

use dbsplit_core::{ColumnRef, CompareOp, CompositeKind, Expr, QueryError, Result};
use std::fmt;

/// A parsed join condition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinCondition {
    /// Key column on the side that is already part of the query
    pub from_column: Option<ColumnRef>,
    /// Key column on the joined table
    pub to_column: Option<ColumnRef>,
    /// Filters on the from side
    pub from_conditions: Vec<Expr>,
    /// Filters on the joined side
    pub to_conditions: Vec<Expr>,
}

impl JoinCondition {
    /// Parses the condition of a join of `join_table AS alias` onto `from_alias`.
    pub fn parse(condition: Option<&Expr>, join_table: &str, alias: &str, from_alias: &str) -> Result<Self> {
        let condition = condition.ok_or_else(|| {
            QueryError::MalformedPredicate(format!("Can't join on {} without a condition", join_table))
        })?;
        let parsed = Self::parse_part(condition, join_table, from_alias)?;
        if parsed.from_column.is_none() || parsed.to_column.is_none() {
            return Err(QueryError::MalformedPredicate(format!(
                "No join condition found from {} to {}",
                from_alias, alias
            )));
        }
        Ok(parsed)
    }

    fn parse_part(condition: &Expr, join_table: &str, from_alias: &str) -> Result<Self> {
        match condition {
            Expr::Composite {
                kind: CompositeKind::Or,
                ..
            } => Err(QueryError::MalformedPredicate(format!(
                "Can't join on {} with an OR expression",
                join_table
            ))),
            Expr::Composite { parts, .. } => {
                let parsed = parts
                    .iter()
                    .map(|part| Self::parse_part(part, join_table, from_alias))
                    .collect::<Result<Vec<_>>>()?;
                Self::merge(parsed)
            }
            _ if is_extra_condition(condition) => {
                let mut parsed = Self::default();
                if condition.mentions_qualifier(from_alias) {
                    parsed.from_conditions.push(condition.clone());
                } else {
                    parsed.to_conditions.push(condition.clone());
                }
                Ok(parsed)
            }
            Expr::Compare { left, op, right } => {
                let (Some(l), Some(r)) = (left.as_column(), right.as_column()) else {
                    return Err(QueryError::MalformedPredicate(format!(
                        "Can only join on {} with a column comparison",
                        join_table
                    )));
                };
                if *op != CompareOp::Eq {
                    return Err(QueryError::MalformedPredicate(format!(
                        "Can only join on {} with an `eq` condition",
                        join_table
                    )));
                }
                let (from, to) = if l.is_qualified_by(from_alias) {
                    (l, r)
                } else if r.is_qualified_by(from_alias) {
                    (r, l)
                } else {
                    return Err(QueryError::MalformedPredicate(format!(
                        "join condition for {} needs to explicitly refer to the table by alias",
                        join_table
                    )));
                };
                Ok(Self {
                    from_column: Some(from.clone()),
                    to_column: Some(to.clone()),
                    ..Self::default()
                })
            }
            _ => Err(QueryError::MalformedPredicate(format!(
                "Can't parse join condition on {}: {}",
                join_table, condition
            ))),
        }
    }

    /// Combines fragments of one condition. Each key column may be set by at
    /// most one fragment.
    pub fn merge(conditions: Vec<JoinCondition>) -> Result<Self> {
        let mut merged = Self::default();
        for condition in conditions {
            if (condition.from_column.is_some() && merged.from_column.is_some())
                || (condition.to_column.is_some() && merged.to_column.is_some())
            {
                return Err(QueryError::ConfigurationConflict(format!(
                    "Can't join from {} to {} as it already joins from {} to {}",
                    DisplayColumn(&condition.from_column),
                    DisplayColumn(&condition.to_column),
                    DisplayColumn(&merged.from_column),
                    DisplayColumn(&merged.to_column),
                )));
            }
            if condition.from_column.is_some() {
                merged.from_column = condition.from_column;
            }
            if condition.to_column.is_some() {
                merged.to_column = condition.to_column;
            }
            merged.from_conditions.extend(condition.from_conditions);
            merged.to_conditions.extend(condition.to_conditions);
        }
        Ok(merged)
    }
}

/// A filter rather than a key: exactly one side references columns.
fn is_extra_condition(condition: &Expr) -> bool {
    match condition {
        Expr::Compare { left, right, .. } => left.columns().is_empty() != right.columns().is_empty(),
        Expr::In { expr, list } => expr.columns().is_empty() != list.columns().is_empty(),
        Expr::IsNull(e) | Expr::IsNotNull(e) => !e.columns().is_empty(),
        _ => false,
    }
}

struct DisplayColumn<'a>(&'a Option<ColumnRef>);

impl fmt::Display for DisplayColumn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(column) => write!(f, "{}", column),
            None => write!(f, "nothing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbsplit_core::expr::{and, col, eq, gt, in_list, is_null, lit, or, param, raw};

    #[test]
    fn test_simple_key() {
        let condition = eq(col("s.file_source"), col("f.fileid"));
        let parsed = JoinCondition::parse(Some(&condition), "share", "s", "f").unwrap();
        assert_eq!(parsed.from_column, Some(ColumnRef::qualified("f", "fileid")));
        assert_eq!(parsed.to_column, Some(ColumnRef::qualified("s", "file_source")));
        assert!(parsed.from_conditions.is_empty());
    }

    #[test]
    fn test_extra_conditions_by_side() {
        let condition = and(vec![
            eq(col("f.fileid"), col("s.file_source")),
            eq(col("s.share_type"), lit(0)),
            in_list(col("f.storage"), param("storages")),
            is_null(col("s.expiration")),
        ]);
        let parsed = JoinCondition::parse(Some(&condition), "share", "s", "f").unwrap();
        assert_eq!(parsed.from_conditions, vec![in_list(col("f.storage"), param("storages"))]);
        assert_eq!(parsed.to_conditions.len(), 2);
    }

    #[test]
    fn test_rejections() {
        let err = JoinCondition::parse(None, "share", "s", "f").unwrap_err();
        assert_eq!(err.to_string(), "Malformed predicate: Can't join on share without a condition");

        let either = or(vec![
            eq(col("f.fileid"), col("s.file_source")),
            eq(col("f.fileid"), col("s.item_source")),
        ]);
        assert!(JoinCondition::parse(Some(&either), "share", "s", "f").is_err());

        let greater = gt(col("f.fileid"), col("s.file_source"));
        assert!(JoinCondition::parse(Some(&greater), "share", "s", "f").is_err());

        let unrelated = eq(col("x.id"), col("s.file_source"));
        assert!(JoinCondition::parse(Some(&unrelated), "share", "s", "f").is_err());

        let opaque = raw("`f`.`fileid` = `s`.`file_source`");
        assert!(JoinCondition::parse(Some(&opaque), "share", "s", "f").is_err());
    }

    #[test]
    fn test_filters_only() {
        let condition = eq(col("s.share_type"), lit(0));
        let err = JoinCondition::parse(Some(&condition), "share", "s", "f").unwrap_err();
        assert_eq!(err.to_string(), "Malformed predicate: No join condition found from f to s");
    }

    #[test]
    fn test_merge() {
        let key = JoinCondition {
            from_column: Some(ColumnRef::qualified("f", "fileid")),
            to_column: Some(ColumnRef::qualified("s", "file_source")),
            ..JoinCondition::default()
        };
        let filter = JoinCondition {
            to_conditions: vec![eq(col("s.share_type"), lit(0))],
            ..JoinCondition::default()
        };
        let merged = JoinCondition::merge(vec![key.clone(), filter]).unwrap();
        assert_eq!(merged.from_column, key.from_column);
        assert_eq!(merged.to_conditions.len(), 1);

        let err = JoinCondition::merge(vec![key.clone(), key]).unwrap_err();
        assert!(matches!(err, QueryError::ConfigurationConflict(_)));
    }

    #[test]
    fn test_merge_one_sided_fragments() {
        let from = JoinCondition {
            from_column: Some(ColumnRef::qualified("f", "fileid")),
            ..JoinCondition::default()
        };
        let to = JoinCondition {
            to_column: Some(ColumnRef::qualified("s", "file_source")),
            ..JoinCondition::default()
        };
        let merged = JoinCondition::merge(vec![from, to]).unwrap();
        assert_eq!(merged.from_column, Some(ColumnRef::qualified("f", "fileid")));
        assert_eq!(merged.to_column, Some(ColumnRef::qualified("s", "file_source")));
    }

    #[test]
    fn test_merge_conflicting_from_columns() {
        let fileid = JoinCondition {
            from_column: Some(ColumnRef::qualified("f", "fileid")),
            ..JoinCondition::default()
        };
        let parent = JoinCondition {
            from_column: Some(ColumnRef::qualified("f", "parent")),
            ..JoinCondition::default()
        };
        let err = JoinCondition::merge(vec![fileid, parent]).unwrap_err();
        assert!(matches!(err, QueryError::ConfigurationConflict(_)));
        assert!(err.to_string().contains("already joins from"));
    }
}

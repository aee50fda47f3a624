//! Shard key and primary key discovery.
//!
//! Keys are found by structural matching on predicates:
//!
//! - `column = :param`, `column = literal` (either operand order)
//! - `column IN (:array_param)`, `column IN (a, b, ...)`
//! - AND composites contribute the keys of every part
//! - OR composites contribute only when every branch yields keys for the
//!   column; otherwise they contribute nothing
//!
//! Anything else is ignored. Missing a key only widens the fan-out, while a
//! wrongly extracted key would route the query to the wrong shard.
//!
//! Matches are kept as [`KeySource`]s and resolved against the bound
//! parameters when read, so parameters bound after the predicate was added
//! are still seen.

use dbsplit_core::{ColumnRef, CompareOp, CompositeKind, Expr, ParamRef, Parameters, Value};

/// Where a key value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Named parameter, resolved lazily
    Parameter(String),
    /// Positional parameter, resolved lazily
    Positional(usize),
    /// Literal or hinted value
    Value(Value),
}

impl KeySource {
    /// Key source for a value expression, if it is a parameter or literal.
    pub fn from_expr(expr: &Expr) -> Option<Self> {
        match expr {
            Expr::Parameter(ParamRef::Named(name)) => Some(KeySource::Parameter(name.clone())),
            Expr::Parameter(ParamRef::Positional(i)) => Some(KeySource::Positional(*i)),
            Expr::Literal(v) => Some(KeySource::Value(v.clone())),
            _ => None,
        }
    }
}

fn is_column(expr: &Expr, column: &str) -> bool {
    matches!(expr, Expr::Column(c) if c.name == column)
}

/// Extracts the key sources a predicate pins `column` to.
///
/// The column matches by name; any table qualifier is ignored.
pub fn extract_keys(predicate: &Expr, column: &str) -> Vec<KeySource> {
    match predicate {
        Expr::Composite { kind, parts } => {
            let mut keys = Vec::new();
            for part in parts {
                let part_keys = extract_keys(part, column);
                if *kind == CompositeKind::Or && part_keys.is_empty() {
                    return Vec::new();
                }
                keys.extend(part_keys);
            }
            keys
        }
        Expr::Compare {
            left,
            op: CompareOp::Eq,
            right,
        } => {
            let value = if is_column(left, column) {
                right
            } else if is_column(right, column) {
                left
            } else {
                return Vec::new();
            };
            KeySource::from_expr(value).into_iter().collect()
        }
        Expr::In { expr, list } if is_column(expr, column) => match list.as_ref() {
            Expr::List(items) => {
                let keys: Option<Vec<_>> = items.iter().map(KeySource::from_expr).collect();
                keys.unwrap_or_default()
            }
            other => KeySource::from_expr(other).into_iter().collect(),
        },
        _ => Vec::new(),
    }
}

/// Resolves key sources to values, flattening array parameters, dropping
/// nulls and duplicates while keeping first-seen order.
pub fn resolve_keys(sources: &[KeySource], parameters: &Parameters) -> Vec<Value> {
    let mut values: Vec<Value> = Vec::new();
    let mut push = |value: &Value| match value {
        Value::List(items) => {
            for item in items {
                if !item.is_null() && !values.contains(item) {
                    values.push(item.clone());
                }
            }
        }
        Value::Null => {}
        other => {
            if !values.contains(other) {
                values.push(other.clone());
            }
        }
    };
    for source in sources {
        match source {
            KeySource::Parameter(name) => {
                if let Some(value) = parameters.value(name) {
                    push(value);
                }
            }
            KeySource::Positional(index) => {
                if let Some(param) = parameters.positional(*index) {
                    push(&param.value);
                }
            }
            KeySource::Value(value) => push(value),
        }
    }
    values
}

/// Bare name of a column given as `alias.column` or `column`.
pub(crate) fn column_name(column: &str) -> String {
    ColumnRef::parse(column).name
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbsplit_core::expr::{and, col, eq, gt, in_list, is_null, list, lit, or, param};
    use dbsplit_core::ParamType;

    #[test]
    fn test_eq_parameter() {
        let keys = extract_keys(&eq(col("f.storage"), param("s")), "storage");
        assert_eq!(keys, vec![KeySource::Parameter("s".into())]);
        assert!(extract_keys(&eq(col("f.storage"), param("s")), "fileid").is_empty());
    }

    #[test]
    fn test_reversed_operands_and_literal() {
        let keys = extract_keys(&eq(lit(5), col("storage")), "storage");
        assert_eq!(keys, vec![KeySource::Value(Value::Int(5))]);
    }

    #[test]
    fn test_in_forms() {
        let keys = extract_keys(&in_list(col("fileid"), param("ids")), "fileid");
        assert_eq!(keys, vec![KeySource::Parameter("ids".into())]);

        let keys = extract_keys(&in_list(col("fileid"), list(vec![lit(1), param("p")])), "fileid");
        assert_eq!(keys.len(), 2);

        let keys = extract_keys(&in_list(col("fileid"), list(vec![lit(1), col("other")])), "fileid");
        assert!(keys.is_empty());
    }

    #[test]
    fn test_other_operators_ignored() {
        assert!(extract_keys(&gt(col("storage"), lit(1)), "storage").is_empty());
        assert!(extract_keys(&is_null(col("storage")), "storage").is_empty());
        assert!(extract_keys(&eq(col("storage"), col("other")), "storage").is_empty());
    }

    #[test]
    fn test_and_collects_all_parts() {
        let predicate = and(vec![
            eq(col("storage"), lit(1)),
            eq(col("name"), lit("x")),
            eq(col("storage"), lit(2)),
        ]);
        assert_eq!(extract_keys(&predicate, "storage").len(), 2);
    }

    #[test]
    fn test_or_requires_every_branch() {
        let full = or(vec![eq(col("storage"), lit(1)), eq(col("storage"), lit(2))]);
        assert_eq!(extract_keys(&full, "storage").len(), 2);

        let partial = or(vec![eq(col("storage"), lit(1)), eq(col("name"), lit("x"))]);
        assert!(extract_keys(&partial, "storage").is_empty());

        let nested = or(vec![
            and(vec![eq(col("storage"), lit(1)), eq(col("name"), lit("x"))]),
            eq(col("storage"), lit(3)),
        ]);
        assert_eq!(extract_keys(&nested, "storage").len(), 2);
    }

    #[test]
    fn test_resolve_flattens_and_dedupes() {
        let mut params = Parameters::new();
        params.set_named("ids", Value::from(vec![3, 1, 3]), ParamType::IntArray);
        params.set_named("one", Value::Int(1), ParamType::Int);
        params.set_named("nothing", Value::Null, ParamType::Null);
        let positional = params.push_positional(Value::Int(9), ParamType::Int);

        let sources = vec![
            KeySource::Parameter("ids".into()),
            KeySource::Parameter("one".into()),
            KeySource::Parameter("nothing".into()),
            KeySource::Parameter("unbound".into()),
            KeySource::Positional(positional),
            KeySource::Value(Value::Int(4)),
        ];
        assert_eq!(
            resolve_keys(&sources, &params),
            vec![Value::Int(3), Value::Int(1), Value::Int(9), Value::Int(4)]
        );
    }
}

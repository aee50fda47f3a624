//! Column values and result rows.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// =============================================================================
// Value
// =============================================================================

/// A single column value or bound parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// String
    String(String),
    /// List of values, used for array parameters
    List(Vec<Value>),
}

impl Value {
    /// Returns true if the value is null.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Attempts to read the value as an integer.
    ///
    /// Numeric strings and integral floats are accepted, since keys often
    /// come back from drivers or array parameters as strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Attempts to get the value as a string slice.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Normalized key used to match join columns across result sets.
    ///
    /// Integer `1`, float `1.0` and string `"1"` all produce the same key.
    /// Nulls never match anything.
    pub fn join_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(if *b { "1".into() } else { "0".into() }),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) if f.fract() == 0.0 => Some((*f as i64).to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::List(_) => None,
        }
    }

    /// Converts the value to a JSON-compatible serde_json::Value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(l) => serde_json::Value::Array(l.iter().map(|v| v.to_json()).collect()),
        }
    }

    /// Renders the value as an SQL literal.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::List(l) => {
                let items: Vec<String> = l.iter().map(|v| v.to_sql_literal()).collect();
                items.join(", ")
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// =============================================================================
// Row
// =============================================================================

/// A single result row: column values in select order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Column values indexed by column name
    values: HashMap<String, Value>,
    /// Column order
    column_order: Vec<String>,
}

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            column_order: Vec::new(),
        }
    }

    /// Sets a value for a column, keeping the column's position if it already exists.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let col = column.into();
        if !self.values.contains_key(&col) {
            self.column_order.push(col.clone());
        }
        self.values.insert(col, value.into());
    }

    /// Gets a value by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Removes a column, returning its value.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let value = self.values.remove(column)?;
        self.column_order.retain(|c| c != column);
        Some(value)
    }

    /// Returns true if the row has a value for the column.
    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Returns the columns in order.
    pub fn columns(&self) -> &[String] {
        &self.column_order
    }

    /// Returns the values in column order.
    pub fn values(&self) -> Vec<Value> {
        self.iter().map(|(_, v)| v.clone()).collect()
    }

    /// Returns the value of the first column.
    pub fn first(&self) -> Option<&Value> {
        self.column_order.first().and_then(|c| self.values.get(c))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.column_order.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.column_order.is_empty()
    }

    /// Returns an iterator over (column, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.column_order
            .iter()
            .filter_map(|col| self.values.get(col).map(|v| (col.as_str(), v)))
    }
}

impl Default for Row {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.set(column, value);
        }
        row
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Null), "NULL");
        assert_eq!(format!("{}", Value::Int(123)), "123");
        assert_eq!(format!("{}", Value::String("hello".into())), "\"hello\"");
        assert_eq!(format!("{}", Value::from(vec![1, 2])), "[1, 2]");
    }

    #[test]
    fn test_as_i64_is_lenient() {
        assert_eq!(Value::Int(7).as_i64(), Some(7));
        assert_eq!(Value::from("42").as_i64(), Some(42));
        assert_eq!(Value::Float(3.0).as_i64(), Some(3));
        assert_eq!(Value::Float(3.5).as_i64(), None);
        assert_eq!(Value::from("abc").as_i64(), None);
        assert_eq!(Value::Null.as_i64(), None);
    }

    #[test]
    fn test_join_key_matches_across_types() {
        assert_eq!(Value::Int(1).join_key(), Value::from("1").join_key());
        assert_eq!(Value::Float(1.0).join_key(), Value::Int(1).join_key());
        assert_eq!(Value::Null.join_key(), None);
    }

    #[test]
    fn test_sql_literal_escapes_quotes() {
        assert_eq!(Value::from("it's").to_sql_literal(), "'it''s'");
        assert_eq!(Value::from(vec![1, 2, 3]).to_sql_literal(), "1, 2, 3");
        assert_eq!(Value::Null.to_sql_literal(), "NULL");
    }

    #[test]
    fn test_row_operations() {
        let mut row = Row::new();
        row.set("a", 1);
        row.set("b", "x");
        row.set("a", 2);

        assert_eq!(row.get("a"), Some(&Value::Int(2)));
        assert_eq!(row.get("c"), None);
        assert_eq!(row.columns(), &["a", "b"]);
        assert_eq!(row.first(), Some(&Value::Int(2)));

        assert_eq!(row.remove("a"), Some(Value::Int(2)));
        assert_eq!(row.columns(), &["b"]);
        assert_eq!(row.remove("missing"), None);
    }

    #[test]
    fn test_row_from_iter_keeps_order() {
        let row: Row = vec![("id", Value::Int(1)), ("v", Value::from("x"))]
            .into_iter()
            .collect();
        assert_eq!(row.columns(), &["id", "v"]);
        assert_eq!(row.values(), vec![Value::Int(1), Value::from("x")]);
    }

    #[test]
    fn test_value_json() {
        assert_eq!(Value::Int(5).to_json(), serde_json::json!(5));
        assert_eq!(Value::from(vec!["a", "b"]).to_json(), serde_json::json!(["a", "b"]));
    }
}

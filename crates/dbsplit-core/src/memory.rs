//! In-memory connection.
//!
//! Evaluates the structured parts of a [`Statement`] against rows held in
//! memory: predicates filter, selects project, writes mutate. Joins and
//! opaque SQL fragments are not evaluated (a raw predicate matches every
//! row). Used for tests and examples where a real database is not at hand.

use crate::builder::SelectItem;
use crate::connection::{Connection, QueryType, Statement};
use crate::expr::{CompareOp, CompositeKind, Expr, ParamRef};
use crate::params::Parameters;
use crate::result::{ArrayResult, ResultCursor};
use crate::value::{Row, Value};
use crate::{QueryError, Result};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;

/// A connection whose tables live in memory.
pub struct MemoryConnection {
    name: String,
    tables: Mutex<HashMap<String, Vec<Row>>>,
    auto_increment: HashMap<String, String>,
    last_insert_ids: Mutex<HashMap<String, i64>>,
    executed: Mutex<Vec<Statement>>,
    failure: Mutex<Option<String>>,
}

impl MemoryConnection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Mutex::new(HashMap::new()),
            auto_increment: HashMap::new(),
            last_insert_ids: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    /// Seeds a table with rows.
    pub fn with_rows(self, table: &str, rows: Vec<Row>) -> Self {
        self.insert_rows(table, rows);
        self
    }

    /// Fills `column` with the next free integer when an insert into `table` omits it.
    pub fn with_auto_increment(mut self, table: &str, column: &str) -> Self {
        self.auto_increment.insert(table.to_string(), column.to_string());
        self
    }

    pub fn insert_rows(&self, table: &str, rows: Vec<Row>) {
        self.tables.lock().entry(table.to_string()).or_default().extend(rows);
    }

    /// Current contents of a table.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    /// Every statement this connection has been asked to run, in order.
    pub fn executed(&self) -> Vec<Statement> {
        self.executed.lock().clone()
    }

    pub fn execution_count(&self) -> usize {
        self.executed.lock().len()
    }

    /// Makes every following call fail with a connection error.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    fn record(&self, statement: &Statement) -> Result<()> {
        if let Some(message) = self.failure.lock().clone() {
            return Err(QueryError::Connection(format!("{}: {}", self.name, message)));
        }
        self.executed.lock().push(statement.clone());
        Ok(())
    }

    fn target_table(statement: &Statement) -> Result<String> {
        statement
            .table
            .clone()
            .ok_or_else(|| QueryError::InvalidQuery("statement has no table".into()))
    }

    fn insert(&self, table: &str, statement: &Statement) -> Result<u64> {
        let empty = Row::new();
        let mut row = Row::new();
        for (column, value) in &statement.assignments {
            row.set(column.clone(), evaluate(value, &empty, &statement.parameters));
        }

        let mut tables = self.tables.lock();
        let rows = tables.entry(table.to_string()).or_default();
        if let Some(column) = self.auto_increment.get(table) {
            let id = match row.get(column).and_then(Value::as_i64) {
                Some(id) => id,
                None => {
                    let next = rows
                        .iter()
                        .filter_map(|r| r.get(column).and_then(Value::as_i64))
                        .max()
                        .unwrap_or(0)
                        + 1;
                    row.set(column.clone(), next);
                    next
                }
            };
            self.last_insert_ids.lock().insert(table.to_string(), id);
        }
        rows.push(row);
        Ok(1)
    }
}

impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute_query(&self, statement: &Statement) -> Result<Box<dyn ResultCursor>> {
        self.record(statement)?;
        let table = Self::target_table(statement)?;
        let tables = self.tables.lock();
        let rows = tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_predicate(statement.predicate.as_ref(), row, &statement.parameters))
                    .map(|row| project(&statement.selects, row, &statement.parameters))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Box::new(ArrayResult::new(rows)))
    }

    fn execute_statement(&self, statement: &Statement) -> Result<u64> {
        self.record(statement)?;
        let table = Self::target_table(statement)?;
        match statement.kind {
            QueryType::Select => Err(QueryError::InvalidQuery("select passed as a statement".into())),
            QueryType::Insert => self.insert(&table, statement),
            QueryType::Update => {
                let mut tables = self.tables.lock();
                let mut affected = 0;
                for row in tables.entry(table).or_default().iter_mut() {
                    if matches_predicate(statement.predicate.as_ref(), row, &statement.parameters) {
                        for (column, value) in &statement.assignments {
                            let value = evaluate(value, row, &statement.parameters);
                            row.set(column.clone(), value);
                        }
                        affected += 1;
                    }
                }
                Ok(affected)
            }
            QueryType::Delete => {
                let mut tables = self.tables.lock();
                let rows = tables.entry(table).or_default();
                let before = rows.len();
                rows.retain(|row| !matches_predicate(statement.predicate.as_ref(), row, &statement.parameters));
                Ok((before - rows.len()) as u64)
            }
        }
    }

    fn last_insert_id(&self, table: &str) -> Result<i64> {
        self.last_insert_ids
            .lock()
            .get(table)
            .copied()
            .ok_or_else(|| QueryError::Connection(format!("{}: no insert id for {}", self.name, table)))
    }
}

// =============================================================================
// Evaluation
// =============================================================================

fn project(selects: &[SelectItem], row: &Row, params: &Parameters) -> Row {
    if selects.is_empty() {
        return row.clone();
    }
    let mut out = Row::new();
    for item in selects {
        match &item.expr {
            Expr::Column(c) if c.is_wildcard() => {
                for (column, value) in row.iter() {
                    out.set(column, value.clone());
                }
            }
            expr => {
                let name = item.output_name().unwrap_or_else(|| expr.to_string());
                out.set(name, evaluate(expr, row, params));
            }
        }
    }
    out
}

fn matches_predicate(predicate: Option<&Expr>, row: &Row, params: &Parameters) -> bool {
    predicate.map_or(true, |p| truthy(&evaluate(p, row, params)))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        _ => true,
    }
}

fn evaluate(expr: &Expr, row: &Row, params: &Parameters) -> Value {
    match expr {
        Expr::Column(c) => row.get(&c.name).cloned().unwrap_or(Value::Null),
        Expr::Parameter(ParamRef::Named(name)) => params.value(name).cloned().unwrap_or(Value::Null),
        Expr::Parameter(ParamRef::Positional(i)) => {
            params.positional(*i).map(|p| p.value.clone()).unwrap_or(Value::Null)
        }
        Expr::Literal(v) => v.clone(),
        Expr::List(items) => Value::List(items.iter().map(|i| evaluate(i, row, params)).collect()),
        Expr::Compare { left, op, right } => {
            let l = evaluate(left, row, params);
            let r = evaluate(right, row, params);
            if l.is_null() || r.is_null() {
                return Value::Bool(false);
            }
            let ordering = compare_values(&l, &r);
            Value::Bool(match op {
                CompareOp::Eq => ordering == Some(Ordering::Equal),
                CompareOp::Neq => ordering.is_some_and(|o| o != Ordering::Equal),
                CompareOp::Lt => ordering == Some(Ordering::Less),
                CompareOp::Lte => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                CompareOp::Gt => ordering == Some(Ordering::Greater),
                CompareOp::Gte => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            })
        }
        Expr::In { expr, list } => {
            let needle = evaluate(expr, row, params);
            if needle.is_null() {
                return Value::Bool(false);
            }
            let found = match evaluate(list, row, params) {
                Value::List(items) => items.iter().any(|i| compare_values(&needle, i) == Some(Ordering::Equal)),
                single => compare_values(&needle, &single) == Some(Ordering::Equal),
            };
            Value::Bool(found)
        }
        Expr::IsNull(e) => Value::Bool(evaluate(e, row, params).is_null()),
        Expr::IsNotNull(e) => Value::Bool(!evaluate(e, row, params).is_null()),
        Expr::Composite { kind, parts } => {
            let mut results = parts.iter().map(|p| truthy(&evaluate(p, row, params)));
            Value::Bool(match kind {
                CompositeKind::And => results.all(|b| b),
                CompositeKind::Or => results.any(|b| b),
            })
        }
        Expr::Raw(_) => Value::Bool(true),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(*b as i64 as f64),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => Some(a.join_key()?.cmp(&b.join_key()?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{QueryBuilder, SqlQueryBuilder};
    use crate::expr::{col, eq, gt, in_list, lit, or, raw};
    use crate::params::ParamType;
    use std::sync::Arc;

    fn row(id: i64, name: &str, size: i64) -> Row {
        vec![
            ("id", Value::Int(id)),
            ("name", Value::from(name)),
            ("size", Value::Int(size)),
        ]
        .into_iter()
        .collect()
    }

    fn connection() -> Arc<MemoryConnection> {
        Arc::new(
            MemoryConnection::new("mem")
                .with_rows("files", vec![row(1, "a", 10), row(2, "b", 20), row(3, "c", 30)])
                .with_auto_increment("files", "id"),
        )
    }

    #[test]
    fn test_select_filters_and_projects() {
        let conn = connection();
        let mut qb = SqlQueryBuilder::new(conn.clone());
        qb.select(vec![col("f.name")]);
        qb.select_alias(col("f.size"), "bytes");
        qb.from("files", Some("f"));
        let ids = qb.create_named_parameter(Value::from(vec![1, 3]), ParamType::IntArray, None);
        qb.set_where(vec![in_list(col("f.id"), ids)]);

        let rows = qb.execute_query(None).unwrap().fetch_all_assoc().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].columns(), &["name", "bytes"]);
        assert_eq!(rows[1].get("bytes"), Some(&Value::Int(30)));
        assert_eq!(conn.execution_count(), 1);
    }

    #[test]
    fn test_or_and_raw() {
        let conn = connection();
        let mut qb = SqlQueryBuilder::new(conn);
        qb.from("files", None);
        qb.set_where(vec![or(vec![eq(col("id"), lit(1)), gt(col("size"), lit(25))]), raw("1 = 1")]);
        let rows = qb.execute_query(None).unwrap().fetch_all_assoc().unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.get("id").cloned()).collect();
        assert_eq!(ids, vec![Some(Value::Int(1)), Some(Value::Int(3))]);
    }

    #[test]
    fn test_loose_equality() {
        let conn = connection();
        let mut qb = SqlQueryBuilder::new(conn);
        qb.from("files", None);
        qb.set_where(vec![eq(col("id"), lit("2"))]);
        assert_eq!(qb.execute_query(None).unwrap().row_count().unwrap(), 1);
    }

    #[test]
    fn test_writes() {
        let conn = connection();

        let mut insert = SqlQueryBuilder::new(conn.clone());
        insert.insert("files");
        insert.set_value("name", lit("d"));
        assert_eq!(insert.execute_statement(None).unwrap(), 1);
        assert_eq!(insert.last_insert_id().unwrap(), 4);

        let mut update = SqlQueryBuilder::new(conn.clone());
        update.update("files", None);
        update.set("size", lit(0)).unwrap();
        update.set_where(vec![gt(col("id"), lit(2))]);
        assert_eq!(update.execute_statement(None).unwrap(), 2);

        let mut delete = SqlQueryBuilder::new(conn.clone());
        delete.delete("files", None);
        delete.set_where(vec![eq(col("size"), lit(0))]);
        assert_eq!(delete.execute_statement(None).unwrap(), 2);
        assert_eq!(conn.rows("files").len(), 2);
    }

    #[test]
    fn test_failure_mode() {
        let conn = connection();
        conn.fail_with("gone away");
        let mut qb = SqlQueryBuilder::new(conn.clone());
        qb.from("files", None);
        let err = qb.execute_query(None).err().unwrap();
        assert!(matches!(err, QueryError::Connection(ref m) if m.contains("gone away")));
        conn.clear_failure();
        assert!(qb.execute_query(None).is_ok());
    }
}

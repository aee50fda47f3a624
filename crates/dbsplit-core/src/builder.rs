//! The query builder seam.
//!
//! [`QueryBuilder`] is the object-safe interface every layer implements:
//! the reference [`SqlQueryBuilder`] renders SQL for one connection, and the
//! sharding and partitioning builders decorate a boxed `dyn QueryBuilder`,
//! intercepting the calls they need for routing and delegating the rest.
//!
//! ```text
//!   PartitionedQueryBuilder ──► ShardedQueryBuilder ──► SqlQueryBuilder ──► Connection
//!            │                                                  ▲
//!            └──── one sub-query per partition (same stack) ────┘
//! ```

use crate::connection::{Connection, QueryType, Statement};
use crate::expr::{ColumnRef, CompositeKind, Expr, ParamRef};
use crate::params::{ParamType, Parameters};
use crate::result::ResultCursor;
use crate::value::Value;
use crate::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Building blocks
// =============================================================================

/// How a joined table is combined with the rows it is joined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum JoinMode {
    #[default]
    Inner,
    Left,
    Right,
}

impl JoinMode {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinMode::Inner => "INNER JOIN",
            JoinMode::Left => "LEFT JOIN",
            JoinMode::Right => "RIGHT JOIN",
        }
    }
}

/// One projected expression, optionally aliased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectItem {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }

    /// Column name this item produces in a result row, if it can be known.
    pub fn output_name(&self) -> Option<String> {
        if let Some(alias) = &self.alias {
            return Some(alias.clone());
        }
        match &self.expr {
            Expr::Column(c) if !c.is_wildcard() => Some(c.name.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for SelectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} AS `{}`", self.expr, alias),
            None => write!(f, "{}", self.expr),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct JoinClause {
    mode: JoinMode,
    table: String,
    alias: String,
    condition: Option<Expr>,
}

// =============================================================================
// QueryBuilder trait
// =============================================================================

/// Object-safe query builder interface.
pub trait QueryBuilder: Send {
    /// Replaces the select list.
    fn select(&mut self, selects: Vec<Expr>);

    fn add_select(&mut self, selects: Vec<Expr>);

    fn select_alias(&mut self, select: Expr, alias: &str);

    fn from(&mut self, table: &str, alias: Option<&str>);

    fn join(
        &mut self,
        from_alias: &str,
        table: &str,
        alias: &str,
        condition: Option<Expr>,
        mode: JoinMode,
    ) -> Result<()>;

    fn inner_join(&mut self, from_alias: &str, table: &str, alias: &str, condition: Option<Expr>) -> Result<()> {
        self.join(from_alias, table, alias, condition, JoinMode::Inner)
    }

    fn left_join(&mut self, from_alias: &str, table: &str, alias: &str, condition: Option<Expr>) -> Result<()> {
        self.join(from_alias, table, alias, condition, JoinMode::Left)
    }

    fn right_join(&mut self, from_alias: &str, table: &str, alias: &str, condition: Option<Expr>) -> Result<()> {
        self.join(from_alias, table, alias, condition, JoinMode::Right)
    }

    /// Replaces the where clause with the conjunction of `predicates`.
    fn set_where(&mut self, predicates: Vec<Expr>);

    /// Adds `predicates` to the where clause.
    fn and_where(&mut self, predicates: Vec<Expr>);

    fn insert(&mut self, table: &str);

    fn update(&mut self, table: &str, alias: Option<&str>);

    fn delete(&mut self, table: &str, alias: Option<&str>);

    /// Assignment of an update.
    fn set(&mut self, column: &str, value: Expr) -> Result<()>;

    /// Value of an insert.
    fn set_value(&mut self, column: &str, value: Expr);

    fn values(&mut self, values: Vec<(String, Expr)>) {
        for (column, value) in values {
            self.set_value(&column, value);
        }
    }

    /// Binds a named parameter and returns the placeholder referencing it.
    ///
    /// Without an explicit name a fresh `dcValue{n}` name is picked.
    fn create_named_parameter(&mut self, value: Value, ty: ParamType, name: Option<&str>) -> Expr;

    fn create_positional_parameter(&mut self, value: Value, ty: ParamType) -> Expr;

    fn parameter(&self, name: &str) -> Option<Value> {
        self.parameters().value(name).cloned()
    }

    fn parameters(&self) -> &Parameters;

    /// Replaces every bound parameter.
    fn set_parameters(&mut self, parameters: Parameters);

    /// Tells a sharding builder a key value it cannot see in the predicates.
    fn hint_shard_key(&mut self, _column: &str, _value: Value) {}

    /// Forces a sharding builder to fan out to every shard.
    fn run_across_all_shards(&mut self) {}

    fn query_type(&self) -> QueryType;

    /// Names of the columns a select produces, where they can be known statically.
    fn output_columns(&self) -> Vec<String>;

    fn sql(&mut self) -> String;

    /// Runs a select, on `connection` or the builder's default connection.
    fn execute_query(&mut self, connection: Option<Arc<dyn Connection>>) -> Result<Box<dyn ResultCursor>>;

    /// Runs an insert, update or delete and returns the affected row count.
    fn execute_statement(&mut self, connection: Option<Arc<dyn Connection>>) -> Result<u64>;

    fn last_insert_id(&self) -> Result<i64>;
}

/// Creates fresh builders, optionally bound to a named partition's connection.
pub trait QueryBuilderFactory: Send + Sync {
    fn create(&self, partition: Option<&str>) -> Box<dyn QueryBuilder>;

    /// Connection backing a partition, when it is not the default one.
    fn connection_for(&self, _partition: &str) -> Option<Arc<dyn Connection>> {
        None
    }
}

impl<F> QueryBuilderFactory for F
where
    F: Fn(Option<&str>) -> Box<dyn QueryBuilder> + Send + Sync,
{
    fn create(&self, partition: Option<&str>) -> Box<dyn QueryBuilder> {
        self(partition)
    }
}

// =============================================================================
// SqlQueryBuilder
// =============================================================================

/// Single-connection builder that renders SQL text.
pub struct SqlQueryBuilder {
    connection: Arc<dyn Connection>,
    kind: QueryType,
    selects: Vec<SelectItem>,
    from: Vec<(String, Option<String>)>,
    joins: Vec<JoinClause>,
    predicate: Option<Expr>,
    target: Option<(String, Option<String>)>,
    assignments: Vec<(String, Expr)>,
    parameters: Parameters,
    param_counter: usize,
    last_insert: Option<(Arc<dyn Connection>, String)>,
}

impl SqlQueryBuilder {
    /// Creates a builder whose queries run on `connection` unless told otherwise.
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            kind: QueryType::Select,
            selects: Vec::new(),
            from: Vec::new(),
            joins: Vec::new(),
            predicate: None,
            target: None,
            assignments: Vec::new(),
            parameters: Parameters::new(),
            param_counter: 0,
            last_insert: None,
        }
    }

    /// Current where clause.
    pub fn predicate(&self) -> Option<&Expr> {
        self.predicate.as_ref()
    }

    fn table(&self) -> Option<String> {
        match self.kind {
            QueryType::Select => self.from.first().map(|(t, _)| t.clone()),
            _ => self.target.as_ref().map(|(t, _)| t.clone()),
        }
    }

    fn assign(&mut self, column: &str, value: Expr) {
        match self.assignments.iter_mut().find(|(c, _)| c == column) {
            Some(existing) => existing.1 = value,
            None => self.assignments.push((column.to_string(), value)),
        }
    }

    fn statement(&self) -> Statement {
        Statement {
            kind: self.kind,
            sql: self.render(),
            table: self.table(),
            selects: self.selects.clone(),
            predicate: self.predicate.clone(),
            assignments: self.assignments.clone(),
            parameters: self.parameters.clone(),
        }
    }

    fn render_table(table: &str, alias: Option<&str>) -> String {
        match alias {
            Some(alias) => format!("`{}` `{}`", table, alias),
            None => format!("`{}`", table),
        }
    }

    fn render_where(&self, sql: &mut String) {
        if let Some(predicate) = &self.predicate {
            let rendered = predicate.to_string();
            let body: &str = match predicate {
                Expr::Composite { parts, .. } if parts.len() > 1 => rendered
                    .strip_prefix('(')
                    .and_then(|s| s.strip_suffix(')'))
                    .unwrap_or(rendered.as_str()),
                _ => rendered.as_str(),
            };
            sql.push_str(" WHERE ");
            sql.push_str(body);
        }
    }

    fn render(&self) -> String {
        let target = self
            .target
            .as_ref()
            .map(|(t, a)| Self::render_table(t, a.as_deref()))
            .unwrap_or_default();
        let mut sql = String::new();
        match self.kind {
            QueryType::Select => {
                let selects = if self.selects.is_empty() {
                    "*".to_string()
                } else {
                    self.selects.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
                };
                let from = self
                    .from
                    .iter()
                    .map(|(t, a)| Self::render_table(t, a.as_deref()))
                    .collect::<Vec<_>>()
                    .join(", ");
                sql.push_str(&format!("SELECT {} FROM {}", selects, from));
                for join in &self.joins {
                    sql.push_str(&format!(
                        " {} {}",
                        join.mode.as_sql(),
                        Self::render_table(&join.table, Some(&join.alias))
                    ));
                    if let Some(condition) = &join.condition {
                        sql.push_str(&format!(" ON {}", condition));
                    }
                }
                self.render_where(&mut sql);
            }
            QueryType::Insert => {
                let columns: Vec<String> = self.assignments.iter().map(|(c, _)| format!("`{}`", c)).collect();
                let values: Vec<String> = self.assignments.iter().map(|(_, v)| v.to_string()).collect();
                sql.push_str(&format!(
                    "INSERT INTO {} ({}) VALUES({})",
                    target,
                    columns.join(", "),
                    values.join(", ")
                ));
            }
            QueryType::Update => {
                let sets: Vec<String> = self
                    .assignments
                    .iter()
                    .map(|(c, v)| format!("`{}` = {}", c, v))
                    .collect();
                sql.push_str(&format!("UPDATE {} SET {}", target, sets.join(", ")));
                self.render_where(&mut sql);
            }
            QueryType::Delete => {
                sql.push_str(&format!("DELETE FROM {}", target));
                self.render_where(&mut sql);
            }
        }
        sql
    }
}

fn conjunction(mut predicates: Vec<Expr>) -> Option<Expr> {
    match predicates.len() {
        0 => None,
        1 => predicates.pop(),
        _ => Some(Expr::Composite {
            kind: CompositeKind::And,
            parts: predicates,
        }),
    }
}

impl QueryBuilder for SqlQueryBuilder {
    fn select(&mut self, selects: Vec<Expr>) {
        self.kind = QueryType::Select;
        self.selects = selects.into_iter().map(SelectItem::new).collect();
    }

    fn add_select(&mut self, selects: Vec<Expr>) {
        self.kind = QueryType::Select;
        self.selects.extend(selects.into_iter().map(SelectItem::new));
    }

    fn select_alias(&mut self, select: Expr, alias: &str) {
        self.kind = QueryType::Select;
        self.selects.push(SelectItem::aliased(select, alias));
    }

    fn from(&mut self, table: &str, alias: Option<&str>) {
        self.from.push((table.to_string(), alias.map(str::to_string)));
    }

    fn join(
        &mut self,
        _from_alias: &str,
        table: &str,
        alias: &str,
        condition: Option<Expr>,
        mode: JoinMode,
    ) -> Result<()> {
        self.joins.push(JoinClause {
            mode,
            table: table.to_string(),
            alias: alias.to_string(),
            condition,
        });
        Ok(())
    }

    fn set_where(&mut self, predicates: Vec<Expr>) {
        self.predicate = conjunction(predicates);
    }

    fn and_where(&mut self, predicates: Vec<Expr>) {
        if predicates.is_empty() {
            return;
        }
        let merged = match self.predicate.take() {
            None => predicates,
            Some(Expr::Composite {
                kind: CompositeKind::And,
                mut parts,
            }) => {
                parts.extend(predicates);
                parts
            }
            Some(existing) => std::iter::once(existing).chain(predicates).collect(),
        };
        self.predicate = conjunction(merged);
    }

    fn insert(&mut self, table: &str) {
        self.kind = QueryType::Insert;
        self.target = Some((table.to_string(), None));
    }

    fn update(&mut self, table: &str, alias: Option<&str>) {
        self.kind = QueryType::Update;
        self.target = Some((table.to_string(), alias.map(str::to_string)));
    }

    fn delete(&mut self, table: &str, alias: Option<&str>) {
        self.kind = QueryType::Delete;
        self.target = Some((table.to_string(), alias.map(str::to_string)));
    }

    fn set(&mut self, column: &str, value: Expr) -> Result<()> {
        self.assign(column, value);
        Ok(())
    }

    fn set_value(&mut self, column: &str, value: Expr) {
        self.assign(column, value);
    }

    fn create_named_parameter(&mut self, value: Value, ty: ParamType, name: Option<&str>) -> Expr {
        let name = match name {
            Some(name) => name.trim_start_matches(':').to_string(),
            None => {
                let (name, n) = self.parameters.unused_name(self.param_counter + 1);
                self.param_counter = n;
                name
            }
        };
        self.parameters.set_named(name.clone(), value, ty);
        Expr::Parameter(ParamRef::Named(name))
    }

    fn create_positional_parameter(&mut self, value: Value, ty: ParamType) -> Expr {
        let index = self.parameters.push_positional(value, ty);
        Expr::Parameter(ParamRef::Positional(index))
    }

    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn set_parameters(&mut self, parameters: Parameters) {
        self.parameters = parameters;
    }

    fn query_type(&self) -> QueryType {
        self.kind
    }

    fn output_columns(&self) -> Vec<String> {
        self.selects.iter().filter_map(SelectItem::output_name).collect()
    }

    fn sql(&mut self) -> String {
        self.render()
    }

    fn execute_query(&mut self, connection: Option<Arc<dyn Connection>>) -> Result<Box<dyn ResultCursor>> {
        if self.kind != QueryType::Select {
            return Err(QueryError::InvalidQuery(format!(
                "can't execute a {} as a query, use execute_statement",
                self.kind
            )));
        }
        let connection = connection.unwrap_or_else(|| Arc::clone(&self.connection));
        let statement = self.statement();
        tracing::trace!(connection = connection.name(), sql = %statement.sql, "executing query");
        connection.execute_query(&statement)
    }

    fn execute_statement(&mut self, connection: Option<Arc<dyn Connection>>) -> Result<u64> {
        if self.kind == QueryType::Select {
            return Err(QueryError::InvalidQuery(
                "can't execute a SELECT as a statement, use execute_query".into(),
            ));
        }
        let connection = connection.unwrap_or_else(|| Arc::clone(&self.connection));
        let statement = self.statement();
        tracing::trace!(connection = connection.name(), sql = %statement.sql, "executing statement");
        let affected = connection.execute_statement(&statement)?;
        if self.kind == QueryType::Insert {
            if let Some(table) = statement.table {
                self.last_insert = Some((connection, table));
            }
        }
        Ok(affected)
    }

    fn last_insert_id(&self) -> Result<i64> {
        match &self.last_insert {
            Some((connection, table)) => connection.last_insert_id(table),
            None => Err(QueryError::InvalidQuery("no insert has been executed".into())),
        }
    }
}

/// Column name stripped of any qualifier: `f.fileid` → `fileid`.
pub fn bare_column(column: &str) -> String {
    ColumnRef::parse(column).name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, eq, in_list, lit, param};
    use crate::memory::MemoryConnection;

    fn builder() -> SqlQueryBuilder {
        SqlQueryBuilder::new(Arc::new(MemoryConnection::new("db")))
    }

    #[test]
    fn test_select_sql() {
        let mut qb = builder();
        qb.select(vec![col("f.fileid"), col("s.share_with")]);
        qb.from("filecache", Some("f"));
        qb.left_join("f", "share", "s", Some(eq(col("f.fileid"), col("s.file_source"))))
            .unwrap();
        let storage = qb.create_named_parameter(Value::Int(3), ParamType::Int, None);
        qb.set_where(vec![eq(col("f.storage"), storage)]);
        qb.and_where(vec![eq(col("f.size"), lit(0))]);

        assert_eq!(
            qb.sql(),
            "SELECT `f`.`fileid`, `s`.`share_with` FROM `filecache` `f` \
             LEFT JOIN `share` `s` ON `f`.`fileid` = `s`.`file_source` \
             WHERE `f`.`storage` = :dcValue1 AND `f`.`size` = 0"
        );
        assert_eq!(qb.output_columns(), vec!["fileid", "share_with"]);
    }

    #[test]
    fn test_write_sql() {
        let mut qb = builder();
        qb.insert("filecache");
        qb.set_value("fileid", lit(1));
        qb.set_value("name", param("name"));
        assert_eq!(qb.sql(), "INSERT INTO `filecache` (`fileid`, `name`) VALUES(1, :name)");

        let mut qb = builder();
        qb.update("filecache", None);
        qb.set("name", lit("a")).unwrap();
        qb.set_where(vec![in_list(col("fileid"), param("ids"))]);
        assert_eq!(qb.sql(), "UPDATE `filecache` SET `name` = 'a' WHERE `fileid` IN (:ids)");

        let mut qb = builder();
        qb.delete("filecache", Some("f"));
        assert_eq!(qb.sql(), "DELETE FROM `filecache` `f`");
    }

    #[test]
    fn test_named_parameters_skip_taken_names() {
        let mut qb = builder();
        let mut params = Parameters::new();
        params.set_named("dcValue1", Value::Int(1), ParamType::Int);
        qb.set_parameters(params);
        let p = qb.create_named_parameter(Value::Int(2), ParamType::Int, None);
        assert_eq!(p.to_string(), ":dcValue2");
        assert_eq!(qb.parameter("dcValue1"), Some(Value::Int(1)));
        assert_eq!(qb.parameter(":dcValue2"), Some(Value::Int(2)));
    }

    #[test]
    fn test_execute_checks_query_type() {
        let mut qb = builder();
        qb.select(vec![col("*")]);
        qb.from("filecache", None);
        assert!(matches!(qb.execute_statement(None), Err(QueryError::InvalidQuery(_))));

        let mut qb = builder();
        qb.delete("filecache", None);
        assert!(matches!(qb.execute_query(None), Err(QueryError::InvalidQuery(_))));
        assert!(qb.last_insert_id().is_err());
    }

    #[test]
    fn test_and_where_flattens() {
        let mut qb = builder();
        qb.and_where(vec![eq(col("a"), lit(1))]);
        qb.and_where(vec![eq(col("b"), lit(2))]);
        qb.and_where(vec![eq(col("c"), lit(3))]);
        match qb.predicate() {
            Some(Expr::Composite { parts, .. }) => assert_eq!(parts.len(), 3),
            other => panic!("unexpected predicate {:?}", other),
        }
    }

    #[test]
    fn test_bare_column() {
        assert_eq!(bare_column("f.fileid"), "fileid");
        assert_eq!(bare_column("fileid"), "fileid");
    }
}

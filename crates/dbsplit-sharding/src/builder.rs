//! Query builder that routes queries on sharded tables.
//!
//! Wraps any [`QueryBuilder`] and watches what is built: the table named by
//! `from`/`update`/`delete`/`insert` selects the active [`ShardDefinition`],
//! and every predicate or inserted value is scanned for shard keys and
//! primary keys. Execution validates the query, then hands it to the
//! [`ShardQueryRunner`] (or runs inserts on the target shard itself).
//!
//! ```text
//!   from("filecache", "f")          ──▶ definition = filecache
//!   and_where(f.storage = :s)       ──▶ shard_keys  += [:s]
//!   and_where(f.fileid IN (:ids))   ──▶ primary_keys += [:ids]
//!   execute_query()                 ──▶ validate ──▶ runner(shards(:s))
//! ```
//!
//! Without a shard key the query runs on every shard. Companion tables can
//! hold several rows per primary key, so primary keys alone never narrow the
//! set of shards.
//!
//! Queries that never touch a sharded table pass straight through.

use crate::connection::ConnectionProvider;
use crate::definition::{ShardDefinition, ShardId};
use crate::id::{IdGenerator, RandomIdGenerator};
use crate::keys::{column_name, extract_keys, resolve_keys, KeySource};
use crate::runner::{NoLocalityHint, ShardLocalityHint, ShardQueryRunner};
use dbsplit_core::{
    Connection, Expr, JoinMode, ParamType, Parameters, QueryBuilder, QueryError, QueryType, Result, ResultCursor,
    Value,
};
use std::sync::Arc;

/// Lifecycle of a sharded builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuilderState {
    /// Still accepting clauses
    #[default]
    Building,
    /// Passed validation
    Validated,
    /// Running on one or more shards
    Executing,
    /// Last execution finished
    Done,
}

/// A [`QueryBuilder`] decorator that routes work on sharded tables.
pub struct ShardedQueryBuilder {
    inner: Box<dyn QueryBuilder>,
    definitions: Vec<Arc<ShardDefinition>>,
    provider: Arc<dyn ConnectionProvider>,
    id_generator: Arc<dyn IdGenerator>,
    locality: Arc<dyn ShardLocalityHint>,
    definition: Option<Arc<ShardDefinition>>,
    shard_keys: Vec<KeySource>,
    primary_keys: Vec<KeySource>,
    all_shards: bool,
    insert_table: Option<String>,
    last_insert_id: Option<i64>,
    last_insert_connection: Option<Arc<dyn Connection>>,
    state: BuilderState,
}

impl ShardedQueryBuilder {
    pub fn new(
        inner: Box<dyn QueryBuilder>,
        definitions: Vec<Arc<ShardDefinition>>,
        provider: Arc<dyn ConnectionProvider>,
    ) -> Self {
        Self {
            inner,
            definitions,
            provider,
            id_generator: Arc::new(RandomIdGenerator),
            locality: Arc::new(NoLocalityHint),
            definition: None,
            shard_keys: Vec::new(),
            primary_keys: Vec::new(),
            all_shards: false,
            insert_table: None,
            last_insert_id: None,
            last_insert_connection: None,
            state: BuilderState::Building,
        }
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn with_locality_hint(mut self, locality: Arc<dyn ShardLocalityHint>) -> Self {
        self.locality = locality;
        self
    }

    /// Definition of the sharded table this query acts on, if any.
    pub fn definition(&self) -> Option<&Arc<ShardDefinition>> {
        self.definition.as_ref()
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    /// Shard key values found so far, resolved against the bound parameters.
    pub fn shard_keys(&self) -> Vec<Value> {
        resolve_keys(&self.shard_keys, self.inner.parameters())
    }

    /// Primary key values found so far, resolved against the bound parameters.
    pub fn primary_keys(&self) -> Vec<Value> {
        resolve_keys(&self.primary_keys, self.inner.parameters())
    }

    /// Checks that the query can be routed.
    pub fn validate(&mut self) -> Result<()> {
        let Some(definition) = self.definition.clone() else {
            self.state = BuilderState::Validated;
            return Ok(());
        };
        if self.insert_table.is_some() {
            if self.all_shards {
                return Err(QueryError::InvalidShardedOperation("Can't insert across all shards".into()));
            }
            if self.shard_keys().is_empty() {
                return Err(QueryError::InvalidShardedOperation("Can't insert without shard key".into()));
            }
        }
        if !self.all_shards && self.shard_keys().is_empty() && self.primary_keys().is_empty() {
            tracing::debug!(table = %definition.table, "rejecting sharded query without keys");
            return Err(QueryError::InvalidShardedOperation(
                "No shard key or primary key set for query".into(),
            ));
        }
        self.state = BuilderState::Validated;
        Ok(())
    }

    /// Shards the query will touch. Without shard keys that is every shard.
    pub fn shards(&self) -> Result<Vec<ShardId>> {
        let Some(definition) = &self.definition else {
            return Ok(Vec::new());
        };
        let shard_keys = self.shard_keys();
        if self.all_shards || shard_keys.is_empty() {
            return Ok(definition.all_shards());
        }
        definition.shards_for_keys(&shard_keys)
    }

    fn act_on_table(&mut self, table: &str) {
        // later definitions win when several claim a table
        if let Some(definition) = self.definitions.iter().rev().find(|d| d.has_table(table)) {
            self.definition = Some(Arc::clone(definition));
        }
    }

    fn load_keys(&mut self, predicate: &Expr) {
        if let Some(definition) = &self.definition {
            self.shard_keys.extend(extract_keys(predicate, &definition.shard_key));
            self.primary_keys.extend(extract_keys(predicate, &definition.primary_key));
        }
    }

    fn record_value(&mut self, column: &str, source: KeySource) {
        let Some(definition) = &self.definition else {
            return;
        };
        let column = column_name(column);
        if column == definition.primary_key {
            self.primary_keys.push(source.clone());
        }
        if column == definition.shard_key {
            self.shard_keys.push(source);
        }
    }

    fn runner(&self, definition: &Arc<ShardDefinition>) -> ShardQueryRunner {
        ShardQueryRunner::new(Arc::clone(&self.provider), Arc::clone(definition))
            .with_locality_hint(Arc::clone(&self.locality))
    }

    fn execute_insert(&mut self, definition: Arc<ShardDefinition>) -> Result<u64> {
        let insert_table = self.insert_table.clone().unwrap_or_default();
        if self.primary_keys.is_empty() && definition.table == insert_table {
            let id = self.id_generator.next_id();
            let param = self.inner.create_named_parameter(Value::Int(id), ParamType::Int, None);
            self.set_value(&definition.primary_key, param);
            self.last_insert_id = Some(id);
            tracing::trace!(table = %insert_table, id, "generated primary key");
        }

        let mut count = 0;
        for shard in self.shards()? {
            let connection = self.provider.connection(&definition, shard)?;
            count += self.inner.execute_statement(Some(Arc::clone(&connection)))?;
            self.last_insert_connection = Some(connection);
        }
        tracing::debug!(table = %insert_table, rows = count, "sharded insert done");
        Ok(count)
    }
}

impl QueryBuilder for ShardedQueryBuilder {
    fn select(&mut self, selects: Vec<Expr>) {
        self.inner.select(selects);
    }

    fn add_select(&mut self, selects: Vec<Expr>) {
        self.inner.add_select(selects);
    }

    fn select_alias(&mut self, select: Expr, alias: &str) {
        self.inner.select_alias(select, alias);
    }

    fn from(&mut self, table: &str, alias: Option<&str>) {
        self.act_on_table(table);
        self.inner.from(table, alias);
    }

    fn join(
        &mut self,
        from_alias: &str,
        table: &str,
        alias: &str,
        condition: Option<Expr>,
        mode: JoinMode,
    ) -> Result<()> {
        if let Some(definition) = &self.definition {
            if mode == JoinMode::Right {
                return Err(QueryError::InvalidShardedOperation(format!(
                    "Sharded query on {} isn't allowed to right join",
                    definition.table
                )));
            }
            if !definition.has_table(table) {
                return Err(QueryError::InvalidShardedOperation(format!(
                    "Sharded query on {} isn't allowed to join on {}",
                    definition.table, table
                )));
            }
        }
        self.inner.join(from_alias, table, alias, condition, mode)
    }

    /// Same as [`and_where`](QueryBuilder::and_where): keys seen earlier stay
    /// valid, so earlier predicates stay as well.
    fn set_where(&mut self, predicates: Vec<Expr>) {
        self.and_where(predicates);
    }

    fn and_where(&mut self, predicates: Vec<Expr>) {
        for predicate in &predicates {
            self.load_keys(predicate);
        }
        self.inner.and_where(predicates);
    }

    fn insert(&mut self, table: &str) {
        self.insert_table = Some(table.to_string());
        self.act_on_table(table);
        self.inner.insert(table);
    }

    fn update(&mut self, table: &str, alias: Option<&str>) {
        self.act_on_table(table);
        self.inner.update(table, alias);
    }

    fn delete(&mut self, table: &str, alias: Option<&str>) {
        self.act_on_table(table);
        self.inner.delete(table, alias);
    }

    fn set(&mut self, column: &str, value: Expr) -> Result<()> {
        if let Some(definition) = &self.definition {
            if column_name(column) == definition.shard_key {
                return Err(QueryError::InvalidShardedOperation(
                    "Changing the sharding key with an update isn't allowed".into(),
                ));
            }
        }
        self.inner.set(column, value)
    }

    fn set_value(&mut self, column: &str, value: Expr) {
        if let Some(source) = KeySource::from_expr(&value) {
            self.record_value(column, source);
        }
        self.inner.set_value(column, value);
    }

    fn create_named_parameter(&mut self, value: Value, ty: ParamType, name: Option<&str>) -> Expr {
        self.inner.create_named_parameter(value, ty, name)
    }

    fn create_positional_parameter(&mut self, value: Value, ty: ParamType) -> Expr {
        self.inner.create_positional_parameter(value, ty)
    }

    fn parameters(&self) -> &Parameters {
        self.inner.parameters()
    }

    fn set_parameters(&mut self, parameters: Parameters) {
        self.inner.set_parameters(parameters);
    }

    fn hint_shard_key(&mut self, column: &str, value: Value) {
        self.record_value(column, KeySource::Value(value));
    }

    fn run_across_all_shards(&mut self) {
        self.all_shards = true;
    }

    fn query_type(&self) -> QueryType {
        self.inner.query_type()
    }

    fn output_columns(&self) -> Vec<String> {
        self.inner.output_columns()
    }

    fn sql(&mut self) -> String {
        self.inner.sql()
    }

    fn execute_query(&mut self, connection: Option<Arc<dyn Connection>>) -> Result<Box<dyn ResultCursor>> {
        self.validate()?;
        let Some(definition) = self.definition.clone() else {
            return self.inner.execute_query(connection);
        };
        self.state = BuilderState::Executing;
        let shard_keys = self.shard_keys();
        let primary_keys = self.primary_keys();
        // a primary key can match rows on several shards in companion tables
        let all_shards = self.all_shards || shard_keys.is_empty();
        let result = self
            .runner(&definition)
            .execute_query(self.inner.as_mut(), all_shards, &shard_keys, &primary_keys);
        self.state = BuilderState::Done;
        result
    }

    fn execute_statement(&mut self, connection: Option<Arc<dyn Connection>>) -> Result<u64> {
        self.validate()?;
        let Some(definition) = self.definition.clone() else {
            return self.inner.execute_statement(connection);
        };
        self.state = BuilderState::Executing;
        let result = if self.inner.query_type() == QueryType::Insert {
            self.execute_insert(definition)
        } else {
            let shard_keys = self.shard_keys();
            let primary_keys = self.primary_keys();
            let all_shards = self.all_shards || shard_keys.is_empty();
            self.runner(&definition)
                .execute_statement(self.inner.as_mut(), all_shards, &shard_keys, &primary_keys)
        };
        self.state = BuilderState::Done;
        result
    }

    fn last_insert_id(&self) -> Result<i64> {
        if let Some(id) = self.last_insert_id {
            return Ok(id);
        }
        match (&self.last_insert_connection, &self.insert_table) {
            (Some(connection), Some(table)) => connection.last_insert_id(table),
            _ => self.inner.last_insert_id(),
        }
    }
}

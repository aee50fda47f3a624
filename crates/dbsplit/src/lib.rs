//! # dbsplit
//!
//! Query partitioning and federation: one query builder API over tables that
//! are sharded horizontally, split vertically onto their own databases, or
//! both.
//!
//! ```text
//!                    ┌───────────────────────────┐
//!                    │  PartitionedQueryBuilder  │  splits joins across partitions
//!                    └─────────────┬─────────────┘
//!                 main query       │       one sub-query per partition
//!              ┌───────────────────┼───────────────────┐
//!              ▼                   ▼                   ▼
//!     ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//!     │ ShardedQueryBld. │ │ ShardedQueryBld. │ │ ShardedQueryBld. │  route sharded tables
//!     └────────┬─────────┘ └────────┬─────────┘ └────────┬─────────┘
//!              ▼                    ▼                    ▼
//!        default database     partition db        shard 0 .. shard N
//! ```
//!
//! This crate provides:
//! - [`DbSplit`] - the entry point, wiring connections, shard definitions and partitions
//! - [`config`] - TOML configuration with environment overrides
//! - [`logging`] - `tracing` subscriber setup
//!
//! The building blocks are re-exported from `dbsplit-core`,
//! `dbsplit-sharding` and `dbsplit-partition`.
//!
//! # Example
//!
//! ```ignore
//! use dbsplit::{DbSplit, DbSplitConfig};
//!
//! let config = DbSplitConfig::load(Some("dbsplit.toml"))?;
//! let db = DbSplit::builder(default_connection)
//!     .with_connection("shard0", shard0)
//!     .with_connection("shard1", shard1)
//!     .with_config(&config)?
//!     .build()?;
//!
//! let mut qb = db.query_builder();
//! qb.select(vec![col("f.fileid")]);
//! qb.from("filecache", Some("f"));
//! let rows = qb.execute_query(None)?.fetch_all_assoc()?;
//! ```

pub mod config;
pub mod logging;

pub use config::{ConfigError, DbSplitConfig, LoggingConfig, PartitionConfig, ShardDefinitionConfig};
pub use dbsplit_core::{
    expr, ArrayResult, Connection, Expr, FetchMode, JoinMode, MemoryConnection, ParamType, QueryBuilder,
    QueryBuilderFactory, QueryError, QueryType, Result, ResultCursor, Row, SqlQueryBuilder, Value,
};
pub use dbsplit_partition::{PartitionSplit, PartitionedQueryBuilder};
pub use dbsplit_sharding::{
    IdGenerator, MapperKind, RandomIdGenerator, SequenceIdGenerator, ShardConnectionManager, ShardDefinition,
    ShardLocalityHint, ShardedQueryBuilder,
};

use dbsplit_sharding::NoLocalityHint;
use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// DbSplit
// =============================================================================

struct Inner {
    default_connection: Arc<dyn Connection>,
    connections: HashMap<String, Arc<dyn Connection>>,
    shard_connections: Arc<ShardConnectionManager>,
    definitions: Vec<Arc<ShardDefinition>>,
    partitions: Vec<PartitionSplit>,
    partition_connections: HashMap<String, String>,
    id_generator: Arc<dyn IdGenerator>,
    locality: Arc<dyn ShardLocalityHint>,
}

/// Entry point handing out query builders over the configured layout.
///
/// Cheap to clone; every clone shares the same connections and definitions.
#[derive(Clone)]
pub struct DbSplit {
    inner: Arc<Inner>,
}

impl DbSplit {
    /// Starts a builder; `default_connection` serves everything not sharded or partitioned.
    pub fn builder(default_connection: Arc<dyn Connection>) -> DbSplitBuilder {
        DbSplitBuilder::new(default_connection)
    }

    /// A query builder that handles both partitions and shards.
    pub fn query_builder(&self) -> PartitionedQueryBuilder {
        PartitionedQueryBuilder::new(Arc::new(self.clone()), self.inner.partitions.clone())
    }

    /// A query builder that only handles shards, bound to the default connection.
    pub fn sharded_query_builder(&self) -> ShardedQueryBuilder {
        self.sharded_builder(Arc::clone(&self.inner.default_connection))
    }

    pub fn definitions(&self) -> &[Arc<ShardDefinition>] {
        &self.inner.definitions
    }

    pub fn partitions(&self) -> &[PartitionSplit] {
        &self.inner.partitions
    }

    /// Named connection, as registered on the builder.
    pub fn connection(&self, name: &str) -> Option<Arc<dyn Connection>> {
        self.inner.connections.get(name).cloned()
    }

    fn sharded_builder(&self, connection: Arc<dyn Connection>) -> ShardedQueryBuilder {
        let provider = Arc::clone(&self.inner.shard_connections);
        ShardedQueryBuilder::new(
            Box::new(SqlQueryBuilder::new(connection)),
            self.inner.definitions.clone(),
            provider,
        )
        .with_id_generator(Arc::clone(&self.inner.id_generator))
        .with_locality_hint(Arc::clone(&self.inner.locality))
    }
}

impl QueryBuilderFactory for DbSplit {
    fn create(&self, partition: Option<&str>) -> Box<dyn QueryBuilder> {
        let connection = partition
            .and_then(|name| self.connection_for(name))
            .unwrap_or_else(|| Arc::clone(&self.inner.default_connection));
        Box::new(self.sharded_builder(connection))
    }

    fn connection_for(&self, partition: &str) -> Option<Arc<dyn Connection>> {
        let name = self.inner.partition_connections.get(partition)?;
        self.connection(name)
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Collects connections, shard definitions and partitions for a [`DbSplit`].
pub struct DbSplitBuilder {
    default_connection: Arc<dyn Connection>,
    connections: HashMap<String, Arc<dyn Connection>>,
    definitions: Vec<Arc<ShardDefinition>>,
    partitions: Vec<PartitionSplit>,
    partition_connections: HashMap<String, String>,
    id_generator: Arc<dyn IdGenerator>,
    locality: Arc<dyn ShardLocalityHint>,
}

impl DbSplitBuilder {
    pub fn new(default_connection: Arc<dyn Connection>) -> Self {
        Self {
            default_connection,
            connections: HashMap::new(),
            definitions: Vec::new(),
            partitions: Vec::new(),
            partition_connections: HashMap::new(),
            id_generator: Arc::new(RandomIdGenerator),
            locality: Arc::new(NoLocalityHint),
        }
    }

    /// Registers a named connection, used as a shard endpoint or partition database.
    pub fn with_connection(mut self, name: impl Into<String>, connection: Arc<dyn Connection>) -> Self {
        self.connections.insert(name.into(), connection);
        self
    }

    pub fn with_shard_definition(mut self, definition: ShardDefinition) -> Self {
        self.definitions.push(Arc::new(definition));
        self
    }

    /// Adds a partition, stored on the named connection or on the default one.
    pub fn with_partition(mut self, partition: PartitionSplit, connection: Option<&str>) -> Self {
        if let Some(connection) = connection {
            self.partition_connections
                .insert(partition.name.clone(), connection.to_string());
        }
        self.partitions.push(partition);
        self
    }

    /// Adds every shard definition and partition of a validated configuration.
    pub fn with_config(mut self, config: &DbSplitConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        for shard in &config.shards {
            self = self.with_shard_definition(shard.build());
        }
        for partition in &config.partitions {
            self = self.with_partition(partition.to_split(), partition.connection.as_deref());
        }
        Ok(self)
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn with_locality_hint(mut self, locality: Arc<dyn ShardLocalityHint>) -> Self {
        self.locality = locality;
        self
    }

    /// Checks that every referenced connection exists and builds the entry point.
    pub fn build(self) -> std::result::Result<DbSplit, ConfigError> {
        for definition in &self.definitions {
            if let Some(endpoint) = definition.shards.iter().find(|e| !self.connections.contains_key(*e)) {
                return Err(ConfigError::Invalid(format!(
                    "shard endpoint {} of {} has no connection",
                    endpoint, definition.table
                )));
            }
        }
        for (partition, name) in &self.partition_connections {
            if !self.connections.contains_key(name) {
                return Err(ConfigError::Invalid(format!(
                    "connection {} of partition {} is not registered",
                    name, partition
                )));
            }
        }

        let shard_connections = ShardConnectionManager::new();
        for (name, connection) in &self.connections {
            shard_connections.register(name.clone(), Arc::clone(connection));
        }
        tracing::debug!(
            connections = self.connections.len(),
            definitions = self.definitions.len(),
            partitions = self.partitions.len(),
            "dbsplit ready"
        );

        Ok(DbSplit {
            inner: Arc::new(Inner {
                default_connection: self.default_connection,
                connections: self.connections,
                shard_connections: Arc::new(shard_connections),
                definitions: self.definitions,
                partitions: self.partitions,
                partition_connections: self.partition_connections,
                id_generator: self.id_generator,
                locality: self.locality,
            }),
        })
    }
}

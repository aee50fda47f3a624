//! Static description of one sharded table.

use crate::mapper::ShardMapper;
use dbsplit_core::{QueryError, Result, Value};
use std::fmt;
use std::sync::Arc;

/// Unique identifier for a shard, dense in `0..shard_count`.
pub type ShardId = u32;

/// Describes how one logical table is split across shards.
///
/// Companion tables and keys always live on the same shard as the row of the
/// primary table they belong to. A definition is built once at startup and
/// shared read-only between queries.
#[derive(Clone)]
pub struct ShardDefinition {
    /// Primary table
    pub table: String,
    /// Primary key column of the primary table
    pub primary_key: String,
    /// Column whose value selects the shard
    pub shard_key: String,
    /// Columns in other tables that reference the primary key
    pub companion_keys: Vec<String>,
    /// Tables that are co-located with the primary table
    pub companion_tables: Vec<String>,
    /// Key → shard mapping
    pub shard_mapper: Arc<dyn ShardMapper>,
    /// Connection endpoint of each shard, indexed by shard id
    pub shards: Vec<String>,
}

impl ShardDefinition {
    pub fn new(
        table: impl Into<String>,
        primary_key: impl Into<String>,
        shard_key: impl Into<String>,
        shard_mapper: Arc<dyn ShardMapper>,
    ) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
            shard_key: shard_key.into(),
            companion_keys: Vec::new(),
            companion_tables: Vec::new(),
            shard_mapper,
            shards: Vec::new(),
        }
    }

    pub fn with_companion_keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.companion_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_companion_tables<S: Into<String>>(mut self, tables: impl IntoIterator<Item = S>) -> Self {
        self.companion_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the shard endpoints; shard `i` is served by `endpoints[i]`.
    pub fn with_shards<S: Into<String>>(mut self, endpoints: impl IntoIterator<Item = S>) -> Self {
        self.shards = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// True for the primary table and every companion table.
    pub fn has_table(&self, table: &str) -> bool {
        self.table == table || self.companion_tables.iter().any(|t| t == table)
    }

    /// True for the primary key and every companion key.
    pub fn is_key(&self, column: &str) -> bool {
        self.primary_key == column || self.companion_keys.iter().any(|k| k == column)
    }

    pub fn shard_count(&self) -> u32 {
        self.shards.len() as u32
    }

    pub fn shard_for_key(&self, key: i64) -> ShardId {
        self.shard_mapper.shard_for_key(key, self.shard_count())
    }

    pub fn all_shards(&self) -> Vec<ShardId> {
        (0..self.shard_count()).collect()
    }

    /// Endpoint name of a shard.
    pub fn endpoint(&self, shard: ShardId) -> Option<&str> {
        self.shards.get(shard as usize).map(String::as_str)
    }

    /// Maps shard key values to shards, de-duplicated in first-seen order.
    pub fn shards_for_keys(&self, keys: &[Value]) -> Result<Vec<ShardId>> {
        let mut shards = Vec::with_capacity(keys.len());
        for key in keys {
            let key = key.as_i64().ok_or_else(|| {
                QueryError::InvalidShardedOperation(format!(
                    "shard key value {} for {} is not an integer",
                    key, self.table
                ))
            })?;
            let shard = self.shard_for_key(key);
            if !shards.contains(&shard) {
                shards.push(shard);
            }
        }
        Ok(shards)
    }
}

impl fmt::Debug for ShardDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardDefinition")
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("shard_key", &self.shard_key)
            .field("companion_keys", &self.companion_keys)
            .field("companion_tables", &self.companion_tables)
            .field("shard_mapper", &self.shard_mapper.describe())
            .field("shards", &self.shards)
            .finish()
    }
}

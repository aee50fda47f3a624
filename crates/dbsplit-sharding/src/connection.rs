//! Shard connection lookup.

use crate::definition::{ShardDefinition, ShardId};
use dbsplit_core::{Connection, QueryError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Hands out the physical connection serving one shard of a definition.
pub trait ConnectionProvider: Send + Sync {
    fn connection(&self, definition: &ShardDefinition, shard: ShardId) -> Result<Arc<dyn Connection>>;
}

type Connector = Box<dyn Fn(&str) -> Result<Arc<dyn Connection>> + Send + Sync>;

/// Registry of shard connections keyed by endpoint name.
///
/// Connections are either registered up front or created on first use by a
/// connector and cached. Pooling is left to the connections themselves.
#[derive(Default)]
pub struct ShardConnectionManager {
    connections: RwLock<HashMap<String, Arc<dyn Connection>>>,
    connector: Option<Connector>,
}

impl ShardConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates connections for unknown endpoints with `connector`.
    pub fn with_connector<F>(connector: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn Connection>> + Send + Sync + 'static,
    {
        Self {
            connections: RwLock::new(HashMap::new()),
            connector: Some(Box::new(connector)),
        }
    }

    /// Registers (or replaces) the connection for an endpoint.
    pub fn register(&self, endpoint: impl Into<String>, connection: Arc<dyn Connection>) {
        self.connections.write().insert(endpoint.into(), connection);
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.connections.read().contains_key(endpoint)
    }

    /// Looks up an endpoint, creating it through the connector if needed.
    pub fn get(&self, endpoint: &str) -> Result<Arc<dyn Connection>> {
        if let Some(connection) = self.connections.read().get(endpoint) {
            return Ok(Arc::clone(connection));
        }
        let connector = self.connector.as_ref().ok_or_else(|| {
            QueryError::Connection(format!("no connection registered for shard endpoint {}", endpoint))
        })?;
        let connection = connector(endpoint)?;
        tracing::debug!(endpoint, "opened shard connection");
        let mut connections = self.connections.write();
        let cached = connections
            .entry(endpoint.to_string())
            .or_insert(connection);
        Ok(Arc::clone(cached))
    }
}

impl ConnectionProvider for ShardConnectionManager {
    fn connection(&self, definition: &ShardDefinition, shard: ShardId) -> Result<Arc<dyn Connection>> {
        let endpoint = definition.endpoint(shard).ok_or_else(|| {
            QueryError::InvalidShardedOperation(format!(
                "shard {} is not configured for {}",
                shard, definition.table
            ))
        })?;
        self.get(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::RoundRobinShardMapper;
    use dbsplit_core::MemoryConnection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn definition() -> ShardDefinition {
        ShardDefinition::new("filecache", "fileid", "storage", Arc::new(RoundRobinShardMapper))
            .with_shards(["s0", "s1"])
    }

    #[test]
    fn test_registered_lookup() {
        let manager = ShardConnectionManager::new();
        manager.register("s0", Arc::new(MemoryConnection::new("s0")));
        manager.register("s1", Arc::new(MemoryConnection::new("s1")));

        let def = definition();
        assert_eq!(manager.connection(&def, 1).unwrap().name(), "s1");
        assert!(matches!(
            manager.connection(&def, 2),
            Err(QueryError::InvalidShardedOperation(_))
        ));
    }

    #[test]
    fn test_missing_endpoint() {
        let manager = ShardConnectionManager::new();
        assert!(matches!(
            manager.connection(&definition(), 0),
            Err(QueryError::Connection(_))
        ));
    }

    #[test]
    fn test_connector_caches() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let manager = ShardConnectionManager::with_connector(move |endpoint| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MemoryConnection::new(endpoint)) as Arc<dyn Connection>)
        });

        let def = definition();
        manager.connection(&def, 0).unwrap();
        manager.connection(&def, 0).unwrap();
        manager.connection(&def, 1).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert!(manager.contains("s1"));
    }
}

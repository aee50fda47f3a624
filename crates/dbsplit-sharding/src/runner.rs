//! Fan-out execution of one query over a set of shards.
//!
//! Three cases, depending on what is known about the keys:
//!
//! - one shard resolved: the query runs there directly
//! - several shards resolved: the query runs on each in turn and the rows are
//!   concatenated in shard order
//! - nothing resolved: shards are scanned likely-first and the scan stops as
//!   soon as it cannot find more rows than it already has

use crate::connection::ConnectionProvider;
use crate::definition::{ShardDefinition, ShardId};
use dbsplit_core::{ArrayResult, QueryBuilder, QueryError, QueryType, Result, ResultCursor, Value};
use std::sync::Arc;

/// Best-effort guess of the shards that hold some primary keys.
pub trait ShardLocalityHint: Send + Sync {
    /// Shards to try first, most likely first. May be empty.
    fn likely_shards(&self, definition: &ShardDefinition, primary_keys: &[Value]) -> Vec<ShardId>;
}

/// Locality hint that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocalityHint;

impl ShardLocalityHint for NoLocalityHint {
    fn likely_shards(&self, _definition: &ShardDefinition, _primary_keys: &[Value]) -> Vec<ShardId> {
        Vec::new()
    }
}

/// Runs a query against the shards of one definition and combines the results.
pub struct ShardQueryRunner {
    provider: Arc<dyn ConnectionProvider>,
    definition: Arc<ShardDefinition>,
    locality: Arc<dyn ShardLocalityHint>,
}

impl ShardQueryRunner {
    pub fn new(provider: Arc<dyn ConnectionProvider>, definition: Arc<ShardDefinition>) -> Self {
        Self {
            provider,
            definition,
            locality: Arc::new(NoLocalityHint),
        }
    }

    pub fn with_locality_hint(mut self, locality: Arc<dyn ShardLocalityHint>) -> Self {
        self.locality = locality;
        self
    }

    /// Shards a query has to run on, or `None` when they cannot be known in advance.
    pub fn shards(&self, all_shards: bool, shard_keys: &[Value]) -> Result<Option<Vec<ShardId>>> {
        let configured = self.definition.all_shards();
        if all_shards || configured.len() == 1 {
            return Ok(Some(configured));
        }
        if shard_keys.is_empty() {
            return Ok(None);
        }
        self.definition.shards_for_keys(shard_keys).map(Some)
    }

    /// Likely shards first, then every other configured shard in order.
    fn scan_order(&self, primary_keys: &[Value]) -> Vec<ShardId> {
        let mut order: Vec<ShardId> = self
            .locality
            .likely_shards(&self.definition, primary_keys)
            .into_iter()
            .filter(|s| *s < self.definition.shard_count())
            .collect();
        order.dedup();
        for shard in self.definition.all_shards() {
            if !order.contains(&shard) {
                order.push(shard);
            }
        }
        order
    }

    /// Runs a select on the shards the keys resolve to.
    ///
    /// An unresolved scan is budgeted by the number of primary keys and
    /// compares that budget to the rows accumulated over all shards scanned
    /// so far, not to the rows of the last shard alone. Callers that may find
    /// several rows per primary key (companion tables) should resolve the
    /// shards themselves or pass `all_shards`.
    pub fn execute_query(
        &self,
        query: &mut dyn QueryBuilder,
        all_shards: bool,
        shard_keys: &[Value],
        primary_keys: &[Value],
    ) -> Result<Box<dyn ResultCursor>> {
        let table = self.definition.table.as_str();
        match self.shards(all_shards, shard_keys)? {
            Some(shards) if shards.len() == 1 => {
                tracing::debug!(table, shard = shards[0], "running sharded query on a single shard");
                let connection = self.provider.connection(&self.definition, shards[0])?;
                query.execute_query(Some(connection))
            }
            Some(shards) => {
                tracing::debug!(table, shards = ?shards, "fanning out sharded query");
                let mut rows = Vec::new();
                for shard in shards {
                    let connection = self.provider.connection(&self.definition, shard)?;
                    let mut result = query.execute_query(Some(connection))?;
                    rows.extend(result.fetch_all_assoc()?);
                    result.close_cursor();
                }
                Ok(Box::new(ArrayResult::new(rows)))
            }
            None => {
                let budget = primary_keys.len();
                tracing::warn!(table, primary_keys = budget, "no shard key for query, scanning shards");
                let mut rows = Vec::new();
                for shard in self.scan_order(primary_keys) {
                    let connection = self.provider.connection(&self.definition, shard)?;
                    let mut result = query.execute_query(Some(connection))?;
                    rows.extend(result.fetch_all_assoc()?);
                    result.close_cursor();
                    // every primary key matches at most one row
                    if budget > 0 && rows.len() >= budget {
                        tracing::debug!(table, shard, rows = rows.len(), "found all requested rows");
                        break;
                    }
                }
                Ok(Box::new(ArrayResult::new(rows)))
            }
        }
    }

    /// Runs an update or delete. Inserts need primary key handling and are
    /// executed by the sharded builder itself.
    pub fn execute_statement(
        &self,
        query: &mut dyn QueryBuilder,
        all_shards: bool,
        shard_keys: &[Value],
        primary_keys: &[Value],
    ) -> Result<u64> {
        if query.query_type() == QueryType::Insert {
            return Err(QueryError::InvalidShardedOperation(
                "insert queries need special handling".into(),
            ));
        }
        let table = self.definition.table.as_str();
        let (shards, max_count) = match self.shards(all_shards, shard_keys)? {
            Some(shards) if shards.len() == 1 => {
                let connection = self.provider.connection(&self.definition, shards[0])?;
                return query.execute_statement(Some(connection));
            }
            Some(shards) => (shards, u64::MAX),
            None => {
                tracing::warn!(table, "no shard key for statement, scanning shards");
                let budget = match primary_keys.len() {
                    0 => u64::MAX,
                    n => n as u64,
                };
                (self.scan_order(primary_keys), budget)
            }
        };

        let mut count = 0;
        for shard in shards {
            let connection = self.provider.connection(&self.definition, shard)?;
            count += query.execute_statement(Some(connection))?;
            if count >= max_count {
                break;
            }
        }
        tracing::debug!(table, affected = count, "sharded statement done");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ShardConnectionManager;
    use crate::mapper::RoundRobinShardMapper;
    use dbsplit_core::expr::{col, eq, in_list, lit, param};
    use dbsplit_core::{MemoryConnection, ParamType, Row, SqlQueryBuilder};

    struct Fixture {
        shards: Vec<Arc<MemoryConnection>>,
        runner: ShardQueryRunner,
    }

    fn row(id: i64, storage: i64) -> Row {
        vec![("fileid", Value::Int(id)), ("storage", Value::Int(storage))]
            .into_iter()
            .collect()
    }

    fn fixture(count: usize) -> Fixture {
        let manager = ShardConnectionManager::new();
        let mut shards = Vec::new();
        let mut endpoints = Vec::new();
        for i in 0..count {
            let name = format!("shard{}", i);
            let conn = Arc::new(MemoryConnection::new(name.clone()));
            manager.register(name.clone(), conn.clone());
            shards.push(conn);
            endpoints.push(name);
        }
        let definition = Arc::new(
            ShardDefinition::new("filecache", "fileid", "storage", Arc::new(RoundRobinShardMapper))
                .with_shards(endpoints),
        );
        Fixture {
            shards,
            runner: ShardQueryRunner::new(Arc::new(manager), definition),
        }
    }

    fn select(conn: Arc<MemoryConnection>) -> SqlQueryBuilder {
        let mut qb = SqlQueryBuilder::new(conn);
        qb.select(vec![col("fileid")]);
        qb.from("filecache", None);
        qb
    }

    #[test]
    fn test_shard_resolution() {
        let f = fixture(3);
        assert_eq!(f.runner.shards(true, &[Value::Int(1)]).unwrap(), Some(vec![0, 1, 2]));
        assert_eq!(f.runner.shards(false, &[]).unwrap(), None);
        assert_eq!(
            f.runner.shards(false, &[Value::Int(5), Value::Int(2), Value::Int(1)]).unwrap(),
            Some(vec![2, 1])
        );

        let single = fixture(1);
        assert_eq!(single.runner.shards(false, &[]).unwrap(), Some(vec![0]));
    }

    #[test]
    fn test_fan_out_concatenates_in_shard_order() {
        let f = fixture(2);
        f.shards[0].insert_rows("filecache", vec![row(1, 0)]);
        f.shards[1].insert_rows("filecache", vec![row(2, 1)]);

        let mut qb = select(f.shards[0].clone());
        let mut result = f.runner.execute_query(&mut qb, true, &[], &[]).unwrap();
        let ids: Vec<_> = result
            .fetch_all_assoc()
            .unwrap()
            .iter()
            .map(|r| r.get("fileid").cloned())
            .collect();
        assert_eq!(ids, vec![Some(Value::Int(1)), Some(Value::Int(2))]);
        assert_eq!(result.row_count().unwrap(), 2);
    }

    #[test]
    fn test_single_shard_runs_directly() {
        let f = fixture(2);
        f.shards[1].insert_rows("filecache", vec![row(3, 1)]);
        let mut qb = select(f.shards[0].clone());
        let mut result = f.runner.execute_query(&mut qb, false, &[Value::Int(1)], &[]).unwrap();
        assert_eq!(result.row_count().unwrap(), 1);
        assert_eq!(f.shards[0].execution_count(), 0);
        assert_eq!(f.shards[1].execution_count(), 1);
    }

    #[test]
    fn test_unresolved_query_stops_early() {
        let f = fixture(3);
        f.shards[0].insert_rows("filecache", vec![row(10, 0)]);
        f.shards[1].insert_rows("filecache", vec![row(11, 1)]);
        f.shards[2].insert_rows("filecache", vec![row(12, 2)]);

        let mut qb = select(f.shards[0].clone());
        let ids = qb.create_named_parameter(Value::from(vec![10, 11]), ParamType::IntArray, None);
        qb.set_where(vec![in_list(col("fileid"), ids)]);

        let pks = vec![Value::Int(10), Value::Int(11)];
        let mut result = f.runner.execute_query(&mut qb, false, &[], &pks).unwrap();
        assert_eq!(result.row_count().unwrap(), 2);
        assert_eq!(f.shards[2].execution_count(), 0);
    }

    struct PreferLast;

    impl ShardLocalityHint for PreferLast {
        fn likely_shards(&self, definition: &ShardDefinition, _keys: &[Value]) -> Vec<ShardId> {
            vec![definition.shard_count() - 1]
        }
    }

    #[test]
    fn test_locality_hint_orders_scan() {
        let f = fixture(3);
        f.shards[2].insert_rows("filecache", vec![row(12, 2)]);
        let runner = f.runner.with_locality_hint(Arc::new(PreferLast));

        let mut qb = select(f.shards[0].clone());
        qb.set_where(vec![eq(col("fileid"), param("id"))]);
        qb.create_named_parameter(Value::Int(12), ParamType::Int, Some("id"));
        let mut result = runner.execute_query(&mut qb, false, &[], &[Value::Int(12)]).unwrap();
        assert_eq!(result.row_count().unwrap(), 1);
        assert_eq!(f.shards[0].execution_count(), 0);
        assert_eq!(f.shards[1].execution_count(), 0);
    }

    #[test]
    fn test_statement_budgets() {
        let f = fixture(3);
        for (i, shard) in f.shards.iter().enumerate() {
            shard.insert_rows("filecache", vec![row(i as i64, i as i64)]);
        }

        // unresolved: stops once one row per primary key was touched
        let mut update = SqlQueryBuilder::new(f.shards[0].clone());
        update.update("filecache", None);
        update.set("storage", lit(99)).unwrap();
        let affected = f.runner.execute_statement(&mut update, false, &[], &[Value::Int(0)]).unwrap();
        assert_eq!(affected, 1);
        assert_eq!(f.shards[1].execution_count(), 0);

        // resolved across several shards: every shard runs
        let mut delete = SqlQueryBuilder::new(f.shards[0].clone());
        delete.delete("filecache", None);
        let affected = f
            .runner
            .execute_statement(&mut delete, false, &[Value::Int(1), Value::Int(2)], &[])
            .unwrap();
        assert_eq!(affected, 2);
    }

    #[test]
    fn test_statement_rejects_insert() {
        let f = fixture(2);
        let mut insert = SqlQueryBuilder::new(f.shards[0].clone());
        insert.insert("filecache");
        let err = f.runner.execute_statement(&mut insert, true, &[], &[]).unwrap_err();
        assert!(matches!(err, QueryError::InvalidShardedOperation(_)));
    }

    #[test]
    fn test_failure_aborts_fan_out() {
        let f = fixture(3);
        f.shards[1].fail_with("connection reset");
        let mut qb = select(f.shards[0].clone());
        let err = f.runner.execute_query(&mut qb, true, &[], &[]).err().unwrap();
        assert!(matches!(err, QueryError::Connection(_)));
        assert_eq!(f.shards[2].execution_count(), 0);
    }
}

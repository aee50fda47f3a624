//! Integration tests for sharded query routing.
//!
//! These tests verify:
//! - Key extraction from where clauses and inserted values
//! - Single-shard routing and multi-shard fan-out
//! - Primary key generation for inserts
//! - Updates and deletes across shards
//! - Primary-key-only lookups reaching every shard

use std::sync::Arc;

use dbsplit_core::expr::{col, eq, in_list, list, lit, or, param};
use dbsplit_core::{MemoryConnection, ParamType, QueryBuilder, QueryError, Row, SqlQueryBuilder, Value};
use dbsplit_sharding::{
    RoundRobinShardMapper, SequenceIdGenerator, ShardConnectionManager, ShardDefinition, ShardedQueryBuilder,
};

struct Cluster {
    default: Arc<MemoryConnection>,
    shards: Vec<Arc<MemoryConnection>>,
    definition: Arc<ShardDefinition>,
    manager: Arc<ShardConnectionManager>,
}

/// Two-shard `filecache` cluster, `storage` as shard key.
fn cluster() -> Cluster {
    let manager = Arc::new(ShardConnectionManager::new());
    let shards: Vec<_> = (0..2)
        .map(|i| {
            let conn = Arc::new(MemoryConnection::new(format!("shard{}", i)).with_auto_increment("share", "id"));
            manager.register(format!("shard{}", i), conn.clone());
            conn
        })
        .collect();
    let definition = Arc::new(
        ShardDefinition::new("filecache", "fileid", "storage", Arc::new(RoundRobinShardMapper))
            .with_companion_keys(["parent"])
            .with_companion_tables(["filecache_extended", "share"])
            .with_shards(["shard0", "shard1"]),
    );
    Cluster {
        default: Arc::new(MemoryConnection::new("default")),
        shards,
        definition,
        manager,
    }
}

fn file(id: i64, storage: i64, name: &str) -> Row {
    vec![
        ("fileid", Value::Int(id)),
        ("storage", Value::Int(storage)),
        ("name", Value::from(name)),
    ]
    .into_iter()
    .collect()
}

impl Cluster {
    fn builder(&self) -> ShardedQueryBuilder {
        let inner = SqlQueryBuilder::new(self.default.clone());
        ShardedQueryBuilder::new(Box::new(inner), vec![self.definition.clone()], self.manager.clone())
    }

    fn seed(&self) {
        self.shards[0].insert_rows("filecache", vec![file(1, 2, "a"), file(2, 4, "b")]);
        self.shards[1].insert_rows("filecache", vec![file(3, 1, "c"), file(4, 3, "d")]);
    }
}

fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter().filter_map(|r| r.get("fileid").and_then(Value::as_i64)).collect()
}

#[test]
fn test_shard_key_routes_to_one_shard() {
    let cluster = cluster();
    cluster.seed();

    let mut qb = cluster.builder();
    qb.select(vec![col("fileid")]);
    qb.from("filecache", Some("f"));
    let storage = qb.create_named_parameter(Value::Int(3), ParamType::Int, Some("storage"));
    qb.and_where(vec![eq(col("f.storage"), storage)]);

    assert_eq!(qb.shard_keys(), vec![Value::Int(3)]);
    assert_eq!(qb.shards().unwrap(), vec![1]);

    let rows = qb.execute_query(None).unwrap().fetch_all_assoc().unwrap();
    assert_eq!(ids(&rows), vec![4]);
    assert_eq!(cluster.shards[0].execution_count(), 0);
    assert_eq!(cluster.default.execution_count(), 0);
}

#[test]
fn test_fan_out_over_several_shard_keys() {
    let cluster = cluster();
    cluster.seed();

    let mut qb = cluster.builder();
    qb.select(vec![col("fileid")]);
    qb.from("filecache", None);
    let storages = qb.create_named_parameter(Value::from(vec![1, 2]), ParamType::IntArray, None);
    qb.and_where(vec![in_list(col("storage"), storages)]);

    let mut result = qb.execute_query(None).unwrap();
    assert_eq!(result.row_count().unwrap(), 2);
    // shard order follows the order of the keys: storage 1 lives on shard 1
    assert_eq!(ids(&result.fetch_all_assoc().unwrap()), vec![3, 1]);
}

#[test]
fn test_partial_or_scans_by_primary_key() {
    let cluster = cluster();
    cluster.seed();

    let mut qb = cluster.builder();
    qb.select(vec![col("fileid")]);
    qb.from("filecache", None);
    qb.and_where(vec![or(vec![eq(col("storage"), lit(1)), eq(col("name"), lit("a"))])]);
    assert!(qb.shard_keys().is_empty());
    assert!(matches!(qb.execute_query(None), Err(QueryError::InvalidShardedOperation(_))));

    qb.and_where(vec![eq(col("fileid"), lit(1))]);
    let rows = qb.execute_query(None).unwrap().fetch_all_assoc().unwrap();
    assert_eq!(ids(&rows), vec![1]);
    // without a shard key every shard is asked
    assert_eq!(cluster.shards[0].execution_count(), 1);
    assert_eq!(cluster.shards[1].execution_count(), 1);
}

#[test]
fn test_run_across_all_shards() {
    let cluster = cluster();
    cluster.seed();

    let mut qb = cluster.builder();
    qb.select(vec![col("fileid")]);
    qb.from("filecache", None);
    qb.run_across_all_shards();
    let rows = qb.execute_query(None).unwrap().fetch_all_assoc().unwrap();
    assert_eq!(ids(&rows), vec![1, 2, 3, 4]);
}

#[test]
fn test_insert_generates_primary_key() {
    let cluster = cluster();
    let mut qb = cluster
        .builder()
        .with_id_generator(Arc::new(SequenceIdGenerator::starting_at(500)));
    qb.insert("filecache");
    qb.set_value("storage", lit(5));
    qb.set_value("name", lit("new"));

    assert_eq!(qb.execute_statement(None).unwrap(), 1);
    assert_eq!(qb.last_insert_id().unwrap(), 500);

    let stored = cluster.shards[1].rows("filecache");
    assert_eq!(ids(&stored), vec![500]);
    assert!(cluster.shards[0].rows("filecache").is_empty());
}

#[test]
fn test_insert_into_companion_uses_connection_id() {
    let cluster = cluster();
    let mut qb = cluster.builder();
    qb.insert("share");
    qb.hint_shard_key("storage", Value::Int(2));
    qb.set_value("file_source", lit(1));

    assert_eq!(qb.execute_statement(None).unwrap(), 1);
    assert_eq!(cluster.shards[0].rows("share").len(), 1);
    assert_eq!(qb.last_insert_id().unwrap(), 1);
}

#[test]
fn test_insert_keeps_explicit_primary_key() {
    let cluster = cluster();
    let mut qb = cluster.builder();
    qb.values(vec![
        ("fileid".to_string(), lit(42)),
        ("storage".to_string(), lit(0)),
    ]);
    qb.insert("filecache");
    // values recorded before the table was known carry no keys
    assert!(matches!(qb.execute_statement(None), Err(QueryError::InvalidShardedOperation(_))));

    let mut qb = cluster.builder();
    qb.insert("filecache");
    qb.values(vec![
        ("fileid".to_string(), lit(42)),
        ("storage".to_string(), lit(0)),
    ]);
    qb.execute_statement(None).unwrap();
    assert_eq!(ids(&cluster.shards[0].rows("filecache")), vec![42]);
}

#[test]
fn test_update_by_primary_key_reaches_every_shard() {
    let cluster = cluster();
    cluster.seed();

    let mut qb = cluster.builder();
    qb.update("filecache", None);
    qb.set("name", lit("renamed")).unwrap();
    qb.and_where(vec![eq(col("fileid"), param("id"))]);
    qb.create_named_parameter(Value::Int(2), ParamType::Int, Some("id"));

    assert_eq!(qb.execute_statement(None).unwrap(), 1);
    assert_eq!(cluster.shards[0].execution_count(), 1);
    assert_eq!(cluster.shards[1].execution_count(), 1);
    let renamed = cluster.shards[0]
        .rows("filecache")
        .into_iter()
        .find(|r| r.get("fileid") == Some(&Value::Int(2)))
        .and_then(|r| r.get("name").cloned());
    assert_eq!(renamed, Some(Value::from("renamed")));
}

fn share(fileid: i64, share_with: &str) -> Row {
    vec![("fileid", Value::Int(fileid)), ("share_with", Value::from(share_with))]
        .into_iter()
        .collect()
}

/// Companion rows: two shares of file 1 on shard0, one of file 2 on shard1.
fn seed_shares(cluster: &Cluster) {
    cluster.shards[0].insert_rows("share", vec![share(1, "alice"), share(1, "bob")]);
    cluster.shards[1].insert_rows("share", vec![share(2, "carol")]);
}

#[test]
fn test_companion_rows_by_primary_key_read_from_every_shard() {
    let cluster = cluster();
    seed_shares(&cluster);

    let mut qb = cluster.builder();
    qb.select(vec![col("share_with")]);
    qb.from("share", None);
    qb.and_where(vec![in_list(col("fileid"), list(vec![lit(1), lit(2)]))]);

    let rows = qb.execute_query(None).unwrap().fetch_all_assoc().unwrap();
    let names: Vec<_> = rows.iter().filter_map(|r| r.get("share_with").cloned()).collect();
    assert_eq!(names, vec![Value::from("alice"), Value::from("bob"), Value::from("carol")]);
}

#[test]
fn test_companion_rows_by_primary_key_deleted_on_every_shard() {
    let cluster = cluster();
    seed_shares(&cluster);

    let mut qb = cluster.builder();
    qb.delete("share", None);
    qb.and_where(vec![in_list(col("fileid"), list(vec![lit(1), lit(2)]))]);

    assert_eq!(qb.execute_statement(None).unwrap(), 3);
    assert!(cluster.shards[0].rows("share").is_empty());
    assert!(cluster.shards[1].rows("share").is_empty());
}

#[test]
fn test_delete_on_shard_key() {
    let cluster = cluster();
    cluster.seed();

    let mut qb = cluster.builder();
    qb.delete("filecache", None);
    qb.and_where(vec![eq(col("storage"), lit(4))]);
    assert_eq!(qb.execute_statement(None).unwrap(), 1);
    assert_eq!(ids(&cluster.shards[0].rows("filecache")), vec![1]);
    assert_eq!(cluster.shards[1].rows("filecache").len(), 2);
}

#[test]
fn test_unsharded_table_passes_through() {
    let cluster = cluster();
    cluster
        .default
        .insert_rows("mounts", vec![vec![("id", Value::Int(1))].into_iter().collect()]);

    let mut qb = cluster.builder();
    qb.select(vec![col("id")]);
    qb.from("mounts", None);
    let rows = qb.execute_query(None).unwrap().fetch_all_assoc().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(cluster.default.execution_count(), 1);
}

#[test]
fn test_shard_failure_propagates() {
    let cluster = cluster();
    cluster.seed();
    cluster.shards[1].fail_with("gone away");

    let mut qb = cluster.builder();
    qb.select(vec![col("fileid")]);
    qb.from("filecache", None);
    qb.run_across_all_shards();
    let err = qb.execute_query(None).err().unwrap();
    assert_eq!(err.to_string(), "Connection error: shard1: gone away");
}

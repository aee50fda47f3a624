//! Shard mapping strategies.
//!
//! A mapper turns a shard key into a shard id given the current shard count.

use crate::definition::ShardId;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Maps a shard key onto one of `count` shards.
///
/// Implementations must be deterministic: the same key and count must
/// always produce the same shard.
pub trait ShardMapper: Send + Sync {
    /// Returns the shard id for a key, in `0..count`.
    fn shard_for_key(&self, key: i64, count: u32) -> ShardId;

    /// Returns a description of the strategy for debugging.
    fn describe(&self) -> String;
}

impl fmt::Debug for dyn ShardMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

// =============================================================================
// Round-robin
// =============================================================================

/// `key mod count`. Consecutive keys land on consecutive shards.
///
/// # Example
///
/// ```
/// use dbsplit_sharding::{RoundRobinShardMapper, ShardMapper};
///
/// let mapper = RoundRobinShardMapper;
/// assert_eq!(mapper.shard_for_key(5, 4), 1);
/// assert_eq!(mapper.shard_for_key(-1, 4), 3);
/// ```
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RoundRobinShardMapper;

impl ShardMapper for RoundRobinShardMapper {
    fn shard_for_key(&self, key: i64, count: u32) -> ShardId {
        if count == 0 {
            return 0;
        }
        key.rem_euclid(count as i64) as ShardId
    }

    fn describe(&self) -> String {
        "RoundRobinShardMapper".to_string()
    }
}

// =============================================================================
// Hash-based
// =============================================================================

/// `hash(key) mod count`. Spreads clustered keys evenly but loses locality.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HashShardMapper;

impl HashShardMapper {
    fn hash_key(key: i64) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }
}

impl ShardMapper for HashShardMapper {
    fn shard_for_key(&self, key: i64, count: u32) -> ShardId {
        if count == 0 {
            return 0;
        }
        (Self::hash_key(key) % count as u64) as ShardId
    }

    fn describe(&self) -> String {
        "HashShardMapper".to_string()
    }
}

/// Mapper strategies selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapperKind {
    #[default]
    RoundRobin,
    Hash,
}

impl MapperKind {
    /// Builds the mapper for this kind.
    pub fn build(&self) -> Arc<dyn ShardMapper> {
        match self {
            MapperKind::RoundRobin => Arc::new(RoundRobinShardMapper),
            MapperKind::Hash => Arc::new(HashShardMapper),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let mapper = RoundRobinShardMapper;
        let shards: Vec<_> = (0..6).map(|k| mapper.shard_for_key(k, 3)).collect();
        assert_eq!(shards, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(mapper.shard_for_key(i64::MIN, 3), i64::MIN.rem_euclid(3) as u32);
        assert_eq!(mapper.shard_for_key(7, 0), 0);
    }

    #[test]
    fn test_hash_deterministic() {
        let mapper = HashShardMapper;
        for key in [0, 1, 42, 1_000_000, -5] {
            let shard = mapper.shard_for_key(key, 8);
            assert!(shard < 8);
            assert_eq!(shard, mapper.shard_for_key(key, 8));
        }
    }

    #[test]
    fn test_hash_distribution() {
        let mapper = HashShardMapper;
        let mut counts = [0usize; 4];
        for key in 0..4000 {
            counts[mapper.shard_for_key(key, 4) as usize] += 1;
        }
        for count in counts {
            assert!(count > 800, "uneven distribution: {:?}", counts);
        }
    }

    #[test]
    fn test_mapper_kind() {
        assert_eq!(MapperKind::default(), MapperKind::RoundRobin);
        assert_eq!(MapperKind::Hash.build().describe(), "HashShardMapper");
        assert_eq!(MapperKind::RoundRobin.build().shard_for_key(9, 4), 1);
    }
}

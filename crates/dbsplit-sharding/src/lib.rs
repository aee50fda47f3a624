//! # DbSplit Sharding
//!
//! Horizontal sharding for tables described by a [`ShardDefinition`].
//!
//! This crate provides:
//! - [`ShardDefinition`] - which table is sharded, on which key, over which shards
//! - [`ShardMapper`] - key → shard strategies ([`RoundRobinShardMapper`], [`HashShardMapper`])
//! - [`ShardedQueryBuilder`] - a builder decorator that discovers keys and routes queries
//! - [`ShardQueryRunner`] - fan-out execution and result concatenation
//! - [`ShardConnectionManager`] - endpoint → connection registry
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────┐
//!   caller ──────▶│ ShardedQueryBuilder  │ key extraction, validation
//!                 └──────────┬───────────┘
//!                            │ shard keys / primary keys
//!                 ┌──────────▼───────────┐
//!                 │   ShardQueryRunner   │ single / fan-out / scan
//!                 └──────────┬───────────┘
//!                            │ ShardId
//!                 ┌──────────▼───────────┐
//!                 │ ShardConnectionManager│
//!                 └───┬──────┬───────┬───┘
//!                     ▼      ▼       ▼
//!                  shard0  shard1  shard2
//! ```

pub mod builder;
pub mod connection;
pub mod definition;
pub mod id;
pub mod keys;
pub mod mapper;
pub mod runner;

pub use builder::{BuilderState, ShardedQueryBuilder};
pub use connection::{ConnectionProvider, ShardConnectionManager};
pub use definition::{ShardDefinition, ShardId};
pub use id::{IdGenerator, RandomIdGenerator, SequenceIdGenerator};
pub use keys::{extract_keys, resolve_keys, KeySource};
pub use mapper::{HashShardMapper, MapperKind, RoundRobinShardMapper, ShardMapper};
pub use runner::{NoLocalityHint, ShardLocalityHint, ShardQueryRunner};

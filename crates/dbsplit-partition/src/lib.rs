//! # DbSplit Partition
//!
//! Vertical partitioning: groups of tables stored on their own database,
//! queried together with the rest through in-memory joins.
//!
//! This crate provides:
//! - [`PartitionSplit`] - a named set of tables (and the aliases a query gives them)
//! - [`PartitionedQueryBuilder`] - splits a query into a main query and one sub-query per partition
//! - [`JoinCondition`] - decomposes a join condition into join key and pushed-down filters
//! - [`PartitionedResult`] - merges the sub-query rows into the main rows by join key
//!
//! Joins are resolved in memory with the sub-query restricted to the keys
//! seen in the main rows, so only equality joins on a single column pair can
//! cross a partition boundary.

pub mod builder;
pub mod join;
pub mod query;
pub mod result;
pub mod split;

pub use builder::{PartitionedQueryBuilder, FROM_PREFIX};
pub use join::JoinCondition;
pub use query::PartitionQuery;
pub use result::PartitionedResult;
pub use split::PartitionSplit;

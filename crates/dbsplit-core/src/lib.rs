//! # dbsplit core
//!
//! Core types and traits shared by the sharding and partitioning layers.
//!
//! This crate provides the fundamental building blocks:
//! - [`Value`] and [`Row`] - Column values and result rows
//! - [`Expr`] - Typed predicate tree used for routing analysis
//! - [`Parameters`] - Named and positional bound parameters
//! - [`ResultCursor`] and [`ArrayResult`] - The result cursor contract
//! - [`QueryBuilder`] and [`Connection`] - The seams the routing builders decorate
//! - [`SqlQueryBuilder`] - Reference single-connection builder rendering SQL text
//! - [`MemoryConnection`] - In-memory connection evaluating statements against canned rows

pub mod builder;
pub mod connection;
pub mod expr;
pub mod memory;
pub mod params;
pub mod result;
pub mod value;

pub use builder::{JoinMode, QueryBuilder, QueryBuilderFactory, SelectItem, SqlQueryBuilder};
pub use connection::{Connection, QueryType, Statement};
pub use expr::{ColumnRef, CompareOp, CompositeKind, Expr, ParamRef};
pub use memory::MemoryConnection;
pub use params::{BoundParam, ParamType, Parameters};
pub use result::{ArrayResult, FetchMode, FetchedRow, ResultCursor};
pub use value::{Row, Value};

use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while building, routing or executing a query.
///
/// Everything except [`QueryError::Connection`] is a programmer or
/// configuration error and is never retried.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Two join fragments claim the same join column.
    #[error("Configuration conflict: {0}")]
    ConfigurationConflict(String),

    /// A join or where condition does not have the expected shape.
    #[error("Malformed predicate: {0}")]
    MalformedPredicate(String),

    /// The query violates a sharding invariant.
    #[error("Invalid sharded query: {0}")]
    InvalidShardedOperation(String),

    /// The query cannot be split across partitions.
    #[error("Invalid partitioned query: {0}")]
    UnsupportedPartitionedOperation(String),

    /// The cursor cannot produce rows in the requested mode.
    #[error("Fetch mode {0:?} not supported for array result")]
    UnsupportedFetchMode(FetchMode),

    /// Misuse of the base builder, such as executing a select as a statement.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Failure reported by a physical connection.
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;

//! Physical connections and the statements handed to them.

use crate::builder::SelectItem;
use crate::expr::Expr;
use crate::params::Parameters;
use crate::result::ResultCursor;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of query a builder is producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QueryType {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::Select => write!(f, "SELECT"),
            QueryType::Insert => write!(f, "INSERT"),
            QueryType::Update => write!(f, "UPDATE"),
            QueryType::Delete => write!(f, "DELETE"),
        }
    }
}

/// A fully built query as sent to a connection.
///
/// Carries the rendered SQL together with the structured parts it was
/// rendered from, so connections that do not speak SQL can still execute it.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: QueryType,
    pub sql: String,
    /// Table in the FROM clause, or the write target
    pub table: Option<String>,
    pub selects: Vec<SelectItem>,
    pub predicate: Option<Expr>,
    /// Column assignments of an insert or update
    pub assignments: Vec<(String, Expr)>,
    pub parameters: Parameters,
}

/// A single physical database connection.
pub trait Connection: Send + Sync {
    /// Name used in logs and for looking the connection up.
    fn name(&self) -> &str;

    /// Runs a select and returns its rows.
    fn execute_query(&self, statement: &Statement) -> Result<Box<dyn ResultCursor>>;

    /// Runs an insert, update or delete and returns the affected row count.
    fn execute_statement(&self, statement: &Statement) -> Result<u64>;

    /// Id generated by the last insert into `table` on this connection.
    fn last_insert_id(&self, table: &str) -> Result<i64>;
}

//! Typed predicate and projection expressions.
//!
//! Routing decisions (which shard, which partition, which join column) are
//! made by matching on this tree rather than on rendered SQL text. `Display`
//! renders MySQL-style SQL with backtick-quoted identifiers.
//!
//! ```
//! use dbsplit_core::expr::{col, eq, param};
//!
//! let predicate = eq(col("f.storage"), param("storage"));
//! assert_eq!(predicate.to_string(), "`f`.`storage` = :storage");
//! ```

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Column and parameter references
// =============================================================================

/// A possibly qualified column reference such as `f.fileid` or `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Table name or alias
    pub qualifier: Option<String>,
    /// Column name, `*` for a wildcard
    pub name: String,
}

impl ColumnRef {
    /// Creates an unqualified column reference.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            name: name.into(),
        }
    }

    /// Creates a qualified column reference.
    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        }
    }

    /// Parses `alias.column` or `column`, stripping backticks.
    pub fn parse(text: &str) -> Self {
        let cleaned = text.replace('`', "");
        match cleaned.split_once('.') {
            Some((qualifier, name)) => Self::qualified(qualifier.trim(), name.trim()),
            None => Self::new(cleaned.trim()),
        }
    }

    /// Returns true for `*` or `alias.*`.
    pub fn is_wildcard(&self) -> bool {
        self.name == "*"
    }

    /// Returns true if the column is qualified with exactly `qualifier`.
    pub fn is_qualified_by(&self, qualifier: &str) -> bool {
        self.qualifier.as_deref() == Some(qualifier)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(q) = &self.qualifier {
            write!(f, "`{}`.", q)?;
        }
        if self.is_wildcard() {
            write!(f, "*")
        } else {
            write!(f, "`{}`", self.name)
        }
    }
}

/// Placeholder reference inside an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamRef {
    /// `:name`
    Named(String),
    /// `?`, zero-based index into the positional parameters
    Positional(usize),
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamRef::Named(name) => write!(f, ":{}", name),
            ParamRef::Positional(_) => write!(f, "?"),
        }
    }
}

// =============================================================================
// Expression tree
// =============================================================================

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Neq => "<>",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

/// Kind of a composite predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompositeKind {
    And,
    Or,
}

/// A typed SQL expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Column reference
    Column(ColumnRef),
    /// Bound parameter placeholder
    Parameter(ParamRef),
    /// Inline literal value
    Literal(Value),
    /// Binary comparison
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    /// `expr IN (list)`; `list` is a [`Expr::List`] or an array parameter
    In { expr: Box<Expr>, list: Box<Expr> },
    /// Parenthesized expression list
    List(Vec<Expr>),
    /// `expr IS NULL`
    IsNull(Box<Expr>),
    /// `expr IS NOT NULL`
    IsNotNull(Box<Expr>),
    /// AND / OR over several parts
    Composite { kind: CompositeKind, parts: Vec<Expr> },
    /// Opaque SQL fragment, never analyzed structurally
    Raw(String),
}

impl Expr {
    /// Returns the column reference if this is a plain column.
    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }

    /// Returns true for composites of the given kind.
    pub fn is_composite(&self, kind: CompositeKind) -> bool {
        matches!(self, Expr::Composite { kind: k, .. } if *k == kind)
    }

    /// Collects every column reference in the tree, in visiting order.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let Expr::Column(c) = e {
                out.push(c);
            }
        });
        out
    }

    /// Returns true if any column in the tree is qualified with `qualifier`.
    ///
    /// Opaque fragments are searched for a `` `qualifier`. `` prefix.
    pub fn mentions_qualifier(&self, qualifier: &str) -> bool {
        let mut found = false;
        let needle = format!("`{}`.", qualifier);
        self.visit(&mut |e| match e {
            Expr::Column(c) if c.is_qualified_by(qualifier) => found = true,
            Expr::Raw(sql) if sql.contains(&needle) => found = true,
            _ => {}
        });
        found
    }

    /// Returns true if the tree contains a positional (`?`) placeholder.
    pub fn has_positional_parameter(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| match e {
            Expr::Parameter(ParamRef::Positional(_)) => found = true,
            Expr::Raw(sql) if sql.contains('?') => found = true,
            _ => {}
        });
        found
    }

    /// Depth-first visit of every node.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Compare { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Expr::In { expr, list } => {
                expr.visit(f);
                list.visit(f);
            }
            Expr::List(items) => items.iter().for_each(|i| i.visit(f)),
            Expr::IsNull(e) | Expr::IsNotNull(e) => e.visit(f),
            Expr::Composite { parts, .. } => parts.iter().for_each(|p| p.visit(f)),
            Expr::Column(_) | Expr::Parameter(_) | Expr::Literal(_) | Expr::Raw(_) => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{}", c),
            Expr::Parameter(p) => write!(f, "{}", p),
            Expr::Literal(v) => write!(f, "{}", v.to_sql_literal()),
            Expr::Compare { left, op, right } => write!(f, "{} {} {}", left, op.as_sql(), right),
            Expr::In { expr, list } => match list.as_ref() {
                Expr::List(_) => write!(f, "{} IN {}", expr, list),
                other => write!(f, "{} IN ({})", expr, other),
            },
            Expr::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Expr::IsNull(e) => write!(f, "{} IS NULL", e),
            Expr::IsNotNull(e) => write!(f, "{} IS NOT NULL", e),
            Expr::Composite { kind, parts } => {
                let glue = match kind {
                    CompositeKind::And => " AND ",
                    CompositeKind::Or => " OR ",
                };
                if parts.len() == 1 {
                    return write!(f, "{}", parts[0]);
                }
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{}", glue)?;
                    }
                    write!(f, "{}", part)?;
                }
                write!(f, ")")
            }
            Expr::Raw(sql) => write!(f, "{}", sql),
        }
    }
}

impl From<ColumnRef> for Expr {
    fn from(c: ColumnRef) -> Self {
        Expr::Column(c)
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Literal(v)
    }
}

// =============================================================================
// Constructors
// =============================================================================

/// Column reference, `"alias.column"` or `"column"`.
pub fn col(name: &str) -> Expr {
    Expr::Column(ColumnRef::parse(name))
}

/// Named parameter reference, with or without the leading colon.
pub fn param(name: &str) -> Expr {
    Expr::Parameter(ParamRef::Named(name.trim_start_matches(':').to_string()))
}

/// Inline literal.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

/// Opaque SQL fragment.
pub fn raw(sql: impl Into<String>) -> Expr {
    Expr::Raw(sql.into())
}

pub fn compare(left: Expr, op: CompareOp, right: Expr) -> Expr {
    Expr::Compare {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    compare(left, CompareOp::Eq, right)
}

pub fn neq(left: Expr, right: Expr) -> Expr {
    compare(left, CompareOp::Neq, right)
}

pub fn lt(left: Expr, right: Expr) -> Expr {
    compare(left, CompareOp::Lt, right)
}

pub fn lte(left: Expr, right: Expr) -> Expr {
    compare(left, CompareOp::Lte, right)
}

pub fn gt(left: Expr, right: Expr) -> Expr {
    compare(left, CompareOp::Gt, right)
}

pub fn gte(left: Expr, right: Expr) -> Expr {
    compare(left, CompareOp::Gte, right)
}

/// `expr IN (list)`. `list` is usually an array parameter or [`list`].
pub fn in_list(expr: Expr, list: Expr) -> Expr {
    Expr::In {
        expr: Box::new(expr),
        list: Box::new(list),
    }
}

pub fn list(items: Vec<Expr>) -> Expr {
    Expr::List(items)
}

pub fn is_null(expr: Expr) -> Expr {
    Expr::IsNull(Box::new(expr))
}

pub fn is_not_null(expr: Expr) -> Expr {
    Expr::IsNotNull(Box::new(expr))
}

pub fn and(parts: Vec<Expr>) -> Expr {
    Expr::Composite {
        kind: CompositeKind::And,
        parts,
    }
}

pub fn or(parts: Vec<Expr>) -> Expr {
    Expr::Composite {
        kind: CompositeKind::Or,
        parts,
    }
}

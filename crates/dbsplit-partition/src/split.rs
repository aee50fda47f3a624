//! Named groups of tables that live on their own database.

use dbsplit_core::Expr;
use std::collections::HashMap;

/// A partition: a set of tables stored together, plus the aliases a query
/// gave them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSplit {
    pub name: String,
    pub tables: Vec<String>,
    /// alias → table
    aliases: HashMap<String, String>,
}

impl PartitionSplit {
    pub fn new<S: Into<String>>(name: impl Into<String>, tables: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            tables: tables.into_iter().map(Into::into).collect(),
            aliases: HashMap::new(),
        }
    }

    pub fn add_table(&mut self, table: &str) {
        if !self.contains_table(table) {
            self.tables.push(table.to_string());
        }
    }

    /// Records `alias` for `table`. Ignored for tables outside the partition.
    pub fn add_alias(&mut self, table: &str, alias: &str) {
        if self.contains_table(table) {
            self.aliases.insert(alias.to_string(), table.to_string());
        }
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table)
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }

    /// Table or alias.
    pub fn contains(&self, name: &str) -> bool {
        self.contains_table(name) || self.contains_alias(name)
    }

    /// True for a column qualified with one of the partition's tables or aliases.
    pub fn is_column_in_partition(&self, expr: &Expr) -> bool {
        match expr.as_column().and_then(|c| c.qualifier.as_deref()) {
            Some(qualifier) => self.contains(qualifier),
            None => false,
        }
    }

    /// True if the predicate references any table or alias of the partition.
    pub fn check_predicate(&self, predicate: &Expr) -> bool {
        self.tables
            .iter()
            .chain(self.aliases.keys())
            .any(|name| predicate.mentions_qualifier(name))
    }
}

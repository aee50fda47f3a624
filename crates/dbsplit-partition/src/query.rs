//! A sub-query on another partition and the in-memory join that folds its
//! rows into the primary rows.

use dbsplit_core::expr::in_list;
use dbsplit_core::{ColumnRef, Expr, JoinMode, ParamType, QueryBuilder, Result, Row, Value};
use std::collections::{HashMap, HashSet};

/// Named parameter carrying the join keys of the current execution.
const JOIN_KEYS: &str = "joinKeys";

/// The part of a query that runs on one partition.
pub struct PartitionQuery {
    /// Partition the sub-query runs on
    pub partition: String,
    pub(crate) query: Box<dyn QueryBuilder>,
    /// Key column in the primary rows
    pub join_from: ColumnRef,
    /// Key column in the sub-query rows
    pub join_to: ColumnRef,
    pub mode: JoinMode,
    /// Whether the `join_to IN (:joinKeys)` restriction was added already
    restricted: bool,
}

impl PartitionQuery {
    pub fn new(
        partition: impl Into<String>,
        query: Box<dyn QueryBuilder>,
        join_from: ColumnRef,
        join_to: ColumnRef,
        mode: JoinMode,
    ) -> Self {
        Self {
            partition: partition.into(),
            query,
            join_from,
            join_to,
            mode,
            restricted: false,
        }
    }

    pub fn query(&self) -> &dyn QueryBuilder {
        self.query.as_ref()
    }

    pub fn query_mut(&mut self) -> &mut dyn QueryBuilder {
        self.query.as_mut()
    }

    /// Runs the sub-query for the keys found in `rows` and joins the results.
    ///
    /// Every matching sub-row produces one output row (primary values
    /// overwritten by sub-row values on name clashes). Unmatched primary rows
    /// are dropped for inner joins and padded with nulls for left joins.
    pub fn merge_with(&mut self, rows: Vec<Row>) -> Result<Vec<Row>> {
        if rows.is_empty() {
            return Ok(rows);
        }
        let from_name = self.join_from.name.as_str();
        let to_name = self.join_to.name.as_str();

        let mut seen = HashSet::new();
        let keys: Vec<Value> = rows
            .iter()
            .filter_map(|row| row.get(from_name))
            .filter(|value| value.join_key().is_some_and(|k| seen.insert(k)))
            .cloned()
            .collect();

        let mut matches: HashMap<String, Vec<Row>> = HashMap::new();
        if !keys.is_empty() {
            let ty = if keys.iter().all(|k| matches!(k, Value::Int(_))) {
                ParamType::IntArray
            } else {
                ParamType::StrArray
            };
            let key_count = keys.len();
            // the restriction is added once; later executions only rebind the keys
            let param = self
                .query
                .create_named_parameter(Value::List(keys), ty, Some(JOIN_KEYS));
            if !self.restricted {
                self.query
                    .and_where(vec![in_list(Expr::Column(self.join_to.clone()), param)]);
                self.restricted = true;
            }
            let mut result = self.query.execute_query(None)?;
            for sub in result.fetch_all_assoc()? {
                if let Some(key) = sub.get(to_name).and_then(Value::join_key) {
                    matches.entry(key).or_default().push(sub);
                }
            }
            result.close_cursor();
            tracing::debug!(
                partition = %self.partition,
                keys = key_count,
                matched = matches.len(),
                "fetched partition rows"
            );
        }

        let sub_columns = self.query.output_columns();
        let mut merged = Vec::with_capacity(rows.len());
        for row in rows {
            let found = row
                .get(from_name)
                .and_then(Value::join_key)
                .and_then(|key| matches.get(&key));
            match found {
                Some(subs) => {
                    for sub in subs {
                        let mut out = row.clone();
                        for (column, value) in sub.iter() {
                            out.set(column, value.clone());
                        }
                        merged.push(out);
                    }
                }
                None if self.mode == JoinMode::Left => {
                    let mut out = row;
                    for column in &sub_columns {
                        if !out.contains(column) {
                            out.set(column.clone(), Value::Null);
                        }
                    }
                    merged.push(out);
                }
                None => {}
            }
        }
        Ok(merged)
    }
}

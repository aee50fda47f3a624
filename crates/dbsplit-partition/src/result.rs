//! Result of a query that was split across partitions.

use crate::query::PartitionQuery;
use dbsplit_core::{ArrayResult, FetchMode, FetchedRow, Result, ResultCursor, Row};
use parking_lot::Mutex;
use std::sync::Arc;

/// Combines the primary result with the rows of every partition sub-query.
///
/// Nothing runs until the first `fetch`, `fetch_all` or `row_count`: then the
/// primary rows are read, merged with each partition in turn, stripped of the
/// columns that were only selected to make the join possible, and served
/// like an [`ArrayResult`].
pub struct PartitionedResult {
    parts: Vec<Arc<Mutex<PartitionQuery>>>,
    result: Box<dyn ResultCursor>,
    hidden_columns: Vec<String>,
    /// Primary rows read before a merge failed, kept for the next attempt
    primary: Option<Vec<Row>>,
    rows: ArrayResult,
    fetched: bool,
}

impl PartitionedResult {
    pub fn new(
        parts: Vec<Arc<Mutex<PartitionQuery>>>,
        result: Box<dyn ResultCursor>,
        hidden_columns: Vec<String>,
    ) -> Self {
        Self {
            parts,
            result,
            hidden_columns,
            primary: None,
            rows: ArrayResult::default(),
            fetched: false,
        }
    }

    fn fetch_rows(&mut self) -> Result<()> {
        if self.fetched {
            return Ok(());
        }
        // the primary cursor can only be read once
        if self.primary.is_none() {
            self.primary = Some(self.result.fetch_all_assoc()?);
        }
        let mut rows = self.primary.clone().unwrap_or_default();
        for part in &self.parts {
            rows = part.lock().merge_with(rows)?;
        }
        self.primary = None;
        self.fetched = true;
        if !self.hidden_columns.is_empty() {
            for row in rows.iter_mut() {
                for column in &self.hidden_columns {
                    row.remove(column);
                }
            }
        }
        tracing::debug!(parts = self.parts.len(), rows = rows.len(), "merged partitioned result");
        self.rows.reset(rows);
        Ok(())
    }
}

impl ResultCursor for PartitionedResult {
    fn fetch(&mut self, mode: FetchMode) -> Result<Option<FetchedRow>> {
        self.fetch_rows()?;
        self.rows.fetch(mode)
    }

    fn fetch_all(&mut self, mode: FetchMode) -> Result<Vec<FetchedRow>> {
        self.fetch_rows()?;
        self.rows.fetch_all(mode)
    }

    fn row_count(&mut self) -> Result<usize> {
        self.fetch_rows()?;
        self.rows.row_count()
    }

    fn close_cursor(&mut self) -> bool {
        self.result.close_cursor()
    }
}

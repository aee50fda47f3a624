//! Result cursors.
//!
//! A cursor hands out rows in FIFO order; a row that has been fetched is
//! gone. [`ArrayResult`] is the in-memory cursor used whenever rows from
//! several physical results have to be combined.

use crate::value::{Row, Value};
use crate::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// How a fetched row is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchMode {
    /// Row as a column → value map
    Assoc,
    /// Row as values in column order
    Num,
    /// Value of the first column only
    Column,
    /// Map and positional values combined; drivers only
    Both,
}

/// A row shaped according to a [`FetchMode`].
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedRow {
    Assoc(Row),
    Num(Vec<Value>),
    Column(Value),
}

impl FetchedRow {
    fn shape(row: Row, mode: FetchMode) -> Result<Self> {
        match mode {
            FetchMode::Assoc => Ok(FetchedRow::Assoc(row)),
            FetchMode::Num => Ok(FetchedRow::Num(row.values())),
            FetchMode::Column => Ok(FetchedRow::Column(row.first().cloned().unwrap_or(Value::Null))),
            FetchMode::Both => Err(QueryError::UnsupportedFetchMode(mode)),
        }
    }

    /// Returns the row if it was fetched in [`FetchMode::Assoc`].
    pub fn into_row(self) -> Option<Row> {
        match self {
            FetchedRow::Assoc(row) => Some(row),
            _ => None,
        }
    }

    /// Values in column order, whatever the mode.
    pub fn into_values(self) -> Vec<Value> {
        match self {
            FetchedRow::Assoc(row) => row.values(),
            FetchedRow::Num(values) => values,
            FetchedRow::Column(value) => vec![value],
        }
    }
}

/// The cursor contract shared by driver results and in-memory results.
pub trait ResultCursor: Send {
    /// Pops the next row, `None` once the cursor is exhausted.
    fn fetch(&mut self, mode: FetchMode) -> Result<Option<FetchedRow>>;

    /// Drains every remaining row.
    fn fetch_all(&mut self, mode: FetchMode) -> Result<Vec<FetchedRow>>;

    /// Number of rows the result holds.
    fn row_count(&mut self) -> Result<usize>;

    /// Releases the cursor. Remaining rows are discarded.
    fn close_cursor(&mut self) -> bool;

    /// First column of the next row.
    fn fetch_one(&mut self) -> Result<Option<Value>> {
        Ok(self.fetch(FetchMode::Assoc)?.and_then(|r| r.into_values().into_iter().next()))
    }

    fn fetch_column(&mut self) -> Result<Option<Value>> {
        self.fetch_one()
    }

    /// Next row as a column map.
    fn fetch_assoc(&mut self) -> Result<Option<Row>> {
        Ok(self.fetch(FetchMode::Assoc)?.and_then(FetchedRow::into_row))
    }

    /// All remaining rows as column maps.
    fn fetch_all_assoc(&mut self) -> Result<Vec<Row>> {
        Ok(self
            .fetch_all(FetchMode::Assoc)?
            .into_iter()
            .filter_map(FetchedRow::into_row)
            .collect())
    }
}

// =============================================================================
// ArrayResult
// =============================================================================

/// Cursor over a materialized list of rows.
#[derive(Debug, Clone, Default)]
pub struct ArrayResult {
    rows: VecDeque<Row>,
    total: usize,
}

impl ArrayResult {
    pub fn new(rows: Vec<Row>) -> Self {
        let total = rows.len();
        Self {
            rows: rows.into(),
            total,
        }
    }

    /// Replaces the rows, as if the result had been created with them.
    pub fn reset(&mut self, rows: Vec<Row>) {
        self.total = rows.len();
        self.rows = rows.into();
    }

    /// Rows not fetched yet.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl ResultCursor for ArrayResult {
    fn fetch(&mut self, mode: FetchMode) -> Result<Option<FetchedRow>> {
        // Validate before popping so a bad mode does not lose a row.
        if mode == FetchMode::Both {
            return Err(QueryError::UnsupportedFetchMode(mode));
        }
        match self.rows.pop_front() {
            Some(row) => FetchedRow::shape(row, mode).map(Some),
            None => Ok(None),
        }
    }

    fn fetch_all(&mut self, mode: FetchMode) -> Result<Vec<FetchedRow>> {
        if mode == FetchMode::Both {
            return Err(QueryError::UnsupportedFetchMode(mode));
        }
        self.rows
            .drain(..)
            .map(|row| FetchedRow::shape(row, mode))
            .collect()
    }

    fn row_count(&mut self) -> Result<usize> {
        Ok(self.total)
    }

    fn close_cursor(&mut self) -> bool {
        self.rows.clear();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<Row> {
        vec![
            vec![("id", Value::Int(1)), ("name", Value::from("a"))].into_iter().collect(),
            vec![("id", Value::Int(2)), ("name", Value::from("b"))].into_iter().collect(),
        ]
    }

    #[test]
    fn test_fetch_modes() {
        let mut result = ArrayResult::new(rows());
        let first = result.fetch(FetchMode::Num).unwrap().unwrap();
        assert_eq!(first, FetchedRow::Num(vec![Value::Int(1), Value::from("a")]));
        let second = result.fetch(FetchMode::Column).unwrap().unwrap();
        assert_eq!(second, FetchedRow::Column(Value::Int(2)));
        assert!(result.fetch(FetchMode::Assoc).unwrap().is_none());
    }

    #[test]
    fn test_unsupported_mode_keeps_row() {
        let mut result = ArrayResult::new(rows());
        let err = result.fetch(FetchMode::Both).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedFetchMode(FetchMode::Both)));
        assert_eq!(result.remaining(), 2);
        assert!(result.fetch_all(FetchMode::Both).is_err());
    }

    #[test]
    fn test_fetch_all_drains() {
        let mut result = ArrayResult::new(rows());
        assert_eq!(result.fetch_all_assoc().unwrap().len(), 2);
        assert!(result.fetch_all_assoc().unwrap().is_empty());
        assert_eq!(result.row_count().unwrap(), 2);
    }

    #[test]
    fn test_fetch_one() {
        let mut result = ArrayResult::new(rows());
        assert_eq!(result.fetch_one().unwrap(), Some(Value::Int(1)));
        assert_eq!(result.fetch_column().unwrap(), Some(Value::Int(2)));
        assert_eq!(result.fetch_one().unwrap(), None);
    }

    #[test]
    fn test_close_cursor() {
        let mut result = ArrayResult::new(rows());
        assert!(result.close_cursor());
        assert!(result.fetch_assoc().unwrap().is_none());
    }
}

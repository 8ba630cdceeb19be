//! Frame: a date-indexed table of nullable real columns.
//!
//! Used for everything read out of a symbol table (base OHLCV plus any derived
//! columns), for derived series produced by processors, and as the input to
//! the column merge.

use chrono::NaiveDate;
use serde::Serialize;

/// Base column names, in table order.
pub const OPEN: &str = "Open";
pub const HIGH: &str = "High";
pub const LOW: &str = "Low";
pub const CLOSE: &str = "Close";
pub const ADJ_CLOSE: &str = "AdjClose";
pub const VOLUME: &str = "Volume";

/// One named column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Ascending, date-keyed rows with a fixed set of named columns.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Frame {
    dates: Vec<NaiveDate>,
    columns: Vec<Column>,
}

impl Frame {
    /// A key-only frame over `dates`.
    pub fn new(dates: Vec<NaiveDate>) -> Self {
        Self {
            dates,
            columns: Vec::new(),
        }
    }

    /// Add (or replace) a column. `values` must have one entry per date.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) {
        let name = name.into();
        assert_eq!(
            values.len(),
            self.dates.len(),
            "column '{name}' length does not match frame length"
        );
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.columns.push(Column { name, values }),
        }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Value at (`date`, `column`), if the date is present and the cell non-null.
    pub fn value(&self, date: NaiveDate, column: &str) -> Option<f64> {
        let row = self.dates.binary_search(&date).ok()?;
        self.column(column)?.get(row).copied().flatten()
    }

    /// Rows within `[start, end]`, both bounds inclusive and optional.
    pub fn slice(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Frame {
        let lo = start.map_or(0, |s| self.dates.partition_point(|d| *d < s));
        let hi = end.map_or(self.dates.len(), |e| self.dates.partition_point(|d| *d <= e));
        let hi = hi.max(lo);
        Frame {
            dates: self.dates[lo..hi].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: c.values[lo..hi].to_vec(),
                })
                .collect(),
        }
    }
}

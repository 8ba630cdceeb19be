//! Exchange table store: one SQLite file per exchange, one table per symbol.
//!
//! Layout: `{data_dir}/{exchange}.db`, table `"{SYMBOL}"` with
//! `Date TEXT PRIMARY KEY, Open, High, Low, Close, AdjClose REAL, Volume INTEGER`
//! plus any derived REAL columns added by the column merge.
//!
//! Two merge paths:
//! - [`ExchangeStore::write_series`] extends a table's date range with new
//!   rows and never rewrites rows already stored.
//! - [`ExchangeStore::write_columns`] adds or overwrites columns keyed by date,
//!   growing the schema on demand.

use super::connection::{ConnectionStore, ScopedStore};
use super::error::StoreError;
use super::frame::{self, Frame};
use super::validate::{self, quoted};
use crate::domain::DailyBar;
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use tracing::{debug, warn};

/// Base schema of a symbol table, after the `Date` key.
pub const BASE_SCHEMA: [(&str, &str); 6] = [
    (frame::OPEN, "REAL"),
    (frame::HIGH, "REAL"),
    (frame::LOW, "REAL"),
    (frame::CLOSE, "REAL"),
    (frame::ADJ_CLOSE, "REAL"),
    (frame::VOLUME, "INTEGER"),
];

const STAGING_TABLE: &str = "_staging_dates";
const KEY_COLUMN: &str = "Date";

/// What a column merge changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMergeStats {
    /// Dates that were not in the target table and were inserted key-only.
    pub new_keys: usize,
    /// Columns added to the target schema.
    pub new_columns: Vec<String>,
    /// Rows updated by key.
    pub rows_updated: usize,
}

/// Store for the symbol tables of one exchange (or any file with the same
/// date-keyed layout, such as a derived-data store).
#[derive(Debug)]
pub struct ExchangeStore {
    store: ConnectionStore,
}

impl ExchangeStore {
    /// Open `{data_dir}/{exchange}.db`.
    pub fn for_exchange(data_dir: &Path, exchange: &str) -> Result<Self, StoreError> {
        validate::exchange(exchange)?;
        Self::open_at(data_dir.join(format!("{}.db", exchange.to_lowercase())))
    }

    /// Open the store at an explicit path.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            store: ConnectionStore::open_at(path.as_ref())?,
        })
    }

    /// A closed store for `path`; open it with `open()` or `scoped()`.
    pub fn closed(path: impl AsRef<Path>) -> Self {
        Self {
            store: ConnectionStore::new(path.as_ref()),
        }
    }

    // ── Schema introspection ────────────────────────────────────────

    pub fn has_table(&self, table: &str) -> Result<bool, StoreError> {
        validate::table_name(table)?;
        table_exists(self.store.connection()?, table)
    }

    /// Create `table` with a `Date` key and the given `(name, type)` columns if
    /// it does not exist. An empty column list creates a key-only table.
    ///
    /// Returns true if the table was created.
    pub fn ensure_table(
        &mut self,
        table: &str,
        columns: &[(&str, &str)],
    ) -> Result<bool, StoreError> {
        validate::table_name(table)?;
        for (name, _) in columns {
            validate::column_name(name)?;
        }
        let conn = self.store.writer()?;
        create_table(conn, table, columns)
    }

    /// All column names of `table`, including `Date`.
    pub fn columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        validate::table_name(table)?;
        table_columns(self.store.connection()?, table)
    }

    /// Column names compare case-insensitively, as SQLite resolves them.
    pub fn has_column(&self, table: &str, column: &str) -> Result<bool, StoreError> {
        validate::column_name(column)?;
        Ok(self
            .columns(table)?
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column)))
    }

    /// Add `column` as a nullable `sql_type` column unless it already exists.
    ///
    /// Returns true if the column was added.
    pub fn ensure_column(
        &mut self,
        table: &str,
        column: &str,
        sql_type: &str,
    ) -> Result<bool, StoreError> {
        validate::table_name(table)?;
        validate::column_name(column)?;
        validate::column_name(sql_type)?;
        let conn = self.store.writer()?;
        add_column(conn, table, column, sql_type)
    }

    /// Names of all tables in the file.
    pub fn tables(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.store.connection()?;
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Earliest and latest stored dates, or `None` for an empty table.
    pub fn date_range(&self, table: &str) -> Result<Option<(NaiveDate, NaiveDate)>, StoreError> {
        validate::table_name(table)?;
        stored_range(self.store.connection()?, table)
    }

    // ── Row merge ───────────────────────────────────────────────────

    /// Merge provider rows into the symbol's table.
    ///
    /// Only rows dated before the current minimum or after the current maximum
    /// are inserted; rows inside the stored range are skipped, never updated.
    /// An empty table takes every row. Nothing is committed here.
    ///
    /// Returns the number of rows inserted.
    pub fn write_series(&mut self, symbol: &str, bars: &[DailyBar]) -> Result<usize, StoreError> {
        validate::symbol(symbol)?;
        if bars.is_empty() {
            return Ok(0);
        }
        let conn = self.store.writer()?;
        create_table(conn, symbol, &BASE_SCHEMA)?;

        let range = stored_range(conn, symbol)?;
        let sql = format!(
            "INSERT OR IGNORE INTO {} (Date, Open, High, Low, Close, AdjClose, Volume) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            quoted(symbol)
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut inserted = 0;
        for bar in bars {
            let outside = match range {
                Some((first, last)) => bar.date < first || bar.date > last,
                None => true,
            };
            if !outside {
                continue;
            }
            inserted += stmt.execute(params![
                bar.date,
                finite(bar.open),
                finite(bar.high),
                finite(bar.low),
                finite(bar.close),
                finite(bar.adj_close),
                i64::try_from(bar.volume).unwrap_or(i64::MAX),
            ])?;
        }
        debug!(symbol, inserted, offered = bars.len(), "merged series");
        Ok(inserted)
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Read a symbol table, optionally bounded by inclusive `yyyy-mm-dd` dates.
    pub fn read_series(
        &self,
        symbol: &str,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Frame, StoreError> {
        validate::symbol(symbol)?;
        let start = validate::date_bound(start)?;
        let end = validate::date_bound(end)?;
        let conn = self.store.connection()?;
        self.require_table(conn, symbol)?;

        let table = quoted(symbol);
        let (sql, bounds): (String, Vec<NaiveDate>) = match (start, end) {
            (None, None) => (format!("SELECT * FROM {table} ORDER BY Date"), vec![]),
            (Some(s), None) => (
                format!("SELECT * FROM {table} WHERE Date >= ?1 ORDER BY Date"),
                vec![s],
            ),
            (None, Some(e)) => (
                format!("SELECT * FROM {table} WHERE Date <= ?1 ORDER BY Date"),
                vec![e],
            ),
            (Some(s), Some(e)) => (
                format!("SELECT * FROM {table} WHERE Date BETWEEN ?1 AND ?2 ORDER BY Date"),
                vec![s, e],
            ),
        };
        query_frame(conn, &sql, params_from_iter(bounds))
    }

    /// Read `Date` plus the named columns of `table`.
    pub fn read_columns(&self, table: &str, columns: &[&str]) -> Result<Frame, StoreError> {
        validate::table_name(table)?;
        for c in columns {
            validate::column_name(c)?;
        }
        let conn = self.store.connection()?;
        self.require_table(conn, table)?;
        let mut select = vec!["Date".to_string()];
        select.extend(columns.iter().map(|c| quoted(c)));
        let sql = format!(
            "SELECT {} FROM {} ORDER BY Date",
            select.join(", "),
            quoted(table)
        );
        query_frame(conn, &sql, [])
    }

    // ── Column merge ────────────────────────────────────────────────

    /// Merge the columns of `frame` into `table` by date.
    ///
    /// 1. stage the incoming dates in a key-only table,
    /// 2. insert staged dates missing from the target as key-only rows,
    /// 3. add incoming columns the target lacks as nullable REAL,
    /// 4. update every incoming row by key,
    /// 5. drop the staging table.
    ///
    /// The target is created key-only if absent. New dates landing in an
    /// already populated target are logged as a warning. Re-running with
    /// overlapping data never duplicates a date. Nothing is committed here.
    pub fn write_columns(
        &mut self,
        table: &str,
        frame: &Frame,
    ) -> Result<ColumnMergeStats, StoreError> {
        validate::table_name(table)?;
        for name in frame.column_names() {
            validate::column_name(name)?;
            // the key column is never a value column
            if name.eq_ignore_ascii_case(KEY_COLUMN) {
                return Err(StoreError::InvalidIdentifier(name.to_string()));
            }
        }
        let mut stats = ColumnMergeStats::default();
        if frame.is_empty() {
            return Ok(stats);
        }

        let conn = self.store.writer()?;
        create_table(conn, table, &[])?;
        let populated = stored_range(conn, table)?.is_some();

        create_table(conn, STAGING_TABLE, &[])?;
        conn.execute(&format!("DELETE FROM {}", quoted(STAGING_TABLE)), [])?;
        {
            let mut stage = conn.prepare(&format!(
                "INSERT OR IGNORE INTO {} (Date) VALUES (?1)",
                quoted(STAGING_TABLE)
            ))?;
            for date in frame.dates() {
                stage.execute(params![date])?;
            }
        }

        stats.new_keys = conn.execute(
            &format!(
                "INSERT INTO {target} (Date) SELECT Date FROM {staging} \
                 WHERE Date NOT IN (SELECT Date FROM {target})",
                target = quoted(table),
                staging = quoted(STAGING_TABLE)
            ),
            [],
        )?;
        if populated && stats.new_keys > 0 {
            warn!(
                table,
                new_keys = stats.new_keys,
                "column merge inserted dates absent from the target table"
            );
        }

        for name in frame.column_names() {
            if add_column(conn, table, name, "REAL")? {
                stats.new_columns.push(name.to_string());
            }
        }

        let assignments: Vec<String> = frame
            .column_names()
            .enumerate()
            .map(|(i, name)| format!("{} = ?{}", quoted(name), i + 1))
            .collect();
        if !assignments.is_empty() {
            let key_param = assignments.len() + 1;
            let mut update = conn.prepare(&format!(
                "UPDATE {} SET {} WHERE Date = ?{key_param}",
                quoted(table),
                assignments.join(", ")
            ))?;
            for (row, date) in frame.dates().iter().enumerate() {
                let mut values: Vec<Value> = frame
                    .columns()
                    .iter()
                    .map(|c| c.values[row].map_or(Value::Null, Value::Real))
                    .collect();
                values.push(Value::Text(date.format("%Y-%m-%d").to_string()));
                stats.rows_updated += update.execute(params_from_iter(values))?;
            }
        }

        conn.execute(&format!("DROP TABLE {}", quoted(STAGING_TABLE)), [])?;
        debug!(
            table,
            rows = stats.rows_updated,
            columns = ?stats.new_columns,
            "merged columns"
        );
        Ok(stats)
    }

    fn require_table(&self, conn: &Connection, table: &str) -> Result<(), StoreError> {
        if table_exists(conn, table)? {
            Ok(())
        } else {
            Err(StoreError::TableNotFound {
                table: table.to_string(),
                path: self.store.path().to_path_buf(),
            })
        }
    }
}

impl Deref for ExchangeStore {
    type Target = ConnectionStore;

    fn deref(&self) -> &ConnectionStore {
        &self.store
    }
}

impl DerefMut for ExchangeStore {
    fn deref_mut(&mut self) -> &mut ConnectionStore {
        &mut self.store
    }
}

impl ScopedStore for ExchangeStore {
    fn connection_store(&mut self) -> &mut ConnectionStore {
        &mut self.store
    }
}

// ── SQL helpers (identifiers already validated) ─────────────────────

fn finite(v: f64) -> Option<f64> {
    Some(v).filter(|v| v.is_finite())
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn create_table(
    conn: &Connection,
    table: &str,
    columns: &[(&str, &str)],
) -> Result<bool, StoreError> {
    if table_exists(conn, table)? {
        return Ok(false);
    }
    let mut defs = vec!["Date TEXT PRIMARY KEY".to_string()];
    defs.extend(
        columns
            .iter()
            .map(|(name, ty)| format!("{} {ty}", quoted(name))),
    );
    conn.execute(
        &format!("CREATE TABLE {} ({})", quoted(table), defs.join(", ")),
        [],
    )?;
    debug!(table, "created table");
    Ok(true)
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quoted(table)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn add_column(
    conn: &Connection,
    table: &str,
    column: &str,
    sql_type: &str,
) -> Result<bool, StoreError> {
    if table_columns(conn, table)?
        .iter()
        .any(|c| c.eq_ignore_ascii_case(column))
    {
        return Ok(false);
    }
    conn.execute(
        &format!(
            "ALTER TABLE {} ADD COLUMN {} {sql_type} DEFAULT NULL",
            quoted(table),
            quoted(column)
        ),
        [],
    )?;
    debug!(table, column, "added column");
    Ok(true)
}

fn stored_range(
    conn: &Connection,
    table: &str,
) -> Result<Option<(NaiveDate, NaiveDate)>, StoreError> {
    let (first, last): (Option<NaiveDate>, Option<NaiveDate>) = conn.query_row(
        &format!("SELECT min(Date), max(Date) FROM {}", quoted(table)),
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(first.zip(last))
}

/// Run a `SELECT Date, ...` query into a frame. Every non-key column is read
/// as a nullable real.
fn query_frame<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Frame, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .skip(1)
        .map(String::from)
        .collect();
    let mut dates = Vec::new();
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); names.len()];
    let mut rows = stmt.query(params)?;
    while let Some(row) = rows.next()? {
        dates.push(row.get::<_, NaiveDate>(0)?);
        for (i, column) in values.iter_mut().enumerate() {
            column.push(row.get::<_, Option<f64>>(i + 1)?);
        }
    }
    let mut frame = Frame::new(dates);
    for (name, column) in names.into_iter().zip(values) {
        frame.push_column(name, column);
    }
    Ok(frame)
}

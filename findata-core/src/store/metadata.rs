//! Metadata store: exchange registry, company lists and sync watermarks.
//!
//! Layout of the metadata file:
//! - `exchange_list(Name TEXT PRIMARY KEY, Suffix TEXT, last_update TEXT)`
//! - one company table per exchange, named by the lower-case exchange code:
//!   `(symbol TEXT PRIMARY KEY, company TEXT, industry TEXT, list_date TEXT)`
//!
//! Exchange codes are normalized to lower case everywhere.

use super::connection::{ConnectionStore, ScopedStore};
use super::error::StoreError;
use super::exchange::table_exists;
use super::validate::{self, quoted};
use crate::domain::{Company, ExchangeRecord};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS exchange_list (
    Name TEXT PRIMARY KEY,
    Suffix TEXT,
    last_update TEXT
);
"#;

/// Store for the exchange registry and company lists.
#[derive(Debug)]
pub struct MetadataStore {
    store: ConnectionStore,
}

impl MetadataStore {
    /// Open (creating if needed) the metadata file at `path`.
    pub fn open_at(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let mut store = Self::closed(path);
        store.open()?;
        Ok(store)
    }

    /// A closed store for `path`; open it with `open()` or `scoped()`.
    pub fn closed(path: impl Into<PathBuf>) -> Self {
        Self {
            store: ConnectionStore::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Open the connection and make sure the registry table exists.
    pub fn open(&mut self) -> Result<(), StoreError> {
        if self.store.is_open() {
            return Ok(());
        }
        self.store.open()?;
        self.store.connection()?.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Registry ────────────────────────────────────────────────────

    /// All registered exchange codes, in registration order.
    pub fn exchange_list(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.store.connection()?;
        let mut stmt = conn.prepare("SELECT Name FROM exchange_list ORDER BY rowid")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Registry record for one exchange, or `None` if it is not registered.
    pub fn exchange_metadata(&self, exchange: &str) -> Result<Option<ExchangeRecord>, StoreError> {
        validate::exchange(exchange)?;
        let conn = self.store.connection()?;
        let record = conn
            .query_row(
                "SELECT Name, Suffix, last_update FROM exchange_list WHERE Name = ?1",
                params![exchange.to_lowercase()],
                read_record,
            )
            .optional()?;
        Ok(record)
    }

    /// The full registry.
    pub fn all_exchange_metadata(&self) -> Result<Vec<ExchangeRecord>, StoreError> {
        let conn = self.store.connection()?;
        let mut stmt =
            conn.prepare("SELECT Name, Suffix, last_update FROM exchange_list ORDER BY rowid")?;
        let records = stmt
            .query_map([], read_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Set the last-sync watermark. `None` resets it to "never synced".
    pub fn set_last_sync(
        &mut self,
        exchange: &str,
        date: Option<NaiveDate>,
    ) -> Result<(), StoreError> {
        validate::exchange(exchange)?;
        let conn = self.store.writer()?;
        conn.execute(
            "UPDATE exchange_list SET last_update = ?1 WHERE Name = ?2",
            params![date, exchange.to_lowercase()],
        )?;
        debug!(exchange, ?date, "set last sync");
        Ok(())
    }

    /// Reset the watermark so the next pass starts from the epoch.
    pub fn clear_last_sync(&mut self, exchange: &str) -> Result<(), StoreError> {
        self.set_last_sync(exchange, None)
    }

    /// Register an exchange (or update its suffix) and create its company table.
    pub fn register_exchange(
        &mut self,
        exchange: &str,
        suffix: Option<&str>,
    ) -> Result<(), StoreError> {
        validate::exchange(exchange)?;
        let code = exchange.to_lowercase();
        let conn = self.store.writer()?;
        conn.execute(
            "INSERT INTO exchange_list (Name, Suffix) VALUES (?1, ?2) \
             ON CONFLICT(Name) DO UPDATE SET Suffix = excluded.Suffix",
            params![code, suffix],
        )?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (symbol TEXT PRIMARY KEY, company TEXT, \
                 industry TEXT, list_date TEXT)",
                quoted(&code)
            ),
            [],
        )?;
        info!(exchange = %code, ?suffix, "registered exchange");
        Ok(())
    }

    // ── Companies ───────────────────────────────────────────────────

    /// The company list of `exchange`.
    pub fn company_list(&self, exchange: &str) -> Result<Vec<Company>, StoreError> {
        validate::exchange(exchange)?;
        let table = exchange.to_lowercase();
        let conn = self.store.connection()?;
        if !table_exists(conn, &table)? {
            return Err(StoreError::TableNotFound {
                table,
                path: self.store.path().to_path_buf(),
            });
        }
        let mut stmt = conn.prepare(&format!(
            "SELECT symbol, company, industry, list_date FROM {} ORDER BY rowid",
            quoted(&table)
        ))?;
        let companies = stmt
            .query_map([], |row| {
                Ok(Company {
                    symbol: row.get(0)?,
                    company: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    industry: row.get(2)?,
                    list_date: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(companies)
    }

    /// Symbols listed on `exchange`, in list order.
    pub fn symbols(&self, exchange: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .company_list(exchange)?
            .into_iter()
            .map(|c| c.symbol)
            .collect())
    }

    /// Insert or replace companies of a registered exchange.
    ///
    /// Returns the number of rows written.
    pub fn import_companies(
        &mut self,
        exchange: &str,
        companies: &[Company],
    ) -> Result<usize, StoreError> {
        validate::exchange(exchange)?;
        let table = exchange.to_lowercase();
        let path = self.store.path().to_path_buf();
        let conn = self.store.writer()?;
        if !table_exists(conn, &table)? {
            return Err(StoreError::TableNotFound { table, path });
        }
        let mut stmt = conn.prepare(&format!(
            "INSERT OR REPLACE INTO {} (symbol, company, industry, list_date) \
             VALUES (?1, ?2, ?3, ?4)",
            quoted(&table)
        ))?;
        let mut written = 0;
        for c in companies {
            written += stmt.execute(params![c.symbol, c.company, c.industry, c.list_date])?;
        }
        info!(exchange = %table, written, "imported companies");
        Ok(written)
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<ExchangeRecord> {
    Ok(ExchangeRecord {
        code: row.get(0)?,
        suffix: row.get(1)?,
        last_sync: row.get(2)?,
    })
}

impl Deref for MetadataStore {
    type Target = ConnectionStore;

    fn deref(&self) -> &ConnectionStore {
        &self.store
    }
}

impl DerefMut for MetadataStore {
    fn deref_mut(&mut self) -> &mut ConnectionStore {
        &mut self.store
    }
}

impl ScopedStore for MetadataStore {
    fn connection_store(&mut self) -> &mut ConnectionStore {
        &mut self.store
    }

    fn open_store(&mut self) -> Result<(), StoreError> {
        self.open()
    }
}

//! Connection-scoped store: one exclusive SQLite connection per storage file.
//!
//! Writes run inside an implicit transaction that is opened lazily before the
//! first mutation and ended only by an explicit [`ConnectionStore::commit`],
//! so callers decide how many symbol writes share one transaction.

use super::error::StoreError;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Owns at most one open connection to a single database file.
#[derive(Debug)]
pub struct ConnectionStore {
    path: PathBuf,
    conn: Option<Connection>,
}

impl ConnectionStore {
    /// Create a closed store for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: None,
        }
    }

    /// Create a store and open it immediately.
    pub fn open_at(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let mut store = Self::new(path);
        store.open()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the connection. Does nothing if one is already open.
    pub fn open(&mut self) -> Result<(), StoreError> {
        if self.is_open() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let conn = Connection::open(&self.path)?;
        debug!(path = %self.path.display(), "opened store");
        self.conn = Some(conn);
        Ok(())
    }

    /// Close the connection if one is open.
    ///
    /// With `commit`, pending writes are committed first; otherwise they are
    /// discarded. With `close`, the connection is released explicitly and a
    /// failure to release is reported; without it the handle is simply dropped.
    ///
    /// The store is closed on return even when the commit fails; the pending
    /// writes are then rolled back and the commit error is returned.
    pub fn close(&mut self, commit: bool, close: bool) -> Result<(), StoreError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        let committed = if commit && !conn.is_autocommit() {
            conn.execute_batch("COMMIT")
        } else {
            Ok(())
        };
        if committed.is_err() && !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(path = %self.path.display(), error = %e, "rollback after failed commit failed");
            }
        }
        let released = if close {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
        } else {
            drop(conn);
            Ok(())
        };
        debug!(path = %self.path.display(), "closed store");
        committed?;
        released
    }

    /// Commit pending writes.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        let conn = self.connection()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    /// Discard pending writes.
    pub fn rollback(&mut self) -> Result<(), StoreError> {
        let conn = self.connection()?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// The open connection, for reads.
    pub(crate) fn connection(&self) -> Result<&Connection, StoreError> {
        self.conn.as_ref().ok_or_else(|| StoreError::NotOpen {
            path: self.path.clone(),
        })
    }

    /// The open connection with a write transaction in progress.
    pub(crate) fn writer(&mut self) -> Result<&Connection, StoreError> {
        let conn = self.connection()?;
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        Ok(conn)
    }
}

/// Scoped acquisition for anything built on a [`ConnectionStore`].
///
/// `scoped` opens the store, runs `body`, and closes the store on the way out.
/// A successful body has its pending writes committed; a failing body has them
/// rolled back and its error returned unchanged.
pub trait ScopedStore: Sized {
    fn connection_store(&mut self) -> &mut ConnectionStore;

    /// Open hook run on entry; stores with schema setup override it.
    fn open_store(&mut self) -> Result<(), StoreError> {
        self.connection_store().open()
    }

    fn scoped<T, E, F>(&mut self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.open_store()?;
        let result = body(self);
        let store = self.connection_store();
        match result {
            Ok(value) => {
                store.close(true, true)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = store.rollback() {
                    warn!(path = %store.path().display(), error = %rollback, "rollback failed");
                }
                if let Err(close) = store.close(false, true) {
                    warn!(path = %store.path().display(), error = %close, "close failed");
                }
                Err(e)
            }
        }
    }
}

impl ScopedStore for ConnectionStore {
    fn connection_store(&mut self) -> &mut ConnectionStore {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_rows(store: &ConnectionStore) -> i64 {
        store
            .connection()
            .unwrap()
            .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn open_is_idempotent_and_close_clears_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConnectionStore::new(dir.path().join("nested/a.db"));
        assert!(!store.is_open());
        store.open().unwrap();
        store.open().unwrap();
        assert!(store.is_open());
        store.close(true, true).unwrap();
        assert!(!store.is_open());
        // closing twice is harmless
        store.close(true, true).unwrap();
    }

    #[test]
    fn commit_on_closed_store_is_not_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConnectionStore::new(dir.path().join("a.db"));
        assert!(matches!(store.commit(), Err(StoreError::NotOpen { .. })));
    }

    #[test]
    fn uncommitted_writes_are_discarded_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.db");
        let mut store = ConnectionStore::open_at(&path).unwrap();
        store
            .writer()
            .unwrap()
            .execute_batch("CREATE TABLE t (x INTEGER)")
            .unwrap();
        store.commit().unwrap();
        store
            .writer()
            .unwrap()
            .execute("INSERT INTO t VALUES (1)", [])
            .unwrap();
        store.close(false, true).unwrap();

        let store = ConnectionStore::open_at(&path).unwrap();
        assert_eq!(count_rows(&store), 0);
    }

    #[test]
    fn scoped_commits_on_success_and_rolls_back_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.db");
        let mut store = ConnectionStore::new(&path);

        store
            .scoped(|s| -> Result<(), StoreError> {
                s.writer()?
                    .execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")?;
                Ok(())
            })
            .unwrap();
        assert!(!store.is_open());

        let failed: Result<(), StoreError> = store.scoped(|s| {
            s.writer()?.execute("INSERT INTO t VALUES (2)", [])?;
            Err(StoreError::InvalidSymbol("boom".into()))
        });
        assert!(failed.is_err());
        assert!(!store.is_open());

        store.open().unwrap();
        assert_eq!(count_rows(&store), 1);
    }

    #[test]
    fn failed_commit_closes_and_discards_pending_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.db");
        let mut store = ConnectionStore::new(&path);

        // a deferred foreign key only fails at COMMIT
        let result: Result<(), StoreError> = store.scoped(|s| {
            s.connection()?.execute_batch("PRAGMA foreign_keys = ON")?;
            s.writer()?.execute_batch(
                "CREATE TABLE parent (id INTEGER PRIMARY KEY);
                 CREATE TABLE child (pid INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED);
                 INSERT INTO child VALUES (7);",
            )?;
            Ok(())
        });
        assert!(matches!(result, Err(StoreError::Sqlite(_))));
        assert!(!store.is_open());

        store.open().unwrap();
        let tables: i64 = store
            .connection()
            .unwrap()
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'child'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
        store.close(true, true).unwrap();
    }
}

//! Flyweight registry of processor instances with write-back persistence.
//!
//! Lifecycle:
//! 1. `processor(p)` returns the single [`ProcessorCache`] for `p`'s key,
//!    creating it on first use.
//! 2. `entry`/`get` resolve `(exchange, symbol)`: memory, then the backing
//!    store `{derived_dir}/{Kind}.db` table `{exchange}/{symbol}` if it holds
//!    every output column, then a fresh compute over the base series.
//! 3. `close()` flushes every entry of every instance through the column
//!    merge and closes the backing stores. It runs at most once; dropping an
//!    unclosed cache runs it too.
//!
//! Backing stores are opened only when an entry is resolved or flushed, so a
//! cache that never served a request never touches disk.

use super::processor::{DerivedError, Processor, ProcessorKey};
use crate::config::FindataConfig;
use crate::data::{DataContext, SeriesByExchange, SymbolsByExchange};
use crate::store::{validate, ExchangeStore, Frame};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One live processor instance and its memoized results.
pub struct ProcessorCache {
    key: ProcessorKey,
    processor: Box<dyn Processor>,
    entries: Mutex<BTreeMap<String, Arc<Frame>>>,
}

impl ProcessorCache {
    pub fn key(&self) -> &ProcessorKey {
        &self.key
    }

    pub fn processor(&self) -> &dyn Processor {
        self.processor.as_ref()
    }

    /// Tables (`exchange/symbol`) currently held in memory.
    pub fn cached_tables(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

impl std::fmt::Debug for ProcessorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorCache")
            .field("key", &self.key)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

/// What a flush wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub processors: usize,
    pub tables: usize,
    pub rows: usize,
}

/// Registry context owning every processor instance and backing store.
pub struct DerivedCache {
    derived_dir: PathBuf,
    data: Arc<DataContext>,
    registry: Mutex<HashMap<ProcessorKey, Arc<ProcessorCache>>>,
    stores: Mutex<HashMap<&'static str, ExchangeStore>>,
    closed: AtomicBool,
}

impl DerivedCache {
    pub fn new(derived_dir: impl Into<PathBuf>, data: Arc<DataContext>) -> Self {
        Self {
            derived_dir: derived_dir.into(),
            data,
            registry: Mutex::new(HashMap::new()),
            stores: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &FindataConfig, data: Arc<DataContext>) -> Self {
        Self::new(&config.derived_dir, data)
    }

    /// Run `body` with a fresh cache and close it on every exit path.
    ///
    /// A flush failure after a successful body is returned; after a failing
    /// body it is logged and the body's error is returned.
    pub fn scoped<T, E, F>(
        derived_dir: impl Into<PathBuf>,
        data: Arc<DataContext>,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&DerivedCache) -> Result<T, E>,
        E: From<DerivedError>,
    {
        let cache = Self::new(derived_dir, data);
        match body(&cache) {
            Ok(value) => {
                cache.close()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(flush) = cache.close() {
                    error!(error = %flush, "derived cache flush failed");
                }
                Err(e)
            }
        }
    }

    pub fn derived_dir(&self) -> &Path {
        &self.derived_dir
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The single live instance for `processor`'s key.
    pub fn processor<P: Processor>(&self, processor: P) -> Arc<ProcessorCache> {
        let key = processor.key();
        let mut registry = self.registry.lock();
        let handle = registry.entry(key.clone()).or_insert_with(|| {
            debug!(processor = %key, "registered processor");
            Arc::new(ProcessorCache {
                key,
                processor: Box::new(processor),
                entries: Mutex::new(BTreeMap::new()),
            })
        });
        Arc::clone(handle)
    }

    /// Number of live processor instances.
    pub fn instances(&self) -> usize {
        self.registry.lock().len()
    }

    /// The full derived series for `(exchange, symbol)`, memoized.
    pub fn entry(
        &self,
        handle: &ProcessorCache,
        exchange: &str,
        symbol: &str,
    ) -> Result<Arc<Frame>, DerivedError> {
        if self.is_closed() {
            return Err(DerivedError::Closed);
        }
        validate::exchange(exchange)?;
        validate::symbol(symbol)?;
        let table = format!("{}/{symbol}", exchange.to_lowercase());
        if let Some(frame) = handle.entries.lock().get(&table) {
            return Ok(Arc::clone(frame));
        }

        let frame = match self.load(handle, &table)? {
            Some(frame) => {
                debug!(processor = %handle.key, table = %table, "loaded persisted result");
                frame
            }
            None => {
                let base = self.data.full_series(exchange, symbol)?;
                debug!(processor = %handle.key, table = %table, rows = base.len(), "computing");
                handle.processor.compute(&base)?
            }
        };
        let mut entries = handle.entries.lock();
        Ok(Arc::clone(entries.entry(table).or_insert(Arc::new(frame))))
    }

    /// Derived series bounded by inclusive `yyyy-mm-dd` dates.
    pub fn get(
        &self,
        handle: &ProcessorCache,
        exchange: &str,
        symbol: &str,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Frame, DerivedError> {
        let start = validate::date_bound(start)?;
        let end = validate::date_bound(end)?;
        Ok(self.entry(handle, exchange, symbol)?.slice(start, end))
    }

    /// Derived series for many symbols across exchanges.
    pub fn get_multi(
        &self,
        handle: &ProcessorCache,
        symbols: &SymbolsByExchange,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<SeriesByExchange, DerivedError> {
        let mut out = SeriesByExchange::new();
        for (exchange, list) in symbols {
            let mut per_symbol = BTreeMap::new();
            for symbol in list {
                per_symbol.insert(
                    symbol.clone(),
                    self.get(handle, exchange, symbol, start, end)?,
                );
            }
            out.insert(exchange.clone(), per_symbol);
        }
        Ok(out)
    }

    /// Flush every entry to the backing stores and close them. Later calls
    /// are no-ops returning empty stats.
    pub fn close(&self) -> Result<FlushStats, DerivedError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(FlushStats::default());
        }
        let result = self.flush();
        let commit = result.is_ok();
        for (kind, mut store) in self.stores.lock().drain() {
            if let Err(e) = store.close(commit, true) {
                warn!(kind, error = %e, "failed to close derived store");
            }
        }
        if let Ok(stats) = &result {
            info!(
                processors = stats.processors,
                tables = stats.tables,
                rows = stats.rows,
                "derived cache flushed"
            );
        }
        result
    }

    fn flush(&self) -> Result<FlushStats, DerivedError> {
        let mut handles: Vec<Arc<ProcessorCache>> =
            self.registry.lock().values().cloned().collect();
        handles.sort_by(|a, b| a.key.cmp(&b.key));

        let mut stats = FlushStats::default();
        for handle in handles {
            let entries: Vec<(String, Arc<Frame>)> = handle
                .entries
                .lock()
                .iter()
                .map(|(table, frame)| (table.clone(), Arc::clone(frame)))
                .collect();
            if entries.is_empty() {
                continue;
            }
            stats.processors += 1;
            let kind = handle.key.kind();
            self.with_store(kind, |store| {
                for (table, frame) in &entries {
                    store.ensure_table(table, &[])?;
                    let merged = store.write_columns(table, frame)?;
                    stats.tables += 1;
                    stats.rows += merged.rows_updated;
                }
                store.commit()?;
                Ok(())
            })?;
            debug!(processor = %handle.key, tables = entries.len(), "flushed processor");
        }
        Ok(stats)
    }

    /// Load a persisted result if the table holds every output column.
    fn load(&self, handle: &ProcessorCache, table: &str) -> Result<Option<Frame>, DerivedError> {
        let columns = handle.processor.columns();
        self.with_store(handle.key.kind(), |store| {
            if !store.has_table(table)? {
                return Ok(None);
            }
            let present = store.columns(table)?;
            if !columns.iter().all(|c| present.contains(c)) {
                return Ok(None);
            }
            let names: Vec<&str> = columns.iter().map(String::as_str).collect();
            Ok(Some(store.read_columns(table, &names)?))
        })
    }

    fn with_store<T>(
        &self,
        kind: &'static str,
        f: impl FnOnce(&mut ExchangeStore) -> Result<T, DerivedError>,
    ) -> Result<T, DerivedError> {
        let mut stores = self.stores.lock();
        if !stores.contains_key(kind) {
            let path = self.derived_dir.join(format!("{kind}.db"));
            debug!(kind, path = %path.display(), "opening derived store");
            stores.insert(kind, ExchangeStore::open_at(&path)?);
        }
        match stores.get_mut(kind) {
            Some(store) => f(store),
            None => Err(DerivedError::Closed),
        }
    }
}

impl Drop for DerivedCache {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.close() {
            error!(error = %e, "derived cache flush on drop failed");
        }
    }
}

impl std::fmt::Debug for DerivedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedCache")
            .field("derived_dir", &self.derived_dir)
            .field("instances", &self.registry.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

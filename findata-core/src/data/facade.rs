//! Read facade over the stores for presentation code and the derived cache.
//!
//! A `DataContext` owns one lazily opened [`ExchangeStore`] per exchange and
//! one [`MetadataStore`], never shared with the update pipeline. Full symbol
//! series, company lists and the exchange list are memoized for the life of
//! the context; range reads slice the memoized series.

use crate::config::FindataConfig;
use crate::domain::Company;
use crate::store::{validate, ExchangeStore, Frame, MetadataStore, StoreError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Exchange code → symbols.
pub type SymbolsByExchange = BTreeMap<String, Vec<String>>;

/// Exchange code → symbol → series.
pub type SeriesByExchange = BTreeMap<String, BTreeMap<String, Frame>>;

pub struct DataContext {
    data_dir: PathBuf,
    metadata_path: PathBuf,
    metadata: Mutex<Option<MetadataStore>>,
    exchanges: Mutex<HashMap<String, ExchangeStore>>,
    series: Mutex<HashMap<String, Arc<Frame>>>,
    companies: Mutex<HashMap<String, Arc<Vec<Company>>>>,
    exchange_list: Mutex<Option<Arc<Vec<String>>>>,
}

impl DataContext {
    pub fn new(data_dir: impl Into<PathBuf>, metadata_path: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            metadata_path: metadata_path.into(),
            metadata: Mutex::new(None),
            exchanges: Mutex::new(HashMap::new()),
            series: Mutex::new(HashMap::new()),
            companies: Mutex::new(HashMap::new()),
            exchange_list: Mutex::new(None),
        }
    }

    pub fn from_config(config: &FindataConfig) -> Self {
        Self::new(&config.data_dir, &config.metadata_db)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Series of `symbol` on `exchange`, bounded by inclusive `yyyy-mm-dd`
    /// dates.
    pub fn get_series(
        &self,
        exchange: &str,
        symbol: &str,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Frame, StoreError> {
        let start = validate::date_bound(start)?;
        let end = validate::date_bound(end)?;
        Ok(self.full_series(exchange, symbol)?.slice(start, end))
    }

    /// The whole memoized series of `symbol`.
    pub fn full_series(&self, exchange: &str, symbol: &str) -> Result<Arc<Frame>, StoreError> {
        validate::exchange(exchange)?;
        validate::symbol(symbol)?;
        let code = exchange.to_lowercase();
        let key = format!("{code}/{symbol}");
        if let Some(frame) = self.series.lock().get(&key) {
            return Ok(Arc::clone(frame));
        }

        let frame = {
            let mut stores = self.exchanges.lock();
            if !stores.contains_key(&code) {
                let path = self.data_dir.join(format!("{code}.db"));
                // never create files for exchanges that were never synced
                if !path.exists() {
                    return Err(StoreError::TableNotFound {
                        table: symbol.to_string(),
                        path,
                    });
                }
                debug!(exchange = %code, "opening exchange store");
                stores.insert(code.clone(), ExchangeStore::open_at(&path)?);
            }
            Arc::new(stores[&code].read_series(symbol, None, None)?)
        };

        Ok(Arc::clone(self.series.lock().entry(key).or_insert(frame)))
    }

    /// Series for many symbols across exchanges.
    pub fn get_series_multi(
        &self,
        symbols: &SymbolsByExchange,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<SeriesByExchange, StoreError> {
        let mut out = SeriesByExchange::new();
        for (exchange, list) in symbols {
            let mut per_symbol = BTreeMap::new();
            for symbol in list {
                per_symbol.insert(
                    symbol.clone(),
                    self.get_series(exchange, symbol, start, end)?,
                );
            }
            out.insert(exchange.clone(), per_symbol);
        }
        Ok(out)
    }

    pub fn get_company_list(&self, exchange: &str) -> Result<Arc<Vec<Company>>, StoreError> {
        validate::exchange(exchange)?;
        let code = exchange.to_lowercase();
        if let Some(list) = self.companies.lock().get(&code) {
            return Ok(Arc::clone(list));
        }
        let list = Arc::new(self.with_metadata(|meta| meta.company_list(&code))?);
        Ok(Arc::clone(
            self.companies.lock().entry(code).or_insert(list),
        ))
    }

    pub fn get_exchange_list(&self) -> Result<Arc<Vec<String>>, StoreError> {
        if let Some(list) = self.exchange_list.lock().as_ref() {
            return Ok(Arc::clone(list));
        }
        let list = Arc::new(self.with_metadata(MetadataStore::exchange_list)?);
        Ok(Arc::clone(
            self.exchange_list.lock().get_or_insert(list),
        ))
    }

    /// Close every store this context opened. Reads after `close` reopen
    /// stores on demand.
    pub fn close(&self) -> Result<(), StoreError> {
        for (code, mut store) in self.exchanges.lock().drain() {
            debug!(exchange = %code, "closing exchange store");
            store.close(false, true)?;
        }
        if let Some(mut meta) = self.metadata.lock().take() {
            meta.close(false, true)?;
        }
        Ok(())
    }

    fn with_metadata<T>(
        &self,
        f: impl FnOnce(&MetadataStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut slot = self.metadata.lock();
        if slot.is_none() {
            *slot = Some(MetadataStore::open_at(&self.metadata_path)?);
        }
        match slot.as_ref() {
            Some(meta) => f(meta),
            None => Err(StoreError::NotOpen {
                path: self.metadata_path.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for DataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataContext")
            .field("data_dir", &self.data_dir)
            .field("metadata_path", &self.metadata_path)
            .finish_non_exhaustive()
    }
}

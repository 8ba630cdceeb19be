//! Shared fixtures: a scripted quote provider and seeded registries.

#![allow(dead_code)]

use chrono::NaiveDate;
use findata_core::data::{FetchError, QuoteProvider};
use findata_core::domain::{Company, DailyBar};
use findata_core::store::MetadataStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn bar(date: NaiveDate, close: f64, volume: u64) -> DailyBar {
    DailyBar {
        date,
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        adj_close: close,
        volume,
    }
}

/// One bar per calendar day in `[start, end]`, closes counting up from 1.
pub fn daily_bars(start: NaiveDate, end: NaiveDate) -> Vec<DailyBar> {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .enumerate()
        .map(|(i, day)| bar(day, (i + 1) as f64, 1000 + i as u64 * 10))
        .collect()
}

/// Provider answering from an in-memory table, keyed by quoted symbol.
///
/// `failing` makes a symbol fail that many attempts before it answers.
#[derive(Default)]
pub struct ScriptedProvider {
    series: HashMap<String, Vec<DailyBar>>,
    failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, quoted: &str, bars: Vec<DailyBar>) -> Self {
        self.series.insert(quoted.to_string(), bars);
        self
    }

    pub fn failing(self, quoted: &str, attempts: u32) -> Self {
        self.failures.lock().insert(quoted.to_string(), attempts);
        self
    }

    pub fn calls(&self, quoted: &str) -> usize {
        self.calls.lock().get(quoted).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

impl QuoteProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>, FetchError> {
        *self.calls.lock().entry(symbol.to_string()).or_default() += 1;
        if let Some(left) = self.failures.lock().get_mut(symbol) {
            if *left > 0 {
                *left -= 1;
                return Err(FetchError::RateLimited);
            }
        }
        let bars = self
            .series
            .get(symbol)
            .ok_or_else(|| FetchError::SymbolNotFound {
                symbol: symbol.to_string(),
            })?;
        Ok(bars
            .iter()
            .filter(|b| b.date >= start && b.date <= end)
            .cloned()
            .collect())
    }
}

pub fn company(symbol: &str) -> Company {
    Company {
        symbol: symbol.to_string(),
        company: format!("{symbol} Inc"),
        industry: None,
        list_date: None,
    }
}

/// Layout of a scratch data root.
pub struct Workspace {
    pub dir: tempfile::TempDir,
    pub data_dir: PathBuf,
    pub metadata_path: PathBuf,
    pub derived_dir: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("findata");
        let metadata_path = data_dir.join("metadata.db");
        let derived_dir = dir.path().join("comdata");
        Self {
            dir,
            data_dir,
            metadata_path,
            derived_dir,
        }
    }

    /// Register `exchange` with its companies and return the open registry.
    pub fn register(&self, exchange: &str, suffix: Option<&str>, symbols: &[&str]) -> MetadataStore {
        let mut meta = MetadataStore::open_at(&self.metadata_path).unwrap();
        meta.register_exchange(exchange, suffix).unwrap();
        let companies: Vec<Company> = symbols.iter().map(|s| company(s)).collect();
        meta.import_companies(exchange, &companies).unwrap();
        meta.commit().unwrap();
        meta
    }

    pub fn exchange_db(&self, exchange: &str) -> PathBuf {
        self.data_dir.join(format!("{exchange}.db"))
    }
}

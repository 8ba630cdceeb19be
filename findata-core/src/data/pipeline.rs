//! Update pipeline: one incremental sync pass per exchange.
//!
//! A pass moves through `Idle → WindowComputed → Fetching → Draining →
//! Committed`. It ends early in `UpToDate` when the window is empty and in
//! `Aborted` when the exchange is not registered.
//!
//! Fetches run on a private rayon pool; every successful result is sent over
//! one mpsc channel to a single writer thread, the only code that touches the
//! exchange store during the pass. With fewer than two threads the pass runs
//! fetch-then-write serially in symbol order.
//!
//! The watermark advances to `today` once the writer has drained, including
//! when some symbols were skipped after exhausting their attempts.

use super::provider::QuoteProvider;
use crate::config::SyncConfig;
use crate::domain::{DailyBar, ExchangeRecord};
use crate::store::{validate, ExchangeStore, MetadataStore, ScopedStore, StoreError};
use chrono::{Local, NaiveDate};
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("exchange not found in registry: '{0}'")]
    ExchangeNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to build fetch pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("writer thread panicked while syncing '{0}'")]
    WriterPanicked(String),
}

/// Where a pass ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Idle,
    WindowComputed,
    Fetching,
    Draining,
    Committed,
    /// The window was empty; nothing fetched, watermark untouched.
    UpToDate,
    Aborted,
}

/// Per-pass knobs. Build from [`SyncConfig`] and override as needed.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub threads: usize,
    pub attempts: u32,
    /// Window start for never-synced exchanges.
    pub epoch_start: NaiveDate,
    /// Overrides the stored watermark as window start.
    pub start: Option<NaiveDate>,
    /// Window end and new watermark; the local date when `None`.
    pub today: Option<NaiveDate>,
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            threads: config.threads,
            attempts: config.attempts,
            epoch_start: config.epoch_start,
            start: None,
            today: None,
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_start(mut self, start: Option<NaiveDate>) -> Self {
        self.start = start;
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub exchange: String,
    pub state: SyncState,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub symbols: usize,
    /// Symbols whose fetch succeeded and whose rows reached the writer.
    pub written: usize,
    pub rows_inserted: usize,
    /// Symbols skipped after exhausting the attempt budget, in list order.
    pub skipped: Vec<String>,
}

enum WriterMessage {
    Bars { symbol: String, bars: Vec<DailyBar> },
    Done,
}

#[derive(Debug, Default)]
struct WriterTally {
    symbols: usize,
    rows: usize,
}

/// Run one sync pass for `exchange`.
///
/// `metadata` is opened if needed and left open; the watermark update is
/// committed before returning. Symbol writes go to
/// `{data_dir}/{exchange}.db` and are committed in one transaction at the end
/// of the pass, or rolled back if the pass fails.
pub fn update_exchange<P>(
    metadata: &mut MetadataStore,
    data_dir: &Path,
    exchange: &str,
    provider: &P,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError>
where
    P: QuoteProvider + ?Sized,
{
    let mut state = SyncState::Idle;
    metadata.open()?;
    let Some(record) = metadata.exchange_metadata(exchange)? else {
        advance(exchange, &mut state, SyncState::Aborted);
        error!(exchange, "exchange not found in registry, aborting pass");
        return Err(SyncError::ExchangeNotFound(exchange.to_string()));
    };

    let start = options
        .start
        .or(record.last_sync)
        .unwrap_or(options.epoch_start);
    let end = options.today.unwrap_or_else(|| Local::now().date_naive());
    let mut report = SyncReport {
        exchange: record.code.clone(),
        state,
        start,
        end,
        symbols: 0,
        written: 0,
        rows_inserted: 0,
        skipped: Vec::new(),
    };
    if start >= end {
        advance(exchange, &mut state, SyncState::UpToDate);
        info!(exchange, %start, %end, "already up to date");
        report.state = state;
        return Ok(report);
    }
    advance(exchange, &mut state, SyncState::WindowComputed);

    let symbols = metadata.symbols(exchange)?;
    report.symbols = symbols.len();
    info!(
        exchange,
        %start,
        %end,
        symbols = symbols.len(),
        threads = options.threads,
        provider = provider.name(),
        "starting sync pass"
    );

    let mut store = ExchangeStore::closed(data_dir.join(format!("{}.db", record.code)));
    let (tally, skipped) = store.scoped(|store| {
        advance(exchange, &mut state, SyncState::Fetching);
        let outcome = if options.threads < 2 {
            run_serial(store, &record, &symbols, provider, options, start, end)
        } else {
            run_concurrent(store, &record, &symbols, provider, options, start, end)
        };
        advance(exchange, &mut state, SyncState::Draining);
        outcome
    })?;

    metadata.set_last_sync(exchange, Some(end))?;
    metadata.commit()?;
    advance(exchange, &mut state, SyncState::Committed);

    report.state = state;
    report.written = tally.symbols;
    report.rows_inserted = tally.rows;
    report.skipped = skipped;
    if !report.skipped.is_empty() {
        warn!(
            exchange,
            skipped = report.skipped.len(),
            "watermark advanced past skipped symbols; reset the exchange to retry them"
        );
    }
    info!(
        exchange,
        written = report.written,
        rows = report.rows_inserted,
        skipped = report.skipped.len(),
        "sync pass committed"
    );
    Ok(report)
}

/// Run passes for several exchanges in sequence. The first failing pass
/// stops the run.
pub fn update_exchanges<P>(
    metadata: &mut MetadataStore,
    data_dir: &Path,
    exchanges: &[String],
    provider: &P,
    options: &SyncOptions,
) -> Result<Vec<SyncReport>, SyncError>
where
    P: QuoteProvider + ?Sized,
{
    exchanges
        .iter()
        .map(|exchange| update_exchange(metadata, data_dir, exchange, provider, options))
        .collect()
}

fn advance(exchange: &str, state: &mut SyncState, next: SyncState) {
    debug!(exchange, from = ?*state, to = ?next, "sync state");
    *state = next;
}

fn run_serial<P>(
    store: &mut ExchangeStore,
    record: &ExchangeRecord,
    symbols: &[String],
    provider: &P,
    options: &SyncOptions,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(WriterTally, Vec<String>), SyncError>
where
    P: QuoteProvider + ?Sized,
{
    let mut tally = WriterTally::default();
    let mut skipped = Vec::new();
    for symbol in symbols {
        match fetch_symbol(provider, record, symbol, options, start, end) {
            Some(bars) => {
                tally.rows += store.write_series(symbol, &bars)?;
                tally.symbols += 1;
            }
            None => skipped.push(symbol.clone()),
        }
    }
    Ok((tally, skipped))
}

fn run_concurrent<P>(
    store: &mut ExchangeStore,
    record: &ExchangeRecord,
    symbols: &[String],
    provider: &P,
    options: &SyncOptions,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(WriterTally, Vec<String>), SyncError>
where
    P: QuoteProvider + ?Sized,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads)
        .thread_name(|i| format!("findata-fetch-{i}"))
        .build()?;
    let (tx, rx) = mpsc::channel::<WriterMessage>();

    thread::scope(|scope| -> Result<_, SyncError> {
        let writer = scope.spawn(move || drain(store, rx));

        let fetch_tx = tx.clone();
        let skipped: Vec<String> = pool.install(move || {
            symbols
                .par_iter()
                .map_with(fetch_tx, |tx, symbol| {
                    match fetch_symbol(provider, record, symbol, options, start, end) {
                        Some(bars) => {
                            let message = WriterMessage::Bars {
                                symbol: symbol.clone(),
                                bars,
                            };
                            if tx.send(message).is_err() {
                                warn!(symbol = %symbol, "writer stopped, dropping fetched rows");
                            }
                            None
                        }
                        None => Some(symbol.clone()),
                    }
                })
                .flatten()
                .collect()
        });
        // All fetch tasks are done; tell the writer to finish.
        let _ = tx.send(WriterMessage::Done);
        drop(tx);

        let tally = writer
            .join()
            .map_err(|_| SyncError::WriterPanicked(record.code.clone()))??;
        Ok((tally, skipped))
    })
}

/// Writer loop: the single consumer of fetched rows.
fn drain(store: &mut ExchangeStore, rx: Receiver<WriterMessage>) -> Result<WriterTally, StoreError> {
    let mut tally = WriterTally::default();
    while let Ok(message) = rx.recv() {
        match message {
            WriterMessage::Bars { symbol, bars } => {
                debug!(symbol = %symbol, rows = bars.len(), "writing");
                tally.rows += store.write_series(&symbol, &bars)?;
                tally.symbols += 1;
            }
            WriterMessage::Done => break,
        }
    }
    debug!(symbols = tally.symbols, rows = tally.rows, "writer drained");
    Ok(tally)
}

/// Fetch one listed symbol. Symbols that cannot name a table are skipped
/// without a request.
fn fetch_symbol<P>(
    provider: &P,
    record: &ExchangeRecord,
    symbol: &str,
    options: &SyncOptions,
    start: NaiveDate,
    end: NaiveDate,
) -> Option<Vec<DailyBar>>
where
    P: QuoteProvider + ?Sized,
{
    if let Err(e) = validate::symbol(symbol) {
        warn!(symbol, error = %e, "skipping unstorable symbol");
        return None;
    }
    let quoted = record.quoted_symbol(symbol);
    let bars = fetch_with_retry(provider, &quoted, start, end, options.attempts)?;
    let insane = bars.iter().filter(|b| !b.is_sane()).count();
    if insane > 0 {
        debug!(symbol, insane, "rows with missing or inconsistent prices");
    }
    Some(bars)
}

/// Fetch with a fixed attempt budget and no backoff. `None` means the symbol
/// is skipped for this pass.
fn fetch_with_retry<P>(
    provider: &P,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    attempts: u32,
) -> Option<Vec<DailyBar>>
where
    P: QuoteProvider + ?Sized,
{
    for attempt in 1..=attempts.max(1) {
        match provider.fetch(symbol, start, end) {
            Ok(bars) => return Some(bars),
            Err(e) => warn!(symbol, attempt, error = %e, "fetch failed"),
        }
    }
    warn!(symbol, attempts, "skipping symbol after exhausting attempts");
    None
}

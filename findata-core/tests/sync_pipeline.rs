//! End-to-end sync passes against a scripted provider.

mod common;

use common::{d, daily_bars, ScriptedProvider, Workspace};
use findata_core::data::{update_exchange, update_exchanges, SyncError, SyncOptions, SyncState};
use findata_core::store::ExchangeStore;

fn options(today: chrono::NaiveDate) -> SyncOptions {
    let mut options = SyncOptions::default().with_today(today);
    options.epoch_start = d(2020, 1, 1);
    options
}

#[test]
fn first_pass_fetches_from_epoch_and_sets_watermark() {
    let ws = Workspace::new();
    let mut meta = ws.register("nyse", None, &["AAPL", "MSFT"]);
    let provider = ScriptedProvider::new()
        .with_series("AAPL", daily_bars(d(2020, 1, 1), d(2020, 1, 10)))
        .with_series("MSFT", daily_bars(d(2020, 1, 1), d(2020, 1, 10)));

    let report = update_exchange(
        &mut meta,
        &ws.data_dir,
        "nyse",
        &provider,
        &options(d(2020, 1, 10)),
    )
    .unwrap();

    assert_eq!(report.state, SyncState::Committed);
    assert_eq!(report.start, d(2020, 1, 1));
    assert_eq!(report.end, d(2020, 1, 10));
    assert_eq!(report.symbols, 2);
    assert_eq!(report.written, 2);
    assert_eq!(report.rows_inserted, 20);
    assert!(report.skipped.is_empty());

    let record = meta.exchange_metadata("nyse").unwrap().unwrap();
    assert_eq!(record.last_sync, Some(d(2020, 1, 10)));

    let store = ExchangeStore::open_at(ws.exchange_db("nyse")).unwrap();
    assert_eq!(store.read_series("AAPL", None, None).unwrap().len(), 10);
    assert_eq!(
        store.date_range("MSFT").unwrap(),
        Some((d(2020, 1, 1), d(2020, 1, 10)))
    );
}

#[test]
fn second_pass_starts_at_watermark_and_only_extends() {
    let ws = Workspace::new();
    let mut meta = ws.register("nyse", None, &["AAPL"]);
    let provider =
        ScriptedProvider::new().with_series("AAPL", daily_bars(d(2020, 1, 1), d(2020, 1, 10)));

    update_exchange(&mut meta, &ws.data_dir, "nyse", &provider, &options(d(2020, 1, 5))).unwrap();
    let second =
        update_exchange(&mut meta, &ws.data_dir, "nyse", &provider, &options(d(2020, 1, 10)))
            .unwrap();

    // the watermark day is fetched again but already stored
    assert_eq!(second.start, d(2020, 1, 5));
    assert_eq!(second.rows_inserted, 5);

    let store = ExchangeStore::open_at(ws.exchange_db("nyse")).unwrap();
    let series = store.read_series("AAPL", None, None).unwrap();
    assert_eq!(series.len(), 10);
    assert_eq!(series.dates().first(), Some(&d(2020, 1, 1)));
    assert_eq!(series.dates().last(), Some(&d(2020, 1, 10)));
}

#[test]
fn repeating_a_window_inserts_nothing() {
    let ws = Workspace::new();
    let mut meta = ws.register("nyse", None, &["AAPL"]);
    let provider =
        ScriptedProvider::new().with_series("AAPL", daily_bars(d(2020, 1, 1), d(2020, 1, 10)));
    let opts = options(d(2020, 1, 10)).with_start(Some(d(2020, 1, 1)));

    let first = update_exchange(&mut meta, &ws.data_dir, "nyse", &provider, &opts).unwrap();
    let again = update_exchange(&mut meta, &ws.data_dir, "nyse", &provider, &opts).unwrap();

    assert_eq!(first.rows_inserted, 10);
    assert_eq!(again.state, SyncState::Committed);
    assert_eq!(again.written, 1);
    assert_eq!(again.rows_inserted, 0);
}

#[test]
fn serial_and_concurrent_passes_store_the_same_series() {
    let symbols: Vec<String> = (0..24).map(|i| format!("SYM{i}")).collect();
    let refs: Vec<&str> = symbols.iter().map(String::as_str).collect();

    let run = |threads: usize| {
        let ws = Workspace::new();
        let mut meta = ws.register("nyse", None, &refs);
        let mut provider = ScriptedProvider::new();
        for (i, symbol) in symbols.iter().enumerate() {
            let first = d(2020, 1, 1 + (i % 5) as u32);
            provider = provider.with_series(symbol, daily_bars(first, d(2020, 2, 15)));
        }
        let report = update_exchange(
            &mut meta,
            &ws.data_dir,
            "nyse",
            &provider,
            &options(d(2020, 2, 15)).with_threads(threads),
        )
        .unwrap();
        let store = ExchangeStore::open_at(ws.exchange_db("nyse")).unwrap();
        let stored: Vec<_> = symbols
            .iter()
            .map(|s| store.read_series(s, None, None).unwrap())
            .collect();
        (report.rows_inserted, stored)
    };

    let (serial_rows, serial) = run(1);
    let (pooled_rows, pooled) = run(8);
    assert_eq!(serial_rows, pooled_rows);
    assert_eq!(serial, pooled);
}

#[test]
fn symbol_recovering_within_budget_is_written() {
    let ws = Workspace::new();
    let mut meta = ws.register("nyse", None, &["AAPL"]);
    let provider = ScriptedProvider::new()
        .with_series("AAPL", daily_bars(d(2020, 1, 1), d(2020, 1, 3)))
        .failing("AAPL", 4);

    let report = update_exchange(
        &mut meta,
        &ws.data_dir,
        "nyse",
        &provider,
        &options(d(2020, 1, 3)).with_threads(1),
    )
    .unwrap();

    assert_eq!(provider.calls("AAPL"), 5);
    assert_eq!(report.written, 1);
    assert_eq!(report.rows_inserted, 3);
    assert!(report.skipped.is_empty());
}

#[test]
fn exhausted_symbol_is_skipped_and_watermark_still_advances() {
    for threads in [1, 4] {
        let ws = Workspace::new();
        let mut meta = ws.register("nyse", None, &["AAPL", "BAD", "MSFT"]);
        let provider = ScriptedProvider::new()
            .with_series("AAPL", daily_bars(d(2020, 1, 1), d(2020, 1, 3)))
            .with_series("BAD", daily_bars(d(2020, 1, 1), d(2020, 1, 3)))
            .with_series("MSFT", daily_bars(d(2020, 1, 1), d(2020, 1, 3)))
            .failing("BAD", u32::MAX);

        let report = update_exchange(
            &mut meta,
            &ws.data_dir,
            "nyse",
            &provider,
            &options(d(2020, 1, 3)).with_threads(threads),
        )
        .unwrap();

        assert_eq!(report.state, SyncState::Committed);
        assert_eq!(report.skipped, vec!["BAD".to_string()]);
        assert_eq!(report.written, 2);
        assert_eq!(provider.calls("BAD"), 5);

        let record = meta.exchange_metadata("nyse").unwrap().unwrap();
        assert_eq!(record.last_sync, Some(d(2020, 1, 3)));
        let store = ExchangeStore::open_at(ws.exchange_db("nyse")).unwrap();
        assert!(!store.has_table("BAD").unwrap());
        assert!(store.has_table("MSFT").unwrap());
    }
}

#[test]
fn unknown_symbol_counts_as_failed_attempts() {
    let ws = Workspace::new();
    let mut meta = ws.register("nyse", None, &["GONE"]);
    let provider = ScriptedProvider::new();

    let report = update_exchange(
        &mut meta,
        &ws.data_dir,
        "nyse",
        &provider,
        &options(d(2020, 1, 3)).with_threads(1),
    )
    .unwrap();
    assert_eq!(report.skipped, vec!["GONE".to_string()]);
    assert_eq!(provider.calls("GONE"), 5);
}

#[test]
fn unregistered_exchange_aborts_without_side_effects() {
    let ws = Workspace::new();
    let mut meta = ws.register("nyse", None, &["AAPL"]);
    let provider = ScriptedProvider::new();

    let err = update_exchange(
        &mut meta,
        &ws.data_dir,
        "amex",
        &provider,
        &options(d(2020, 1, 3)),
    )
    .unwrap_err();

    assert!(matches!(err, SyncError::ExchangeNotFound(ref code) if code == "amex"));
    assert_eq!(provider.total_calls(), 0);
    assert!(!ws.exchange_db("amex").exists());
}

#[test]
fn pass_at_watermark_is_up_to_date() {
    let ws = Workspace::new();
    let mut meta = ws.register("nyse", None, &["AAPL"]);
    let provider =
        ScriptedProvider::new().with_series("AAPL", daily_bars(d(2020, 1, 1), d(2020, 1, 3)));

    update_exchange(&mut meta, &ws.data_dir, "nyse", &provider, &options(d(2020, 1, 3))).unwrap();
    let calls = provider.total_calls();
    let again =
        update_exchange(&mut meta, &ws.data_dir, "nyse", &provider, &options(d(2020, 1, 3)))
            .unwrap();

    assert_eq!(again.state, SyncState::UpToDate);
    assert_eq!(again.rows_inserted, 0);
    assert_eq!(provider.total_calls(), calls);
    let record = meta.exchange_metadata("nyse").unwrap().unwrap();
    assert_eq!(record.last_sync, Some(d(2020, 1, 3)));
}

#[test]
fn start_override_refetches_older_history() {
    let ws = Workspace::new();
    let mut meta = ws.register("nyse", None, &["AAPL"]);
    let provider =
        ScriptedProvider::new().with_series("AAPL", daily_bars(d(2019, 12, 1), d(2020, 1, 10)));

    update_exchange(&mut meta, &ws.data_dir, "nyse", &provider, &options(d(2020, 1, 10))).unwrap();
    let report = update_exchange(
        &mut meta,
        &ws.data_dir,
        "nyse",
        &provider,
        &options(d(2020, 1, 10)).with_start(Some(d(2019, 12, 1))),
    )
    .unwrap();

    assert_eq!(report.start, d(2019, 12, 1));
    assert_eq!(report.rows_inserted, 31);
    let store = ExchangeStore::open_at(ws.exchange_db("nyse")).unwrap();
    assert_eq!(store.read_series("AAPL", None, None).unwrap().len(), 41);
}

#[test]
fn suffix_is_applied_to_fetches_only() {
    let ws = Workspace::new();
    let mut meta = ws.register("tsx", Some("TO"), &["RY"]);
    let provider =
        ScriptedProvider::new().with_series("RY.TO", daily_bars(d(2020, 1, 1), d(2020, 1, 3)));

    let report =
        update_exchange(&mut meta, &ws.data_dir, "tsx", &provider, &options(d(2020, 1, 3)))
            .unwrap();

    assert_eq!(report.written, 1);
    assert_eq!(provider.calls("RY.TO"), 1);
    assert_eq!(provider.calls("RY"), 0);
    let store = ExchangeStore::open_at(ws.exchange_db("tsx")).unwrap();
    assert_eq!(store.tables().unwrap(), vec!["RY".to_string()]);
}

#[test]
fn reset_watermark_restarts_from_epoch() {
    let ws = Workspace::new();
    let mut meta = ws.register("nyse", None, &["AAPL"]);
    let provider =
        ScriptedProvider::new().with_series("AAPL", daily_bars(d(2020, 1, 1), d(2020, 1, 10)));

    update_exchange(&mut meta, &ws.data_dir, "nyse", &provider, &options(d(2020, 1, 10))).unwrap();
    meta.clear_last_sync("nyse").unwrap();
    meta.commit().unwrap();
    let report =
        update_exchange(&mut meta, &ws.data_dir, "nyse", &provider, &options(d(2020, 1, 10)))
            .unwrap();

    assert_eq!(report.start, d(2020, 1, 1));
    assert_eq!(report.rows_inserted, 0);
}

#[test]
fn multiple_exchanges_run_in_sequence() {
    let ws = Workspace::new();
    drop(ws.register("nyse", None, &["AAPL"]));
    let mut meta = ws.register("tsx", Some("TO"), &["RY"]);
    let provider = ScriptedProvider::new()
        .with_series("AAPL", daily_bars(d(2020, 1, 1), d(2020, 1, 3)))
        .with_series("RY.TO", daily_bars(d(2020, 1, 1), d(2020, 1, 3)));

    let reports = update_exchanges(
        &mut meta,
        &ws.data_dir,
        &["nyse".to_string(), "tsx".to_string()],
        &provider,
        &options(d(2020, 1, 3)),
    )
    .unwrap();

    let codes: Vec<&str> = reports.iter().map(|r| r.exchange.as_str()).collect();
    assert_eq!(codes, vec!["nyse", "tsx"]);
    assert!(reports.iter().all(|r| r.rows_inserted == 3));
}

#[test]
fn unstorable_symbol_is_skipped_without_fetching() {
    let ws = Workspace::new();
    let mut meta = ws.register("nyse", None, &["BRK.B", "AAPL"]);
    let provider = ScriptedProvider::new()
        .with_series("AAPL", daily_bars(d(2020, 1, 1), d(2020, 1, 3)))
        .with_series("BRK.B", daily_bars(d(2020, 1, 1), d(2020, 1, 3)));

    let report =
        update_exchange(&mut meta, &ws.data_dir, "nyse", &provider, &options(d(2020, 1, 3)))
            .unwrap();

    assert_eq!(report.state, SyncState::Committed);
    assert_eq!(report.skipped, vec!["BRK.B".to_string()]);
    assert_eq!(provider.calls("BRK.B"), 0);
    assert_eq!(report.rows_inserted, 3);
}

#[test]
fn failed_write_rolls_back_the_pass_and_keeps_the_watermark() {
    for threads in [1, 4] {
        let ws = Workspace::new();
        // a key-only table cannot take base rows, so writing ZETA fails
        let mut poisoned = ExchangeStore::open_at(ws.exchange_db("nyse")).unwrap();
        poisoned.ensure_table("ZETA", &[]).unwrap();
        poisoned.close(true, true).unwrap();

        let mut meta = ws.register("nyse", None, &["MSFT", "ZETA"]);
        let provider = ScriptedProvider::new()
            .with_series("MSFT", daily_bars(d(2020, 1, 1), d(2020, 1, 5)))
            .with_series("ZETA", daily_bars(d(2020, 1, 1), d(2020, 1, 5)));

        let result = update_exchange(
            &mut meta,
            &ws.data_dir,
            "nyse",
            &provider,
            &options(d(2020, 1, 5)).with_threads(threads),
        );
        assert!(matches!(result, Err(SyncError::Store(_))), "threads={threads}");

        let record = meta.exchange_metadata("nyse").unwrap().unwrap();
        assert_eq!(record.last_sync, None, "threads={threads}");

        let store = ExchangeStore::open_at(ws.exchange_db("nyse")).unwrap();
        assert!(!store.has_table("MSFT").unwrap(), "threads={threads}");
        assert_eq!(store.columns("ZETA").unwrap(), vec!["Date"]);
    }
}

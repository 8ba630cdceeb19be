//! Findata CLI: sync, inspect and report commands.
//!
//! Commands:
//! - `update`: run incremental sync passes for one or more exchanges
//! - `reset`: clear an exchange's last-sync watermark
//! - `import`: register an exchange and load its company list from CSV
//! - `exchanges` / `companies`: list the registry and company lists
//! - `series`: print a stored symbol series
//! - `indicator`: print a derived series (moving average, volume delta)
//! - `report`: unusual-volume report for an exchange as CSV

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use findata_core::data::{
    update_exchanges, DataContext, SyncError, SyncOptions, SyncReport, YahooProvider,
};
use findata_core::derived::{DerivedCache, DerivedError, MovingAverage, VolumeDelta};
use findata_core::domain::ExchangeRecord;
use findata_core::report::{read_company_csv, unusual_volume, write_volume_csv};
use findata_core::store::{validate, Frame, MetadataStore, ScopedStore, StoreError};
use findata_core::FindataConfig;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "findata",
    about = "Findata CLI: incremental daily-quote sync and derived indicators"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of per-exchange stores (overrides config).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Metadata store path (overrides config).
    #[arg(long, global = true)]
    metadata_db: Option<PathBuf>,

    /// Directory of derived-data stores (overrides config).
    #[arg(long, global = true)]
    derived_dir: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync exchanges from the quote provider.
    Update {
        /// Exchange codes to sync (e.g., nyse tsx).
        exchanges: Vec<String>,

        /// Sync every registered exchange.
        #[arg(long, default_value_t = false)]
        all: bool,

        /// Window start (YYYY-MM-DD). Defaults to the stored watermark.
        #[arg(long)]
        start: Option<String>,

        /// Fetch workers; 1 runs serially.
        #[arg(long)]
        threads: Option<usize>,

        /// Fetch attempts per symbol.
        #[arg(long)]
        attempts: Option<u32>,

        /// Print pass reports as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Clear an exchange's last-sync date so the next update starts over.
    Reset { exchange: String },
    /// Register an exchange and import its company list from CSV.
    Import {
        exchange: String,

        /// CSV with columns symbol, company (or name), industry, list_date.
        csv: PathBuf,

        /// Suffix the quote source appends to this exchange's symbols (e.g., TO).
        #[arg(long)]
        suffix: Option<String>,
    },
    /// List registered exchanges.
    Exchanges {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List the companies of an exchange.
    Companies {
        exchange: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print a stored series.
    Series {
        exchange: String,
        symbol: String,

        /// Start date (YYYY-MM-DD), inclusive.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), inclusive.
        #[arg(long)]
        end: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print a derived series.
    Indicator {
        exchange: String,
        symbol: String,

        #[arg(long, value_enum, default_value_t = IndicatorKind::Ma)]
        kind: IndicatorKind,

        #[arg(long, default_value_t = 5)]
        window: usize,

        /// Base column for moving averages.
        #[arg(long, default_value = "Close")]
        column: String,

        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Latest volume against its trailing mean, per company, as CSV.
    Report {
        exchange: String,

        #[arg(long, default_value_t = 5)]
        window: usize,

        /// Output file. Defaults to stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum IndicatorKind {
    /// Moving average of a base column.
    Ma,
    /// Volume minus its trailing mean.
    Vdelta,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Update {
            exchanges,
            all,
            start,
            threads,
            attempts,
            json,
        } => run_update(&config, exchanges, all, start, threads, attempts, json),
        Commands::Reset { exchange } => run_reset(&config, &exchange),
        Commands::Import {
            exchange,
            csv,
            suffix,
        } => run_import(&config, &exchange, csv, suffix.as_deref()),
        Commands::Exchanges { json } => run_exchanges(&config, json),
        Commands::Companies { exchange, json } => run_companies(&config, &exchange, json),
        Commands::Series {
            exchange,
            symbol,
            start,
            end,
            json,
        } => run_series(&config, &exchange, &symbol, start, end, json),
        Commands::Indicator {
            exchange,
            symbol,
            kind,
            window,
            column,
            start,
            end,
            json,
        } => run_indicator(
            &config, &exchange, &symbol, kind, window, &column, start, end, json,
        ),
        Commands::Report {
            exchange,
            window,
            output,
        } => run_report(&config, &exchange, window, output),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "findata_core=debug,findata=debug"
    } else {
        "findata_core=info,findata=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<FindataConfig> {
    let mut config = match &cli.config {
        Some(path) => FindataConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => FindataConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(path) = &cli.metadata_db {
        config.metadata_db = path.clone();
    }
    if let Some(dir) = &cli.derived_dir {
        config.derived_dir = dir.clone();
    }
    Ok(config)
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    validate::date(s).with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
}

fn run_update(
    config: &FindataConfig,
    exchanges: Vec<String>,
    all: bool,
    start: Option<String>,
    threads: Option<usize>,
    attempts: Option<u32>,
    json: bool,
) -> Result<()> {
    if all == !exchanges.is_empty() {
        bail!("give exchange codes or --all, not both or neither");
    }
    let mut options = SyncOptions::from_config(&config.sync)
        .with_start(start.as_deref().map(parse_date).transpose()?);
    if let Some(threads) = threads {
        options = options.with_threads(threads);
    }
    if let Some(attempts) = attempts {
        if attempts == 0 {
            bail!("--attempts must be at least 1");
        }
        options.attempts = attempts;
    }

    let provider = YahooProvider::new()?;
    let mut meta = MetadataStore::closed(&config.metadata_db);
    let reports = meta.scoped(|meta| -> Result<Vec<SyncReport>, SyncError> {
        let codes = if all { meta.exchange_list()? } else { exchanges };
        update_exchanges(meta, &config.data_dir, &codes, &provider, &options)
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_reports(&reports);
    }
    Ok(())
}

fn print_reports(reports: &[SyncReport]) {
    println!(
        "{:<8} {:<12} {:<23} {:>8} {:>8} {:>10} {:>8}",
        "Exchange", "State", "Window", "Symbols", "Written", "Rows", "Skipped"
    );
    println!("{}", "-".repeat(83));
    for r in reports {
        println!(
            "{:<8} {:<12} {:<23} {:>8} {:>8} {:>10} {:>8}",
            r.exchange,
            format!("{:?}", r.state),
            format!("{} to {}", r.start, r.end),
            r.symbols,
            r.written,
            r.rows_inserted,
            r.skipped.len()
        );
    }
    for r in reports.iter().filter(|r| !r.skipped.is_empty()) {
        println!("\n{} skipped: {}", r.exchange, r.skipped.join(", "));
    }
}

fn run_reset(config: &FindataConfig, exchange: &str) -> Result<()> {
    let mut meta = MetadataStore::closed(&config.metadata_db);
    meta.scoped(|meta| -> Result<()> {
        if meta.exchange_metadata(exchange)?.is_none() {
            bail!("exchange '{exchange}' is not registered");
        }
        meta.clear_last_sync(exchange)?;
        Ok(())
    })?;
    println!("Cleared last sync for {exchange}");
    Ok(())
}

fn run_import(
    config: &FindataConfig,
    exchange: &str,
    csv: PathBuf,
    suffix: Option<&str>,
) -> Result<()> {
    let file = File::open(&csv).with_context(|| format!("failed to open {}", csv.display()))?;
    let companies = read_company_csv(file)
        .with_context(|| format!("failed to read company list {}", csv.display()))?;

    let mut meta = MetadataStore::closed(&config.metadata_db);
    let written = meta.scoped(|meta| -> Result<usize, StoreError> {
        meta.register_exchange(exchange, suffix)?;
        meta.import_companies(exchange, &companies)
    })?;
    info!(exchange, written, "import complete");
    println!("Imported {written} companies into {}", exchange.to_lowercase());
    Ok(())
}

fn run_exchanges(config: &FindataConfig, json: bool) -> Result<()> {
    let mut meta = MetadataStore::closed(&config.metadata_db);
    let records = meta.scoped(|meta| meta.all_exchange_metadata())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No exchanges registered: {}", config.metadata_db.display());
        return Ok(());
    }
    println!("{:<8} {:<8} {:<12}", "Exchange", "Suffix", "Last Sync");
    println!("{}", "-".repeat(30));
    for ExchangeRecord {
        code,
        suffix,
        last_sync,
    } in &records
    {
        println!(
            "{:<8} {:<8} {:<12}",
            code,
            suffix.as_deref().unwrap_or("-"),
            last_sync.map_or_else(|| "never".to_string(), |d| d.to_string())
        );
    }
    Ok(())
}

fn run_companies(config: &FindataConfig, exchange: &str, json: bool) -> Result<()> {
    let data = DataContext::from_config(config);
    let companies = data.get_company_list(exchange)?;
    data.close()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&*companies)?);
        return Ok(());
    }
    println!("{:<8} {:<40} {:<24} {:<10}", "Symbol", "Company", "Industry", "Listed");
    println!("{}", "-".repeat(85));
    for c in companies.iter() {
        println!(
            "{:<8} {:<40} {:<24} {:<10}",
            c.symbol,
            c.company,
            c.industry.as_deref().unwrap_or(""),
            c.list_date.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn run_series(
    config: &FindataConfig,
    exchange: &str,
    symbol: &str,
    start: Option<String>,
    end: Option<String>,
    json: bool,
) -> Result<()> {
    let data = DataContext::from_config(config);
    let frame = data.get_series(exchange, symbol, start.as_deref(), end.as_deref())?;
    data.close()?;
    print_frame(&frame, json)
}

#[allow(clippy::too_many_arguments)]
fn run_indicator(
    config: &FindataConfig,
    exchange: &str,
    symbol: &str,
    kind: IndicatorKind,
    window: usize,
    column: &str,
    start: Option<String>,
    end: Option<String>,
    json: bool,
) -> Result<()> {
    let data = Arc::new(DataContext::from_config(config));
    let frame = DerivedCache::scoped(
        &config.derived_dir,
        Arc::clone(&data),
        |cache| -> Result<Frame, DerivedError> {
            let handle = match kind {
                IndicatorKind::Ma => cache.processor(MovingAverage::new(window, column)),
                IndicatorKind::Vdelta => cache.processor(VolumeDelta::new(window)),
            };
            cache.get(&handle, exchange, symbol, start.as_deref(), end.as_deref())
        },
    )?;
    data.close()?;
    print_frame(&frame, json)
}

fn run_report(
    config: &FindataConfig,
    exchange: &str,
    window: usize,
    output: Option<PathBuf>,
) -> Result<()> {
    let data = Arc::new(DataContext::from_config(config));
    let rows = DerivedCache::scoped(&config.derived_dir, Arc::clone(&data), |cache| {
        unusual_volume(&data, cache, exchange, window)
    })?;
    data.close()?;

    match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write_volume_csv(&rows, BufWriter::new(file))?;
            println!("Report written to: {}", path.display());
        }
        None => write_volume_csv(&rows, io::stdout().lock())?,
    }
    Ok(())
}

fn print_frame(frame: &Frame, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(frame)?);
        return Ok(());
    }
    let names: Vec<&str> = frame.column_names().collect();
    print!("{:<10}", "Date");
    for name in &names {
        print!(" {:>14}", name);
    }
    println!();
    for (i, date) in frame.dates().iter().enumerate() {
        print!("{:<10}", date.to_string());
        for column in frame.columns() {
            match column.values[i] {
                Some(v) => print!(" {:>14.4}", v),
                None => print!(" {:>14}", "-"),
            }
        }
        println!();
    }
    Ok(())
}

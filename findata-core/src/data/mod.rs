//! Quote ingestion and read access.
//!
//! - `provider`: the `QuoteProvider` seam and fetch errors
//! - `yahoo`: the default provider over Yahoo's chart API
//! - `pipeline`: incremental per-exchange sync passes
//! - `facade`: memoized reads for presentation and the derived cache

pub mod facade;
pub mod pipeline;
pub mod provider;
pub mod yahoo;

pub use facade::{DataContext, SeriesByExchange, SymbolsByExchange};
pub use pipeline::{
    update_exchange, update_exchanges, SyncError, SyncOptions, SyncReport, SyncState,
};
pub use provider::{FetchError, QuoteProvider};
pub use yahoo::YahooProvider;

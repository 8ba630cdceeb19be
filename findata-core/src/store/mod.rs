//! SQLite-backed storage: connection scoping, exchange metadata and symbol tables.

pub mod connection;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod metadata;
pub mod validate;

pub use connection::{ConnectionStore, ScopedStore};
pub use error::StoreError;
pub use exchange::{ColumnMergeStats, ExchangeStore, BASE_SCHEMA};
pub use frame::{Column, Frame};
pub use metadata::MetadataStore;

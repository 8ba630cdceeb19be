//! Findata Core: incremental daily-quote sync and derived-data cache.
//!
//! This crate contains:
//! - Connection-scoped SQLite stores (exchange registry, per-exchange symbol tables)
//! - The update pipeline (concurrent fetches, single serialized writer)
//! - A read facade over the stores with per-exchange lazy connections
//! - Derived indicators with a flyweight cache and explicit flush lifecycle
//! - Configuration and the unusual-volume report

pub mod config;
pub mod data;
pub mod derived;
pub mod domain;
pub mod indicators;
pub mod report;
pub mod store;

pub use config::{ConfigError, FindataConfig, SyncConfig};
pub use store::StoreError;

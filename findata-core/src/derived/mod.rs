//! Derived data: indicator processors and their write-back cache.
//!
//! A [`Processor`] turns a base series into one or more derived columns. The
//! [`DerivedCache`] keeps one [`ProcessorCache`] per parameter tuple, memoizes
//! results per `(exchange, symbol)`, loads persisted results from
//! `{derived_dir}/{Kind}.db` when present, and writes everything back in a
//! single flush when it is closed.

pub mod cache;
pub mod moving_average;
pub mod processor;
pub mod volume_delta;

pub use cache::{DerivedCache, FlushStats, ProcessorCache};
pub use moving_average::MovingAverage;
pub use processor::{DerivedError, Processor, ProcessorKey};
pub use volume_delta::VolumeDelta;

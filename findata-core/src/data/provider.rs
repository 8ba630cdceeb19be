//! Quote provider trait and structured fetch errors.
//!
//! The QuoteProvider trait abstracts over quote sources (Yahoo Finance, test
//! doubles) so the update pipeline can be exercised without a network.

use crate::domain::DailyBar;
use chrono::NaiveDate;
use thiserror::Error;

/// Structured error types for a single fetch attempt.
///
/// The pipeline treats every variant as transient and retries it until the
/// attempt budget runs out.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("fetch error: {0}")]
    Other(String),
}

/// Trait for quote sources.
///
/// One call is one attempt: implementations must not retry internally, the
/// pipeline owns the retry budget.
pub trait QuoteProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch daily bars for `symbol` over `[start, end]`.
    ///
    /// `symbol` is the source-qualified symbol (exchange suffix applied).
    /// An empty vector is a valid answer for a window with no trading days.
    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>, FetchError>;
}

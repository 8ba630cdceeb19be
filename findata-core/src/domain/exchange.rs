//! Exchange registry records and company listings.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One row of the exchange registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    /// Lower-case alphabetic exchange code, e.g. `nyse`.
    pub code: String,
    /// Suffix the quote source appends to symbols of this exchange (`TO` for
    /// `RY.TO`); `None` when symbols are quoted bare.
    pub suffix: Option<String>,
    /// Last date through which the exchange is known to be synchronized.
    pub last_sync: Option<NaiveDate>,
}

impl ExchangeRecord {
    /// Symbol as the quote source knows it.
    pub fn quoted_symbol(&self, symbol: &str) -> String {
        match self.suffix.as_deref() {
            Some(suffix) if !suffix.is_empty() => format!("{symbol}.{suffix}"),
            _ => symbol.to_string(),
        }
    }
}

/// A listed company. Populated by the import step, read-only to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub symbol: String,
    #[serde(alias = "name")]
    pub company: String,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub list_date: Option<String>,
}

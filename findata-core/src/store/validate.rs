//! Allow-list checks for everything that is interpolated into SQL.
//!
//! SQLite cannot bind table or column names as parameters, so exchange codes,
//! symbols and derived column names end up inside the statement text. Every
//! such string passes through one of these checks first.

use super::error::StoreError;
use chrono::NaiveDate;

/// Exchange codes are purely ASCII-alphabetic.
pub fn exchange(code: &str) -> Result<(), StoreError> {
    if !code.is_empty() && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        Err(StoreError::InvalidExchange(code.to_string()))
    }
}

/// Symbols are ASCII-alphanumeric and non-empty.
pub fn symbol(symbol: &str) -> Result<(), StoreError> {
    if !symbol.is_empty() && symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(StoreError::InvalidSymbol(symbol.to_string()))
    }
}

/// Table names: alphanumerics plus `_`, `.` and `/` (derived tables are named
/// `{exchange}/{symbol}`).
pub fn table_name(name: &str) -> Result<(), StoreError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Column names: alphanumerics and `_`, not starting with a digit.
pub fn column_name(name: &str) -> Result<(), StoreError> {
    let ok = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Parse a `yyyy-mm-dd` bound. The shape is checked before the calendar so
/// that `2020/01/01` and `20200101` are both format errors.
pub fn date(text: &str) -> Result<NaiveDate, StoreError> {
    let bytes = text.as_bytes();
    let shaped = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shaped {
        return Err(StoreError::InvalidDateFormat(text.to_string()));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|_| StoreError::InvalidDateFormat(text.to_string()))
}

/// Validate an optional bound.
pub fn date_bound(text: Option<&str>) -> Result<Option<NaiveDate>, StoreError> {
    text.map(date).transpose()
}

/// Double-quote an identifier that has already been validated.
pub(crate) fn quoted(name: &str) -> String {
    format!("\"{name}\"")
}

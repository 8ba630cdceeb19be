//! Unusual-volume report and company-list import.
//!
//! The report takes, for every company of an exchange, the latest stored row
//! with close, volume, the trailing volume mean and the delta against it.

use crate::data::DataContext;
use crate::derived::{DerivedCache, DerivedError, VolumeDelta};
use crate::domain::Company;
use crate::store::frame::{CLOSE, VOLUME};
use crate::store::StoreError;
use chrono::NaiveDate;
use serde::Serialize;
use std::io;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Derived(#[from] DerivedError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to flush report: {0}")]
    Io(#[from] io::Error),
}

/// Latest-day volume figures for one company.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeRow {
    pub symbol: String,
    pub company: String,
    pub list_date: Option<String>,
    pub date: NaiveDate,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub volume_mean: Option<f64>,
    pub volume_delta: Option<f64>,
}

/// One row per company of `exchange` with a stored series, in list order.
/// Companies without a series table are skipped.
pub fn unusual_volume(
    data: &DataContext,
    cache: &DerivedCache,
    exchange: &str,
    window: usize,
) -> Result<Vec<VolumeRow>, ReportError> {
    let companies = data.get_company_list(exchange)?;
    let processor = VolumeDelta::new(window);
    let handle = cache.processor(processor);

    let mut rows = Vec::with_capacity(companies.len());
    for company in companies.iter() {
        let base = match data.full_series(exchange, &company.symbol) {
            Ok(base) => base,
            Err(StoreError::TableNotFound { .. }) => {
                debug!(symbol = %company.symbol, "no series, skipping");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let Some(&date) = base.dates().last() else {
            continue;
        };
        let derived = cache.entry(&handle, exchange, &company.symbol)?;
        rows.push(VolumeRow {
            symbol: company.symbol.clone(),
            company: company.company.clone(),
            list_date: company.list_date.clone(),
            date,
            close: base.value(date, CLOSE),
            volume: base.value(date, VOLUME),
            volume_mean: derived.value(date, &processor.mean_column()),
            volume_delta: derived.value(date, &processor.delta_column()),
        });
    }
    info!(exchange, rows = rows.len(), window, "built unusual-volume report");
    Ok(rows)
}

/// Write report rows as CSV.
pub fn write_volume_csv<W: io::Write>(rows: &[VolumeRow], out: W) -> Result<(), ReportError> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record([
        "symbol",
        "company",
        "list_date",
        "date",
        "close",
        "volume",
        "volume_mean",
        "volume_delta",
    ])?;
    let cell = |v: Option<f64>| v.map(|v| format!("{v:.2}")).unwrap_or_default();
    for r in rows {
        wtr.write_record([
            r.symbol.as_str(),
            r.company.as_str(),
            r.list_date.as_deref().unwrap_or(""),
            &r.date.to_string(),
            &cell(r.close),
            &cell(r.volume),
            &cell(r.volume_mean),
            &cell(r.volume_delta),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a company list. Headers: `symbol`, `company` (or `name`), and the
/// optional `industry` and `list_date`.
pub fn read_company_csv<R: io::Read>(input: R) -> Result<Vec<Company>, ReportError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let companies = rdr
        .deserialize::<Company>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(companies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn company_csv_accepts_name_alias_and_missing_columns() {
        let input = "symbol,name,industry\nAAPL,Apple,Tech\nMSFT,Microsoft,\n";
        let companies = read_company_csv(input.as_bytes()).unwrap();
        assert_eq!(companies.len(), 2);
        assert_eq!(companies[0].company, "Apple");
        assert_eq!(companies[0].industry.as_deref(), Some("Tech"));
        assert_eq!(companies[1].industry, None);
        assert_eq!(companies[1].list_date, None);
    }

    #[test]
    fn volume_csv_formats_two_decimals() {
        let rows = vec![VolumeRow {
            symbol: "AAPL".into(),
            company: "Apple".into(),
            list_date: None,
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            close: Some(101.234),
            volume: Some(5000.0),
            volume_mean: None,
            volume_delta: Some(-12.5),
        }];
        let mut out = Vec::new();
        write_volume_csv(&rows, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "symbol,company,list_date,date,close,volume,volume_mean,volume_delta"
        );
        assert_eq!(
            lines.next().unwrap(),
            "AAPL,Apple,,2024-01-02,101.23,5000.00,,-12.50"
        );
    }
}

//! Trailing moving average of one base column.
//!
//! Output column: `ma{window}_{column}` with the column name lower-cased,
//! e.g. `ma5_close`.

use super::processor::{DerivedError, Processor};
use crate::indicators::rolling_mean;
use crate::store::Frame;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovingAverage {
    window: usize,
    column: String,
}

impl MovingAverage {
    pub fn new(window: usize, column: impl Into<String>) -> Self {
        Self {
            window,
            column: column.into(),
        }
    }

    pub fn output_column(&self) -> String {
        format!("ma{}_{}", self.window, self.column.to_lowercase())
    }
}

impl Processor for MovingAverage {
    fn kind(&self) -> &'static str {
        "MovingAverage"
    }

    fn params(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("window", self.window.to_string()),
            ("column", self.column.clone()),
        ])
    }

    fn columns(&self) -> Vec<String> {
        vec![self.output_column()]
    }

    fn compute(&self, base: &Frame) -> Result<Frame, DerivedError> {
        if self.window == 0 {
            return Err(DerivedError::InvalidWindow);
        }
        let values = base
            .column(&self.column)
            .ok_or_else(|| DerivedError::MissingColumn {
                column: self.column.clone(),
            })?;
        let mut out = Frame::new(base.dates().to_vec());
        out.push_column(self.output_column(), rolling_mean(values, self.window));
        Ok(out)
    }
}

//! Unusual-volume measure: volume against its trailing mean.
//!
//! Output columns: `vma{window}` (trailing mean of `Volume`) and
//! `vdelta{window}` (`Volume - vma{window}`).

use super::processor::{DerivedError, Processor};
use crate::indicators::{rolling_mean, subtract};
use crate::store::frame::VOLUME;
use crate::store::Frame;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeDelta {
    window: usize,
}

impl VolumeDelta {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    pub fn mean_column(&self) -> String {
        format!("vma{}", self.window)
    }

    pub fn delta_column(&self) -> String {
        format!("vdelta{}", self.window)
    }
}

impl Processor for VolumeDelta {
    fn kind(&self) -> &'static str {
        "VolumeDelta"
    }

    fn params(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([("window", self.window.to_string())])
    }

    fn columns(&self) -> Vec<String> {
        vec![self.mean_column(), self.delta_column()]
    }

    fn compute(&self, base: &Frame) -> Result<Frame, DerivedError> {
        if self.window == 0 {
            return Err(DerivedError::InvalidWindow);
        }
        let volume = base.column(VOLUME).ok_or_else(|| DerivedError::MissingColumn {
            column: VOLUME.to_string(),
        })?;
        let mean = rolling_mean(volume, self.window);
        let delta = subtract(volume, &mean);

        let mut out = Frame::new(base.dates().to_vec());
        out.push_column(self.mean_column(), mean);
        out.push_column(self.delta_column(), delta);
        Ok(out)
    }
}

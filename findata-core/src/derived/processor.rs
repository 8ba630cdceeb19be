//! Processor trait and registry identity.

use crate::store::{Frame, StoreError};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DerivedError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("column '{column}' missing from source series")]
    MissingColumn { column: String },

    #[error("window must be at least 1")]
    InvalidWindow,

    #[error("derived cache is closed")]
    Closed,
}

/// A parameterized computation over a base series.
///
/// Two processors with the same kind and parameters are interchangeable: the
/// cache keeps a single instance for them.
pub trait Processor: Send + Sync + 'static {
    /// Kind name. Also names the backing store file.
    fn kind(&self) -> &'static str;

    /// Parameters that distinguish instances of this kind.
    fn params(&self) -> BTreeMap<&'static str, String>;

    /// Columns produced by `compute`, in order.
    fn columns(&self) -> Vec<String>;

    /// Compute the derived frame over `base`. The result carries every date
    /// of `base`; rows without enough history hold `None`.
    fn compute(&self, base: &Frame) -> Result<Frame, DerivedError>;

    fn key(&self) -> ProcessorKey {
        ProcessorKey::new(self.kind(), &self.params())
    }
}

/// Registry key: kind plus a blake3 fingerprint of the canonical parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorKey {
    kind: &'static str,
    fingerprint: String,
}

impl ProcessorKey {
    pub fn new(kind: &'static str, params: &BTreeMap<&'static str, String>) -> Self {
        // BTreeMap iteration order makes the encoding canonical
        let canonical = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";");
        let hash = blake3::hash(format!("{kind}|{canonical}").as_bytes());
        Self {
            kind,
            fingerprint: hash.to_hex().to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Display for ProcessorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, &self.fingerprint[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&'static str, &str)]) -> BTreeMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn key_is_order_independent() {
        let a = ProcessorKey::new("MovingAverage", &params(&[("window", "5"), ("column", "Close")]));
        let b = ProcessorKey::new("MovingAverage", &params(&[("column", "Close"), ("window", "5")]));
        assert_eq!(a, b);
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn key_separates_kinds_and_params() {
        let p = params(&[("window", "5")]);
        assert_ne!(
            ProcessorKey::new("MovingAverage", &p),
            ProcessorKey::new("VolumeDelta", &p)
        );
        assert_ne!(
            ProcessorKey::new("VolumeDelta", &p),
            ProcessorKey::new("VolumeDelta", &params(&[("window", "10")]))
        );
    }
}

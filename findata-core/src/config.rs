//! Serializable configuration: storage locations and sync defaults.
//!
//! Every field has a default, so an empty TOML file (or no file at all) is a
//! valid configuration:
//!
//! ```toml
//! data_dir = "findata"
//! metadata_db = "findata/metadata.db"
//! derived_dir = "comdata"
//!
//! [sync]
//! threads = 16
//! attempts = 5
//! epoch_start = "1970-01-01"
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindataConfig {
    /// Directory holding one `{exchange}.db` file per exchange.
    pub data_dir: PathBuf,
    /// Exchange registry and company lists.
    pub metadata_db: PathBuf,
    /// Directory holding one backing store per derived-data kind.
    pub derived_dir: PathBuf,
    pub sync: SyncConfig,
}

/// Update pipeline defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Fetch workers. Below 2 the pass runs serially.
    pub threads: usize,
    /// Fetch attempts per symbol before it is skipped.
    pub attempts: u32,
    /// Window start for an exchange that was never synced.
    pub epoch_start: NaiveDate,
}

impl Default for FindataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("findata"),
            metadata_db: PathBuf::from("findata/metadata.db"),
            derived_dir: PathBuf::from("comdata"),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            threads: 16,
            attempts: 5,
            epoch_start: NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default(),
        }
    }
}

impl FindataConfig {
    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse from TOML text; missing fields take their defaults.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.attempts == 0 {
            return Err(ConfigError::Invalid("sync.attempts must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        let config = FindataConfig::from_toml("").unwrap();
        assert_eq!(config, FindataConfig::default());
        assert_eq!(config.sync.threads, 16);
        assert_eq!(config.sync.attempts, 5);
        assert_eq!(
            config.sync.epoch_start,
            NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
        );
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let config = FindataConfig::from_toml(
            r#"
            data_dir = "/srv/quotes"

            [sync]
            threads = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/quotes"));
        assert_eq!(config.derived_dir, PathBuf::from("comdata"));
        assert_eq!(config.sync.threads, 4);
        assert_eq!(config.sync.attempts, 5);
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = FindataConfig::from_toml("[sync]\nattempts = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bad_date_is_parse_error() {
        let err = FindataConfig::from_toml("[sync]\nepoch_start = \"1970/01/01\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FindataConfig::from_file(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

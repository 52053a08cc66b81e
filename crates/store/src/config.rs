use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::blobs::MAX_FILE_NAME_LEN;

pub const CONFIG_FILE_NAME: &str = "store.toml";
pub const DEFAULT_DATA_DIR: &str = "secrez-data";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the blobs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Longest accepted path segment
    #[serde(default = "default_max_segment_len")]
    pub max_segment_len: usize,
    /// Which index snapshots survive a new snapshot write
    #[serde(default)]
    pub retention: RetentionPolicy,
    /// Where blobs are kept
    #[serde(default)]
    pub backend: BackendConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_max_segment_len() -> usize {
    MAX_FILE_NAME_LEN
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_segment_len: default_max_segment_len(),
            retention: RetentionPolicy::default(),
            backend: BackendConfig::default(),
        }
    }
}

/// Blob storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Files in `data_dir`
    #[default]
    Local,
    /// In memory; nothing survives the process
    Memory,
}

/// Index snapshot retention
///
/// Content blobs are never collected; only snapshots superseded by newer
/// ones are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep every snapshot as a historical checkpoint
    #[default]
    KeepAll,
    /// Keep only the newest `n` snapshots (at least one)
    KeepLast(usize),
}

impl RetentionPolicy {
    /// How many of the newest snapshots to keep, `None` for all
    pub fn limit(&self) -> Option<usize> {
        match self {
            RetentionPolicy::KeepAll => None,
            RetentionPolicy::KeepLast(n) => Some((*n).max(1)),
        }
    }
}

impl StoreConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_segment_len == 0 || self.max_segment_len > MAX_FILE_NAME_LEN {
            return Err(ConfigError::Invalid(format!(
                "max_segment_len must be between 1 and {}",
                MAX_FILE_NAME_LEN
            )));
        }
        if self.retention == RetentionPolicy::KeepLast(0) {
            return Err(ConfigError::Invalid(
                "keep_last retention needs at least one snapshot".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config: StoreConfig = toml::from_str("").unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.retention, RetentionPolicy::KeepAll);
        assert_eq!(config.max_segment_len, 255);
    }

    #[test]
    fn test_parse_retention() {
        let config: StoreConfig = toml::from_str(
            r#"
            data_dir = "/tmp/vault"
            retention = { keep_last = 3 }

            [backend]
            type = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/vault"));
        assert_eq!(config.retention, RetentionPolicy::KeepLast(3));
        assert_eq!(config.backend, BackendConfig::Memory);
        assert_eq!(config.retention.limit(), Some(3));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = StoreConfig::with_data_dir(dir.path().join("blobs"));
        config.retention = RetentionPolicy::KeepLast(2);

        config.save(&path).unwrap();
        assert_eq!(StoreConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "max_segment_len = 1000\n").unwrap();
        assert!(matches!(
            StoreConfig::from_file(&path),
            Err(ConfigError::Invalid(_))
        ));
        std::fs::write(&path, "retention = { keep_last = 0 }\n").unwrap();
        assert!(StoreConfig::from_file(&path).is_err());
    }
}

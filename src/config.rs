//! Application settings.
//!
//! Defaults, then an optional JSON file, then `DOCPAIR_*` environment
//! variables. Command-line flags are applied last by the binary.

use crate::pipeline::similarity::DEFAULT_THRESHOLD;
use crate::services::industry_docs::{DEFAULT_DOWNLOAD_URL, DEFAULT_SEARCH_URL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "docpair.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not find home directory")]
    NoHomeDirectory,

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite file holding candidates and comparisons.
    pub database_path: PathBuf,
    /// sled tree for downloaded scans.
    pub cache_path: PathBuf,
    pub search_url: String,
    pub download_url: String,
    pub request_timeout_secs: u64,
    pub page_size: u32,
    pub max_document_pages: Option<u32>,
    pub similarity_threshold: f64,
    pub engine: String,
    /// Pause between result pages.
    pub page_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = data_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            database_path: data_dir.join("docpair.db"),
            cache_path: data_dir.join("image-cache"),
            search_url: DEFAULT_SEARCH_URL.to_string(),
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            request_timeout_secs: 30,
            page_size: 10,
            max_document_pages: Some(1),
            similarity_threshold: DEFAULT_THRESHOLD,
            engine: "ssim".to_string(),
            page_delay_ms: 1000,
        }
    }
}

impl AppConfig {
    const ENV_DATABASE_URL: &'static str = "DOCPAIR_DATABASE_URL";
    const ENV_SEARCH_URL: &'static str = "DOCPAIR_SEARCH_URL";
    const ENV_DOWNLOAD_URL: &'static str = "DOCPAIR_DOWNLOAD_URL";

    /// Reads `path` if given, else `<data dir>/docpair.json` when it exists,
    /// else starts from defaults. Environment overrides are applied on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => data_dir()
                .ok()
                .map(|dir| dir.join(CONFIG_FILE_NAME))
                .filter(|candidate| candidate.is_file()),
        };

        let config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        let config = config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// `lookup` resolves an environment variable name to its value.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(Self::ENV_DATABASE_URL) {
            self.database_path = PathBuf::from(url.trim_start_matches("sqlite://"));
        }
        if let Some(url) = non_empty(Self::ENV_SEARCH_URL) {
            self.search_url = url;
        }
        if let Some(url) = non_empty(Self::ENV_DOWNLOAD_URL) {
            self.download_url = url;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size < 2 {
            return Err(ConfigError::Invalid {
                field: "page_size",
                reason: format!("must be at least 2, got {}", self.page_size),
            });
        }
        if !self.similarity_threshold.is_finite() {
            return Err(ConfigError::Invalid {
                field: "similarity_threshold",
                reason: format!("{} is not a finite number", self.similarity_threshold),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.engine.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "engine",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

/// `~/Documents/DocPair`.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let home_dir = dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?;
    Ok(home_dir.join("Documents").join("DocPair"))
}

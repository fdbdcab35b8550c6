//! Core configuration: store locations, storage timeouts, logging.
//!
//! # Responsibility
//! - Describe which store is the writable root and which are overlays.
//! - Load that description from JSON or from `PENSIVE_*` environment
//!   variables.
//!
//! # Invariants
//! - A validated config never lists the root store as an overlay.
//! - Overlay order is priority order and is preserved as given.

use crate::logging::{default_log_level, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_ROOT: &str = "PENSIVE_ROOT";
pub const ENV_OVERLAYS: &str = "PENSIVE_OVERLAYS";
pub const ENV_BUSY_TIMEOUT_MS: &str = "PENSIVE_BUSY_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "PENSIVE_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "PENSIVE_LOG_DIR";

/// File name of the root store inside `PENSIVE_ROOT`.
pub const ROOT_STORE_FILE_NAME: &str = "root.pensive";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    InvalidValue { key: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid config document: {err}"),
            Self::InvalidValue { key, message } => write!(f, "invalid `{key}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Writable store receiving every client write.
    pub root_store: PathBuf,
    /// Read-only stores, highest priority first.
    #[serde(default)]
    pub overlay_stores: Vec<PathBuf>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl CoreConfig {
    pub fn new(root_store: impl Into<PathBuf>) -> Self {
        Self {
            root_store: root_store.into(),
            overlay_stores: Vec::new(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            logging: None,
        }
    }

    pub fn with_overlay(mut self, path: impl Into<PathBuf>) -> Self {
        self.overlay_stores.push(path.into());
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Parses and validates a JSON config document.
    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from the process environment.
    ///
    /// - `PENSIVE_ROOT`: directory holding `root.pensive` (default `.`).
    /// - `PENSIVE_OVERLAYS`: platform path list of overlay store files.
    /// - `PENSIVE_BUSY_TIMEOUT_MS`: storage busy timeout.
    /// - `PENSIVE_LOG_DIR` / `PENSIVE_LOG_LEVEL`: enable file logging.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> ConfigResult<Self> {
        let root_dir = lookup(ENV_ROOT)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut config = Self::new(root_dir.join(ROOT_STORE_FILE_NAME));

        if let Some(overlays) = lookup(ENV_OVERLAYS) {
            config.overlay_stores = std::env::split_paths(&overlays)
                .filter(|path| !path.as_os_str().is_empty())
                .collect();
        }

        if let Some(raw) = lookup(ENV_BUSY_TIMEOUT_MS) {
            let text = raw.to_string_lossy();
            config.busy_timeout_ms = text.trim().parse::<u64>().map_err(|err| {
                ConfigError::InvalidValue {
                    key: ENV_BUSY_TIMEOUT_MS,
                    message: format!("`{text}` is not a millisecond count: {err}"),
                }
            })?;
        }

        if let Some(log_dir) = lookup(ENV_LOG_DIR).filter(|value| !value.is_empty()) {
            let level = lookup(ENV_LOG_LEVEL)
                .map(|value| value.to_string_lossy().into_owned())
                .unwrap_or_else(|| default_log_level().to_string());
            config.logging = Some(LoggingConfig::new(level, log_dir));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.root_store.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "root_store",
                message: "path is empty".to_string(),
            });
        }
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "busy_timeout_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        for (index, overlay) in self.overlay_stores.iter().enumerate() {
            if overlay == &self.root_store {
                return Err(ConfigError::InvalidValue {
                    key: "overlay_stores",
                    message: format!("`{}` is also the root store", overlay.display()),
                });
            }
            if self.overlay_stores[..index].contains(overlay) {
                return Err(ConfigError::InvalidValue {
                    key: "overlay_stores",
                    message: format!("`{}` is listed twice", overlay.display()),
                });
            }
        }
        Ok(())
    }
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

//! Service configuration.
//!
//! Settings come from three layers, later ones winning:
//!   1. compiled-in defaults (`Default` impls below)
//!   2. an optional TOML file (`sitemon.toml`)
//!   3. environment variables, after `.env` has been loaded with `dotenv`
//!
//! Environment overrides:
//!
//! | variable                     | setting                        |
//! |------------------------------|--------------------------------|
//! | `DATABASE_URL`               | `database.url`                 |
//! | `SITEMON_DEFAULT_LIMIT`      | `fetch.default_limit`          |
//! | `SITEMON_CHUNK_COUNT`        | `fetch.chunk_count`            |
//! | `SITEMON_DIRECT_TIMEOUT_MS`  | `fetch.direct_timeout_ms`      |
//! | `SITEMON_CHUNK_TIMEOUT_MS`   | `fetch.chunk_timeout_ms`       |
//! | `SITEMON_LOG_LEVEL`          | `logging.level`                |
//! | `SITEMON_LOG_FILE`           | `logging.file`                 |

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogLevel;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {field}: {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Range fetcher policy: caps, chunking and per-tier time budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Cap applied when a request does not give one.
    pub default_limit: usize,
    /// Caps at or below this try a single direct range query first.
    pub small_cap_threshold: usize,
    /// Number of equal-width sub-windows in a chunked scan.
    pub chunk_count: usize,
    /// Upper bound on the sample tiers, further limited by the cap.
    pub sample_size: usize,
    pub direct_timeout_ms: u64,
    pub chunk_timeout_ms: u64,
    pub sample_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            default_limit: 1000,
            small_cap_threshold: 100,
            chunk_count: 5,
            sample_size: 100,
            direct_timeout_ms: 30_000,
            chunk_timeout_ms: 10_000,
            sample_timeout_ms: 10_000,
        }
    }
}

impl FetchConfig {
    pub fn direct_timeout(&self) -> Duration {
        Duration::from_millis(self.direct_timeout_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }
}

/// Defaults for the derived-series pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub moving_average_window: usize,
    pub anomaly_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            moving_average_window: 5,
            anomaly_threshold: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub file: Option<String>,
    pub console_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            file: None,
            console_timestamps: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    /// Schema holding one table per collection.
    pub schema: Option<String>,
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub fetch: FetchConfig,
    pub analysis: AnalysisConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
}

impl ServiceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Full startup load: `.env`, then the file (if any), then the process
    /// environment.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => ServiceConfig::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value. Taking a closure keeps this testable without touching the
    /// process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            self.database.url = Some(url);
        }
        if let Some(v) = lookup("SITEMON_DEFAULT_LIMIT") {
            self.fetch.default_limit = parse_env("SITEMON_DEFAULT_LIMIT", &v)?;
        }
        if let Some(v) = lookup("SITEMON_CHUNK_COUNT") {
            self.fetch.chunk_count = parse_env("SITEMON_CHUNK_COUNT", &v)?;
        }
        if let Some(v) = lookup("SITEMON_DIRECT_TIMEOUT_MS") {
            self.fetch.direct_timeout_ms = parse_env("SITEMON_DIRECT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("SITEMON_CHUNK_TIMEOUT_MS") {
            self.fetch.chunk_timeout_ms = parse_env("SITEMON_CHUNK_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("SITEMON_LOG_LEVEL") {
            self.logging.level = parse_env("SITEMON_LOG_LEVEL", &v)?;
        }
        if let Some(v) = lookup("SITEMON_LOG_FILE").filter(|v| !v.is_empty()) {
            self.logging.file = Some(v);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = &self.fetch;
        if f.default_limit == 0 {
            return Err(invalid("fetch.default_limit", "must be at least 1"));
        }
        if f.chunk_count == 0 {
            return Err(invalid("fetch.chunk_count", "must be at least 1"));
        }
        if f.sample_size == 0 {
            return Err(invalid("fetch.sample_size", "must be at least 1"));
        }
        if f.chunk_timeout_ms > f.direct_timeout_ms {
            return Err(invalid(
                "fetch.chunk_timeout_ms",
                format!(
                    "per-chunk budget {} ms exceeds direct budget {} ms",
                    f.chunk_timeout_ms, f.direct_timeout_ms
                ),
            ));
        }
        if self.analysis.moving_average_window == 0 {
            return Err(invalid("analysis.moving_average_window", "must be at least 1"));
        }
        let t = self.analysis.anomaly_threshold;
        if !t.is_finite() || t <= 0.0 {
            return Err(invalid("analysis.anomaly_threshold", "must be a positive number"));
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, format!("'{}': {}", raw, e)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

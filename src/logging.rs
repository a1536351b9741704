/// Structured logging for the site monitoring service
///
/// Thin layer over `tracing`: `init_logger` installs the subscriber (console
/// plus optional append-only log file), and the helpers below attach the
/// request correlation id, collection and fallback tier to every event so a
/// single request can be followed through the fetcher's fallback chain.

use std::fmt;
use std::fs::OpenOptions;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::store::StoreError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
}

impl LogLevel {
    fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// Which part of the service emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Fetcher,
    Store,
    Query,
    Dashboard,
    System,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Fetcher => write!(f, "FETCH"),
            Component::Store => write!(f, "STORE"),
            Component::Query => write!(f, "QUERY"),
            Component::Dashboard => write!(f, "UI"),
            Component::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - a tier ran out of budget on a large window
    Expected,
    /// Unexpected failure - indicates store degradation or a schema problem
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify a store failure seen by one fallback tier.
pub fn classify_store_failure(err: &StoreError) -> FailureType {
    match err {
        StoreError::Timeout { .. } => FailureType::Expected,
        StoreError::Transient(_) => FailureType::Unknown,
        StoreError::MissingPartition(_) | StoreError::Database(_) => FailureType::Unexpected,
    }
}

// ---------------------------------------------------------------------------
// Initialisation
// ---------------------------------------------------------------------------

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `min_level` when set. Calling this more
/// than once is harmless; later calls leave the first subscriber in place.
pub fn init_logger(
    min_level: LogLevel,
    log_file: Option<&str>,
    console_timestamps: bool,
) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(min_level.directive()));

    let timed_console = console_timestamps.then(|| {
        tfmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    let plain_console = (!console_timestamps).then(|| {
        tfmt::layer()
            .without_time()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(tfmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(timed_console)
        .with(plain_console)
        .with(file_layer)
        .try_init();
    Ok(())
}

/// Logging for tests: debug level, captured by the test harness.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a failed store call with automatic classification. The fetcher keeps
/// going after this; it is never fatal.
pub fn log_store_failure(request_id: &str, collection: &str, tier: &str, err: &StoreError) {
    let failure_type = classify_store_failure(err);
    match failure_type {
        FailureType::Expected => debug!(
            component = %Component::Fetcher,
            request_id, collection, tier, failure = %failure_type,
            "tier failed: {}", err
        ),
        FailureType::Unexpected => error!(
            component = %Component::Fetcher,
            request_id, collection, tier, failure = %failure_type,
            "tier failed: {}", err
        ),
        FailureType::Unknown => warn!(
            component = %Component::Fetcher,
            request_id, collection, tier, failure = %failure_type,
            "tier failed: {}", err
        ),
    }
}

/// Log the timing of one tier.
pub fn log_tier_timing(request_id: &str, collection: &str, tier: &str, returned: usize, elapsed: Duration) {
    debug!(
        component = %Component::Fetcher,
        request_id,
        collection,
        tier,
        returned,
        elapsed_ms = elapsed.as_millis() as u64,
        "tier finished"
    );
}

// ---------------------------------------------------------------------------
// Fetch Summary Logging
// ---------------------------------------------------------------------------

/// Log the outcome of a whole fetch request.
pub fn log_fetch_summary(
    request_id: &str,
    collection: &str,
    tier: Option<&str>,
    returned: usize,
    cap: usize,
    elapsed: Duration,
) {
    let elapsed_ms = elapsed.as_millis() as u64;
    match tier {
        Some(tier) => info!(
            component = %Component::Fetcher,
            request_id, collection, tier, returned, cap, elapsed_ms,
            "fetched {} of at most {} records", returned, cap
        ),
        None => warn!(
            component = %Component::Fetcher,
            request_id, collection, cap, elapsed_ms,
            "every tier came back empty"
        ),
    }
}

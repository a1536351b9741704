/// Canonical timestamp representation and the adapter for stored timestamps.
///
/// Collections in the record store do not agree on how `wdatetime` is
/// written. Some partitions hold `"YYYY-MM-DD HH:mm:ss"` strings, others hold
/// epoch milliseconds written as a digit string (and occasionally as a bare
/// JSON number). Everything past the store boundary works with `Timestamp`,
/// a UTC `NaiveDateTime`; the conversion lives here and nowhere else.
///
/// Query bounds travel the other way: `Timestamp::native_string` renders a
/// bound in the collection's own convention so the store can compare it
/// against its index.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// chrono format string for the canonical `"YYYY-MM-DD HH:mm:ss"` form.
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Canonical form with milliseconds, `"YYYY-MM-DD HH:mm:ss.SSS"`. Used for
/// values that carry a sub-second part.
pub const CANONICAL_MILLIS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Length of a canonical timestamp string. Anything else is rejected by the
/// strict parser, so `"2024-5-1 1:00:00"` never sneaks through.
const CANONICAL_LEN: usize = 19;
const CANONICAL_MILLIS_LEN: usize = 23;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("empty timestamp")]
    Empty,
    #[error("timestamp {0:?} is not in YYYY-MM-DD HH:mm:ss form")]
    BadFormat(String),
    #[error("epoch milliseconds {0} are out of range")]
    OutOfRange(i64),
    #[error("timestamp value has unsupported JSON type")]
    UnsupportedType,
}

// ---------------------------------------------------------------------------
// Storage conventions
// ---------------------------------------------------------------------------

/// How a collection writes its `wdatetime` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampConvention {
    /// `"2023-06-01 12:00:00"`, lexically sortable.
    Canonical,
    /// `"1685620800000"`: epoch milliseconds as a digit string.
    EpochMillis,
}

impl TimestampConvention {
    /// Guesses the convention from one raw stored value.
    pub fn detect(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if is_epoch_digits(raw) {
            Some(TimestampConvention::EpochMillis)
        } else if Timestamp::parse_canonical(raw).is_ok() {
            Some(TimestampConvention::Canonical)
        } else {
            None
        }
    }
}

impl fmt::Display for TimestampConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampConvention::Canonical => write!(f, "canonical"),
            TimestampConvention::EpochMillis => write!(f, "epoch_millis"),
        }
    }
}

fn is_epoch_digits(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// A point in time, UTC, millisecond precision.
///
/// Ordering is chronological regardless of which convention the value was
/// read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    pub fn from_naive(dt: NaiveDateTime) -> Self {
        Timestamp(dt)
    }

    /// Strict parser for `"YYYY-MM-DD HH:mm:ss"`.
    pub fn parse_canonical(s: &str) -> Result<Self, TimestampError> {
        if s.is_empty() {
            return Err(TimestampError::Empty);
        }
        if s.len() != CANONICAL_LEN {
            return Err(TimestampError::BadFormat(s.to_string()));
        }
        NaiveDateTime::parse_from_str(s, CANONICAL_FORMAT)
            .map(Timestamp)
            .map_err(|_| TimestampError::BadFormat(s.to_string()))
    }

    pub fn from_epoch_millis(ms: i64) -> Result<Self, TimestampError> {
        DateTime::from_timestamp_millis(ms)
            .map(|dt| Timestamp(dt.naive_utc()))
            .ok_or(TimestampError::OutOfRange(ms))
    }

    /// Canonical form with exactly three fractional digits, as written by
    /// `to_text` for sub-second values.
    pub fn parse_canonical_millis(s: &str) -> Result<Self, TimestampError> {
        if s.len() != CANONICAL_MILLIS_LEN {
            return Err(TimestampError::BadFormat(s.to_string()));
        }
        NaiveDateTime::parse_from_str(s, CANONICAL_MILLIS_FORMAT)
            .map(Timestamp)
            .map_err(|_| TimestampError::BadFormat(s.to_string()))
    }

    /// Accepts either stored convention, plus the millisecond text form.
    /// Digit strings are always read as epoch milliseconds, never handed to a
    /// date parser.
    pub fn parse_any(raw: &str) -> Result<Self, TimestampError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(TimestampError::Empty);
        }
        if is_epoch_digits(s) {
            let ms: i64 = s
                .parse()
                .map_err(|_| TimestampError::BadFormat(s.to_string()))?;
            return Self::from_epoch_millis(ms);
        }
        if s.len() == CANONICAL_MILLIS_LEN {
            return Self::parse_canonical_millis(s);
        }
        Self::parse_canonical(s)
    }

    /// Reads a `wdatetime` value straight out of a stored document.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, TimestampError> {
        match value {
            serde_json::Value::String(s) => Self::parse_any(s),
            serde_json::Value::Number(n) => {
                let ms = n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
                    .ok_or(TimestampError::UnsupportedType)?;
                Self::from_epoch_millis(ms)
            }
            serde_json::Value::Null => Err(TimestampError::Empty),
            _ => Err(TimestampError::UnsupportedType),
        }
    }

    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }

    pub fn epoch_millis(&self) -> i64 {
        self.0.and_utc().timestamp_millis()
    }

    /// Second-precision canonical text. Drops any sub-second part; use
    /// `to_text` where the value must survive a round trip.
    pub fn to_canonical_string(&self) -> String {
        self.0.format(CANONICAL_FORMAT).to_string()
    }

    /// Lossless text: canonical when the value falls on a whole second,
    /// canonical with `.SSS` otherwise.
    pub fn to_text(&self) -> String {
        if self.epoch_millis().rem_euclid(1000) == 0 {
            self.to_canonical_string()
        } else {
            self.0.format(CANONICAL_MILLIS_FORMAT).to_string()
        }
    }

    /// Renders the timestamp the way `convention` stores it.
    pub fn native_string(&self, convention: TimestampConvention) -> String {
        match convention {
            TimestampConvention::Canonical => self.to_canonical_string(),
            TimestampConvention::EpochMillis => self.epoch_millis().to_string(),
        }
    }

    pub fn checked_add(&self, delta: TimeDelta) -> Option<Self> {
        self.0.checked_add_signed(delta).map(Timestamp)
    }

    /// `self - earlier`. Negative when `earlier` is actually later.
    pub fn since(&self, earlier: &Timestamp) -> TimeDelta {
        self.0 - earlier.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timestamp::parse_any(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_text())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Timestamp::from_json(&value).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Core data types for the site monitoring service.
///
/// This module defines the shared domain model imported by all other modules:
/// the measurement fields, the typed `Record`, and the conversion from a raw
/// stored document into a `Record`. Every field is optional; "missing" covers
/// absent keys, `null`, empty strings and values of the wrong type alike.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::timestamp::{Timestamp, TimestampConvention, TimestampError};

/// Document key holding the observation time in every collection.
pub const TIMESTAMP_KEY: &str = "wdatetime";

// ---------------------------------------------------------------------------
// Measurement fields
// ---------------------------------------------------------------------------

/// One of the numeric quantities reported by a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    TemperatureK,
    DewpointK,
    PressureKpa,
    RelhumidityPct,
    WinddirDeg,
    WindspeedMps,
    PwvMm,
    PhasermsDeg,
    Tau183ghz,
    Tau215ghz,
    Tau225ghz,
}

impl Field {
    pub const ALL: [Field; 11] = [
        Field::TemperatureK,
        Field::DewpointK,
        Field::PressureKpa,
        Field::RelhumidityPct,
        Field::WinddirDeg,
        Field::WindspeedMps,
        Field::PwvMm,
        Field::PhasermsDeg,
        Field::Tau183ghz,
        Field::Tau215ghz,
        Field::Tau225ghz,
    ];

    /// Document key / column name.
    pub fn key(&self) -> &'static str {
        match self {
            Field::TemperatureK => "temperature_k",
            Field::DewpointK => "dewpoint_k",
            Field::PressureKpa => "pressure_kpa",
            Field::RelhumidityPct => "relhumidity_pct",
            Field::WinddirDeg => "winddir_deg",
            Field::WindspeedMps => "windspeed_mps",
            Field::PwvMm => "pwv_mm",
            Field::PhasermsDeg => "phaserms_deg",
            Field::Tau183ghz => "tau183ghz",
            Field::Tau215ghz => "tau215ghz",
            Field::Tau225ghz => "tau225ghz",
        }
    }

    /// Human-readable label with unit, as shown on chart legends.
    pub fn label(&self) -> &'static str {
        match self {
            Field::TemperatureK => "Temperature (K)",
            Field::DewpointK => "Dew Point (K)",
            Field::PressureKpa => "Pressure (kPa)",
            Field::RelhumidityPct => "Relative Humidity (%)",
            Field::WinddirDeg => "Wind Direction (°)",
            Field::WindspeedMps => "Wind Speed (m/s)",
            Field::PwvMm => "PWV (mm)",
            Field::PhasermsDeg => "Phase RMS (°)",
            Field::Tau183ghz => "Tau 183 GHz",
            Field::Tau215ghz => "Tau 215 GHz",
            Field::Tau225ghz => "Tau 225 GHz",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown field: {0}")]
pub struct UnknownField(pub String);

impl FromStr for Field {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.key() == key)
            .ok_or_else(|| UnknownField(key.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A single observation from one site.
///
/// Serializes with the store's key names, so a `Record` can be returned to
/// the UI in the same shape the query layer always used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "wdatetime")]
    pub timestamp: Timestamp,
    pub temperature_k: Option<f64>,
    pub dewpoint_k: Option<f64>,
    pub pressure_kpa: Option<f64>,
    pub relhumidity_pct: Option<f64>,
    pub winddir_deg: Option<f64>,
    pub windspeed_mps: Option<f64>,
    pub pwv_mm: Option<f64>,
    pub phaserms_deg: Option<f64>,
    pub tau183ghz: Option<f64>,
    pub tau215ghz: Option<f64>,
    pub tau225ghz: Option<f64>,
}

/// Why a stored document could not become a `Record` at all.
///
/// Bad field values never land here; they are cleaned to `None`. Only a
/// document without a usable timestamp is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedRecord {
    #[error("document is not a JSON object")]
    NotAnObject,
    #[error("document has no wdatetime")]
    MissingTimestamp,
    #[error("invalid wdatetime: {0}")]
    InvalidTimestamp(#[from] TimestampError),
}

impl Record {
    /// A record at `timestamp` with every field missing.
    pub fn empty(timestamp: Timestamp) -> Self {
        Record {
            timestamp,
            temperature_k: None,
            dewpoint_k: None,
            pressure_kpa: None,
            relhumidity_pct: None,
            winddir_deg: None,
            windspeed_mps: None,
            pwv_mm: None,
            phaserms_deg: None,
            tau183ghz: None,
            tau215ghz: None,
            tau225ghz: None,
        }
    }

    pub fn value(&self, field: Field) -> Option<f64> {
        match field {
            Field::TemperatureK => self.temperature_k,
            Field::DewpointK => self.dewpoint_k,
            Field::PressureKpa => self.pressure_kpa,
            Field::RelhumidityPct => self.relhumidity_pct,
            Field::WinddirDeg => self.winddir_deg,
            Field::WindspeedMps => self.windspeed_mps,
            Field::PwvMm => self.pwv_mm,
            Field::PhasermsDeg => self.phaserms_deg,
            Field::Tau183ghz => self.tau183ghz,
            Field::Tau215ghz => self.tau215ghz,
            Field::Tau225ghz => self.tau225ghz,
        }
    }

    fn slot(&mut self, field: Field) -> &mut Option<f64> {
        match field {
            Field::TemperatureK => &mut self.temperature_k,
            Field::DewpointK => &mut self.dewpoint_k,
            Field::PressureKpa => &mut self.pressure_kpa,
            Field::RelhumidityPct => &mut self.relhumidity_pct,
            Field::WinddirDeg => &mut self.winddir_deg,
            Field::WindspeedMps => &mut self.windspeed_mps,
            Field::PwvMm => &mut self.pwv_mm,
            Field::PhasermsDeg => &mut self.phaserms_deg,
            Field::Tau183ghz => &mut self.tau183ghz,
            Field::Tau215ghz => &mut self.tau215ghz,
            Field::Tau225ghz => &mut self.tau225ghz,
        }
    }

    pub fn set(&mut self, field: Field, value: Option<f64>) {
        *self.slot(field) = value;
    }

    /// Builder-style `set`, handy for fixtures.
    pub fn with(mut self, field: Field, value: f64) -> Self {
        self.set(field, Some(value));
        self
    }

    /// Converts a stored document into a typed record.
    ///
    /// The timestamp may be in either storage convention. Field values that
    /// are absent, `null`, strings (including `""`), booleans or non-finite
    /// numbers all become `None`; zero stays zero.
    pub fn from_document(doc: &Value) -> Result<Self, MalformedRecord> {
        let obj = doc.as_object().ok_or(MalformedRecord::NotAnObject)?;
        let raw_ts = obj
            .get(TIMESTAMP_KEY)
            .ok_or(MalformedRecord::MissingTimestamp)?;
        let mut record = Record::empty(Timestamp::from_json(raw_ts)?);

        for field in Field::ALL {
            record.set(field, numeric_value(obj.get(field.key())));
        }
        Ok(record)
    }

    /// Renders the record as a stored document using `convention` for the
    /// timestamp. Missing fields are written as `null`.
    pub fn to_document(&self, convention: TimestampConvention) -> Value {
        let mut obj = Map::new();
        obj.insert(
            TIMESTAMP_KEY.to_string(),
            Value::String(self.timestamp.native_string(convention)),
        );
        for field in Field::ALL {
            let v = self
                .value(field)
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null);
            obj.insert(field.key().to_string(), v);
        }
        Value::Object(obj)
    }
}

fn numeric_value(raw: Option<&Value>) -> Option<f64> {
    match raw {
        Some(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Ordering metadata
// ---------------------------------------------------------------------------

/// Order of the records in a fetch response.
///
/// Callers must check this: the newest-first window and the unsorted sample
/// tier do not come back ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrder {
    Ascending,
    NewestFirst,
    Unspecified,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

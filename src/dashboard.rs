//! Dashboard state and view composition.
//!
//! `DashboardState` holds the user's preferences and the last result. It is
//! plain data with explicit transitions; the only I/O is `StateStore`, which
//! loads and saves it as a JSON file. `build_view` turns the state plus a
//! fetch outcome into what the chart renderer draws: processed series per
//! selected field, optional statistics, and a notice that tells an empty
//! result apart from a failed one.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::analysis::{
    CorrelationMatrix, FieldSummary, MovingAverageWindow, ProcessedSeries, SeriesOptions,
    correlation_matrix, process_series, summarize_fields,
};
use crate::fetch::{FetchError, FetchResponse, FetchStrategy};
use crate::logging::Component;
use crate::model::{Field, Record};
use crate::query::{WeatherQuery, is_valid_date_format};

pub const DEFAULT_COLLECTION: &str = "apex_2006_2023";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardState {
    pub theme: Theme,
    pub collection: String,
    pub selected_fields: Vec<Field>,
    pub show_moving_average: bool,
    pub show_only_moving_average: bool,
    /// Window size as typed; parsed on use.
    pub moving_average_input: String,
    pub interpolate: bool,
    pub show_anomalies: bool,
    pub anomaly_threshold: f64,
    pub show_statistics: bool,
    pub show_correlation: bool,
    pub start_date: String,
    pub end_date: String,
    pub last_result: Option<FetchResponse>,
}

impl Default for DashboardState {
    fn default() -> Self {
        DashboardState {
            theme: Theme::Light,
            collection: DEFAULT_COLLECTION.to_string(),
            selected_fields: Vec::new(),
            show_moving_average: false,
            show_only_moving_average: false,
            moving_average_input: MovingAverageWindow::default().get().to_string(),
            interpolate: false,
            show_anomalies: false,
            anomaly_threshold: crate::analysis::series::DEFAULT_ANOMALY_THRESHOLD,
            show_statistics: false,
            show_correlation: false,
            start_date: String::new(),
            end_date: String::new(),
            last_result: None,
        }
    }
}

impl DashboardState {
    /// Adds or removes a field. Any change of selection switches the moving
    /// average views off.
    pub fn toggle_field(&mut self, field: Field) {
        if let Some(pos) = self.selected_fields.iter().position(|f| *f == field) {
            self.selected_fields.remove(pos);
        } else {
            self.selected_fields.push(field);
        }
        self.show_moving_average = false;
        self.show_only_moving_average = false;
    }

    pub fn toggle_moving_average(&mut self) {
        self.show_moving_average = !self.show_moving_average;
        if !self.show_moving_average {
            self.show_only_moving_average = false;
        }
    }

    pub fn toggle_only_moving_average(&mut self) {
        self.show_only_moving_average = !self.show_only_moving_average;
    }

    pub fn set_moving_average_input(&mut self, input: &str) {
        self.moving_average_input = input.trim().to_string();
    }

    pub fn toggle_theme(&mut self) {
        self.theme = match self.theme {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        };
    }

    /// Switching site drops the cached result of the previous one.
    pub fn select_collection(&mut self, collection: &str) {
        if self.collection != collection {
            self.collection = collection.to_string();
            self.last_result = None;
        }
    }

    pub fn set_date_range(&mut self, start: &str, end: &str) {
        self.start_date = start.trim().to_string();
        self.end_date = end.trim().to_string();
    }

    /// Both dates present and well formed.
    pub fn date_range_ready(&self) -> bool {
        is_valid_date_format(&self.start_date) && is_valid_date_format(&self.end_date)
    }

    pub fn moving_average_window(&self) -> Option<MovingAverageWindow> {
        if self.show_moving_average {
            MovingAverageWindow::parse(&self.moving_average_input)
        } else {
            None
        }
    }

    pub fn series_options(&self) -> SeriesOptions {
        let mut options = SeriesOptions {
            interpolate: self.interpolate,
            moving_average: self.moving_average_window(),
            anomaly_threshold: None,
        };
        if self.show_anomalies {
            options = options.with_anomaly_threshold(self.anomaly_threshold);
        }
        options
    }

    pub fn weather_query(&self, limit: Option<i64>) -> WeatherQuery {
        WeatherQuery {
            collection: self.collection.clone(),
            limit,
            start_date: Some(self.start_date.clone()),
            end_date: Some(self.end_date.clone()),
        }
    }

    pub fn remember_result(&mut self, response: FetchResponse) {
        if response.collection == self.collection {
            self.last_result = Some(response);
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt dashboard state: {0}")]
    Parse(#[from] serde_json::Error),
}

/// JSON file holding one `DashboardState`.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StateError {
        StateError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// A missing file is a fresh dashboard, not an error.
    pub fn load(&self) -> Result<DashboardState, StateError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DashboardState::default()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    pub fn load_or_default(&self) -> DashboardState {
        self.load().unwrap_or_else(|err| {
            warn!(
                component = %Component::Dashboard,
                path = %self.path.display(),
                "falling back to default dashboard state: {}", err
            );
            DashboardState::default()
        })
    }

    /// Writes to a sibling temp file, then renames over the target.
    pub fn save(&self, state: &DashboardState) -> Result<(), StateError> {
        let text = serde_json::to_string_pretty(state)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        debug!(component = %Component::Dashboard, path = %self.path.display(), "dashboard state saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ViewNotice {
    /// The query ran and matched nothing.
    NoData,
    /// No field is selected yet.
    NoFieldsSelected,
    /// The query could not run.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub collection: String,
    pub record_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<FetchStrategy>,
    pub series: Vec<ProcessedSeries>,
    pub show_only_moving_average: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Vec<FieldSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<CorrelationMatrix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<ViewNotice>,
}

impl DashboardView {
    fn bare(collection: &str, notice: ViewNotice) -> Self {
        DashboardView {
            collection: collection.to_string(),
            record_count: 0,
            tier: None,
            series: Vec::new(),
            show_only_moving_average: false,
            statistics: None,
            correlation: None,
            notice: Some(notice),
        }
    }
}

/// Composes the view for `state` from a fetch outcome.
///
/// Series are always built on chronologically ordered records, whatever
/// order the fetch tier returned them in.
pub fn build_view(state: &DashboardState, outcome: &Result<FetchResponse, FetchError>) -> DashboardView {
    let response = match outcome {
        Ok(response) => response,
        Err(err) => return DashboardView::bare(&state.collection, ViewNotice::Error(err.to_string())),
    };
    if response.is_empty() {
        return DashboardView::bare(&response.collection, ViewNotice::NoData);
    }

    let mut records: Vec<Record> = response.records.clone();
    records.sort_by_key(|r| r.timestamp);

    let fields = &state.selected_fields;
    let options = state.series_options();
    let series: Vec<ProcessedSeries> = fields
        .iter()
        .map(|&field| process_series(&records, field, &options))
        .collect();

    let statistics = (state.show_statistics && !fields.is_empty())
        .then(|| summarize_fields(&records, fields));
    let correlation = (state.show_correlation && fields.len() >= 2)
        .then(|| correlation_matrix(&records, fields));

    DashboardView {
        collection: response.collection.clone(),
        record_count: records.len(),
        tier: response.tier,
        series,
        show_only_moving_average: state.show_only_moving_average && options.moving_average.is_some(),
        statistics,
        correlation,
        notice: fields.is_empty().then_some(ViewNotice::NoFieldsSelected),
    }
}

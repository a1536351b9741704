/// Per-field series derivation: cleaning, gap interpolation, the
/// zero-excluding moving average and Z-score anomaly flags.
///
/// Every function here is pure and index-aligned with its input: output
/// position `i` always describes record `i`. Nothing in this module fails on
/// bad input; invalid parameters switch the corresponding feature off.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::model::{Field, Record};
use crate::timestamp::Timestamp;

/// Below this population standard deviation no value is flagged.
pub const MIN_ANOMALY_STD_DEV: f64 = 1e-4;

pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 3.0;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Trailing window length for the moving average, always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovingAverageWindow(NonZeroUsize);

impl MovingAverageWindow {
    pub const DEFAULT: MovingAverageWindow = MovingAverageWindow(match NonZeroUsize::new(5) {
        Some(n) => n,
        None => NonZeroUsize::MIN,
    });

    /// `None` for zero or negative sizes.
    pub fn new(size: i64) -> Option<Self> {
        usize::try_from(size)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(MovingAverageWindow)
    }

    /// Reads a window size typed by a user. Anything that is not a positive
    /// integer (empty, `"0"`, `"-3"`, `"abc"`, `"2.5"`) yields `None`, which
    /// callers treat as "moving average off".
    pub fn parse(input: &str) -> Option<Self> {
        input.trim().parse::<i64>().ok().and_then(Self::new)
    }

    pub fn get(&self) -> usize {
        self.0.get()
    }
}

impl Default for MovingAverageWindow {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// An anomaly threshold is usable only when finite and positive.
pub fn valid_threshold(threshold: f64) -> Option<f64> {
    (threshold.is_finite() && threshold > 0.0).then_some(threshold)
}

/// Which derived series to compute for one field.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SeriesOptions {
    pub interpolate: bool,
    pub moving_average: Option<MovingAverageWindow>,
    pub anomaly_threshold: Option<f64>,
}

impl SeriesOptions {
    pub fn with_interpolation(mut self) -> Self {
        self.interpolate = true;
        self
    }

    pub fn with_moving_average(mut self, window: MovingAverageWindow) -> Self {
        self.moving_average = Some(window);
        self
    }

    /// Invalid thresholds leave anomaly detection off.
    pub fn with_anomaly_threshold(mut self, threshold: f64) -> Self {
        self.anomaly_threshold = valid_threshold(threshold);
        self
    }
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// The values of `field`, one per record. Missing stays `None`, zero stays
/// zero.
pub fn clean_values(records: &[Record], field: Field) -> Vec<Option<f64>> {
    records
        .iter()
        .map(|r| r.value(field).filter(|v| v.is_finite()))
        .collect()
}

/// Fills interior gaps on the straight line between the nearest known
/// neighbours. Leading and trailing gaps are left as `None`.
pub fn linear_interpolation(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = values.to_vec();
    let mut i = 0;
    while i < out.len() {
        if out[i].is_some() {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < out.len() && out[j].is_none() {
            j += 1;
        }
        let before = if i > 0 { out[i - 1] } else { None };
        let after = out.get(j).copied().flatten();
        if let (Some(before), Some(after)) = (before, after) {
            let steps = (j - (i - 1)) as f64;
            for k in i..j {
                let step = (k - (i - 1)) as f64;
                out[k] = Some(before + (after - before) * (step / steps));
            }
        }
        i = j;
    }
    out
}

/// Trailing mean over at most `window` samples ending at each index.
///
/// Missing values and exact zeros are left out of every window. A window
/// with nothing left yields `None`.
pub fn moving_average(values: &[Option<f64>], window: MovingAverageWindow) -> Vec<Option<f64>> {
    let w = window.get();
    (0..values.len())
        .map(|i| {
            let from = (i + 1).saturating_sub(w);
            let (sum, n) = values[from..=i]
                .iter()
                .flatten()
                .filter(|v| **v != 0.0)
                .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
            (n > 0).then(|| sum / n as f64)
        })
        .collect()
}

/// Flags values whose Z-score magnitude exceeds `threshold`.
///
/// Mean and population standard deviation are taken over the present
/// values. Missing values are never flagged. Fewer than two samples, or a
/// standard deviation under `MIN_ANOMALY_STD_DEV`, flags nothing.
pub fn detect_anomalies(values: &[Option<f64>], threshold: f64) -> Vec<bool> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let none = vec![false; values.len()];
    if present.len() < 2 {
        return none;
    }

    let n = present.len() as f64;
    let mean = present.iter().sum::<f64>() / n;
    let variance = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    if std_dev < MIN_ANOMALY_STD_DEV {
        return none;
    }

    values
        .iter()
        .map(|v| v.is_some_and(|v| ((v - mean) / std_dev).abs() > threshold))
        .collect()
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Everything derived for one field of one result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSeries {
    pub field: Field,
    pub timestamps: Vec<Timestamp>,
    pub values: Vec<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpolated: Option<Vec<Option<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moving_average: Option<Vec<Option<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomalies: Option<Vec<bool>>,
}

impl ProcessedSeries {
    /// The line a chart draws: interpolated when available.
    pub fn display_values(&self) -> &[Option<f64>] {
        self.interpolated.as_deref().unwrap_or(&self.values)
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomalies
            .as_ref()
            .map_or(0, |flags| flags.iter().filter(|f| **f).count())
    }
}

/// clean, then interpolate, then moving average on whichever of the two is
/// displayed. Anomalies always look at the cleaned values.
pub fn process_series(records: &[Record], field: Field, options: &SeriesOptions) -> ProcessedSeries {
    let values = clean_values(records, field);
    let interpolated = options.interpolate.then(|| linear_interpolation(&values));
    let base = interpolated.as_deref().unwrap_or(&values);
    let moving_average = options.moving_average.map(|w| moving_average(base, w));
    let anomalies = options
        .anomaly_threshold
        .and_then(valid_threshold)
        .map(|t| detect_anomalies(&values, t));

    ProcessedSeries {
        field,
        timestamps: records.iter().map(|r| r.timestamp).collect(),
        values,
        interpolated,
        moving_average,
        anomalies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(n: i64) -> MovingAverageWindow {
        MovingAverageWindow::new(n).unwrap()
    }

    #[test]
    fn test_interpolation_fills_interior_gap() {
        let out = linear_interpolation(&[Some(5.0), None, None, Some(11.0)]);
        assert_eq!(out, vec![Some(5.0), Some(7.0), Some(9.0), Some(11.0)]);
    }

    #[test]
    fn test_interpolation_never_extrapolates() {
        let out = linear_interpolation(&[None, Some(5.0), None]);
        assert_eq!(out, vec![None, Some(5.0), None]);
        assert!(linear_interpolation(&[]).is_empty());
        assert_eq!(linear_interpolation(&[None, None]), vec![None, None]);
    }

    #[test]
    fn test_interpolation_handles_several_gaps() {
        let out = linear_interpolation(&[Some(0.0), None, Some(2.0), None, None, Some(8.0)]);
        assert_eq!(
            out,
            vec![Some(0.0), Some(1.0), Some(2.0), Some(4.0), Some(6.0), Some(8.0)]
        );
    }

    #[test]
    fn test_moving_average_excludes_zero_and_missing() {
        let out = moving_average(&[Some(1.0), Some(0.0), Some(3.0), None, Some(5.0)], window(3));
        assert_eq!(out, vec![Some(1.0), Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
    }

    #[test]
    fn test_moving_average_of_only_zeros_is_none() {
        let out = moving_average(&[Some(0.0), None, Some(0.0)], window(2));
        assert_eq!(out, vec![None, None, None]);
    }

    #[test]
    fn test_window_of_one_echoes_nonzero_values() {
        let out = moving_average(&[Some(2.0), Some(0.0), Some(4.0)], window(1));
        assert_eq!(out, vec![Some(2.0), None, Some(4.0)]);
    }

    #[test]
    fn test_anomaly_flags_outlier() {
        // z(100) is just under 2 with a population std dev.
        let values = [Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(100.0)];
        assert_eq!(
            detect_anomalies(&values, 1.9),
            vec![false, false, false, false, true]
        );
        assert_eq!(detect_anomalies(&values, 2.0), vec![false; 5]);
    }

    #[test]
    fn test_anomaly_degenerate_inputs_flag_nothing() {
        assert_eq!(detect_anomalies(&[Some(5.0), None], 0.1), vec![false, false]);
        assert_eq!(
            detect_anomalies(&[Some(5.0), Some(5.0), Some(5.00001)], 0.1),
            vec![false, false, false]
        );
        assert!(detect_anomalies(&[], 3.0).is_empty());
    }

    #[test]
    fn test_missing_values_never_flagged() {
        let flags = detect_anomalies(&[Some(1.0), None, Some(1.0), Some(50.0)], 1.0);
        assert!(!flags[1]);
        assert!(flags[3]);
    }

    #[test]
    fn test_window_parsing_policy() {
        assert_eq!(MovingAverageWindow::parse("3"), Some(window(3)));
        assert_eq!(MovingAverageWindow::parse(" 12 "), Some(window(12)));
        assert_eq!(MovingAverageWindow::parse("0"), None);
        assert_eq!(MovingAverageWindow::parse("-4"), None);
        assert_eq!(MovingAverageWindow::parse(""), None);
        assert_eq!(MovingAverageWindow::parse("five"), None);
        assert_eq!(MovingAverageWindow::parse("2.5"), None);
        assert_eq!(MovingAverageWindow::default().get(), 5);
    }

    #[test]
    fn test_invalid_threshold_disables_anomalies() {
        assert!(SeriesOptions::default().with_anomaly_threshold(0.0).anomaly_threshold.is_none());
        assert!(SeriesOptions::default().with_anomaly_threshold(f64::NAN).anomaly_threshold.is_none());
        assert!(SeriesOptions::default().with_anomaly_threshold(-1.0).anomaly_threshold.is_none());
        assert_eq!(
            SeriesOptions::default().with_anomaly_threshold(2.5).anomaly_threshold,
            Some(2.5)
        );
    }

    #[test]
    fn test_pipeline_averages_interpolated_line_and_flags_raw() {
        let base = Timestamp::parse_canonical("2022-01-01 00:00:00").unwrap();
        let records: Vec<Record> = [Some(2.0), None, Some(6.0)]
            .iter()
            .map(|v| {
                let mut r = Record::empty(base);
                r.set(Field::PwvMm, *v);
                r
            })
            .collect();
        let options = SeriesOptions::default()
            .with_interpolation()
            .with_moving_average(window(2))
            .with_anomaly_threshold(3.0);
        let series = process_series(&records, Field::PwvMm, &options);

        assert_eq!(series.values, vec![Some(2.0), None, Some(6.0)]);
        assert_eq!(series.display_values(), &[Some(2.0), Some(4.0), Some(6.0)]);
        assert_eq!(
            series.moving_average,
            Some(vec![Some(2.0), Some(3.0), Some(5.0)])
        );
        assert_eq!(series.anomalies, Some(vec![false, false, false]));
        assert_eq!(series.timestamps.len(), 3);
    }

    #[test]
    fn test_pipeline_with_nothing_enabled() {
        let series = process_series(&[], Field::TemperatureK, &SeriesOptions::default());
        assert!(series.values.is_empty());
        assert!(series.interpolated.is_none());
        assert!(series.moving_average.is_none());
        assert!(series.anomalies.is_none());
        assert_eq!(series.anomaly_count(), 0);
    }
}

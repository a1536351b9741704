/// Derived analytics over a fetched result set.
///
/// Everything here is a pure function of the records handed in. The fetcher
/// and the dashboard call into these modules; nothing here talks to a store.
///
/// Submodules:
/// - `series`: cleaning, interpolation, moving average, anomaly flags.
/// - `statistics`: per-field summaries and the correlation matrix.
/// - `alignment`: one field across several sites on a shared time axis.

pub mod alignment;
pub mod series;
pub mod statistics;

pub use alignment::{AlignedSeries, SiteColumn, align_sites};
pub use series::{
    MovingAverageWindow, ProcessedSeries, SeriesOptions, clean_values, detect_anomalies,
    linear_interpolation, moving_average, process_series,
};
pub use statistics::{
    CorrelationMatrix, FieldSummary, correlation_matrix, pearson_correlation, summarize,
    summarize_fields,
};

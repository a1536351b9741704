//! Query, aggregation and derived statistics for time-series weather data
//! recorded at astronomical observation sites.
//!
//! Data flow: `query` → `fetch` (fallback chain over a `store::RecordStore`)
//! → typed `model::Record`s → `analysis` (series, statistics, multi-site
//! alignment) → `dashboard` view.

pub mod analysis;
pub mod config;
pub mod dashboard;
pub mod fetch;
pub mod logging;
pub mod model;
pub mod query;
pub mod sites;
pub mod store;
pub mod timestamp;
pub mod verify;

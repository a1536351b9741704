//! Record store seam.
//!
//! The store holds one partition per site and understands exactly the query
//! shapes the fetcher needs: a time filter, an optional sort on the
//! timestamp, a limit, and a random sample. Every call carries a time budget;
//! an implementation that cannot answer in time returns
//! `StoreError::Timeout` rather than blocking past it.
//!
//! Implementations:
//! - `memory`: in-process store used by tests and local development.
//! - `postgres`: one table per collection, budgets enforced with
//!   `statement_timeout`.
//!
//! Stores hand back raw JSON documents. Turning them into `Record`s
//! (timestamp adapter, field cleaning) is the fetcher's job.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::sites::Site;
use crate::timestamp::Timestamp;

pub use memory::InMemoryStore;
pub use self::postgres::PgRecordStore;

/// A raw stored document, as the store returns it.
pub type Document = Value;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query exceeded its {budget_ms} ms budget")]
    Timeout { budget_ms: u64 },
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("partition not found: {0}")]
    MissingPartition(String),
    #[error("database error: {0}")]
    Database(#[from] ::postgres::Error),
}

impl StoreError {
    pub fn timeout(budget: Duration) -> Self {
        StoreError::Timeout {
            budget_ms: budget.as_millis() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Query shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Time window on the `wdatetime` key. `start` is always inclusive; `end` is
/// inclusive unless `end_exclusive` is set (chunk boundaries).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeFilter {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub end_exclusive: bool,
}

impl TimeFilter {
    pub fn unbounded() -> Self {
        TimeFilter::default()
    }

    pub fn new(start: Option<Timestamp>, end: Option<Timestamp>) -> Self {
        TimeFilter {
            start,
            end,
            end_exclusive: false,
        }
    }

    /// `[start, end]`
    pub fn closed(start: Timestamp, end: Timestamp) -> Self {
        TimeFilter::new(Some(start), Some(end))
    }

    /// `[start, end)`
    pub fn half_open(start: Timestamp, end: Timestamp) -> Self {
        TimeFilter {
            start: Some(start),
            end: Some(end),
            end_exclusive: true,
        }
    }

    pub fn at(instant: Timestamp) -> Self {
        TimeFilter::closed(instant, instant)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, ts: &Timestamp) -> bool {
        if let Some(start) = &self.start {
            if ts < start {
                return false;
            }
        }
        match &self.end {
            Some(end) if self.end_exclusive => ts < end,
            Some(end) => ts <= end,
            None => true,
        }
    }
}

/// A find/sort/limit query against one partition. `sort: None` means the
/// store's natural order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub filter: TimeFilter,
    pub sort: Option<SortOrder>,
    pub limit: usize,
}

impl RangeQuery {
    pub fn ascending(filter: TimeFilter, limit: usize) -> Self {
        RangeQuery {
            filter,
            sort: Some(SortOrder::Ascending),
            limit,
        }
    }

    pub fn descending(filter: TimeFilter, limit: usize) -> Self {
        RangeQuery {
            filter,
            sort: Some(SortOrder::Descending),
            limit,
        }
    }

    pub fn natural(filter: TimeFilter, limit: usize) -> Self {
        RangeQuery {
            filter,
            sort: None,
            limit,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

pub trait RecordStore {
    /// Documents in `site`'s partition matching `query`.
    fn find(
        &mut self,
        site: &Site,
        query: &RangeQuery,
        budget: Duration,
    ) -> Result<Vec<Document>, StoreError>;

    /// Up to `size` documents drawn at random from those matching `filter`,
    /// in no particular order. The draw is a function of `seed`: the same
    /// seed over unchanged data picks the same documents.
    fn sample(
        &mut self,
        site: &Site,
        filter: &TimeFilter,
        size: usize,
        seed: u64,
        budget: Duration,
    ) -> Result<Vec<Document>, StoreError>;

    /// Any single document matching `filter`.
    fn find_one(
        &mut self,
        site: &Site,
        filter: &TimeFilter,
        budget: Duration,
    ) -> Result<Option<Document>, StoreError> {
        let docs = self.find(site, &RangeQuery::natural(*filter, 1), budget)?;
        Ok(docs.into_iter().next())
    }

    /// The document stamped exactly `instant`, if any.
    fn find_at(
        &mut self,
        site: &Site,
        instant: &Timestamp,
        budget: Duration,
    ) -> Result<Option<Document>, StoreError> {
        self.find_one(site, &TimeFilter::at(*instant), budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_canonical(s).unwrap()
    }

    #[test]
    fn test_closed_filter_includes_both_ends() {
        let f = TimeFilter::closed(ts("2020-01-01 00:00:00"), ts("2020-01-02 00:00:00"));
        assert!(f.contains(&ts("2020-01-01 00:00:00")));
        assert!(f.contains(&ts("2020-01-02 00:00:00")));
        assert!(!f.contains(&ts("2020-01-02 00:00:01")));
        assert!(!f.contains(&ts("2019-12-31 23:59:59")));
    }

    #[test]
    fn test_half_open_filter_excludes_end() {
        let f = TimeFilter::half_open(ts("2020-01-01 00:00:00"), ts("2020-01-02 00:00:00"));
        assert!(f.contains(&ts("2020-01-01 00:00:00")));
        assert!(!f.contains(&ts("2020-01-02 00:00:00")));
    }

    #[test]
    fn test_one_sided_filters() {
        let after = TimeFilter::new(Some(ts("2020-01-01 00:00:00")), None);
        assert!(after.contains(&ts("2030-01-01 00:00:00")));
        assert!(!after.contains(&ts("2019-01-01 00:00:00")));

        let before = TimeFilter::new(None, Some(ts("2020-01-01 00:00:00")));
        assert!(before.contains(&ts("1999-01-01 00:00:00")));
        assert!(!before.contains(&ts("2020-01-01 00:00:01")));

        assert!(TimeFilter::unbounded().is_unbounded());
    }
}

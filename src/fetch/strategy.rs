/// Fallback tiers of the range fetcher.
///
/// A request is planned into an ordered list of strategies. The primary
/// tiers depend on which bounds were given; the sample tiers are appended to
/// every plan and only run when the primary tiers found nothing.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::FetchConfig;
use crate::model::RecordOrder;
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// One bounded, ascending range query. Small caps only.
    DirectRange,
    /// Sequential equal-width sub-window queries over `[start, end]`.
    ChunkedScan,
    /// Ascending query on `timestamp >= start`.
    StartBounded,
    /// Ascending query on `timestamp <= end`.
    EndBounded,
    /// Newest records first, no bounds.
    NewestFirst,
    /// Random sample, re-sorted ascending.
    RandomSample,
    /// First records in the store's natural order.
    FirstRecords,
    /// Any one record.
    SingleRecord,
}

impl FetchStrategy {
    pub const SAMPLE_TIERS: [FetchStrategy; 3] = [
        FetchStrategy::RandomSample,
        FetchStrategy::FirstRecords,
        FetchStrategy::SingleRecord,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FetchStrategy::DirectRange => "direct_range",
            FetchStrategy::ChunkedScan => "chunked_scan",
            FetchStrategy::StartBounded => "start_bounded",
            FetchStrategy::EndBounded => "end_bounded",
            FetchStrategy::NewestFirst => "newest_first",
            FetchStrategy::RandomSample => "random_sample",
            FetchStrategy::FirstRecords => "first_records",
            FetchStrategy::SingleRecord => "single_record",
        }
    }

    /// Order of the records this tier hands back after finalisation.
    pub fn order(&self) -> RecordOrder {
        match self {
            FetchStrategy::NewestFirst => RecordOrder::NewestFirst,
            FetchStrategy::FirstRecords => RecordOrder::Unspecified,
            _ => RecordOrder::Ascending,
        }
    }

    pub fn is_sample_tier(&self) -> bool {
        Self::SAMPLE_TIERS.contains(self)
    }

    /// Time budget for one store call made by this tier.
    pub fn budget(&self, config: &FetchConfig) -> Duration {
        match self {
            FetchStrategy::ChunkedScan => config.chunk_timeout(),
            FetchStrategy::RandomSample
            | FetchStrategy::FirstRecords
            | FetchStrategy::SingleRecord => config.sample_timeout(),
            _ => config.direct_timeout(),
        }
    }

    /// Whether a non-empty result of `returned` records ends the chain.
    ///
    /// A direct range query is only trusted when it filled the cap; anything
    /// short of that may mean the query was cut off, so the chunked scan
    /// still runs.
    pub fn accepts(&self, returned: usize, cap: usize) -> bool {
        match self {
            FetchStrategy::DirectRange => returned >= cap,
            _ => returned > 0,
        }
    }
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered tier list for a request.
pub fn plan(
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    cap: usize,
    config: &FetchConfig,
) -> Vec<FetchStrategy> {
    let mut chain = match (start, end) {
        (Some(_), Some(_)) if cap <= config.small_cap_threshold => {
            vec![FetchStrategy::DirectRange, FetchStrategy::ChunkedScan]
        }
        (Some(_), Some(_)) => vec![FetchStrategy::ChunkedScan],
        (Some(_), None) => vec![FetchStrategy::StartBounded],
        (None, Some(_)) => vec![FetchStrategy::EndBounded],
        (None, None) => vec![FetchStrategy::NewestFirst],
    };
    chain.extend(FetchStrategy::SAMPLE_TIERS);
    chain
}

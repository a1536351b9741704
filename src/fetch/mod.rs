//! Range fetcher.
//!
//! Turns `{collection, window, cap}` into a bounded list of typed records.
//! The request is planned into an ordered list of `FetchStrategy` tiers and
//! the chain loop runs them in order:
//!
//! - a tier that fails is logged and the chain moves on;
//! - a non-empty result that the tier accepts ends the chain;
//! - a short direct range result is kept as a partial and the chunked scan
//!   still runs; the larger of the two wins;
//! - the sample tiers only run when every primary tier came back empty.
//!
//! The only error a caller ever sees is `FetchError::UnknownCollection`.
//! Whatever tier produced the records, the response never holds more than
//! `cap` records and never a record outside the requested window.

mod chunks;
mod strategy;

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::FetchConfig;
use crate::logging::{Component, log_fetch_summary, log_store_failure, log_tier_timing};
use crate::model::{Record, RecordOrder};
use crate::sites::{Site, SiteRegistry};
use crate::store::{Document, RangeQuery, RecordStore, StoreError, TimeFilter};
use crate::timestamp::Timestamp;

pub use chunks::split_window;
pub use strategy::{FetchStrategy, plan};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("unknown collection: {0}")]
    UnknownCollection(String),
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub collection: String,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    /// `None` or `Some(0)` means the configured default.
    pub limit: Option<usize>,
}

impl FetchRequest {
    pub fn new(collection: &str) -> Self {
        FetchRequest {
            collection: collection.to_string(),
            ..FetchRequest::default()
        }
    }

    pub fn with_window(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn with_start(mut self, start: Timestamp) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_end(mut self, end: Timestamp) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn window(&self) -> TimeFilter {
        TimeFilter::new(self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    /// Correlation id shared by every log event of this request.
    pub request_id: String,
    pub collection: String,
    pub records: Vec<Record>,
    pub order: RecordOrder,
    /// Tier that produced `records`; `None` when every tier came back empty.
    pub tier: Option<FetchStrategy>,
    pub cap: usize,
}

impl FetchResponse {
    pub fn empty(request_id: &str, collection: &str, cap: usize) -> Self {
        FetchResponse {
            request_id: request_id.to_string(),
            collection: collection.to_string(),
            records: Vec::new(),
            order: RecordOrder::Ascending,
            tier: None,
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn resolve_site<'a>(sites: &'a SiteRegistry, collection: &str) -> Result<&'a Site, FetchError> {
    sites
        .find(collection)
        .ok_or_else(|| FetchError::UnknownCollection(collection.to_string()))
}

/// Cap actually applied to a request.
pub fn effective_cap(limit: Option<usize>, config: &FetchConfig) -> usize {
    match limit {
        Some(n) if n > 0 => n,
        _ => config.default_limit,
    }
}

// ---------------------------------------------------------------------------
// Chain loop
// ---------------------------------------------------------------------------

pub fn fetch_records<S>(
    store: &mut S,
    sites: &SiteRegistry,
    config: &FetchConfig,
    request: &FetchRequest,
) -> Result<FetchResponse, FetchError>
where
    S: RecordStore + ?Sized,
{
    let site = resolve_site(sites, &request.collection)?;
    let cap = effective_cap(request.limit, config);
    let request_id = Uuid::new_v4().to_string();
    let started = Instant::now();
    let collection = site.collection_id.as_str();

    if let (Some(start), Some(end)) = (request.start, request.end) {
        if start > end {
            warn!(
                component = %Component::Fetcher,
                request_id = %request_id,
                collection,
                %start,
                %end,
                "window start is after its end, nothing to fetch"
            );
            return Ok(FetchResponse::empty(&request_id, collection, cap));
        }
    }

    let window = request.window();
    let mut best: Option<(FetchStrategy, Vec<Record>)> = None;

    for strategy in plan(request.start, request.end, cap, config) {
        if strategy.is_sample_tier() && best.is_some() {
            break;
        }
        let tier_started = Instant::now();
        match run_strategy(store, site, config, strategy, &window, cap, &request_id) {
            Ok(records) => {
                log_tier_timing(
                    &request_id,
                    collection,
                    strategy.name(),
                    records.len(),
                    tier_started.elapsed(),
                );
                if records.is_empty() {
                    continue;
                }
                let accepted = strategy.accepts(records.len(), cap);
                best = Some(match best.take() {
                    Some(kept) if kept.1.len() >= records.len() => kept,
                    _ => (strategy, records),
                });
                if accepted {
                    break;
                }
            }
            Err(err) => log_store_failure(&request_id, collection, strategy.name(), &err),
        }
    }

    let response = match best {
        Some((strategy, records)) => FetchResponse {
            request_id: request_id.clone(),
            collection: collection.to_string(),
            records: finalize(strategy, records, cap),
            order: strategy.order(),
            tier: Some(strategy),
            cap,
        },
        None => FetchResponse::empty(&request_id, collection, cap),
    };

    log_fetch_summary(
        &request_id,
        collection,
        response.tier.map(|t| t.name()),
        response.len(),
        cap,
        started.elapsed(),
    );
    Ok(response)
}

fn sample_size(cap: usize, config: &FetchConfig) -> usize {
    cap.min(config.sample_size)
}

/// Seed for the random-sample tier, derived from the request alone so an
/// identical request draws the same sample.
fn sample_seed(collection: &str, window: &TimeFilter, size: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    collection.hash(&mut hasher);
    window.start.map(|t| t.epoch_millis()).hash(&mut hasher);
    window.end.map(|t| t.epoch_millis()).hash(&mut hasher);
    window.end_exclusive.hash(&mut hasher);
    size.hash(&mut hasher);
    hasher.finish()
}

fn run_strategy<S>(
    store: &mut S,
    site: &Site,
    config: &FetchConfig,
    strategy: FetchStrategy,
    window: &TimeFilter,
    cap: usize,
    request_id: &str,
) -> Result<Vec<Record>, StoreError>
where
    S: RecordStore + ?Sized,
{
    let budget = strategy.budget(config);
    let docs = match strategy {
        FetchStrategy::DirectRange | FetchStrategy::StartBounded | FetchStrategy::EndBounded => {
            store.find(site, &RangeQuery::ascending(*window, cap), budget)?
        }
        FetchStrategy::ChunkedScan => match (window.start, window.end) {
            (Some(start), Some(end)) => {
                let windows = split_window(start, end, config.chunk_count);
                chunks::scan(store, site, &windows, cap, budget, request_id)?
            }
            _ => Vec::new(),
        },
        FetchStrategy::NewestFirst => {
            store.find(site, &RangeQuery::descending(*window, cap), budget)?
        }
        FetchStrategy::RandomSample => {
            let size = sample_size(cap, config);
            let seed = sample_seed(&site.collection_id, window, size);
            store.sample(site, window, size, seed, budget)?
        }
        FetchStrategy::FirstRecords => store.find(
            site,
            &RangeQuery::natural(*window, sample_size(cap, config)),
            budget,
        )?,
        FetchStrategy::SingleRecord => store.find_one(site, window, budget)?.into_iter().collect(),
    };
    Ok(to_records(docs, window, request_id, &site.collection_id))
}

/// Documents to records. Unreadable documents and anything outside the
/// window are dropped here.
fn to_records(docs: Vec<Document>, window: &TimeFilter, request_id: &str, collection: &str) -> Vec<Record> {
    let mut records = Vec::with_capacity(docs.len());
    let mut dropped = 0usize;
    for doc in &docs {
        match Record::from_document(doc) {
            Ok(record) if window.contains(&record.timestamp) => records.push(record),
            Ok(_) => dropped += 1,
            Err(err) => {
                debug!(
                    component = %Component::Fetcher,
                    request_id,
                    collection,
                    "dropping document: {}", err
                );
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        debug!(
            component = %Component::Fetcher,
            request_id,
            collection,
            dropped,
            "documents dropped at the boundary"
        );
    }
    records
}

fn finalize(strategy: FetchStrategy, mut records: Vec<Record>, cap: usize) -> Vec<Record> {
    match strategy.order() {
        RecordOrder::Ascending => records.sort_by_key(|r| r.timestamp),
        RecordOrder::NewestFirst => records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        RecordOrder::Unspecified => {}
    }
    records.truncate(cap);
    records
}

//! In-process record store.
//!
//! Holds documents per collection in insertion ("natural") order and answers
//! queries the way the document store would, including per-collection
//! timestamp conventions. Two hooks make it useful for exercising the
//! fetcher's fallback chain:
//!
//! - `with_latency`: every call "takes" this long; a call whose budget is
//!   shorter fails with `StoreError::Timeout`. Nothing actually sleeps.
//! - `with_fault`: a closure consulted before each call that may inject an
//!   error.
//!
//! Every call is recorded in `calls()` so tests can assert exactly which
//! queries a request issued.

use std::collections::HashMap;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::{Document, RangeQuery, RecordStore, SortOrder, StoreError, TimeFilter};
use crate::model::{Record, TIMESTAMP_KEY};
use crate::sites::Site;
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Find,
    Sample,
}

/// One store call as the store saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub kind: CallKind,
    pub collection: String,
    pub filter: TimeFilter,
    pub sort: Option<SortOrder>,
    pub limit: usize,
    pub budget: Duration,
}

type FaultHook = Box<dyn FnMut(&StoreCall) -> Option<StoreError> + Send>;

pub struct InMemoryStore {
    partitions: HashMap<String, Vec<Document>>,
    latency: Duration,
    fault: Option<FaultHook>,
    calls: Vec<StoreCall>,
    seed: u64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            partitions: HashMap::new(),
            latency: Duration::ZERO,
            fault: None,
            calls: Vec::new(),
            seed: 0,
        }
    }

    /// Store-wide seed, mixed into the seed of every `sample` call.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_fault<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&StoreCall) -> Option<StoreError> + Send + 'static,
    {
        self.fault = Some(Box::new(hook));
        self
    }

    /// Creates an empty partition so the collection exists even with no data.
    pub fn create_collection(&mut self, collection_id: &str) {
        self.partitions.entry(collection_id.to_string()).or_default();
    }

    pub fn insert_documents(&mut self, collection_id: &str, docs: impl IntoIterator<Item = Document>) {
        self.partitions
            .entry(collection_id.to_string())
            .or_default()
            .extend(docs);
    }

    /// Stores records in the site's own timestamp convention.
    pub fn insert_records(&mut self, site: &Site, records: &[Record]) {
        let docs = records
            .iter()
            .map(|r| r.to_document(site.timestamp_convention));
        self.insert_documents(&site.collection_id, docs);
    }

    pub fn calls(&self) -> &[StoreCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    fn begin(&mut self, call: StoreCall) -> Result<(), StoreError> {
        let budget = call.budget;
        let injected = self.fault.as_mut().and_then(|hook| hook(&call));
        self.calls.push(call);
        if let Some(err) = injected {
            return Err(err);
        }
        if self.latency > budget {
            return Err(StoreError::timeout(budget));
        }
        Ok(())
    }

    fn partition(&self, collection_id: &str) -> Result<&[Document], StoreError> {
        self.partitions
            .get(collection_id)
            .map(|docs| docs.as_slice())
            .ok_or_else(|| StoreError::MissingPartition(collection_id.to_string()))
    }
}

fn doc_timestamp(doc: &Document) -> Option<Timestamp> {
    doc.get(TIMESTAMP_KEY)
        .and_then(|v| Timestamp::from_json(v).ok())
}

/// Unbounded filters match everything, including documents whose timestamp
/// is unreadable; a bounded filter can only match readable timestamps.
fn matches(filter: &TimeFilter, doc: &Document) -> bool {
    if filter.is_unbounded() {
        return true;
    }
    doc_timestamp(doc).is_some_and(|ts| filter.contains(&ts))
}

impl RecordStore for InMemoryStore {
    fn find(
        &mut self,
        site: &Site,
        query: &RangeQuery,
        budget: Duration,
    ) -> Result<Vec<Document>, StoreError> {
        self.begin(StoreCall {
            kind: CallKind::Find,
            collection: site.collection_id.clone(),
            filter: query.filter,
            sort: query.sort,
            limit: query.limit,
            budget,
        })?;

        let mut hits: Vec<&Document> = self
            .partition(&site.collection_id)?
            .iter()
            .filter(|doc| matches(&query.filter, doc))
            .collect();

        match query.sort {
            Some(SortOrder::Ascending) => hits.sort_by_key(|doc| doc_timestamp(doc)),
            Some(SortOrder::Descending) => {
                hits.sort_by_key(|doc| std::cmp::Reverse(doc_timestamp(doc)))
            }
            None => {}
        }

        Ok(hits.into_iter().take(query.limit).cloned().collect())
    }

    fn sample(
        &mut self,
        site: &Site,
        filter: &TimeFilter,
        size: usize,
        seed: u64,
        budget: Duration,
    ) -> Result<Vec<Document>, StoreError> {
        self.begin(StoreCall {
            kind: CallKind::Sample,
            collection: site.collection_id.clone(),
            filter: *filter,
            sort: None,
            limit: size,
            budget,
        })?;

        let candidates: Vec<Document> = self
            .partition(&site.collection_id)?
            .iter()
            .filter(|doc| matches(filter, doc))
            .cloned()
            .collect();

        let mut rng = StdRng::seed_from_u64(self.seed ^ seed);
        Ok(candidates
            .choose_multiple(&mut rng, size)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::SiteRegistry;
    use serde_json::json;

    fn glt() -> Site {
        SiteRegistry::builtin().find("glt_2017_2022").unwrap().clone()
    }

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_canonical(s).unwrap()
    }

    fn seeded_store() -> InMemoryStore {
        let mut store = InMemoryStore::new().with_seed(7);
        store.insert_documents(
            "glt_2017_2022",
            vec![
                json!({ "wdatetime": "2020-01-03 00:00:00", "pwv_mm": 3.0 }),
                json!({ "wdatetime": "2020-01-01 00:00:00", "pwv_mm": 1.0 }),
                json!({ "wdatetime": "2020-01-02 00:00:00", "pwv_mm": 2.0 }),
            ],
        );
        store
    }

    #[test]
    fn test_find_sorts_and_limits() {
        let mut store = seeded_store();
        let q = RangeQuery::ascending(TimeFilter::unbounded(), 2);
        let docs = store.find(&glt(), &q, Duration::from_secs(1)).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["pwv_mm"], json!(1.0));
        assert_eq!(docs[1]["pwv_mm"], json!(2.0));

        let q = RangeQuery::descending(TimeFilter::unbounded(), 1);
        let docs = store.find(&glt(), &q, Duration::from_secs(1)).unwrap();
        assert_eq!(docs[0]["pwv_mm"], json!(3.0));
    }

    #[test]
    fn test_natural_order_is_insertion_order() {
        let mut store = seeded_store();
        let q = RangeQuery::natural(TimeFilter::unbounded(), 10);
        let docs = store.find(&glt(), &q, Duration::from_secs(1)).unwrap();
        assert_eq!(docs[0]["pwv_mm"], json!(3.0));
    }

    #[test]
    fn test_filter_is_applied_on_timestamps() {
        let mut store = seeded_store();
        let filter = TimeFilter::half_open(ts("2020-01-01 00:00:00"), ts("2020-01-03 00:00:00"));
        let q = RangeQuery::ascending(filter, 10);
        let docs = store.find(&glt(), &q, Duration::from_secs(1)).unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_latency_over_budget_times_out_and_is_recorded() {
        let mut store = seeded_store().with_latency(Duration::from_millis(500));
        let q = RangeQuery::ascending(TimeFilter::unbounded(), 10);
        let err = store.find(&glt(), &q, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, StoreError::Timeout { budget_ms: 100 }));
        assert_eq!(store.calls().len(), 1);

        assert!(store.find(&glt(), &q, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_fault_hook_injects_errors() {
        let mut store = seeded_store().with_fault(|call| {
            (call.kind == CallKind::Sample).then(|| StoreError::Transient("boom".to_string()))
        });
        assert!(store.sample(&glt(), &TimeFilter::unbounded(), 2, 0, Duration::from_secs(1)).is_err());
        let q = RangeQuery::natural(TimeFilter::unbounded(), 1);
        assert!(store.find(&glt(), &q, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_sample_respects_size_and_filter() {
        let mut store = seeded_store();
        let filter = TimeFilter::closed(ts("2020-01-02 00:00:00"), ts("2020-01-03 00:00:00"));
        let docs = store.sample(&glt(), &filter, 5, 0, Duration::from_secs(1)).unwrap();
        assert_eq!(docs.len(), 2);
        let docs = store.sample(&glt(), &TimeFilter::unbounded(), 1, 0, Duration::from_secs(1)).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_same_seed_draws_the_same_sample() {
        let mut store = InMemoryStore::new();
        let docs: Vec<Document> = (0..50)
            .map(|i| json!({ "wdatetime": format!("2020-01-01 00:{:02}:00", i), "pwv_mm": i }))
            .collect();
        store.insert_documents("glt_2017_2022", docs);
        let budget = Duration::from_secs(1);
        let filter = TimeFilter::unbounded();

        let first = store.sample(&glt(), &filter, 10, 42, budget).unwrap();
        let again = store.sample(&glt(), &filter, 10, 42, budget).unwrap();
        assert_eq!(first, again);

        let other = store.sample(&glt(), &filter, 10, 43, budget).unwrap();
        assert_eq!(other.len(), 10);
        assert_ne!(first, other);
    }

    #[test]
    fn test_unknown_partition_is_an_error() {
        let mut store = InMemoryStore::new();
        let q = RangeQuery::natural(TimeFilter::unbounded(), 1);
        let err = store.find(&glt(), &q, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, StoreError::MissingPartition(_)));
    }

    #[test]
    fn test_find_at_matches_epoch_collection() {
        let apex = SiteRegistry::builtin().find("apex_2006_2023").unwrap().clone();
        let mut store = InMemoryStore::new();
        store.insert_records(
            &apex,
            &[Record::empty(ts("2023-06-01 12:00:00")).with(crate::model::Field::PwvMm, 0.4)],
        );
        let doc = store
            .find_at(&apex, &ts("2023-06-01 12:00:00"), Duration::from_secs(1))
            .unwrap()
            .expect("document at exact instant");
        assert_eq!(doc["wdatetime"], json!("1685620800000"));
    }
}

/// Integration tests for the range fetcher against the in-memory store
///
/// These tests verify:
/// 1. The cap is never exceeded, whatever tier answers
/// 2. Bounded windows come back inside the window and ascending
/// 3. Repeated identical requests give identical results, sampled ones included
/// 4. The chunked scan stops at the cap and survives failing chunks
/// 5. The sample chain only runs when every primary tier is empty
/// 6. Unknown collections are the only error
/// 7. Sub-second epoch timestamps survive serialization
///
/// Run with: cargo test --test range_fetcher

use std::time::Duration;

use chrono::TimeDelta;
use serde_json::json;

use sitemon_service::config::FetchConfig;
use sitemon_service::fetch::{FetchError, FetchRequest, FetchResponse, FetchStrategy, fetch_records};
use sitemon_service::logging::init_test_logging;
use sitemon_service::model::{Field, Record, RecordOrder};
use sitemon_service::sites::SiteRegistry;
use sitemon_service::store::memory::{CallKind, StoreCall};
use sitemon_service::store::{InMemoryStore, StoreError};
use sitemon_service::timestamp::Timestamp;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const BASE: &str = "2018-03-01 00:00:00";

fn at(minute: i64) -> Timestamp {
    Timestamp::parse_canonical(BASE)
        .unwrap()
        .checked_add(TimeDelta::minutes(minute))
        .unwrap()
}

/// One record per minute for `count` minutes, `pwv_mm` = minute index.
/// Inserted newest first so natural order differs from time order.
fn seeded(collection: &str, count: i64) -> (InMemoryStore, SiteRegistry) {
    init_test_logging();
    let sites = SiteRegistry::builtin();
    let site = sites.find(collection).unwrap().clone();
    let records: Vec<Record> = (0..count)
        .rev()
        .map(|i| Record::empty(at(i)).with(Field::PwvMm, i as f64))
        .collect();
    let mut store = InMemoryStore::new().with_seed(11);
    store.insert_records(&site, &records);
    (store, sites)
}

fn minutes_of(records: &[Record]) -> Vec<i64> {
    records.iter().filter_map(|r| r.pwv_mm).map(|v| v as i64).collect()
}

fn find_calls(store: &InMemoryStore) -> Vec<StoreCall> {
    store
        .calls()
        .iter()
        .filter(|c| c.kind == CallKind::Find)
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn test_cap_is_never_exceeded() {
    let config = FetchConfig::default();
    for collection in ["glt_2017_2022", "apex_2006_2023"] {
        let (mut store, sites) = seeded(collection, 400);
        for cap in [1, 2, 7, 99, 100, 101, 250, 399, 400, 1000] {
            let shapes = [
                FetchRequest::new(collection).with_window(at(0), at(399)),
                FetchRequest::new(collection).with_window(at(10), at(20)),
                FetchRequest::new(collection).with_start(at(50)),
                FetchRequest::new(collection).with_end(at(300)),
                FetchRequest::new(collection),
            ];
            for request in shapes {
                let request = request.with_limit(cap);
                let response = fetch_records(&mut store, &sites, &config, &request).unwrap();
                assert!(
                    response.len() <= cap,
                    "{} returned {} records for cap {} ({:?})",
                    collection,
                    response.len(),
                    cap,
                    response.tier
                );
                assert_eq!(response.cap, cap);
            }
        }
    }
}

#[test]
fn test_bounded_windows_are_inside_and_ascending() {
    let config = FetchConfig::default();
    let (mut store, sites) = seeded("sma_data", 300);
    for (lo, hi, cap) in [(0, 299, 1000), (17, 18, 5), (100, 250, 40), (290, 290, 10), (5, 200, 150)] {
        let request = FetchRequest::new("sma_data").with_window(at(lo), at(hi)).with_limit(cap);
        let response = fetch_records(&mut store, &sites, &config, &request).unwrap();

        assert_eq!(response.order, RecordOrder::Ascending);
        assert!(response.records.iter().all(|r| r.timestamp >= at(lo) && r.timestamp <= at(hi)));
        assert!(response.records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        let expected = ((hi - lo + 1) as usize).min(cap);
        assert_eq!(response.len(), expected, "window {}..={} cap {}", lo, hi, cap);
    }
}

#[test]
fn test_identical_requests_give_identical_results() {
    let config = FetchConfig::default();
    let (mut store, sites) = seeded("jcmt_data", 500);
    let requests = [
        FetchRequest::new("jcmt_data").with_window(at(20), at(480)).with_limit(333),
        FetchRequest::new("jcmt_data").with_window(at(20), at(480)).with_limit(50),
        FetchRequest::new("jcmt_data").with_start(at(420)),
        FetchRequest::new("jcmt_data").with_limit(25),
    ];
    for request in requests {
        let first = fetch_records(&mut store, &sites, &config, &request).unwrap();
        let second = fetch_records(&mut store, &sites, &config, &request).unwrap();
        assert_eq!(first.records, second.records);
        assert_eq!(first.tier, second.tier);
        assert_ne!(first.request_id, second.request_id);
    }
}

// ---------------------------------------------------------------------------
// Chunked scan
// ---------------------------------------------------------------------------

#[test]
fn test_chunked_scan_stops_once_cap_is_reached() {
    let config = FetchConfig::default();
    let (mut store, sites) = seeded("smt_data", 1000);

    // 1000 minutes in 5 chunks of 200; a cap of 250 is met inside chunk 2.
    let request = FetchRequest::new("smt_data").with_window(at(0), at(999)).with_limit(250);
    let response = fetch_records(&mut store, &sites, &config, &request).unwrap();

    assert_eq!(response.tier, Some(FetchStrategy::ChunkedScan));
    assert_eq!(minutes_of(&response.records), (0..250).collect::<Vec<_>>());
    let limits: Vec<usize> = find_calls(&store).iter().map(|c| c.limit).collect();
    assert_eq!(limits, vec![250, 50]);
    assert!(find_calls(&store).iter().all(|c| c.budget == config.chunk_timeout()));
}

#[test]
fn test_failing_chunk_is_skipped() {
    let config = FetchConfig::default();
    // 500 minutes in 5 chunks of exactly 100.
    let (store, sites) = seeded("lmt_data", 501);
    let second_chunk_start = at(100);
    let mut store = store.with_fault(move |call| {
        (call.filter.start == Some(second_chunk_start))
            .then(|| StoreError::Transient("chunk lost".to_string()))
    });

    let request = FetchRequest::new("lmt_data").with_window(at(0), at(500)).with_limit(1000);
    let response = fetch_records(&mut store, &sites, &config, &request).unwrap();

    let minutes = minutes_of(&response.records);
    assert_eq!(response.len(), 401);
    assert!(minutes.iter().all(|m| !(100..200).contains(m)));
    assert_eq!(find_calls(&store).len(), 5);
}

#[test]
fn test_direct_timeout_falls_back_to_chunks() {
    let config = FetchConfig::default();
    let direct_budget = config.direct_timeout();
    let (store, sites) = seeded("alma_data", 60);
    let mut store = store.with_fault(move |call| {
        (call.budget == direct_budget).then(|| StoreError::timeout(direct_budget))
    });

    let request = FetchRequest::new("alma_data").with_window(at(0), at(59)).with_limit(30);
    let response = fetch_records(&mut store, &sites, &config, &request).unwrap();

    assert_eq!(response.tier, Some(FetchStrategy::ChunkedScan));
    assert_eq!(minutes_of(&response.records), (0..30).collect::<Vec<_>>());
}

#[test]
fn test_store_slower_than_every_budget_yields_empty() {
    let config = FetchConfig::default();
    let (store, sites) = seeded("glt_2017_2022", 20);
    let mut store = store.with_latency(Duration::from_secs(3600));

    let request = FetchRequest::new("glt_2017_2022").with_window(at(0), at(19));
    let response = fetch_records(&mut store, &sites, &config, &request).unwrap();
    assert!(response.is_empty());
    assert_eq!(response.tier, None);
}

// ---------------------------------------------------------------------------
// Sample chain
// ---------------------------------------------------------------------------

#[test]
fn test_random_sample_when_primary_tiers_fail() {
    let config = FetchConfig::default();
    let (store, sites) = seeded("jcmt_data", 300);
    let mut store = store.with_fault(|call| {
        call.sort
            .is_some()
            .then(|| StoreError::Transient("index unavailable".to_string()))
    });

    let request = FetchRequest::new("jcmt_data").with_window(at(10), at(260)).with_limit(500);
    let response = fetch_records(&mut store, &sites, &config, &request).unwrap();

    assert_eq!(response.tier, Some(FetchStrategy::RandomSample));
    assert_eq!(response.order, RecordOrder::Ascending);
    assert_eq!(response.len(), config.sample_size);
    assert!(response.records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(response.records.iter().all(|r| r.timestamp >= at(10) && r.timestamp <= at(260)));
}

#[test]
fn test_random_sample_is_repeatable() {
    let config = FetchConfig::default();
    let (store, sites) = seeded("jcmt_data", 300);
    let mut store = store.with_fault(|call| {
        call.sort
            .is_some()
            .then(|| StoreError::Transient("index unavailable".to_string()))
    });

    let request = FetchRequest::new("jcmt_data").with_window(at(10), at(260)).with_limit(500);
    let first = fetch_records(&mut store, &sites, &config, &request).unwrap();
    let second = fetch_records(&mut store, &sites, &config, &request).unwrap();

    assert_eq!(first.tier, Some(FetchStrategy::RandomSample));
    assert_eq!(second.tier, Some(FetchStrategy::RandomSample));
    assert_eq!(first.records, second.records);

    // Not simply the first `sample_size` records of the window.
    assert_ne!(minutes_of(&first.records), (10..110).collect::<Vec<_>>());
}

#[test]
fn test_first_records_then_single_record() {
    let config = FetchConfig::default();

    let (store, sites) = seeded("sma_data", 50);
    let mut store = store.with_fault(|call| {
        (call.sort.is_some() || call.kind == CallKind::Sample)
            .then(|| StoreError::Transient("busy".to_string()))
    });
    let request = FetchRequest::new("sma_data").with_limit(10);
    let response = fetch_records(&mut store, &sites, &config, &request).unwrap();
    assert_eq!(response.tier, Some(FetchStrategy::FirstRecords));
    assert_eq!(response.order, RecordOrder::Unspecified);
    // Natural order is insertion order, newest first in this fixture.
    assert_eq!(minutes_of(&response.records), (40..50).rev().collect::<Vec<_>>());

    let (store, sites) = seeded("sma_data", 50);
    let mut store = store.with_fault(|call| {
        (call.limit != 1).then(|| StoreError::Transient("busy".to_string()))
    });
    let response = fetch_records(&mut store, &sites, &config, &FetchRequest::new("sma_data")).unwrap();
    assert_eq!(response.tier, Some(FetchStrategy::SingleRecord));
    assert_eq!(response.len(), 1);
}

#[test]
fn test_sample_tiers_do_not_run_after_a_primary_hit() {
    let config = FetchConfig::default();
    let (mut store, sites) = seeded("smt_data", 10);
    let request = FetchRequest::new("smt_data").with_window(at(0), at(9)).with_limit(50);
    let response = fetch_records(&mut store, &sites, &config, &request).unwrap();
    assert_eq!(response.len(), 10);
    assert!(store.calls().iter().all(|c| c.kind == CallKind::Find));
}

#[test]
fn test_empty_window_walks_whole_chain_without_error() {
    let config = FetchConfig::default();
    let (mut store, sites) = seeded("lmt_data", 10);
    let request = FetchRequest::new("lmt_data").with_window(at(100), at(200)).with_limit(5);
    let response = fetch_records(&mut store, &sites, &config, &request).unwrap();
    assert!(response.is_empty());
    assert_eq!(response.tier, None);
    let kinds: Vec<CallKind> = store.calls().iter().map(|c| c.kind).collect();
    assert!(kinds.contains(&CallKind::Sample));
}

// ---------------------------------------------------------------------------
// Boundary handling
// ---------------------------------------------------------------------------

#[test]
fn test_epoch_collection_honours_window() {
    let config = FetchConfig::default();
    let (mut store, sites) = seeded("apex_2006_2023", 120);
    let request = FetchRequest::new("apex_2006_2023").with_window(at(30), at(39)).with_limit(100);
    let response = fetch_records(&mut store, &sites, &config, &request).unwrap();
    assert_eq!(minutes_of(&response.records), (30..40).collect::<Vec<_>>());
}

#[test]
fn test_sub_second_epoch_records_survive_serialization() {
    let config = FetchConfig::default();
    let sites = SiteRegistry::builtin();
    let mut store = InMemoryStore::new();
    store.insert_documents(
        "apex_2006_2023",
        vec![
            json!({ "wdatetime": "1685620800250", "pwv_mm": 0.4 }),
            json!({ "wdatetime": "1685620800750", "pwv_mm": 0.6 }),
        ],
    );
    let response =
        fetch_records(&mut store, &sites, &config, &FetchRequest::new("apex_2006_2023")).unwrap();
    assert_eq!(response.len(), 2);
    assert_ne!(response.records[0].timestamp, response.records[1].timestamp);

    let text = serde_json::to_string(&response).unwrap();
    assert!(text.contains("2023-06-01 12:00:00.750"));
    assert!(text.contains("2023-06-01 12:00:00.250"));

    let reloaded: FetchResponse = serde_json::from_str(&text).unwrap();
    assert_eq!(reloaded.records, response.records);
}

#[test]
fn test_malformed_documents_are_dropped() {
    let config = FetchConfig::default();
    let sites = SiteRegistry::builtin();
    let mut store = InMemoryStore::new();
    store.insert_documents(
        "glt_2017_2022",
        vec![
            json!({ "wdatetime": "2018-03-01 00:00:00", "pwv_mm": 1.0 }),
            json!({ "pwv_mm": 2.0 }),
            json!({ "wdatetime": "", "pwv_mm": 3.0 }),
            json!({ "wdatetime": "2018-03-01 00:02:00", "pwv_mm": "4" }),
        ],
    );
    let response =
        fetch_records(&mut store, &sites, &config, &FetchRequest::new("glt_2017_2022")).unwrap();
    assert_eq!(response.len(), 2);
    assert_eq!(response.records[0].pwv_mm, None);
    assert_eq!(response.records[1].pwv_mm, Some(1.0));
}

#[test]
fn test_unknown_collection() {
    let config = FetchConfig::default();
    let (mut store, sites) = seeded("glt_2017_2022", 5);
    let err = fetch_records(&mut store, &sites, &config, &FetchRequest::new("vlt_data")).unwrap_err();
    assert_eq!(err, FetchError::UnknownCollection("vlt_data".to_string()));
}

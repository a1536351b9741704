/// Chunked scan over a bounded window.
///
/// `[start, end]` is cut into equal-width sub-windows. Every chunk but the
/// last is half-open so a record sitting exactly on a boundary is returned
/// once. Chunks run one after another, each limited to what is left of the
/// cap, and the scan stops as soon as the cap is reached.

use std::time::Duration;

use chrono::TimeDelta;
use tracing::debug;

use crate::logging::{Component, log_store_failure};
use crate::model::Record;
use crate::sites::Site;
use crate::store::{Document, RangeQuery, RecordStore, StoreError, TimeFilter};
use crate::timestamp::Timestamp;

use super::FetchStrategy;

/// Splits `[start, end]` into at most `count` sub-windows.
///
/// A window narrower than `count` milliseconds, or an instant, comes back as
/// a single closed window.
pub fn split_window(start: Timestamp, end: Timestamp, count: usize) -> Vec<TimeFilter> {
    let span_ms = end.since(&start).num_milliseconds();
    let count = count.max(1) as i64;
    let width_ms = span_ms / count;
    if width_ms <= 0 || count == 1 {
        return vec![TimeFilter::closed(start, end)];
    }

    let mut windows = Vec::with_capacity(count as usize);
    let mut lower = start;
    for i in 1..count {
        let upper = start
            .checked_add(TimeDelta::milliseconds(width_ms * i))
            .unwrap_or(end);
        windows.push(TimeFilter::half_open(lower, upper));
        lower = upper;
    }
    windows.push(TimeFilter::closed(lower, end));
    windows
}

/// Runs `windows` in order against `site`.
///
/// A failing chunk is logged and skipped. The scan only fails when every
/// chunk it tried failed.
pub(crate) fn scan<S>(
    store: &mut S,
    site: &Site,
    windows: &[TimeFilter],
    cap: usize,
    budget: Duration,
    request_id: &str,
) -> Result<Vec<Document>, StoreError>
where
    S: RecordStore + ?Sized,
{
    let mut collected: Vec<Document> = Vec::new();
    let mut last_error = None;
    let mut succeeded = 0usize;

    for (index, window) in windows.iter().enumerate() {
        let remaining = cap.saturating_sub(collected.len());
        if remaining == 0 {
            break;
        }
        match store.find(site, &RangeQuery::ascending(*window, remaining), budget) {
            Ok(docs) => {
                let returned = docs.len();
                let usable: Vec<Document> = docs
                    .into_iter()
                    .filter(|doc| is_usable(doc, window))
                    .collect();
                debug!(
                    component = %Component::Fetcher,
                    request_id,
                    collection = %site.collection_id,
                    chunk = index,
                    returned,
                    unusable = returned - usable.len(),
                    "chunk finished"
                );
                succeeded += 1;
                collected.extend(usable);
            }
            Err(err) => {
                log_store_failure(
                    request_id,
                    &site.collection_id,
                    FetchStrategy::ChunkedScan.name(),
                    &err,
                );
                last_error = Some(err);
            }
        }
    }

    match last_error {
        Some(err) if succeeded == 0 => Err(err),
        _ => Ok(collected),
    }
}

/// Only documents that will survive conversion count against the cap.
fn is_usable(doc: &Document, window: &TimeFilter) -> bool {
    Record::from_document(doc).is_ok_and(|record| window.contains(&record.timestamp))
}

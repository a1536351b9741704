//! Store Verification Module
//!
//! Checks every registered site against the record store it is served from:
//! does the partition exist, does it return documents, and is `wdatetime`
//! written in the convention the registry declares for it. A wrong
//! convention silently breaks every bounded query on that site, so run this
//! after adding a site or pointing the service at a new store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::config::FetchConfig;
use crate::logging::Component;
use crate::model::{Field, Record, TIMESTAMP_KEY};
use crate::sites::{Site, SiteRegistry};
use crate::store::{Document, RangeQuery, RecordStore, StoreError, TimeFilter};
use crate::timestamp::{Timestamp, TimestampConvention};

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub site_results: Vec<SiteVerification>,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub working: usize,
    pub failed: usize,
    pub convention_mismatches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteVerification {
    pub collection_id: String,
    pub name: String,
    pub status: VerificationStatus,
    pub partition_found: bool,
    pub sample_data_count: usize,
    pub declared_convention: TimestampConvention,
    pub detected_convention: Option<TimestampConvention>,
    pub fields_available: Vec<Field>,
    pub newest_record: Option<Timestamp>,
    pub error_message: Option<String>,
}

impl SiteVerification {
    pub fn convention_matches(&self) -> bool {
        self.detected_convention == Some(self.declared_convention)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

// ============================================================================
// Convention detection
// ============================================================================

/// Convention shared by every readable `wdatetime` in `docs`. `Err` carries
/// a description when the documents disagree or none is readable.
pub fn detect_convention(docs: &[Document]) -> Result<TimestampConvention, String> {
    let mut detected = docs.iter().filter_map(|doc| match doc.get(TIMESTAMP_KEY)? {
        Value::String(s) => TimestampConvention::detect(s),
        Value::Number(_) => Some(TimestampConvention::EpochMillis),
        _ => None,
    });

    let first = detected
        .next()
        .ok_or_else(|| "no readable wdatetime values".to_string())?;
    if detected.any(|c| c != first) {
        return Err(format!("mixed timestamp conventions (first seen: {})", first));
    }
    Ok(first)
}

// ============================================================================
// Site Verification
// ============================================================================

pub fn verify_site<S>(store: &mut S, site: &Site, config: &FetchConfig) -> SiteVerification
where
    S: RecordStore + ?Sized,
{
    let mut result = SiteVerification {
        collection_id: site.collection_id.clone(),
        name: site.name.clone(),
        status: VerificationStatus::Failed,
        partition_found: false,
        sample_data_count: 0,
        declared_convention: site.timestamp_convention,
        detected_convention: None,
        fields_available: Vec::new(),
        newest_record: None,
        error_message: None,
    };

    // Test 1: sample the partition
    let sample = match store.sample(
        site,
        &TimeFilter::unbounded(),
        config.sample_size,
        0,
        config.sample_timeout(),
    ) {
        Ok(docs) => docs,
        Err(StoreError::MissingPartition(_)) => {
            result.error_message = Some("Partition not found".to_string());
            return result;
        }
        Err(e) => {
            result.error_message = Some(format!("Sample failed: {}", e));
            return result;
        }
    };
    result.partition_found = true;
    result.sample_data_count = sample.len();

    if sample.is_empty() {
        result.status = VerificationStatus::PartialSuccess;
        result.error_message = Some("Partition is empty".to_string());
        return result;
    }

    // Test 2: timestamp convention
    match detect_convention(&sample) {
        Ok(convention) => result.detected_convention = Some(convention),
        Err(reason) => result.error_message = Some(reason),
    }

    // Test 3: which fields actually carry values
    let records: Vec<Record> = sample
        .iter()
        .filter_map(|doc| Record::from_document(doc).ok())
        .collect();
    result.fields_available = Field::ALL
        .into_iter()
        .filter(|f| records.iter().any(|r| r.value(*f).is_some()))
        .collect();

    // Test 4: newest record, through the same descending query the fetcher uses
    let newest = RangeQuery::descending(TimeFilter::unbounded(), 1);
    if let Ok(docs) = store.find(site, &newest, config.direct_timeout()) {
        result.newest_record = docs
            .first()
            .and_then(|doc| Record::from_document(doc).ok())
            .map(|r| r.timestamp);
    }

    if result.convention_matches() {
        result.status = VerificationStatus::Success;
    } else {
        result.status = VerificationStatus::PartialSuccess;
        if result.error_message.is_none() {
            result.error_message = Some(format!(
                "Registry declares {} but store holds {}",
                result.declared_convention,
                result
                    .detected_convention
                    .map_or("unknown".to_string(), |c| c.to_string())
            ));
        }
    }

    result
}

// ============================================================================
// Full Verification Runner
// ============================================================================

pub fn run_full_verification<S>(
    store: &mut S,
    sites: &SiteRegistry,
    config: &FetchConfig,
) -> VerificationReport
where
    S: RecordStore + ?Sized,
{
    let mut report = VerificationReport {
        timestamp: Utc::now().to_rfc3339(),
        site_results: Vec::new(),
        summary: VerificationSummary {
            total: sites.len(),
            ..VerificationSummary::default()
        },
    };

    for site in sites.sites() {
        let result = verify_site(store, site, config);
        info!(
            component = %Component::System,
            collection = %result.collection_id,
            status = ?result.status,
            samples = result.sample_data_count,
            "site verified"
        );

        match result.status {
            VerificationStatus::Success | VerificationStatus::PartialSuccess => {
                report.summary.working += 1;
            }
            VerificationStatus::Failed => report.summary.failed += 1,
        }
        if result.partition_found && result.sample_data_count > 0 && !result.convention_matches() {
            report.summary.convention_mismatches += 1;
        }
        report.site_results.push(result);
    }

    report
}

pub fn print_summary(report: &VerificationReport) {
    println!("\n============================================================");
    println!("STORE VERIFICATION SUMMARY");
    println!("============================================================");
    println!();
    for r in &report.site_results {
        let status = match r.status {
            VerificationStatus::Success => "OK",
            VerificationStatus::PartialSuccess => "PARTIAL",
            VerificationStatus::Failed => "FAILED",
        };
        println!(
            "  {:<16} {:<8} {:>4} samples  {}",
            r.collection_id,
            status,
            r.sample_data_count,
            r.error_message.as_deref().unwrap_or("")
        );
    }
    println!();

    let s = &report.summary;
    let success_rate = if s.total > 0 {
        (s.working as f64 / s.total as f64) * 100.0
    } else {
        0.0
    };
    println!("Sites:                {}/{} working  ({} failed)", s.working, s.total, s.failed);
    println!("Convention mismatches: {}", s.convention_mismatches);
    println!("Overall Success Rate: {:.1}% ({}/{})", success_rate, s.working, s.total);
    println!("============================================================");
}

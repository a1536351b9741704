/// Query facade.
///
/// The two read operations the dashboard issues, with the forgiving argument
/// handling it has always relied on: a blank or non-positive limit means the
/// default cap, blank dates mean "no bound", and a date that does not parse
/// or a reversed window gives an empty result rather than an error. The one
/// error that reaches the caller is an unknown collection.

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::FetchConfig;
use crate::fetch::{FetchError, FetchRequest, FetchResponse, effective_cap, fetch_records, resolve_site};
use crate::logging::Component;
use crate::model::Record;
use crate::sites::SiteRegistry;
use crate::store::RecordStore;
use crate::timestamp::Timestamp;

/// `"YYYY-MM-DD HH:mm:ss"`, digits and separators in place, naming a real
/// calendar instant.
pub fn is_valid_date_format(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 19 {
        return false;
    }
    let shape_ok = bytes.iter().enumerate().all(|(i, b)| match i {
        4 | 7 => *b == b'-',
        10 => *b == b' ',
        13 | 16 => *b == b':',
        _ => b.is_ascii_digit(),
    });
    shape_ok && Timestamp::parse_canonical(s).is_ok()
}

/// Arguments of `get_weather_data`, as the dashboard sends them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherQuery {
    pub collection: String,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl WeatherQuery {
    pub fn new(collection: &str) -> Self {
        WeatherQuery {
            collection: collection.to_string(),
            ..WeatherQuery::default()
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_dates(mut self, start: &str, end: &str) -> Self {
        self.start_date = Some(start.to_string());
        self.end_date = Some(end.to_string());
        self
    }
}

/// Blank means absent; anything else must be a valid date.
fn parse_bound(raw: Option<&str>) -> Result<Option<Timestamp>, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if is_valid_date_format(s) => Timestamp::parse_canonical(s)
            .map(Some)
            .map_err(|e| e.to_string()),
        Some(s) => Err(format!("{:?} is not YYYY-MM-DD HH:mm:ss", s)),
    }
}

fn limit_from(raw: Option<i64>) -> Option<usize> {
    raw.filter(|n| *n > 0).and_then(|n| usize::try_from(n).ok())
}

/// Records of one collection within an optional window, capped.
pub fn get_weather_data<S>(
    store: &mut S,
    sites: &SiteRegistry,
    config: &FetchConfig,
    query: &WeatherQuery,
) -> Result<FetchResponse, FetchError>
where
    S: RecordStore + ?Sized,
{
    let site = resolve_site(sites, &query.collection)?;
    let limit = limit_from(query.limit);

    let bounds = parse_bound(query.start_date.as_deref())
        .and_then(|start| parse_bound(query.end_date.as_deref()).map(|end| (start, end)));
    let (start, end) = match bounds {
        Ok(bounds) => bounds,
        Err(reason) => {
            let request_id = Uuid::new_v4().to_string();
            warn!(
                component = %Component::Query,
                request_id = %request_id,
                collection = %site.collection_id,
                "invalid date argument: {}", reason
            );
            return Ok(FetchResponse::empty(
                &request_id,
                &site.collection_id,
                effective_cap(limit, config),
            ));
        }
    };

    let request = FetchRequest {
        collection: site.collection_id.clone(),
        start,
        end,
        limit,
    };
    fetch_records(store, sites, config, &request)
}

/// The record stamped exactly `wdatetime`, if the store has one.
///
/// A malformed date, a missing record and a failing store all come back as
/// `Ok(None)`.
pub fn get_weather_by_date<S>(
    store: &mut S,
    sites: &SiteRegistry,
    config: &FetchConfig,
    collection: &str,
    wdatetime: &str,
) -> Result<Option<Record>, FetchError>
where
    S: RecordStore + ?Sized,
{
    let site = resolve_site(sites, collection)?;
    let instant = match Timestamp::parse_any(wdatetime) {
        Ok(ts) => ts,
        Err(err) => {
            warn!(component = %Component::Query, collection, "invalid wdatetime: {}", err);
            return Ok(None);
        }
    };

    match store.find_at(site, &instant, config.direct_timeout()) {
        Ok(Some(doc)) => Ok(Record::from_document(&doc).ok()),
        Ok(None) => Ok(None),
        Err(err) => {
            warn!(
                component = %Component::Query,
                collection,
                %instant,
                "lookup failed: {}", err
            );
            Ok(None)
        }
    }
}

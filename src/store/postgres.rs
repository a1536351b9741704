/// PostgreSQL-backed record store.
///
/// Each collection is a table `<schema>.<collection_id>` with a `wdatetime
/// TEXT` column, one `DOUBLE PRECISION` column per field, and an index on
/// `wdatetime`. Rows are returned as JSON via `to_jsonb`, so the fetcher sees
/// the same document shape as from any other store.
///
/// Timestamp bounds are compared in the collection's native convention:
/// canonical strings compare lexically on the text column, epoch-millisecond
/// collections compare `CAST(wdatetime AS BIGINT)`. Each call runs in its own
/// transaction with `SET LOCAL statement_timeout` set to the call's budget.

use std::time::Duration;

use ::postgres::error::SqlState;
use ::postgres::types::ToSql;
use ::postgres::{Client, NoTls};

use super::{Document, RangeQuery, RecordStore, SortOrder, StoreError, TimeFilter};
use crate::sites::{Site, is_valid_collection_id};
use crate::timestamp::{Timestamp, TimestampConvention};

/// Default schema holding the per-site tables.
pub const DEFAULT_SCHEMA: &str = "site_data";

type Params = Vec<Box<dyn ToSql + Sync>>;

pub struct PgRecordStore {
    client: Client,
    schema: String,
}

impl PgRecordStore {
    pub fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::connect(url, NoTls)?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        PgRecordStore {
            client,
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }

    /// Uses `schema` instead of `site_data`. Invalid identifiers are ignored
    /// and the default kept.
    pub fn with_schema(mut self, schema: &str) -> Self {
        if is_valid_collection_id(schema) {
            self.schema = schema.to_string();
        }
        self
    }

    fn table(&self, site: &Site) -> Result<String, StoreError> {
        if !is_valid_collection_id(&site.collection_id) {
            return Err(StoreError::MissingPartition(site.collection_id.clone()));
        }
        Ok(format!("{}.{}", self.schema, site.collection_id))
    }

    fn query_documents(
        &mut self,
        sql: &str,
        params: &Params,
        budget: Duration,
    ) -> Result<Vec<Document>, StoreError> {
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref()).collect();

        let mut tx = self.client.transaction()?;
        // SET does not take bind parameters; the value is a plain integer.
        tx.batch_execute(&format!(
            "SET LOCAL statement_timeout = {}",
            budget.as_millis().max(1)
        ))?;
        let rows = tx
            .query(sql, &refs)
            .map_err(|e| classify_pg_error(e, budget))?;
        tx.commit()?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            docs.push(row.try_get::<_, serde_json::Value>(0)?);
        }
        Ok(docs)
    }
}

fn classify_pg_error(err: ::postgres::Error, budget: Duration) -> StoreError {
    if err.code() == Some(&SqlState::QUERY_CANCELED) {
        StoreError::timeout(budget)
    } else if err.code() == Some(&SqlState::UNDEFINED_TABLE) {
        StoreError::MissingPartition(err.to_string())
    } else if err.is_closed() {
        StoreError::Transient(err.to_string())
    } else {
        StoreError::Database(err)
    }
}

/// Column expression that orders correctly for the convention.
fn timestamp_expr(convention: TimestampConvention) -> &'static str {
    match convention {
        TimestampConvention::Canonical => "wdatetime",
        TimestampConvention::EpochMillis => "CAST(wdatetime AS BIGINT)",
    }
}

/// Builds the WHERE clause for `filter`, pushing bind values onto `params`.
/// Returns an empty string for an unbounded filter.
fn where_clause(filter: &TimeFilter, convention: TimestampConvention, params: &mut Params) -> String {
    let expr = timestamp_expr(convention);
    let mut conditions = Vec::new();

    if let Some(start) = &filter.start {
        let n = bind_timestamp(start, convention, params);
        conditions.push(format!("{} >= ${}", expr, n));
    }
    if let Some(end) = &filter.end {
        let n = bind_timestamp(end, convention, params);
        let op = if filter.end_exclusive { "<" } else { "<=" };
        conditions.push(format!("{} {} ${}", expr, op, n));
    }

    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

/// Pushes `ts` in the collection's native type and returns its placeholder
/// number.
fn bind_timestamp(ts: &Timestamp, convention: TimestampConvention, params: &mut Params) -> usize {
    match convention {
        TimestampConvention::Canonical => params.push(Box::new(ts.to_canonical_string())),
        TimestampConvention::EpochMillis => params.push(Box::new(ts.epoch_millis())),
    }
    params.len()
}

/// Pseudo-random but repeatable row order: rows are ranked by a hash of
/// their timestamp salted with `seed`.
fn sample_order(seed: u64, params: &mut Params) -> String {
    params.push(Box::new(seed.to_string()));
    format!(" ORDER BY md5(wdatetime || ${}), wdatetime", params.len())
}

fn limit_param(limit: usize, params: &mut Params) -> usize {
    params.push(Box::new(limit.min(i64::MAX as usize) as i64));
    params.len()
}

impl RecordStore for PgRecordStore {
    fn find(
        &mut self,
        site: &Site,
        query: &RangeQuery,
        budget: Duration,
    ) -> Result<Vec<Document>, StoreError> {
        let table = self.table(site)?;
        let convention = site.timestamp_convention;
        let mut params: Params = Vec::new();

        let mut sql = format!("SELECT to_jsonb(t) FROM {} t", table);
        sql.push_str(&where_clause(&query.filter, convention, &mut params));
        match query.sort {
            Some(SortOrder::Ascending) => {
                sql.push_str(&format!(" ORDER BY {} ASC", timestamp_expr(convention)))
            }
            Some(SortOrder::Descending) => {
                sql.push_str(&format!(" ORDER BY {} DESC", timestamp_expr(convention)))
            }
            None => {}
        }
        let n = limit_param(query.limit, &mut params);
        sql.push_str(&format!(" LIMIT ${}", n));

        self.query_documents(&sql, &params, budget)
    }

    fn sample(
        &mut self,
        site: &Site,
        filter: &TimeFilter,
        size: usize,
        seed: u64,
        budget: Duration,
    ) -> Result<Vec<Document>, StoreError> {
        let table = self.table(site)?;
        let mut params: Params = Vec::new();

        let mut sql = format!("SELECT to_jsonb(t) FROM {} t", table);
        sql.push_str(&where_clause(filter, site.timestamp_convention, &mut params));
        sql.push_str(&sample_order(seed, &mut params));
        let n = limit_param(size, &mut params);
        sql.push_str(&format!(" LIMIT ${}", n));

        self.query_documents(&sql, &params, budget)
    }
}

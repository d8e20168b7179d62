//! Daily completeness and quality checks over one raw partition.
//!
//! Every check produces a PASS/FAIL observation. Nothing here returns an error
//! for bad data or a failed query; those are logged and reported as FAIL.

use crate::query::QueryEngine;
use crate::schema::{raw_schema, required_columns, row_key_columns};
use chrono::NaiveDate;
use common::Result;
use ingest::model::{ItemIdentity, Stream};
use ingest::storage::s3::ObjectStorage;
use ingest::utils::paths::{PathBuilder, parse_raw_object_key};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

const RAW_TABLE: &str = "raw";
// Offending rows echoed into the check detail.
const SAMPLE_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "PASS"),
            CheckStatus::Fail => write!(f, "FAIL"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckResult {
    pub(crate) fn new(name: &'static str, passed: bool, detail: String) -> Self {
        let status = if passed { CheckStatus::Pass } else { CheckStatus::Fail };
        match status {
            CheckStatus::Pass => info!(check = name, result = %status, "{}", detail),
            CheckStatus::Fail => error!(check = name, result = %status, "{}", detail),
        }
        Self { name, status, detail }
    }

    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

/// Counts observed for one stream and day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletenessSnapshot {
    pub stream: Stream,
    pub day: NaiveDate,
    pub expected_items: usize,
    /// Distinct `(city, region, country)` in the records; `None` when the
    /// query failed.
    pub distinct_items: Option<usize>,
    /// Distinct item identities parsed from the partition's object keys.
    pub keyed_items: Option<usize>,
    pub objects: usize,
    /// Row keys that occur more than once.
    pub duplicate_rows: Option<usize>,
    /// Rows missing a required field.
    pub null_rows: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct QualityReport {
    pub snapshot: CompletenessSnapshot,
    pub checks: Vec<CheckResult>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(CheckResult::passed)
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

pub struct QualityChecker {
    engine: Arc<dyn QueryEngine>,
    storage: Arc<dyn ObjectStorage>,
    stream: Stream,
    raw_prefix: String,
    expected_items: usize,
}

impl QualityChecker {
    pub fn new(
        engine: Arc<dyn QueryEngine>,
        storage: Arc<dyn ObjectStorage>,
        stream: Stream,
        raw_prefix: &str,
        expected_items: usize,
    ) -> Self {
        Self {
            engine,
            storage,
            stream,
            raw_prefix: raw_prefix.trim_end_matches('/').to_string(),
            expected_items,
        }
    }

    pub async fn run(&self, day: NaiveDate) -> QualityReport {
        let partition = PathBuilder::new(&self.raw_prefix, day).build_partition_prefix();
        info!(stream = %self.stream, partition = %partition, "Running data quality checks");

        let registered = self
            .engine
            .register_raw_table(RAW_TABLE, &partition, raw_schema(self.stream))
            .await;

        let (item_count, distinct_items) = match &registered {
            Ok(()) => self.check_item_count().await,
            Err(e) => self.unavailable("item_count", e),
        };
        let (duplicates, duplicate_rows) = match &registered {
            Ok(()) => self.check_duplicates().await,
            Err(e) => self.unavailable("no_duplicates", e),
        };
        let (nulls, null_rows) = match &registered {
            Ok(()) => self.check_nulls().await,
            Err(e) => self.unavailable("no_nulls", e),
        };
        let (census, keyed_items, objects) = self.check_key_census(&partition).await;

        let report = QualityReport {
            snapshot: CompletenessSnapshot {
                stream: self.stream,
                day,
                expected_items: self.expected_items,
                distinct_items,
                keyed_items,
                objects,
                duplicate_rows,
                null_rows,
            },
            checks: vec![item_count, duplicates, nulls, census],
        };

        let failed = report.checks.iter().filter(|c| !c.passed()).count();
        if failed == 0 {
            info!(stream = %self.stream, day = %day, "All data quality checks passed");
        } else {
            warn!(stream = %self.stream, day = %day, failed, "Data quality checks failed");
        }
        report
    }

    fn unavailable(&self, name: &'static str, e: &common::Error) -> (CheckResult, Option<usize>) {
        (CheckResult::new(name, false, format!("Raw table unavailable: {}", e)), None)
    }

    async fn scalar(&self, sql: &str, column: &str) -> Result<usize> {
        let rows = self.engine.run_query(sql).await?;
        let value = rows
            .first()
            .and_then(|row| row.get(column))
            .and_then(|value| value.as_u64())
            .ok_or_else(|| common::Error::Query(format!("{} returned no '{}'", sql, column)))?;
        Ok(value as usize)
    }

    /// Distinct items in the records against the number of cities enqueued.
    async fn check_item_count(&self) -> (CheckResult, Option<usize>) {
        let sql = format!(
            "SELECT COUNT(*) AS item_count FROM (SELECT DISTINCT city, region, country FROM {})",
            RAW_TABLE
        );
        match self.scalar(&sql, "item_count").await {
            Ok(found) => {
                let detail = format!(
                    "Number of unique items input/output: {}/{}",
                    self.expected_items, found
                );
                (CheckResult::new("item_count", found == self.expected_items, detail), Some(found))
            }
            Err(e) => (CheckResult::new("item_count", false, format!("Query failed: {}", e)), None),
        }
    }

    async fn check_duplicates(&self) -> (CheckResult, Option<usize>) {
        duplicate_check(self.engine.as_ref(), "no_duplicates", RAW_TABLE, row_key_columns(self.stream)).await
    }

    async fn check_nulls(&self) -> (CheckResult, Option<usize>) {
        let required = required_columns(self.stream);
        let predicate = required
            .iter()
            .map(|column| format!("\"{}\" IS NULL", column))
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            quoted(required),
            RAW_TABLE,
            predicate
        );
        match self.engine.run_query(&sql).await {
            Ok(rows) if rows.is_empty() => (
                CheckResult::new("no_nulls", true, "No unexpected NULL values".into()),
                Some(0),
            ),
            Ok(rows) => (
                CheckResult::new(
                    "no_nulls",
                    false,
                    format!("{} rows with unexpected NULL values, e.g. {:?}", rows.len(), sample(&rows)),
                ),
                Some(rows.len()),
            ),
            Err(e) => (
                CheckResult::new("no_nulls", false, format!("Query failed: {}", e)),
                None,
            ),
        }
    }

    /// Counts items by object key rather than by content, so an object whose
    /// body cannot be read still shows up.
    async fn check_key_census(&self, partition: &str) -> (CheckResult, Option<usize>, usize) {
        let keys = match self.storage.list_objects(&format!("{}/", partition)).await {
            Ok(keys) => keys,
            Err(e) => {
                return (
                    CheckResult::new("key_census", false, format!("Listing failed: {}", e)),
                    None,
                    0,
                );
            }
        };

        let api_call = self.stream.api_call_name();
        let mut identities: BTreeSet<ItemIdentity> = BTreeSet::new();
        let mut foreign = Vec::new();
        for key in &keys {
            match parse_raw_object_key(key, api_call) {
                Ok(components) => {
                    identities.insert(components.identity);
                }
                Err(_) => foreign.push(key.as_str()),
            }
        }

        let found = identities.len();
        let mut detail = format!(
            "Objects keyed for {}/{} items ({} objects)",
            found,
            self.expected_items,
            keys.len()
        );
        if !foreign.is_empty() {
            detail.push_str(&format!(", unrecognised keys: {:?}", foreign));
        }
        let passed = found == self.expected_items && foreign.is_empty();
        (CheckResult::new("key_census", passed, detail), Some(found), keys.len())
    }
}

/// Fails when any combination of `key` occurs more than once in `table`.
pub async fn duplicate_check(
    engine: &dyn QueryEngine,
    name: &'static str,
    table: &str,
    key: &[&str],
) -> (CheckResult, Option<usize>) {
    let key = quoted(key);
    let sql = format!(
        "SELECT {key}, COUNT(*) AS copies FROM {table} GROUP BY {key} HAVING COUNT(*) > 1",
        key = key,
        table = table
    );
    match engine.run_query(&sql).await {
        Ok(rows) if rows.is_empty() => (CheckResult::new(name, true, "No duplicate rows".into()), Some(0)),
        Ok(rows) => (
            CheckResult::new(
                name,
                false,
                format!("{} duplicated row keys, e.g. {:?}", rows.len(), sample(&rows)),
            ),
            Some(rows.len()),
        ),
        Err(e) => (CheckResult::new(name, false, format!("Query failed: {}", e)), None),
    }
}

fn quoted(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| format!("\"{}\"", column))
        .collect::<Vec<_>>()
        .join(", ")
}

fn sample(rows: &[crate::query::Row]) -> Vec<String> {
    rows.iter()
        .take(SAMPLE_ROWS)
        .map(|row| serde_json::Value::Object(row.clone()).to_string())
        .collect()
}

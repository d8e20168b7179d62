//! Daily final table: every ISS pass joined with the weather of the hour it
//! starts in.

use crate::compaction::{CompactionOutcome, Compactor, write_parquet};
use crate::quality::{CheckResult, duplicate_check};
use crate::query::QueryEngine;
use crate::schema::{
    FINAL_KEY_COLUMNS, FINAL_PASS_COLUMNS, FINAL_WEATHER_COLUMNS, FINAL_WEATHER_TIME, final_schema_ref,
    raw_schema,
};
use chrono::NaiveDate;
use common::Result;
use ingest::model::Stream;
use ingest::storage::s3::ObjectStorage;
use ingest::utils::paths::PathBuilder;
use std::sync::Arc;
use tracing::info;

const PASSES_TABLE: &str = "final_passes";
const WEATHER_TABLE: &str = "final_weather";
const FINAL_TABLE: &str = "final_table";
const FINAL_FILE: &str = "part-00000.parquet";
const FINAL_CHECK: &str = "final_no_duplicates";
const SECONDS_PER_HOUR: i64 = 3600;

/// Raw prefixes of the two streams and the prefix the joined day is written under.
#[derive(Debug, Clone)]
pub struct FinalTablePrefixes {
    pub passes_raw: String,
    pub weather_raw: String,
    pub final_prefix: String,
}

#[derive(Debug, Clone)]
pub struct FinalTableReport {
    pub outcome: CompactionOutcome,
    pub duplicates: CheckResult,
}

pub struct FinalTableBuilder {
    engine: Arc<dyn QueryEngine>,
    storage: Arc<dyn ObjectStorage>,
}

impl FinalTableBuilder {
    pub fn new(engine: Arc<dyn QueryEngine>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { engine, storage }
    }

    pub fn final_key(final_prefix: &str, day: NaiveDate) -> String {
        let partition = Self::final_partition(final_prefix, day);
        format!("{}/{}", partition, FINAL_FILE)
    }

    fn final_partition(final_prefix: &str, day: NaiveDate) -> String {
        PathBuilder::new(final_prefix.trim_end_matches('/'), day).build_partition_prefix()
    }

    /// Joins the compacted passes and weather partitions of `day` and writes the
    /// result as one parquet object. Passes without a matching weather hour keep
    /// NULL weather columns; records without a pass are dropped.
    pub async fn build(&self, prefixes: &FinalTablePrefixes, day: NaiveDate) -> Result<CompactionOutcome> {
        let passes = compacted_partition(&prefixes.passes_raw, day);
        let weather = compacted_partition(&prefixes.weather_raw, day);
        self.engine
            .register_parquet_table(PASSES_TABLE, &passes, raw_schema(Stream::Passes))
            .await?;
        self.engine
            .register_parquet_table(WEATHER_TABLE, &weather, raw_schema(Stream::Weather))
            .await?;

        let batches = self.engine.run_batches(&join_sql()).await?;
        let rows: usize = batches.iter().map(|batch| batch.num_rows()).sum();
        if rows == 0 {
            info!(passes = %passes, day = %day, "No passes to join into the final table");
            return Ok(CompactionOutcome { key: None, rows: 0 });
        }

        let key = Self::final_key(&prefixes.final_prefix, day);
        let bytes = write_parquet(self.storage.as_ref(), &key, &batches, final_schema_ref()).await?;
        info!(key = %key, rows, bytes, "Wrote final table partition");

        Ok(CompactionOutcome { key: Some(key), rows })
    }

    /// Duplicate check over the final table partition of `day`.
    pub async fn check(&self, final_prefix: &str, day: NaiveDate) -> CheckResult {
        let partition = Self::final_partition(final_prefix, day);
        match self
            .engine
            .register_parquet_table(FINAL_TABLE, &partition, final_schema_ref())
            .await
        {
            Ok(()) => {
                let (result, _) =
                    duplicate_check(self.engine.as_ref(), FINAL_CHECK, FINAL_TABLE, FINAL_KEY_COLUMNS).await;
                result
            }
            Err(e) => CheckResult::new(FINAL_CHECK, false, format!("Final table unavailable: {}", e)),
        }
    }

    pub async fn build_and_check(&self, prefixes: &FinalTablePrefixes, day: NaiveDate) -> Result<FinalTableReport> {
        let outcome = self.build(prefixes, day).await?;
        let duplicates = self.check(&prefixes.final_prefix, day).await;
        Ok(FinalTableReport { outcome, duplicates })
    }
}

fn compacted_partition(raw_prefix: &str, day: NaiveDate) -> String {
    let key = Compactor::compacted_key(raw_prefix, day);
    match key.rsplit_once('/') {
        Some((partition, _)) => partition.to_string(),
        None => key,
    }
}

fn join_sql() -> String {
    let pass_columns = FINAL_PASS_COLUMNS
        .iter()
        .map(|column| format!("p.\"{}\"", column));
    let weather_columns = FINAL_WEATHER_COLUMNS
        .iter()
        .map(|column| format!("w.\"{}\"", column));
    let columns = pass_columns
        .chain(std::iter::once(format!("w.\"dt\" AS \"{}\"", FINAL_WEATHER_TIME)))
        .chain(weather_columns)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT {columns} FROM {passes} p \
         LEFT JOIN {weather} w \
           ON p.\"city\" = w.\"city\" AND p.\"region\" = w.\"region\" AND p.\"country\" = w.\"country\" \
          AND w.\"dt\" = p.\"startUTC\" - (p.\"startUTC\" % {hour}) \
         WHERE p.\"startUTC\" IS NOT NULL \
         ORDER BY p.\"country\", p.\"region\", p.\"city\", p.\"startUTC\"",
        columns = columns,
        passes = PASSES_TABLE,
        weather = WEATHER_TABLE,
        hour = SECONDS_PER_HOUR
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::CheckStatus;
    use crate::query::DataFusionEngine;
    use common::config::QueryConfig;
    use ingest::storage::StoreManager;
    use object_store::memory::InMemory;
    use serde_json::Value;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 4, 13).unwrap()
    }

    fn prefixes() -> FinalTablePrefixes {
        FinalTablePrefixes {
            passes_raw: "iss_passes_raw".into(),
            weather_raw: "iss_weather_raw".into(),
            final_prefix: "final".into(),
        }
    }

    const PERTH_PASSES: &str = "{\"city\":\"Perth\",\"lat\":-31.95,\"lon\":115.86,\"region\":\"Western Australia\",\"country\":\"Australia\",\"satname\":\"ISS\",\"startUTC\":1618300000,\"maxEl\":79.4,\"duration\":450}\n\
        {\"city\":\"Perth\",\"lat\":-31.95,\"lon\":115.86,\"region\":\"Western Australia\",\"country\":\"Australia\",\"satname\":\"ISS\",\"startUTC\":1618390000,\"maxEl\":30.0,\"duration\":300}";

    const PERTH_WEATHER: &str = "{\"city\":\"Perth\",\"lat\":-31.95,\"lon\":115.86,\"region\":\"Western Australia\",\"country\":\"Australia\",\"timezone\":\"Australia/Perth\",\"dt\":1618297200,\"temp\":21.5,\"main\":\"Clear\"}\n\
        {\"city\":\"Perth\",\"lat\":-31.95,\"lon\":115.86,\"region\":\"Western Australia\",\"country\":\"Australia\",\"timezone\":\"Australia/Perth\",\"dt\":1618300800,\"temp\":20.1,\"main\":\"Clouds\"}";

    /// Writes raw objects, compacts both streams and returns a fresh engine.
    async fn compacted_day(store: &StoreManager, passes: &str, weather: &str) -> Arc<DataFusionEngine> {
        let storage = store.storage();
        storage
            .put_object(
                "iss_passes_raw/year=2021/month=04/day=13/iss-passes-AUS-Western Australia-2021_04_13-Perth-utc.json",
                passes.as_bytes(),
            )
            .await
            .unwrap();
        storage
            .put_object(
                "iss_weather_raw/year=2021/month=04/day=13/iss-weather-AUS-Western Australia-2021_04_13-Perth-utc.json",
                weather.as_bytes(),
            )
            .await
            .unwrap();

        let engine = Arc::new(DataFusionEngine::new(store, &QueryConfig::default()).unwrap());
        let compactor = Compactor::new(engine.clone(), Arc::clone(&storage));
        compactor.compact(Stream::Passes, "iss_passes_raw", day()).await.unwrap();
        compactor.compact(Stream::Weather, "iss_weather_raw", day()).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn joins_each_pass_with_the_weather_of_its_hour() {
        let store = StoreManager::from_object_store(Arc::new(InMemory::new()), "iss-weather-data");
        let engine = compacted_day(&store, PERTH_PASSES, PERTH_WEATHER).await;
        let builder = FinalTableBuilder::new(engine.clone(), store.storage());

        let report = builder.build_and_check(&prefixes(), day()).await.unwrap();
        assert_eq!(report.outcome.key.as_deref(), Some("final/year=2021/month=04/day=13/part-00000.parquet"));
        assert_eq!(report.outcome.rows, 2);
        assert_eq!(report.duplicates.status, CheckStatus::Pass);

        engine
            .register_parquet_table("joined", "final/year=2021/month=04/day=13", final_schema_ref())
            .await
            .unwrap();
        let rows = engine
            .run_query(r#"SELECT "startUTC", weather_dt, temp, main FROM joined ORDER BY "startUTC""#)
            .await
            .unwrap();

        // 1618300000 starts in the hour beginning 1618297200.
        assert_eq!(rows[0]["weather_dt"], 1618297200);
        assert_eq!(rows[0]["temp"], 21.5);
        assert_eq!(rows[0]["main"], "Clear");
        // No weather row for the second pass's hour.
        assert_eq!(rows[1]["startUTC"], 1618390000);
        assert_eq!(rows[1]["temp"], Value::Null);
    }

    #[tokio::test]
    async fn repeated_pass_fails_the_final_duplicate_check() {
        let store = StoreManager::from_object_store(Arc::new(InMemory::new()), "iss-weather-data");
        let first_pass = PERTH_PASSES.lines().next().unwrap();
        let passes = format!("{}\n{}", first_pass, first_pass);
        let engine = compacted_day(&store, &passes, PERTH_WEATHER).await;

        let report = FinalTableBuilder::new(engine, store.storage())
            .build_and_check(&prefixes(), day())
            .await
            .unwrap();
        assert_eq!(report.outcome.rows, 2);
        assert_eq!(report.duplicates.status, CheckStatus::Fail);
        assert!(report.duplicates.detail.contains("1 duplicated"), "{}", report.duplicates.detail);
    }

    #[tokio::test]
    async fn day_without_passes_writes_nothing() {
        let store = StoreManager::from_object_store(Arc::new(InMemory::new()), "iss-weather-data");
        let no_passes = r#"{"city":"Perth","lat":-31.95,"lon":115.86,"region":"Western Australia","country":"Australia","satname":"ISS"}"#;
        let engine = compacted_day(&store, no_passes, PERTH_WEATHER).await;

        let outcome = FinalTableBuilder::new(engine, store.storage())
            .build(&prefixes(), day())
            .await
            .unwrap();
        assert_eq!(outcome, CompactionOutcome { key: None, rows: 0 });
        assert!(store.storage().list_objects("final/").await.unwrap().is_empty());
    }
}

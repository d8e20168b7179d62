use crate::query::QueryEngine;
use crate::schema::raw_schema;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use common::Result;
use ingest::model::Stream;
use ingest::storage::s3::ObjectStorage;
use ingest::utils::paths::PathBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;
use tracing::info;

const COMPACTION_TABLE: &str = "raw_compaction";
const COMPACTED_FILE: &str = "part-00000.parquet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionOutcome {
    /// Parquet object written; `None` when the partition held no records.
    pub key: Option<String>,
    pub rows: usize,
}

/// Rewrites one day of raw NDJSON objects as a single parquet file under
/// `{raw_prefix}_compacted/`.
pub struct Compactor {
    engine: Arc<dyn QueryEngine>,
    storage: Arc<dyn ObjectStorage>,
}

impl Compactor {
    pub fn new(engine: Arc<dyn QueryEngine>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { engine, storage }
    }

    pub fn compacted_key(raw_prefix: &str, day: NaiveDate) -> String {
        let prefix = format!("{}_compacted", raw_prefix.trim_end_matches('/'));
        format!("{}/{}", PathBuilder::new(&prefix, day).build_partition_prefix(), COMPACTED_FILE)
    }

    pub async fn compact(&self, stream: Stream, raw_prefix: &str, day: NaiveDate) -> Result<CompactionOutcome> {
        let partition = PathBuilder::new(raw_prefix, day).build_partition_prefix();
        let schema = raw_schema(stream);
        self.engine
            .register_raw_table(COMPACTION_TABLE, &partition, Arc::clone(&schema))
            .await?;

        let batches = self
            .engine
            .run_batches(&format!("SELECT * FROM {}", COMPACTION_TABLE))
            .await?;
        let rows: usize = batches.iter().map(|batch| batch.num_rows()).sum();
        if rows == 0 {
            info!(stream = %stream, partition = %partition, "Nothing to compact");
            return Ok(CompactionOutcome { key: None, rows: 0 });
        }

        let key = Self::compacted_key(raw_prefix, day);
        let bytes = write_parquet(self.storage.as_ref(), &key, &batches, schema).await?;
        info!(stream = %stream, key = %key, rows, bytes, "Compacted raw partition");

        Ok(CompactionOutcome { key: Some(key), rows })
    }
}

/// Encodes `batches` as one SNAPPY parquet object at `key`; returns its size.
/// `fallback` is used only when there are no batches to take a schema from.
pub(crate) async fn write_parquet(
    storage: &dyn ObjectStorage,
    key: &str,
    batches: &[RecordBatch],
    fallback: SchemaRef,
) -> Result<usize> {
    let schema = batches.first().map(|batch| batch.schema()).unwrap_or(fallback);
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(props))?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.close()?;

    storage.put_object(key, &buffer).await?;
    Ok(buffer.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::DataFusionEngine;
    use common::config::QueryConfig;
    use ingest::storage::StoreManager;
    use object_store::memory::InMemory;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn read_parquet(body: Vec<u8>) -> Vec<RecordBatch> {
        ParquetRecordBatchReaderBuilder::try_new(bytes::Bytes::from(body))
            .unwrap()
            .build()
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 4, 13).unwrap()
    }

    #[tokio::test]
    async fn writes_one_parquet_file_per_day() {
        let store = StoreManager::from_object_store(Arc::new(InMemory::new()), "iss-weather-data");
        let storage = store.storage();
        storage
            .put_object(
                "iss_weather_raw/year=2021/month=04/day=13/iss-weather-AUS-Western Australia-2021_04_13-Perth-utc.json",
                b"{\"city\":\"Perth\",\"lat\":-31.95,\"dt\":1,\"rain\":{\"1h\":0.3}}\n{\"city\":\"Perth\",\"lat\":-31.95,\"dt\":2}",
            )
            .await
            .unwrap();

        let engine = Arc::new(DataFusionEngine::new(&store, &QueryConfig::default()).unwrap());
        let outcome = Compactor::new(engine, Arc::clone(&storage))
            .compact(Stream::Weather, "iss_weather_raw", day())
            .await
            .unwrap();

        let key = "iss_weather_raw_compacted/year=2021/month=04/day=13/part-00000.parquet";
        assert_eq!(outcome, CompactionOutcome { key: Some(key.to_string()), rows: 2 });

        let batches = read_parquet(storage.get_object(key).await.unwrap());
        let total: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(total, 2);
        assert!(batches[0].schema().field_with_name("rain").is_ok());
    }

    #[tokio::test]
    async fn empty_partition_writes_nothing() {
        let store = StoreManager::from_object_store(Arc::new(InMemory::new()), "iss-weather-data");
        let engine = Arc::new(DataFusionEngine::new(&store, &QueryConfig::default()).unwrap());

        let outcome = Compactor::new(engine, store.storage())
            .compact(Stream::Passes, "iss_passes_raw", day())
            .await
            .unwrap();
        assert_eq!(outcome, CompactionOutcome { key: None, rows: 0 });
        assert!(store.storage().list_objects("iss_passes_raw_compacted/").await.unwrap().is_empty());
    }
}

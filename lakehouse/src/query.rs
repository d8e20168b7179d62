use crate::utils::arrow::batches_to_rows;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use common::config::QueryConfig;
use common::{Error, Result};
use datafusion::execution::context::SessionContext;
use datafusion::prelude::{NdJsonReadOptions, ParquetReadOptions, SessionConfig};
use ingest::storage::StoreManager;
use ingest::storage::s3::ObjectStorage;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// One result row: column name to value, in select order.
pub type Row = Map<String, Value>;

#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Exposes every NDJSON object under `prefix` as `table`, read with
    /// `schema`. Replaces an earlier registration of the same name.
    async fn register_raw_table(&self, table: &str, prefix: &str, schema: SchemaRef) -> Result<()>;

    /// Same as [`QueryEngine::register_raw_table`] for parquet objects.
    async fn register_parquet_table(&self, table: &str, prefix: &str, schema: SchemaRef) -> Result<()>;

    async fn run_batches(&self, sql: &str) -> Result<Vec<RecordBatch>>;

    async fn run_query(&self, sql: &str) -> Result<Vec<Row>>;
}

/// Runs SQL over the raw store in process. The store is registered under
/// `s3://{bucket}` whatever its backend, so table locations look the same for
/// S3, local and in-memory stores.
pub struct DataFusionEngine {
    ctx: SessionContext,
    bucket: String,
    storage: Arc<dyn ObjectStorage>,
    result_location: Option<String>,
}

impl DataFusionEngine {
    pub fn new(store: &StoreManager, config: &QueryConfig) -> Result<Self> {
        let session = SessionConfig::new()
            .with_create_default_catalog_and_schema(true)
            .with_default_catalog_and_schema(&config.catalog, &config.database);
        let ctx = SessionContext::new_with_config(session);

        let url = Url::parse(&format!("s3://{}", store.bucket()))?;
        ctx.register_object_store(&url, store.object_store());
        debug!(store = %url, catalog = %config.catalog, database = %config.database, "Registered object store");

        Ok(Self {
            ctx,
            bucket: store.bucket().to_string(),
            storage: store.storage(),
            result_location: config
                .result_location
                .as_ref()
                .map(|location| location.trim_end_matches('/').to_string()),
        })
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    async fn save_result(&self, sql: &str, rows: &[Row]) -> Result<()> {
        let Some(location) = &self.result_location else {
            return Ok(());
        };

        let key = format!("{}/{}.json", location, Uuid::new_v4());
        let mut body = serde_json::to_vec(&serde_json::json!({ "query": sql, "rows": rows }))?;
        body.push(b'\n');
        self.storage.put_object(&key, &body).await?;
        debug!(key = %key, "Saved query result");
        Ok(())
    }
}

#[async_trait]
impl QueryEngine for DataFusionEngine {
    async fn register_raw_table(&self, table: &str, prefix: &str, schema: SchemaRef) -> Result<()> {
        let location = format!("s3://{}/{}/", self.bucket, prefix.trim_matches('/'));
        self.ctx.deregister_table(table)?;

        let options = NdJsonReadOptions::default()
            .schema(schema.as_ref())
            .file_extension(".json");
        self.ctx.register_json(table, &location, options).await?;

        info!(table = %table, location = %location, "Registered raw table");
        Ok(())
    }

    async fn register_parquet_table(&self, table: &str, prefix: &str, schema: SchemaRef) -> Result<()> {
        let location = format!("s3://{}/{}/", self.bucket, prefix.trim_matches('/'));
        self.ctx.deregister_table(table)?;

        let options = ParquetReadOptions::default()
            .schema(schema.as_ref())
            .table_partition_cols(vec![]);
        self.ctx.register_parquet(table, &location, options).await?;

        info!(table = %table, location = %location, "Registered parquet table");
        Ok(())
    }

    async fn run_batches(&self, sql: &str) -> Result<Vec<RecordBatch>> {
        debug!(sql = %sql, "Running query");
        let df = self
            .ctx
            .sql(sql)
            .await
            .map_err(|e| Error::Query(format!("{}: {}", sql, e)))?;
        df.collect()
            .await
            .map_err(|e| Error::Query(format!("{}: {}", sql, e)))
    }

    async fn run_query(&self, sql: &str) -> Result<Vec<Row>> {
        let batches = self.run_batches(sql).await?;
        let rows = batches_to_rows(&batches)?;
        self.save_result(sql, &rows).await?;
        Ok(rows)
    }
}

pub mod api;
pub mod aws;
pub mod context;
pub mod enumerator;
pub mod model;
pub mod queue;
pub mod secrets;
pub mod storage;
pub mod transform;
pub mod utils;
pub mod worker;

use chrono::NaiveDate;
use common::Result;
use common::config::Settings;
use context::PipelineContext;
use enumerator::enumerate_work_items;
use model::Stream;
use queue::publish_all;
use storage::count_partition;
use tracing::info;
use worker::BatchReport;

/// Reads the city list and publishes one message per city.
pub async fn run_enqueue(settings: &Settings) -> Result<usize> {
    let context = PipelineContext::from_settings(settings).await?;
    enqueue(&context).await
}

/// Drains the queue into the raw store for one stream.
pub async fn run_worker(settings: &Settings, stream: Stream) -> Result<BatchReport> {
    let context = PipelineContext::from_settings(settings).await?;
    context.worker(stream)?.drain(settings.worker.batch_size).await
}

/// Enqueue and drain in one process. This is the only way to run the pipeline
/// end to end with the in-memory queue.
pub async fn run_local(settings: &Settings, stream: Stream) -> Result<BatchReport> {
    let context = PipelineContext::from_settings(settings).await?;
    let published = enqueue(&context).await?;
    let report = context.worker(stream)?.drain(settings.worker.batch_size).await?;
    info!(published, stored = report.stored(), "Local run finished");
    Ok(report)
}

/// Raw objects already present in the stream's partition for `day`.
pub async fn count_raw_objects(settings: &Settings, stream: Stream, day: NaiveDate) -> Result<usize> {
    let context = PipelineContext::from_settings(settings).await?;
    let storage = context.store.storage();
    count_partition(storage.as_ref(), stream.raw_prefix(settings), day).await
}

async fn enqueue(context: &PipelineContext) -> Result<usize> {
    let source = &context.settings.source;
    let storage = context.store.storage();
    let items = enumerate_work_items(storage.as_ref(), &source.prefix, &source.name).await?;
    publish_all(context.queue.as_ref(), &items).await
}

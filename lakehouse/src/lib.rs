pub mod compaction;
pub mod final_table;
pub mod quality;
pub mod query;
pub mod schema;
pub mod utils;

use chrono::NaiveDate;
use common::Result;
use common::config::Settings;
use compaction::{CompactionOutcome, Compactor};
use final_table::{FinalTableBuilder, FinalTablePrefixes, FinalTableReport};
use ingest::model::Stream;
use ingest::storage::StoreManager;
use quality::{QualityChecker, QualityReport};
use query::DataFusionEngine;
use std::sync::Arc;

/// Runs the daily completeness and quality checks for one stream. Failed checks
/// are part of the report; only an unreachable store is an error.
pub async fn run_quality_checks(settings: &Settings, stream: Stream, day: NaiveDate) -> Result<QualityReport> {
    let store = StoreManager::new(&settings.storage).await?;
    let engine = DataFusionEngine::new(&store, &settings.query)?;
    let checker = QualityChecker::new(
        Arc::new(engine),
        store.storage(),
        stream,
        stream.raw_prefix(settings),
        settings.source.expected_items,
    );
    Ok(checker.run(day).await)
}

pub async fn run_compaction(settings: &Settings, stream: Stream, day: NaiveDate) -> Result<CompactionOutcome> {
    let store = StoreManager::new(&settings.storage).await?;
    let engine = DataFusionEngine::new(&store, &settings.query)?;
    Compactor::new(Arc::new(engine), store.storage())
        .compact(stream, stream.raw_prefix(settings), day)
        .await
}

/// Joins the day's compacted passes and weather into the final table, then
/// checks it for duplicate passes. Both streams must be compacted first.
pub async fn run_final_table(settings: &Settings, day: NaiveDate) -> Result<FinalTableReport> {
    let store = StoreManager::new(&settings.storage).await?;
    let engine = DataFusionEngine::new(&store, &settings.query)?;
    let prefixes = FinalTablePrefixes {
        passes_raw: settings.passes.raw_prefix.clone(),
        weather_raw: settings.weather.raw_prefix.clone(),
        final_prefix: settings.query.final_prefix.clone(),
    };
    FinalTableBuilder::new(Arc::new(engine), store.storage())
        .build_and_check(&prefixes, day)
        .await
}

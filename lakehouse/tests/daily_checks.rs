use chrono::NaiveDate;
use common::config::{CommitOrder, PassesConfig, QueryConfig};
use ingest::api::PassesClient;
use ingest::model::{Stream, WorkItem};
use ingest::queue::{MemoryQueue, publish_all};
use ingest::secrets::StaticSecrets;
use ingest::storage::StoreManager;
use ingest::worker::{Worker, WorkerOptions};
use lakehouse::compaction::Compactor;
use lakehouse::quality::{CheckStatus, QualityChecker};
use lakehouse::query::DataFusionEngine;
use object_store::memory::InMemory;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 4, 13).unwrap()
}

fn items() -> Vec<WorkItem> {
    [
        ("Perth", "Western Australia", -31.9522, 115.8589),
        ("Darwin", "Northern Territory", -12.4634, 130.8456),
        ("Hobart", "Tasmania", -42.8821, 147.3272),
    ]
    .into_iter()
    .map(|(city, region, latitude, longitude)| WorkItem {
        city: city.into(),
        region: region.into(),
        country: "Australia".into(),
        country_code: "AUS".into(),
        latitude,
        longitude,
    })
    .collect()
}

async fn ingest(store: &StoreManager, server: &MockServer, items: &[WorkItem]) {
    let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30)));
    publish_all(queue.as_ref(), items).await.unwrap();

    let config = PassesConfig {
        base_url: format!("{}/rest/v1/satellite/visualpasses", server.uri()),
        ..PassesConfig::default()
    };
    let worker = Worker::new(
        Arc::new(PassesClient::new(&config, Duration::from_secs(5)).unwrap()),
        Arc::new(StaticSecrets::new().with_secret("n2yo_api_key", "n2yo-key")),
        queue,
        store.storage(),
        WorkerOptions {
            raw_prefix: "iss_passes_raw".into(),
            secret_name: "n2yo_api_key".into(),
            commit_order: CommitOrder::WriteThenAcknowledge,
            max_receives: 5,
            concurrency: 4,
            day: Some(day()),
        },
    );
    let report = worker.drain(10).await.unwrap();
    assert_eq!(report.stored(), items.len());
}

async fn stub_passes() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "info": {"satid": 25544, "satname": "SPACE STATION", "transactionscount": 4, "passescount": 2},
            "passes": [
                {"startAz": 307.21, "startAzCompass": "NW", "startEl": 13.08, "startUTC": 1618300000,
                 "maxAz": 225.59, "maxAzCompass": "SW", "maxEl": 79.38, "maxUTC": 1618300300,
                 "endAz": 124.62, "endAzCompass": "SE", "endEl": 0.0, "endUTC": 1618300600,
                 "mag": -3.1, "duration": 450, "startVisibility": 1618300010},
                {"startAz": 250.0, "startAzCompass": "WSW", "startEl": 10.0, "startUTC": 1618390000,
                 "maxAz": 180.0, "maxAzCompass": "S", "maxEl": 30.0, "maxUTC": 1618390300,
                 "endAz": 110.0, "endAzCompass": "ESE", "endEl": 0.0, "endUTC": 1618390600,
                 "mag": -1.4, "duration": 300, "startVisibility": 1618390020}
            ]
        })))
        .mount(&server)
        .await;
    server
}

fn checker(store: &StoreManager, expected: usize) -> QualityChecker {
    let engine = DataFusionEngine::new(store, &QueryConfig::default()).unwrap();
    QualityChecker::new(Arc::new(engine), store.storage(), Stream::Passes, "iss_passes_raw", expected)
}

#[tokio::test]
async fn full_day_passes_every_check_and_compacts() {
    let server = stub_passes().await;
    let store = StoreManager::from_object_store(Arc::new(InMemory::new()), "iss-weather-data");
    ingest(&store, &server, &items()).await;

    let report = checker(&store, 3).run(day()).await;
    assert!(report.passed(), "{:?}", report.checks);
    assert_eq!(report.snapshot.distinct_items, Some(3));
    assert_eq!(report.snapshot.keyed_items, Some(3));

    let engine = DataFusionEngine::new(&store, &QueryConfig::default()).unwrap();
    let outcome = Compactor::new(Arc::new(engine), store.storage())
        .compact(Stream::Passes, "iss_passes_raw", day())
        .await
        .unwrap();
    assert_eq!(outcome.rows, 6);
}

#[tokio::test]
async fn short_day_reports_fail_with_counts() {
    let server = stub_passes().await;
    let store = StoreManager::from_object_store(Arc::new(InMemory::new()), "iss-weather-data");
    ingest(&store, &server, &items()[..2]).await;

    let report = checker(&store, 3).run(day()).await;
    let count = report.check("item_count").unwrap();
    assert_eq!(count.status, CheckStatus::Fail);
    assert!(count.detail.contains("3/2"), "{}", count.detail);
    assert_eq!(report.snapshot.keyed_items, Some(2));
}

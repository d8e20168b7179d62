use chrono::NaiveDate;
use common::config::{CommitOrder, PassesConfig, WeatherConfig};
use ingest::api::{PassesClient, WeatherClient};
use ingest::enumerator::enumerate_work_items;
use ingest::queue::{MemoryQueue, WorkQueue, publish_all};
use ingest::secrets::StaticSecrets;
use ingest::storage::count_partition;
use ingest::storage::s3::{ObjectStorage, ObjectStoreStorage};
use ingest::worker::{Worker, WorkerOptions};
use object_store::memory::InMemory;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CITIES: &str = "\
city,region,country,country_code,latitude,longitude
Perth,Western Australia,Australia,AUS,-31.9522,115.8589
Darwin,Northern Territory,Australia,AUS,-12.4634,130.8456
Hobart,Tasmania,Australia,AUS,-42.8821,147.3272
Auckland,Auckland,New Zealand,NZL,-36.8485,174.7633
";

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 4, 13).unwrap()
}

struct Harness {
    queue: Arc<MemoryQueue>,
    storage: Arc<ObjectStoreStorage>,
}

impl Harness {
    async fn new() -> Self {
        let storage = Arc::new(ObjectStoreStorage::new(Arc::new(InMemory::new()), "iss-weather-data"));
        storage
            .put_object("input_data/cities.csv", CITIES.as_bytes())
            .await
            .unwrap();
        Self {
            queue: Arc::new(MemoryQueue::new(Duration::from_secs(30))),
            storage,
        }
    }

    async fn enqueue(&self) -> usize {
        let items = enumerate_work_items(self.storage.as_ref(), "input_data", "cities.csv")
            .await
            .unwrap();
        publish_all(self.queue.as_ref(), &items).await.unwrap()
    }

    fn passes_worker(&self, server: &MockServer) -> Worker {
        let config = PassesConfig {
            base_url: format!("{}/rest/v1/satellite/visualpasses", server.uri()),
            ..PassesConfig::default()
        };
        let api = PassesClient::new(&config, Duration::from_secs(5)).unwrap();
        Worker::new(
            Arc::new(api),
            Arc::new(StaticSecrets::new().with_secret("n2yo_api_key", r#"{"n2yo": "n2yo-key"}"#)),
            self.queue.clone(),
            self.storage.clone(),
            WorkerOptions {
                raw_prefix: "iss_passes_raw".into(),
                secret_name: "n2yo_api_key".into(),
                commit_order: CommitOrder::WriteThenAcknowledge,
                max_receives: 5,
                concurrency: 3,
                day: Some(day()),
            },
        )
    }

    async fn body(&self, key: &str) -> String {
        String::from_utf8(self.storage.get_object(key).await.unwrap()).unwrap()
    }
}

async fn mount_passes(server: &MockServer, response: Value) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/rest/v1/satellite/visualpasses/25544/.+"))
        .respond_with(ResponseTemplate::new(200).set_body_json(response))
        .mount(server)
        .await;
}

#[tokio::test]
async fn every_enqueued_city_lands_under_its_own_key() {
    let server = MockServer::start().await;
    mount_passes(
        &server,
        json!({
            "info": {"satid": 25544, "satname": "SPACE STATION", "transactionscount": 1, "passescount": 2},
            "passes": [
                {"startAz": 307.21, "startUTC": 1618300000, "maxUTC": 1618300300, "endUTC": 1618300600, "mag": -2.4},
                {"startAz": 250.0, "startUTC": 1618390000, "maxUTC": 1618390300, "endUTC": 1618390600, "mag": -1.1}
            ]
        }),
    )
    .await;

    let harness = Harness::new().await;
    assert_eq!(harness.enqueue().await, 4);

    let report = harness.passes_worker(&server).drain(10).await.unwrap();
    assert_eq!(report.stored(), 4);
    assert!(report.failed.is_empty());
    assert_eq!(harness.queue.pending(), 0);

    let count = count_partition(harness.storage.as_ref(), "iss_passes_raw", day())
        .await
        .unwrap();
    assert_eq!(count, 4);

    let body = harness
        .body("iss_passes_raw/year=2021/month=04/day=13/iss-passes-NZL-Auckland-2021_04_13-Auckland-utc.json")
        .await;
    let lines: Vec<Value> = body.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["city"], "Auckland");
    assert_eq!(lines[0]["country"], "New Zealand");
    assert_eq!(lines[1]["startUTC"], 1618390000);
}

#[tokio::test]
async fn city_without_passes_still_gets_one_line() {
    let server = MockServer::start().await;
    mount_passes(&server, json!({"info": {"satname": "ISS"}, "passes": []})).await;

    let harness = Harness::new().await;
    harness.enqueue().await;
    harness.passes_worker(&server).drain(10).await.unwrap();

    let body = harness
        .body("iss_passes_raw/year=2021/month=04/day=13/iss-passes-AUS-Western Australia-2021_04_13-Perth-utc.json")
        .await;
    assert_eq!(body.lines().count(), 1);
    assert_eq!(
        body,
        r#"{"city":"Perth","lat":-31.9522,"lon":115.8589,"region":"Western Australia","country":"Australia","satname":"ISS"}"#
    );
}

#[tokio::test]
async fn rerun_on_the_same_day_overwrites_in_place() {
    let server = MockServer::start().await;
    mount_passes(&server, json!({"info": {"satname": "ISS"}, "passes": [{"startUTC": 1618300000}]})).await;

    let harness = Harness::new().await;
    let key = "iss_passes_raw/year=2021/month=04/day=13/iss-passes-AUS-Tasmania-2021_04_13-Hobart-utc.json";

    harness.enqueue().await;
    harness.passes_worker(&server).drain(10).await.unwrap();
    let first = harness.body(key).await;

    harness.enqueue().await;
    let report = harness.passes_worker(&server).drain(10).await.unwrap();
    assert_eq!(report.stored(), 4);

    assert_eq!(harness.body(key).await, first);
    let count = count_partition(harness.storage.as_ref(), "iss_passes_raw", day())
        .await
        .unwrap();
    assert_eq!(count, 4);
}

#[tokio::test]
async fn api_outage_leaves_every_message_on_the_queue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let harness = Harness::new().await;
    harness.enqueue().await;
    let report = harness.passes_worker(&server).drain(10).await.unwrap();

    assert_eq!(report.received, 4);
    assert_eq!(report.failed.len(), 4);
    assert_eq!(harness.queue.pending(), 4);
    assert!(harness.storage.list_objects("iss_passes_raw/").await.unwrap().is_empty());
}

#[tokio::test]
async fn weather_stream_writes_hourly_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/data/2\.5/onecall$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lat": -31.95, "lon": 115.86, "timezone": "Australia/Perth", "timezone_offset": 28800,
            "hourly": [
                {"dt": 1618300800, "temp": 19.2, "humidity": 60, "weather": [{"id": 800, "main": "Clear", "description": "clear sky", "icon": "01n"}]},
                {"dt": 1618304400, "temp": 18.7, "humidity": 64, "weather": [{"id": 801, "main": "Clouds", "description": "few clouds", "icon": "02n"}]},
                {"dt": 1618308000, "temp": 18.1, "humidity": 66, "weather": [{"id": 801, "main": "Clouds", "description": "few clouds", "icon": "02n"}]}
            ]
        })))
        .mount(&server)
        .await;

    let harness = Harness::new().await;
    let items = enumerate_work_items(harness.storage.as_ref(), "input_data", "cities.csv")
        .await
        .unwrap();
    harness.queue.publish(&items[0]).await.unwrap();

    let config = WeatherConfig {
        base_url: format!("{}/data/2.5", server.uri()),
        ..WeatherConfig::default()
    };
    let worker = Worker::new(
        Arc::new(WeatherClient::new(&config, Duration::from_secs(5)).unwrap()),
        Arc::new(StaticSecrets::new().with_secret("openweather_api_key", "ow-key")),
        harness.queue.clone(),
        harness.storage.clone(),
        WorkerOptions {
            raw_prefix: "iss_weather_raw".into(),
            secret_name: "openweather_api_key".into(),
            commit_order: CommitOrder::WriteThenAcknowledge,
            max_receives: 5,
            concurrency: 1,
            day: Some(day()),
        },
    );
    let report = worker.drain(10).await.unwrap();
    assert_eq!(report.stored(), 1);

    let body = harness
        .body("iss_weather_raw/year=2021/month=04/day=13/iss-weather-AUS-Western Australia-2021_04_13-Perth-utc.json")
        .await;
    let lines: Vec<Value> = body.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["lat"], json!(-31.95));
    assert_eq!(lines[2]["main"], "Clouds");
    assert!(lines.iter().all(|line| line.get("hourly").is_none() && line.get("weather").is_none()));
}

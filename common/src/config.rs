use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::debug;

use crate::logging::LoggingConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub passes: PassesConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Sqs,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_wait_time")]
    pub wait_time_secs: u64,
    /// Deliveries allowed before an item is routed to the dead-letter queue.
    #[serde(default = "default_max_receives")]
    pub max_receives: u32,
    #[serde(default)]
    pub dead_letter_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    Local,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub local_root: Option<String>,
}

/// Location of the city list and the number of cities it is expected to hold.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub prefix: String,
    pub name: String,
    pub expected_items: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PassesConfig {
    #[serde(default = "default_passes_prefix")]
    pub raw_prefix: String,
    #[serde(default = "default_passes_secret")]
    pub secret_name: String,
    #[serde(default = "default_passes_url")]
    pub base_url: String,
    #[serde(default = "default_norad_id")]
    pub norad_id: u32,
    #[serde(default)]
    pub observer_altitude: i32,
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default = "default_min_visibility")]
    pub min_visibility: u32,
}

impl Default for PassesConfig {
    fn default() -> Self {
        Self {
            raw_prefix: default_passes_prefix(),
            secret_name: default_passes_secret(),
            base_url: default_passes_url(),
            norad_id: default_norad_id(),
            observer_altitude: 0,
            days: default_days(),
            min_visibility: default_min_visibility(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeatherConfig {
    #[serde(default = "default_weather_prefix")]
    pub raw_prefix: String,
    #[serde(default = "default_weather_secret")]
    pub secret_name: String,
    #[serde(default = "default_weather_url")]
    pub base_url: String,
    #[serde(default = "default_exclude")]
    pub exclude: String,
    #[serde(default = "default_units")]
    pub units: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            raw_prefix: default_weather_prefix(),
            secret_name: default_weather_secret(),
            base_url: default_weather_url(),
            exclude: default_exclude(),
            units: default_units(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecretsBackend {
    #[default]
    SecretsManager,
    Env,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecretsConfig {
    #[serde(default)]
    pub backend: SecretsBackend,
    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: SecretsBackend::default(),
            region: default_region(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_catalog")]
    pub catalog: String,
    /// Prefix under which query results are written; results are not kept when unset.
    #[serde(default)]
    pub result_location: Option<String>,
    /// Prefix of the joined passes and weather table.
    #[serde(default = "default_final_prefix")]
    pub final_prefix: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            catalog: default_catalog(),
            result_location: None,
            final_prefix: default_final_prefix(),
        }
    }
}

/// Order of the two side effects that complete a delivered message.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitOrder {
    /// Put the raw object, then delete the message once the put succeeded.
    #[default]
    WriteThenAcknowledge,
    /// Delete the message, then put the raw object. A failed put loses the
    /// item for the day.
    AcknowledgeThenWrite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub commit_order: CommitOrder,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            commit_order: CommitOrder::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_region() -> String {
    "ap-southeast-2".to_string()
}

fn default_visibility_timeout() -> u64 {
    30
}

fn default_wait_time() -> u64 {
    10
}

fn default_max_receives() -> u32 {
    5
}

fn default_passes_prefix() -> String {
    "iss_passes_raw".to_string()
}

fn default_passes_secret() -> String {
    "n2yo_api_key".to_string()
}

fn default_passes_url() -> String {
    "https://api.n2yo.com/rest/v1/satellite/visualpasses".to_string()
}

fn default_norad_id() -> u32 {
    25544
}

fn default_days() -> u32 {
    10
}

fn default_min_visibility() -> u32 {
    300
}

fn default_weather_prefix() -> String {
    "iss_weather_raw".to_string()
}

fn default_weather_secret() -> String {
    "openweather_api_key".to_string()
}

fn default_weather_url() -> String {
    "https://api.openweathermap.org/data/2.5".to_string()
}

fn default_exclude() -> String {
    "current,minutely,daily,alerts".to_string()
}

fn default_units() -> String {
    "metric".to_string()
}

fn default_database() -> String {
    "iss_weather".to_string()
}

fn default_catalog() -> String {
    "datacatalog".to_string()
}

fn default_final_prefix() -> String {
    "final".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_concurrency() -> usize {
    4
}

fn default_request_timeout() -> u64 {
    30
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;

        debug!(
            queue = %settings.queue.url,
            bucket = %settings.storage.bucket,
            commit_order = ?settings.worker.commit_order,
            "Loaded pipeline settings"
        );

        Ok(settings)
    }
}

use super::{EnrichmentApi, build_http_client, get_json, parse_base_url};
use crate::model::{Stream, WorkItem};
use crate::transform::{Record, transform_weather};
use async_trait::async_trait;
use common::config::WeatherConfig;
use common::Result;
use rquest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Hourly forecast for the item's coordinates from the One Call endpoint.
pub struct WeatherClient {
    client: Client,
    endpoint: Url,
    config: WeatherConfig,
}

impl WeatherClient {
    pub fn new(config: &WeatherConfig, timeout: Duration) -> Result<Self> {
        let endpoint = parse_base_url(&config.base_url)?.join("onecall")?;
        Ok(Self {
            client: build_http_client(timeout)?,
            endpoint,
            config: config.clone(),
        })
    }

    pub fn request_url(&self, item: &WorkItem, api_key: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("lat", &item.latitude.to_string())
            .append_pair("lon", &item.longitude.to_string())
            .append_pair("exclude", &self.config.exclude)
            .append_pair("units", &self.config.units)
            .append_pair("appid", api_key);
        url
    }
}

#[async_trait]
impl EnrichmentApi for WeatherClient {
    fn stream(&self) -> Stream {
        Stream::Weather
    }

    async fn fetch(&self, item: &WorkItem, api_key: &str) -> Result<Value> {
        let url = self.request_url(item, api_key);
        get_json(&self.client, &url, "appid").await
    }

    fn transform(&self, item: &WorkItem, response: &Value) -> Result<Vec<Record>> {
        transform_weather(item, response)
    }
}

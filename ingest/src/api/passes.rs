use super::{EnrichmentApi, build_http_client, get_json, parse_base_url};
use crate::model::{Stream, WorkItem};
use crate::transform::{Record, transform_passes};
use async_trait::async_trait;
use common::config::PassesConfig;
use common::{Error, Result};
use rquest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Visual passes of a satellite over the item's coordinates.
pub struct PassesClient {
    client: Client,
    base_url: Url,
    config: PassesConfig,
}

impl PassesClient {
    pub fn new(config: &PassesConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            base_url: parse_base_url(&config.base_url)?,
            config: config.clone(),
        })
    }

    /// `{base}/{norad_id}/{lat}/{lon}/{alt}/{days}/{min_visibility}?apiKey=...`
    pub fn request_url(&self, item: &WorkItem, api_key: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidInput(format!("{} cannot be a base url", self.base_url)))?
            .pop_if_empty()
            .extend([
                self.config.norad_id.to_string(),
                item.latitude.to_string(),
                item.longitude.to_string(),
                self.config.observer_altitude.to_string(),
                self.config.days.to_string(),
                self.config.min_visibility.to_string(),
            ]);
        url.query_pairs_mut().append_pair("apiKey", api_key);
        Ok(url)
    }
}

#[async_trait]
impl EnrichmentApi for PassesClient {
    fn stream(&self) -> Stream {
        Stream::Passes
    }

    async fn fetch(&self, item: &WorkItem, api_key: &str) -> Result<Value> {
        let url = self.request_url(item, api_key)?;
        get_json(&self.client, &url, "apiKey").await
    }

    fn transform(&self, item: &WorkItem, response: &Value) -> Result<Vec<Record>> {
        transform_passes(item, response)
    }
}

pub mod passes;
pub mod weather;

pub use passes::PassesClient;
pub use weather::WeatherClient;

use crate::model::{Stream, WorkItem};
use crate::transform::Record;
use async_trait::async_trait;
use common::{Error, Result};
use rquest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

// Enough of an error body to diagnose a failed call without flooding the log.
const ERROR_BODY_PREVIEW: usize = 256;

/// An external API that enriches one work item.
#[async_trait]
pub trait EnrichmentApi: Send + Sync {
    fn stream(&self) -> Stream;

    /// Calls the API for `item`. Transport failures and non-success statuses
    /// are `EnrichmentApi` errors; a body that is not JSON is a `Transform`
    /// error.
    async fn fetch(&self, item: &WorkItem, api_key: &str) -> Result<Value>;

    /// Flattens a response into the records stored for `item`.
    fn transform(&self, item: &WorkItem, response: &Value) -> Result<Vec<Record>>;
}

pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

pub(crate) fn parse_base_url(base_url: &str) -> Result<Url> {
    // A base without a trailing slash would lose its last segment on join.
    let normalized = format!("{}/", base_url.trim_end_matches('/'));
    Url::parse(&normalized).map_err(|e| Error::InvalidInput(format!("Invalid API base url {}: {}", base_url, e)))
}

/// Renders `url` for logs with the value of `secret_param` masked.
pub(crate) fn redact(url: &Url, secret_param: &str) -> String {
    let mut masked = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == secret_param { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if !pairs.is_empty() {
        masked.query_pairs_mut().clear().extend_pairs(pairs);
    }
    masked.to_string()
}

pub(crate) async fn get_json(client: &Client, url: &Url, secret_param: &str) -> Result<Value> {
    let shown = redact(url, secret_param);
    debug!(url = %shown, "Calling enrichment API");

    let response = client.get(url.as_str()).send().await.map_err(|e| {
        let kind = if e.is_timeout() {
            "timed out"
        } else if e.is_connect() {
            "connection failed"
        } else {
            "transport error"
        };
        Error::EnrichmentApi(format!("GET {} {}", shown, kind))
    })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|_| Error::EnrichmentApi(format!("GET {} body could not be read", shown)))?;

    if !status.is_success() {
        let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
        return Err(Error::EnrichmentApi(format!(
            "GET {} returned {}: {}",
            shown, status, preview
        )));
    }

    serde_json::from_str(&body)
        .map_err(|e| Error::Transform(format!("GET {} returned a non-JSON body: {}", shown, e)))
}

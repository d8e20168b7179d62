use crate::aws::load_sdk_config;
use async_trait::async_trait;
use aws_sdk_secretsmanager::Client as SecretsClient;
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use common::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<String>;
}

pub struct SecretsManagerStore {
    client: SecretsClient,
}

impl SecretsManagerStore {
    pub fn new(client: SecretsClient) -> Self {
        Self { client }
    }

    pub async fn connect(region: &str) -> Self {
        let sdk_config = load_sdk_config(region).await;
        Self::new(SecretsClient::new(&sdk_config))
    }
}

#[async_trait]
impl SecretStore for SecretsManagerStore {
    async fn get_secret(&self, name: &str) -> Result<String> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(name)
            .send()
            .await
            .map_err(|e| Error::CredentialUnavailable {
                name: name.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        let raw = output.secret_string().ok_or_else(|| Error::CredentialUnavailable {
            name: name.to_string(),
            reason: "secret has no string value".into(),
        })?;

        let secret = parse_secret_string(name, raw)?;
        info!(secret = %name, "Retrieved secret");
        Ok(secret)
    }
}

/// Secrets from the process environment: `n2yo_api_key` is read from
/// `N2YO_API_KEY`.
#[derive(Default)]
pub struct EnvSecrets;

#[async_trait]
impl SecretStore for EnvSecrets {
    async fn get_secret(&self, name: &str) -> Result<String> {
        let var = name.to_uppercase();
        let raw = std::env::var(&var).map_err(|_| Error::CredentialUnavailable {
            name: name.to_string(),
            reason: format!("environment variable {} is not set", var),
        })?;
        parse_secret_string(name, &raw)
    }
}

#[derive(Default)]
pub struct StaticSecrets {
    secrets: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: &str, value: &str) -> Self {
        self.secrets.insert(name.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecrets {
    async fn get_secret(&self, name: &str) -> Result<String> {
        let raw = self.secrets.get(name).ok_or_else(|| Error::CredentialUnavailable {
            name: name.to_string(),
            reason: "no such secret".into(),
        })?;
        parse_secret_string(name, raw)
    }
}

/// Secrets are stored either as a bare string or as a one-entry JSON object
/// such as `{"n2yo_api_key": "..."}`; for objects the first value is the key.
pub fn parse_secret_string(name: &str, raw: &str) -> Result<String> {
    let unavailable = |reason: &str| Error::CredentialUnavailable {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let value = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => match map.into_iter().next() {
            Some((_, Value::String(s))) => s,
            Some((_, other)) => other.to_string(),
            None => return Err(unavailable("secret object is empty")),
        },
        Ok(Value::String(s)) => s,
        _ => raw.trim().to_string(),
    };

    if value.is_empty() {
        return Err(unavailable("secret value is empty"));
    }
    Ok(value)
}

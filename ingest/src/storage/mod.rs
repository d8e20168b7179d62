pub mod s3;

use crate::aws::load_sdk_config;
use crate::utils::paths::PathBuilder;
use aws_sdk_s3::Client as S3Client;
use chrono::NaiveDate;
use common::config::{StorageBackend, StorageConfig};
use common::{Error, Result};
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use s3::{ObjectStorage, ObjectStoreStorage, S3Storage};
use std::sync::Arc;
use tracing::info;

/// Hands out the raw store twice: as [`ObjectStorage`] for the workers and as
/// an `object_store` handle for the query engine. Both views address the same
/// bucket.
#[derive(Clone)]
pub struct StoreManager {
    pub config: StorageConfig,
    storage: Arc<dyn ObjectStorage>,
    object_store: Arc<dyn ObjectStore>,
}

impl StoreManager {
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let object_store = build_object_store(config)?;

        let storage: Arc<dyn ObjectStorage> = match config.backend {
            StorageBackend::S3 => {
                let client = Arc::new(build_s3_client(config).await);
                Arc::new(S3Storage::new(client, &config.bucket))
            }
            StorageBackend::Local | StorageBackend::Memory => Arc::new(ObjectStoreStorage::new(
                Arc::clone(&object_store),
                &config.bucket,
            )),
        };

        info!(backend = ?config.backend, bucket = %config.bucket, "Raw store ready");

        Ok(Self {
            config: config.clone(),
            storage,
            object_store,
        })
    }

    /// Wraps an existing `object_store` backend, mostly for tests and
    /// single-process runs.
    pub fn from_object_store(store: Arc<dyn ObjectStore>, bucket: &str) -> Self {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            bucket: bucket.to_string(),
            region: String::new(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            local_root: None,
        };
        Self {
            config,
            storage: Arc::new(ObjectStoreStorage::new(Arc::clone(&store), bucket)),
            object_store: store,
        }
    }

    pub fn storage(&self) -> Arc<dyn ObjectStorage> {
        Arc::clone(&self.storage)
    }

    pub fn object_store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.object_store)
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }
}

async fn build_s3_client(config: &StorageConfig) -> S3Client {
    let sdk_config = load_sdk_config(&config.region).await;
    let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);

    if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
        let credentials = aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "static",
        );
        builder = builder.credentials_provider(credentials);
    }
    if let Some(endpoint) = &config.endpoint {
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    }

    S3Client::from_conf(builder.build())
}

fn build_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend {
        StorageBackend::S3 => {
            let mut builder = AmazonS3Builder::from_env()
                .with_bucket_name(&config.bucket)
                .with_region(&config.region);

            if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
                builder = builder
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key);
            }
            if let Some(endpoint) = &config.endpoint {
                builder = builder.with_endpoint(endpoint).with_allow_http(true);
            }

            Ok(Arc::new(builder.build()?))
        }
        StorageBackend::Local => {
            let root = config.local_root.as_deref().ok_or_else(|| {
                Error::InvalidInput("storage.local_root is required for the local backend".into())
            })?;
            std::fs::create_dir_all(root)?;
            Ok(Arc::new(LocalFileSystem::new_with_prefix(root)?))
        }
        StorageBackend::Memory => Ok(Arc::new(InMemory::new())),
    }
}

/// Number of raw objects already written for `day` under `prefix`. A non-zero
/// count means the day's run has already happened.
pub async fn count_partition(
    storage: &dyn ObjectStorage,
    prefix: &str,
    day: NaiveDate,
) -> Result<usize> {
    let partition = PathBuilder::new(prefix, day).build_partition_prefix();
    let count = storage.list_objects(&format!("{}/", partition)).await?.len();
    info!(partition = %partition, count, "Counted raw objects");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn count_partition_only_counts_the_requested_day() {
        let manager = StoreManager::from_object_store(Arc::new(InMemory::new()), "raw");
        let storage = manager.storage();
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        storage.put_object("iss_weather_raw/year=2026/month=10/day=19/a.json", b"{}").await.unwrap();
        storage.put_object("iss_weather_raw/year=2026/month=10/day=19/b.json", b"{}").await.unwrap();
        storage.put_object("iss_weather_raw/year=2026/month=10/day=18/c.json", b"{}").await.unwrap();

        assert_eq!(count_partition(&*storage, "iss_weather_raw", day).await.unwrap(), 2);
        assert_eq!(count_partition(&*storage, "iss_passes_raw", day).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn local_backend_requires_a_root() {
        let config = StorageConfig {
            backend: StorageBackend::Local,
            bucket: "raw".into(),
            region: "ap-southeast-2".into(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            local_root: None,
        };
        assert!(matches!(StoreManager::new(&config).await, Err(Error::InvalidInput(_))));
    }
}

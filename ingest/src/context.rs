use crate::api::{EnrichmentApi, PassesClient, WeatherClient};
use crate::model::Stream;
use crate::queue::{MemoryQueue, SqsQueue, WorkQueue};
use crate::secrets::{EnvSecrets, SecretStore, SecretsManagerStore};
use crate::storage::StoreManager;
use crate::worker::{Worker, WorkerOptions};
use common::Result;
use common::config::{QueueBackend, SecretsBackend, Settings};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Every adapter a pipeline stage needs, built once from [`Settings`].
pub struct PipelineContext {
    pub settings: Settings,
    pub store: StoreManager,
    pub queue: Arc<dyn WorkQueue>,
    pub dead_letter: Option<Arc<dyn WorkQueue>>,
    pub secrets: Arc<dyn SecretStore>,
}

impl PipelineContext {
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let store = StoreManager::new(&settings.storage).await?;

        let visibility = Duration::from_secs(settings.queue.visibility_timeout_secs);
        let (queue, dead_letter): (Arc<dyn WorkQueue>, Option<Arc<dyn WorkQueue>>) =
            match settings.queue.backend {
                QueueBackend::Sqs => {
                    let queue = SqsQueue::connect(&settings.queue, &settings.queue.url).await?;
                    let dead_letter = match &settings.queue.dead_letter_url {
                        Some(url) => Some(Arc::new(SqsQueue::connect(&settings.queue, url).await?)
                            as Arc<dyn WorkQueue>),
                        None => None,
                    };
                    (Arc::new(queue), dead_letter)
                }
                QueueBackend::Memory => (
                    Arc::new(MemoryQueue::new(visibility)),
                    Some(Arc::new(MemoryQueue::new(visibility)) as Arc<dyn WorkQueue>),
                ),
            };

        let secrets: Arc<dyn SecretStore> = match settings.secrets.backend {
            SecretsBackend::SecretsManager => {
                Arc::new(SecretsManagerStore::connect(&settings.secrets.region).await)
            }
            SecretsBackend::Env => Arc::new(EnvSecrets),
        };

        info!(
            queue = ?settings.queue.backend,
            storage = ?settings.storage.backend,
            secrets = ?settings.secrets.backend,
            "Pipeline context ready"
        );

        Ok(Self {
            settings: settings.clone(),
            store,
            queue,
            dead_letter,
            secrets,
        })
    }

    pub fn api_for(&self, stream: Stream) -> Result<Arc<dyn EnrichmentApi>> {
        let timeout = Duration::from_secs(self.settings.worker.request_timeout_secs);
        Ok(match stream {
            Stream::Passes => Arc::new(PassesClient::new(&self.settings.passes, timeout)?),
            Stream::Weather => Arc::new(WeatherClient::new(&self.settings.weather, timeout)?),
        })
    }

    pub fn worker(&self, stream: Stream) -> Result<Worker> {
        let worker = Worker::new(
            self.api_for(stream)?,
            Arc::clone(&self.secrets),
            Arc::clone(&self.queue),
            self.store.storage(),
            WorkerOptions::for_stream(&self.settings, stream),
        );
        Ok(match &self.dead_letter {
            Some(queue) => worker.with_dead_letter(Arc::clone(queue)),
            None => worker,
        })
    }
}

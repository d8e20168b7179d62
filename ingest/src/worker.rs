use crate::api::EnrichmentApi;
use crate::model::{ItemIdentity, Stream};
use crate::queue::{QueueMessage, WorkQueue};
use crate::secrets::SecretStore;
use crate::storage::s3::ObjectStorage;
use crate::transform::encode_records;
use crate::utils::paths::PathBuilder;
use chrono::{NaiveDate, Utc};
use common::config::{CommitOrder, Settings};
use common::{Error, Result};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub raw_prefix: String,
    pub secret_name: String,
    pub commit_order: CommitOrder,
    pub max_receives: u32,
    pub concurrency: usize,
    /// Partition day for every write. Defaults to the current UTC date at the
    /// time each item is written.
    pub day: Option<NaiveDate>,
}

impl WorkerOptions {
    pub fn for_stream(settings: &Settings, stream: Stream) -> Self {
        Self {
            raw_prefix: stream.raw_prefix(settings).to_string(),
            secret_name: stream.secret_name(settings).to_string(),
            commit_order: settings.worker.commit_order,
            max_receives: settings.queue.max_receives,
            concurrency: settings.worker.concurrency,
            day: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailedItem {
    pub item: ItemIdentity,
    pub error: String,
}

/// What happened to the messages of one or more batches.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub received: usize,
    pub stored_keys: Vec<String>,
    pub dead_lettered: Vec<ItemIdentity>,
    /// Items left unacknowledged for redelivery.
    pub failed: Vec<FailedItem>,
    /// Items acknowledged before a write that then failed. Nothing redelivers
    /// these; the day's partition will be missing them.
    pub lost: Vec<FailedItem>,
}

impl BatchReport {
    pub fn stored(&self) -> usize {
        self.stored_keys.len()
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.received += other.received;
        self.stored_keys.extend(other.stored_keys);
        self.dead_lettered.extend(other.dead_lettered);
        self.failed.extend(other.failed);
        self.lost.extend(other.lost);
    }
}

/// Consumes work items for one enrichment API and writes one raw object per
/// item and day.
pub struct Worker {
    api: Arc<dyn EnrichmentApi>,
    secrets: Arc<dyn SecretStore>,
    queue: Arc<dyn WorkQueue>,
    storage: Arc<dyn ObjectStorage>,
    dead_letter: Option<Arc<dyn WorkQueue>>,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(
        api: Arc<dyn EnrichmentApi>,
        secrets: Arc<dyn SecretStore>,
        queue: Arc<dyn WorkQueue>,
        storage: Arc<dyn ObjectStorage>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            api,
            secrets,
            queue,
            storage,
            dead_letter: None,
            options,
        }
    }

    pub fn with_dead_letter(mut self, queue: Arc<dyn WorkQueue>) -> Self {
        self.dead_letter = Some(queue);
        self
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Receives one batch and processes it. The credential is resolved before
    /// receiving so that a missing credential leaves every message untouched.
    pub async fn run_once(&self, batch_size: usize) -> Result<BatchReport> {
        let api_key = self.secrets.get_secret(&self.options.secret_name).await?;
        let messages = self.queue.receive(batch_size).await?;
        if messages.is_empty() {
            return Ok(BatchReport::default());
        }
        Ok(self.process_batch(messages, &api_key).await)
    }

    /// Runs batches until a receive comes back empty.
    pub async fn drain(&self, batch_size: usize) -> Result<BatchReport> {
        let mut total = BatchReport::default();
        loop {
            let report = self.run_once(batch_size).await?;
            if report.received == 0 {
                break;
            }
            total.merge(report);
        }

        info!(
            stream = %self.api.stream(),
            received = total.received,
            stored = total.stored(),
            dead_lettered = total.dead_lettered.len(),
            failed = total.failed.len(),
            lost = total.lost.len(),
            "Queue drained"
        );
        Ok(total)
    }

    /// Processes already received messages. Per-item failures are collected in
    /// the report and never stop the rest of the batch.
    pub async fn process_batch(&self, messages: Vec<QueueMessage>, api_key: &str) -> BatchReport {
        let mut report = BatchReport {
            received: messages.len(),
            ..BatchReport::default()
        };

        let outcomes: Vec<(ItemIdentity, Result<String>)> = futures::stream::iter(messages)
            .map(|message| async move {
                let identity = message.item.identity();
                let outcome = self.process_message(&message, api_key).await;
                (identity, outcome)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        for (identity, outcome) in outcomes {
            match outcome {
                Ok(key) => report.stored_keys.push(key),
                Err(Error::ExhaustedRetries { .. }) => report.dead_lettered.push(identity),
                Err(e @ Error::StoreWrite { .. })
                    if self.options.commit_order == CommitOrder::AcknowledgeThenWrite =>
                {
                    report.lost.push(FailedItem {
                        item: identity,
                        error: e.to_string(),
                    });
                }
                Err(e) => report.failed.push(FailedItem {
                    item: identity,
                    error: e.to_string(),
                }),
            }
        }

        report
    }

    /// Returns the key written for the message's item.
    #[instrument(
        skip_all,
        fields(stream = %self.api.stream(), item = %message.item.identity(), receives = message.receive_count)
    )]
    pub async fn process_message(&self, message: &QueueMessage, api_key: &str) -> Result<String> {
        if message.receive_count > self.options.max_receives {
            return self.dead_letter(message).await;
        }

        let item = &message.item;
        let result: Result<String> = async {
            let response = self.api.fetch(item, api_key).await?;
            let records = self.api.transform(item, &response)?;
            let body = encode_records(&records)?;
            let day = self.options.day.unwrap_or_else(|| Utc::now().date_naive());
            let key = PathBuilder::new(&self.options.raw_prefix, day)
                .build_object_key(self.api.stream().api_call_name(), item);
            self.commit(message, &key, body.as_bytes()).await?;
            info!(key = %key, records = records.len(), "Stored raw object");
            Ok(key)
        }
        .await;

        if let Err(e) = &result {
            match e {
                Error::StoreWrite { .. } if self.options.commit_order == CommitOrder::AcknowledgeThenWrite => {
                    error!(error = %e, "Message already acknowledged; item is lost for this day")
                }
                e if e.is_redeliverable() => {
                    warn!(error = %e, "Item failed; leaving message for redelivery")
                }
                e => error!(error = %e, "Item failed"),
            }
        }
        result
    }

    async fn commit(&self, message: &QueueMessage, key: &str, body: &[u8]) -> Result<()> {
        match self.options.commit_order {
            CommitOrder::WriteThenAcknowledge => {
                self.write(key, body).await?;
                // The object is stored; a redelivery only rewrites the same key.
                if let Err(e) = self.queue.acknowledge(&message.handle).await {
                    warn!(key = %key, error = %e, "Stored raw object but acknowledge failed; expecting redelivery");
                }
                Ok(())
            }
            CommitOrder::AcknowledgeThenWrite => {
                self.queue.acknowledge(&message.handle).await?;
                self.write(key, body).await
            }
        }
    }

    async fn write(&self, key: &str, body: &[u8]) -> Result<()> {
        self.storage
            .put_object(key, body)
            .await
            .map_err(|e| Error::StoreWrite {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn dead_letter(&self, message: &QueueMessage) -> Result<String> {
        match &self.dead_letter {
            Some(queue) => {
                queue.publish(&message.item).await?;
                warn!("Delivery limit reached; moved item to dead-letter queue");
            }
            None => warn!("Delivery limit reached and no dead-letter queue configured; dropping item"),
        }
        self.queue.acknowledge(&message.handle).await?;
        Err(Error::ExhaustedRetries {
            receives: message.receive_count,
        })
    }
}

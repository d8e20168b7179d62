use super::{QueueMessage, WorkQueue, encode_item};
use crate::aws::load_sdk_config;
use crate::model::WorkItem;
use async_trait::async_trait;
use aws_sdk_sqs::Client as SqsClient;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::MessageSystemAttributeName;
use common::config::QueueConfig;
use common::{Error, Result};
use tracing::{debug, error};

// SQS caps a single receive at ten messages.
const MAX_RECEIVE_BATCH: usize = 10;

pub struct SqsQueue {
    client: SqsClient,
    queue_url: String,
    visibility_timeout_secs: i32,
    wait_time_secs: i32,
}

impl SqsQueue {
    pub fn new(client: SqsClient, queue_url: &str, visibility_timeout_secs: u64, wait_time_secs: u64) -> Self {
        Self {
            client,
            queue_url: queue_url.to_string(),
            visibility_timeout_secs: visibility_timeout_secs.min(i32::MAX as u64) as i32,
            wait_time_secs: wait_time_secs.min(20) as i32,
        }
    }

    pub async fn connect(config: &QueueConfig, queue_url: &str) -> Result<Self> {
        if queue_url.is_empty() {
            return Err(Error::InvalidInput("queue.url is required for the sqs backend".into()));
        }

        let sdk_config = load_sdk_config(&config.region).await;
        let mut builder = aws_sdk_sqs::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self::new(
            SqsClient::from_conf(builder.build()),
            queue_url,
            config.visibility_timeout_secs,
            config.wait_time_secs,
        ))
    }

    fn decode(&self, body: &str) -> Result<WorkItem> {
        serde_json::from_str(body).map_err(|e| Error::Queue(format!("Undecodable message body: {}", e)))
    }
}

#[async_trait]
impl WorkQueue for SqsQueue {
    async fn publish(&self, item: &WorkItem) -> Result<String> {
        let body = encode_item(item)?;
        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| Error::Queue(format!("send_message failed: {}", DisplayErrorContext(&e))))?;

        Ok(output.message_id().unwrap_or_default().to_string())
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>> {
        let max = max_messages.clamp(1, MAX_RECEIVE_BATCH) as i32;
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max)
            .visibility_timeout(self.visibility_timeout_secs)
            .wait_time_seconds(self.wait_time_secs)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| Error::Queue(format!("receive_message failed: {}", DisplayErrorContext(&e))))?;

        let mut delivered = Vec::new();
        for message in output.messages() {
            let (Some(body), Some(handle)) = (message.body(), message.receipt_handle()) else {
                continue;
            };

            // Left on the queue; the queue's own redrive policy disposes of it.
            let item = match self.decode(body) {
                Ok(item) => item,
                Err(e) => {
                    error!(message_id = ?message.message_id(), error = %e, "Skipping message");
                    continue;
                }
            };

            let receive_count = message
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|count| count.parse().ok())
                .unwrap_or(1);

            delivered.push(QueueMessage {
                item,
                handle: handle.to_string(),
                receive_count,
            });
        }

        debug!(count = delivered.len(), queue = %self.queue_url, "Received messages");
        Ok(delivered)
    }

    async fn acknowledge(&self, handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(handle)
            .send()
            .await
            .map_err(|e| Error::Queue(format!("delete_message failed: {}", DisplayErrorContext(&e))))?;

        debug!(queue = %self.queue_url, "Deleted message");
        Ok(())
    }
}

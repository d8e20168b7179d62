use super::{QueueMessage, WorkQueue, encode_item};
use crate::model::WorkItem;
use async_trait::async_trait;
use common::{Error, Result};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

struct StoredMessage {
    id: String,
    body: String,
    receive_count: u32,
    visible_at: Instant,
    handle: Option<String>,
}

/// In-process queue with SQS-style visibility semantics. Time is read from the
/// tokio clock, so paused-time tests can step past the visibility timeout.
pub struct MemoryQueue {
    visibility_timeout: Duration,
    messages: Mutex<Vec<StoredMessage>>,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Messages not yet acknowledged, visible or in flight.
    pub fn pending(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Items of all unacknowledged messages, in publish order.
    pub fn pending_items(&self) -> Result<Vec<WorkItem>> {
        let messages = self.lock()?;
        messages
            .iter()
            .map(|m| serde_json::from_str(&m.body).map_err(Error::from))
            .collect()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<StoredMessage>>> {
        self.messages
            .lock()
            .map_err(|_| Error::Queue("memory queue state poisoned".into()))
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn publish(&self, item: &WorkItem) -> Result<String> {
        let body = encode_item(item)?;
        let id = Uuid::new_v4().to_string();
        self.lock()?.push(StoredMessage {
            id: id.clone(),
            body,
            receive_count: 0,
            visible_at: Instant::now(),
            handle: None,
        });
        Ok(id)
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>> {
        // Same floor as SQS, which rejects a batch size of zero.
        let max_messages = max_messages.max(1);
        let now = Instant::now();
        let mut messages = self.lock()?;
        let mut delivered = Vec::new();

        for message in messages.iter_mut() {
            if delivered.len() >= max_messages {
                break;
            }
            if message.visible_at > now {
                continue;
            }

            let item: WorkItem = match serde_json::from_str(&message.body) {
                Ok(item) => item,
                Err(e) => {
                    warn!(id = %message.id, error = %e, "Skipping undecodable message");
                    continue;
                }
            };

            let handle = Uuid::new_v4().to_string();
            message.receive_count += 1;
            message.visible_at = now + self.visibility_timeout;
            message.handle = Some(handle.clone());

            delivered.push(QueueMessage {
                item,
                handle,
                receive_count: message.receive_count,
            });
        }

        debug!(count = delivered.len(), "Received messages");
        Ok(delivered)
    }

    async fn acknowledge(&self, handle: &str) -> Result<()> {
        let mut messages = self.lock()?;
        let position = messages
            .iter()
            .position(|m| m.handle.as_deref() == Some(handle))
            .ok_or_else(|| {
                Error::Queue(format!("Receipt handle {} is not the current delivery", handle))
            })?;
        let message = messages.remove(position);
        debug!(id = %message.id, "Acknowledged message");
        Ok(())
    }
}

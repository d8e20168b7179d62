pub mod memory;
pub mod sqs;

pub use memory::MemoryQueue;
pub use sqs::SqsQueue;

use crate::model::WorkItem;
use async_trait::async_trait;
use common::{Error, Result};
use tracing::info;

/// A delivered work item. `handle` identifies this delivery only and is the
/// sole way to acknowledge it.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub item: WorkItem,
    pub handle: String,
    /// Deliveries so far, including this one.
    pub receive_count: u32,
}

/// At-least-once, unordered delivery channel between the enumerator and the
/// workers.
///
/// A message that is not acknowledged within the visibility timeout becomes
/// visible again and is redelivered, possibly to another worker. An
/// acknowledged message is never delivered again.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Returns the queue's id for the new message.
    async fn publish(&self, item: &WorkItem) -> Result<String>;
    /// Returns up to `max_messages` visible messages; empty when none are.
    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>>;
    async fn acknowledge(&self, handle: &str) -> Result<()>;
}

pub async fn publish_all(queue: &dyn WorkQueue, items: &[WorkItem]) -> Result<usize> {
    for item in items {
        queue.publish(item).await?;
    }
    info!(count = items.len(), "Published work items to queue");
    Ok(items.len())
}

/// Serializes an item into a queue body. Non-finite coordinates would be
/// written as `null` and never decode again, so they are refused here.
pub(crate) fn encode_item(item: &WorkItem) -> Result<String> {
    if !item.latitude.is_finite() || !item.longitude.is_finite() {
        return Err(Error::InvalidInput(format!(
            "{} has non-finite coordinates ({}, {})",
            item.city, item.latitude, item.longitude
        )));
    }
    Ok(serde_json::to_string(item)?)
}

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    backend::{memory::MemoryTopicQueue, redis::RedisTopicQueue, TopicQueue},
    config::QueueConfig,
    handler::{ItemHandler, SharedHandler},
    Item, QueueError, QueueResult, Status,
};

/// Registry of topic queues sharing one configuration and one cancellation context
pub struct DelayQueue {
    config: Arc<QueueConfig>,
    topic_queues: DashMap<String, Arc<dyn TopicQueue>>,
    /// Serializes whole-registry enumeration (status, close)
    enumerate: Mutex<()>,
    cancel: CancellationToken,
}

impl DelayQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config: Arc::new(config),
            topic_queues: DashMap::new(),
            enumerate: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Arc<QueueConfig> {
        &self.config
    }

    /// Token cancelled by [`DelayQueue::close`]; cancelling it directly hard-stops every ticker
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Create a topic queue for `topic`, register it and start it.
    ///
    /// Uses the distributed backend when a script builder is configured,
    /// the in-process wheel otherwise.
    #[instrument(skip(self, handler))]
    pub async fn start<H: ItemHandler>(&self, topic: &str, handler: H) -> QueueResult<()> {
        let tq: Arc<dyn TopicQueue> = if self.config.script_builder.is_some() {
            Arc::new(RedisTopicQueue::new(self.cancel.clone(), topic, self.config.clone())?)
        } else {
            Arc::new(MemoryTopicQueue::new(self.cancel.clone(), topic, self.config.clone()))
        };
        self.start_topic_queue(tq, Arc::new(handler)).await
    }

    /// Register a caller-built topic queue and start it. The registry is left
    /// untouched when the topic is already taken.
    pub async fn start_topic_queue(&self, tq: Arc<dyn TopicQueue>, handler: SharedHandler) -> QueueResult<()> {
        let topic = tq.topic().to_string();
        match self.topic_queues.entry(topic.clone()) {
            Entry::Occupied(_) => return Err(QueueError::AlreadyRegistered),
            Entry::Vacant(slot) => {
                slot.insert(tq.clone());
            }
        }
        tq.start(handler).await?;
        info!(topic = %topic, "topic queue registered");
        Ok(())
    }

    /// Route an item to its topic's queue
    pub async fn push(&self, item: Item) -> QueueResult<()> {
        let tq = self
            .topic_queues
            .get(&item.topic)
            .map(|entry| entry.value().clone())
            .ok_or(QueueError::QueueClosed)?;
        tq.push(item).await
    }

    /// Close one topic queue; unknown topics are ignored
    pub async fn stop(&self, topic: &str) -> QueueResult<()> {
        let Some(tq) = self.topic_queues.get(topic).map(|entry| entry.value().clone()) else {
            return Ok(());
        };
        tq.close().await
    }

    /// Close every topic queue and cancel the shared context.
    ///
    /// Every queue is closed even if some fail; the first error is returned.
    pub async fn close(&self) -> QueueResult<()> {
        let _guard = self.enumerate.lock().await;

        let mut first_err = None;
        for tq in self.snapshot() {
            if let Err(e) = tq.close().await {
                warn!(topic = %tq.topic(), "close error: {}", e);
                first_err.get_or_insert(e);
            }
        }
        self.cancel.cancel();
        info!(name = %self.config.name, "delay queue closed");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Pending item count of every registered topic
    pub async fn status(&self) -> Status {
        let _guard = self.enumerate.lock().await;

        let mut status = Status::default();
        for tq in self.snapshot() {
            status.queue_length.insert(tq.topic().to_string(), tq.length().await);
        }
        status
    }

    pub fn topics(&self) -> Vec<String> {
        self.topic_queues.iter().map(|entry| entry.key().clone()).collect()
    }

    // Clone out of the map so no shard guard is held across an await
    fn snapshot(&self) -> Vec<Arc<dyn TopicQueue>> {
        self.topic_queues.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl Default for DelayQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::{
    backend::{memory::wheel::Wheel, TopicQueue},
    config::QueueConfig,
    handler::SharedHandler,
    lifecycle::{AckHooks, Lifecycle, Ticker},
    observability::metrics,
    retry::{FailureDecision, RetryPolicy},
    Item, QueueError, QueueResult,
};

/// The wheel counts delays in buckets, one bucket per second
const WHEEL_TICK: Duration = Duration::from_secs(1);

/// In-process topic queue driven by a timing wheel.
///
/// Pending items live only in this process and are lost on restart.
#[derive(Clone)]
pub struct MemoryTopicQueue {
    inner: Arc<MemoryInner>,
}

pub(crate) struct MemoryInner {
    lifecycle: Lifecycle,
    config: Arc<QueueConfig>,
    policy: RetryPolicy,
    /// Buckets and the tracking map share this lock
    wheel: Mutex<Wheel>,
}

impl MemoryTopicQueue {
    pub fn new(cancel: CancellationToken, topic: impl Into<String>, config: Arc<QueueConfig>) -> Self {
        Self::with_wheel(cancel, topic, config, Wheel::new())
    }

    /// Queue over a caller-sized wheel
    pub fn with_wheel(
        cancel: CancellationToken,
        topic: impl Into<String>,
        config: Arc<QueueConfig>,
        wheel: Wheel,
    ) -> Self {
        let lifecycle = Lifecycle::new(topic.into(), cancel, config.monitor.clone());
        Self {
            inner: Arc::new(MemoryInner {
                lifecycle,
                policy: config.retry_policy(),
                config,
                wheel: Mutex::new(wheel),
            }),
        }
    }

    /// Advance the wheel by one bucket and dispatch due items (the ticker body)
    pub fn tick(&self) -> usize {
        self.inner.tick()
    }

    pub fn is_started(&self) -> bool {
        self.inner.lifecycle.is_started()
    }
}

impl MemoryInner {
    fn push(&self, item: Item) -> QueueResult<()> {
        if !self.lifecycle.is_started() {
            return Err(QueueError::QueueClosed);
        }
        let item_id = item.id.clone();
        let placement = self.wheel.lock().push(item)?;
        debug!(
            topic = %self.lifecycle.topic(),
            item_id = %item_id,
            bucket = placement.bucket,
            cycle = placement.cycle_count,
            "item scheduled"
        );
        Ok(())
    }

    fn tick(self: &Arc<Self>) -> usize {
        // Dispatch outside the lock
        let fired = self.wheel.lock().tick();
        let count = fired.len();
        if count > 0 {
            debug!(topic = %self.lifecycle.topic(), fired = count, "wheel bucket fired");
        }
        self.lifecycle.execute(self, fired);
        count
    }
}

#[async_trait]
impl AckHooks for MemoryInner {
    async fn on_success(&self, _item: &Item) -> QueueResult<()> {
        Ok(())
    }

    async fn on_failed(&self, mut item: Item) -> QueueResult<()> {
        match self.policy.record_failure(&mut item) {
            FailureDecision::Retry { failures } => {
                debug!(topic = %self.lifecycle.topic(), item_id = %item.id, failures, "retrying item");
                self.push(item)
            }
            FailureDecision::DeadLetter { failures } => {
                debug!(topic = %self.lifecycle.topic(), item_id = %item.id, failures, "dead letter");
                metrics::monitor_count(
                    self.config.monitor.as_ref(),
                    metrics::DEAD_LETTER,
                    self.lifecycle.topic(),
                    1,
                );
                self.config.dead_letter(&item);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl TopicQueue for MemoryTopicQueue {
    fn topic(&self) -> &str {
        self.inner.lifecycle.topic()
    }

    #[instrument(skip(self, item), fields(topic = %self.topic(), item_id = %item.id))]
    async fn push(&self, item: Item) -> QueueResult<()> {
        self.inner.push(item)
    }

    async fn length(&self) -> i64 {
        self.inner.wheel.lock().len() as i64
    }

    #[instrument(skip(self, handler), fields(topic = %self.topic()))]
    async fn start(&self, handler: SharedHandler) -> QueueResult<()> {
        let inner = Arc::clone(&self.inner);
        let ticker = Ticker::new("wheel", WHEEL_TICK, move || {
            let inner = Arc::clone(&inner);
            async move {
                inner.tick();
                Ok(())
            }
        });
        self.inner.lifecycle.start(handler, vec![ticker])
    }

    #[instrument(skip(self), fields(topic = %self.topic()))]
    async fn close(&self) -> QueueResult<()> {
        self.inner.lifecycle.close().await
    }
}

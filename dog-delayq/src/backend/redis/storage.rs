use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    backend::{
        redis::{
            script::{run_script, Script, ScriptArg, ScriptValue},
            scripts,
        },
        TopicQueue,
    },
    config::QueueConfig,
    handler::SharedHandler,
    lifecycle::{AckHooks, Lifecycle, Ticker},
    observability::metrics,
    retry::{FailureDecision, RetryPolicy},
    Item, QueueError, QueueResult, Score,
};

/// Source of "now" in unix seconds
pub type UnixClock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> i64 {
    Utc::now().timestamp()
}

struct Scripts {
    add: Arc<dyn Script>,
    move_items: Arc<dyn Script>,
    length: Arc<dyn Script>,
    ack_success: Arc<dyn Script>,
    ack_failed: Arc<dyn Script>,
}

/// Topic queue stored in two sorted sets of an external store.
///
/// Pushed items wait in the delay set scored by due time. The poll pass
/// moves due members to the doing set, scored by a visibility deadline, and
/// dispatches them; acks remove or re-score them. Members whose deadline
/// passes without an ack are moved back by the reclaim pass, so delivery is
/// at-least-once.
#[derive(Clone)]
pub struct RedisTopicQueue {
    inner: Arc<RedisInner>,
}

pub(crate) struct RedisInner {
    lifecycle: Lifecycle,
    config: Arc<QueueConfig>,
    policy: RetryPolicy,
    delay_set_key: String,
    doing_set_key: String,
    scripts: Scripts,
    clock: UnixClock,
}

impl RedisTopicQueue {
    /// Build a queue over `config.script_builder`
    pub fn new(cancel: CancellationToken, topic: impl Into<String>, config: Arc<QueueConfig>) -> QueueResult<Self> {
        Self::with_clock(cancel, topic, config, Arc::new(system_clock))
    }

    /// Same as [`RedisTopicQueue::new`] with a custom clock
    pub fn with_clock(
        cancel: CancellationToken,
        topic: impl Into<String>,
        config: Arc<QueueConfig>,
        clock: UnixClock,
    ) -> QueueResult<Self> {
        let topic = topic.into();
        let builder = config.script_builder.clone().ok_or_else(|| {
            QueueError::Script(super::ScriptError::Failed("no script builder configured".to_string()))
        })?;

        let (delay_set_key, doing_set_key) = set_keys(&config.prefix, &topic);
        let scripts = Scripts {
            add: builder.build(scripts::ADD),
            move_items: builder.build(scripts::MOVE),
            length: builder.build(scripts::LENGTH),
            ack_success: builder.build(scripts::ACK_SUCCESS),
            ack_failed: builder.build(scripts::ACK_FAILED),
        };

        Ok(Self {
            inner: Arc::new(RedisInner {
                lifecycle: Lifecycle::new(topic, cancel, config.monitor.clone()),
                policy: config.retry_policy(),
                config,
                delay_set_key,
                doing_set_key,
                scripts,
                clock,
            }),
        })
    }

    pub fn delay_set_key(&self) -> &str {
        &self.inner.delay_set_key
    }

    pub fn doing_set_key(&self) -> &str {
        &self.inner.doing_set_key
    }

    /// Run one poll pass (the poll ticker body); returns claimed members
    pub async fn poll(&self) -> QueueResult<usize> {
        self.inner.poll().await
    }

    /// Run one reclaim pass (the reclaim ticker body); returns reclaimed members
    pub async fn reclaim(&self) -> QueueResult<usize> {
        self.inner.reclaim().await
    }

    /// Move every member of `from` scored at most `now` into `to` with score `now + offset`
    pub async fn move_due(&self, from: &str, to: &str, offset: i64) -> QueueResult<Vec<(Bytes, Score)>> {
        let now = (self.inner.clock)();
        self.inner.move_items(from, to, now, now + offset).await
    }

    pub fn is_started(&self) -> bool {
        self.inner.lifecycle.is_started()
    }
}

/// `do:{topic}` / `doing:{topic}`; the braces keep both keys in one cluster slot
fn set_keys(prefix: &str, topic: &str) -> (String, String) {
    let delay = format!("do:{{{}}}", topic);
    let doing = format!("doing:{{{}}}", topic);
    if prefix.is_empty() {
        (delay, doing)
    } else {
        (format!("{}:{}", prefix, delay), format!("{}:{}", prefix, doing))
    }
}

impl RedisInner {
    fn keys(&self) -> [String; 2] {
        [self.delay_set_key.clone(), self.doing_set_key.clone()]
    }

    async fn push(&self, item: Item) -> QueueResult<()> {
        if !self.lifecycle.is_started() {
            return Err(QueueError::QueueClosed);
        }
        let score = (self.clock)() + item.effective_delay();
        run_script(
            self.scripts.add.as_ref(),
            &[self.delay_set_key.clone()],
            &[ScriptArg::from(&item.value), ScriptArg::Int(score)],
        )
        .await?;
        debug!(topic = %self.lifecycle.topic(), item_id = %item.id, score, "item scheduled");
        Ok(())
    }

    async fn length(&self) -> QueueResult<i64> {
        let reply = run_script(self.scripts.length.as_ref(), &self.keys(), &[]).await?;
        match reply.as_slice() {
            [delay, doing] => {
                let delay = delay.as_int().ok_or_else(|| malformed("length", &reply))?;
                let doing = doing.as_int().ok_or_else(|| malformed("length", &reply))?;
                Ok(delay + doing)
            }
            _ => Err(malformed("length", &reply)),
        }
    }

    async fn move_items(&self, from: &str, to: &str, max_score: i64, new_score: i64) -> QueueResult<Vec<(Bytes, Score)>> {
        let reply = run_script(
            self.scripts.move_items.as_ref(),
            &[from.to_string(), to.to_string()],
            &[ScriptArg::Int(max_score), ScriptArg::Int(new_score)],
        )
        .await?;

        if reply.len() % 2 != 0 {
            return Err(malformed("move", &reply));
        }
        reply
            .chunks(2)
            .map(|pair| {
                let member = pair[0].as_bytes().ok_or_else(|| malformed("move", &reply))?;
                let score = match &pair[1] {
                    ScriptValue::Int(raw) => Some(Score::from_raw(*raw)),
                    ScriptValue::Bytes(text) => std::str::from_utf8(text).ok().and_then(Score::parse),
                    _ => None,
                }
                .ok_or_else(|| malformed("move", &reply))?;
                Ok((member.clone(), score))
            })
            .collect()
    }

    async fn poll(self: &Arc<Self>) -> QueueResult<usize> {
        let now = (self.clock)();
        let deadline = now + self.config.visibility_window.as_secs() as i64;
        let topic = self.lifecycle.topic();

        let claimed = match self
            .move_items(&self.delay_set_key, &self.doing_set_key, now, deadline)
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                metrics::monitor_count(self.config.monitor.as_ref(), metrics::POLL_ERROR, topic, 1);
                return Err(e);
            }
        };

        let count = claimed.len();
        let mut due = Vec::with_capacity(count);
        for (member, score) in claimed {
            let mut item = Item::new(topic, member, 0);
            if let Score::Failed { count: failures } = score {
                item.delay_second = score.to_raw();
                // Entries recorded under a larger budget can arrive already exhausted
                if self.policy.is_exhausted(failures) {
                    self.dead_letter(&item).await;
                    continue;
                }
            }
            due.push(item);
        }

        if count > 0 {
            debug!(topic = %topic, claimed = count, dispatched = due.len(), "claimed due items");
        }
        self.lifecycle.execute(self, due);
        Ok(count)
    }

    async fn reclaim(&self) -> QueueResult<usize> {
        let now = (self.clock)();
        let topic = self.lifecycle.topic();
        match self.move_items(&self.doing_set_key, &self.delay_set_key, now, 0).await {
            Ok(items) => {
                metrics::monitor_count(self.config.monitor.as_ref(), metrics::RECLAIM, topic, items.len() as i64);
                if !items.is_empty() {
                    info!(topic = %topic, reclaimed = items.len(), "reclaimed expired claims");
                }
                Ok(items.len())
            }
            Err(e) => {
                metrics::monitor_count(self.config.monitor.as_ref(), metrics::RECLAIM_ERROR, topic, 1);
                Err(e)
            }
        }
    }

    async fn ack_success(&self, value: &Bytes) -> QueueResult<()> {
        run_script(self.scripts.ack_success.as_ref(), &self.keys(), &[ScriptArg::from(value)]).await?;
        Ok(())
    }

    /// Hand the item to the dead-letter callback and drop it from both sets
    async fn dead_letter(&self, item: &Item) {
        metrics::monitor_count(self.config.monitor.as_ref(), metrics::DEAD_LETTER, self.lifecycle.topic(), 1);
        self.config.dead_letter(item);
        if let Err(e) = self.ack_success(&item.value).await {
            warn!(topic = %self.lifecycle.topic(), "dead letter ack error: {}", e);
        }
    }
}

fn malformed(script: &str, reply: &[ScriptValue]) -> QueueError {
    QueueError::Protocol(format!("{} returned {:?}", script, reply))
}

#[async_trait]
impl AckHooks for RedisInner {
    async fn on_success(&self, item: &Item) -> QueueResult<()> {
        self.ack_success(&item.value).await
    }

    async fn on_failed(&self, mut item: Item) -> QueueResult<()> {
        let score = item.delay_second.min(0);
        match self.policy.record_failure(&mut item) {
            FailureDecision::Retry { failures } => {
                debug!(topic = %self.lifecycle.topic(), failures, "retrying item");
                run_script(
                    self.scripts.ack_failed.as_ref(),
                    &self.keys(),
                    &[ScriptArg::from(&item.value), ScriptArg::Int(score)],
                )
                .await?;
                Ok(())
            }
            FailureDecision::DeadLetter { .. } => {
                self.dead_letter(&item).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl TopicQueue for RedisTopicQueue {
    fn topic(&self) -> &str {
        self.inner.lifecycle.topic()
    }

    #[instrument(skip(self, item), fields(topic = %self.topic(), item_id = %item.id))]
    async fn push(&self, item: Item) -> QueueResult<()> {
        self.inner.push(item).await
    }

    async fn length(&self) -> i64 {
        match self.inner.length().await {
            Ok(length) => length,
            Err(e) => {
                warn!(topic = %self.topic(), "length error: {}", e);
                0
            }
        }
    }

    #[instrument(skip(self, handler), fields(topic = %self.topic()))]
    async fn start(&self, handler: SharedHandler) -> QueueResult<()> {
        let period = self.inner.config.tick_interval;

        let poller = Arc::clone(&self.inner);
        let poll = Ticker::new("poll", period, move || {
            let inner = Arc::clone(&poller);
            async move { inner.poll().await.map(|_| ()) }
        });

        let reclaimer = Arc::clone(&self.inner);
        let reclaim = Ticker::new("reclaim", period, move || {
            let inner = Arc::clone(&reclaimer);
            async move { inner.reclaim().await.map(|_| ()) }
        });

        self.inner.lifecycle.start(handler, vec![poll, reclaim])
    }

    #[instrument(skip(self), fields(topic = %self.topic()))]
    async fn close(&self) -> QueueResult<()> {
        self.inner.lifecycle.close().await
    }
}

//! Start/stop state machine, ticker supervision and item dispatch shared by
//! every backend.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    handler::SharedHandler,
    observability::{metrics, Monitor},
    Item, QueueError, QueueResult,
};

/// Lifecycle of a topic queue. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Created = 0,
    Started = 1,
    Stopped = 2,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Started,
            _ => Self::Stopped,
        }
    }
}

type TickFn = Arc<dyn Fn() -> BoxFuture<'static, QueueResult<()>> + Send + Sync>;

/// A periodic task owned by a topic queue
pub(crate) struct Ticker {
    name: &'static str,
    period: Duration,
    run: TickFn,
}

impl Ticker {
    pub(crate) fn new<F, Fut>(name: &'static str, period: Duration, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        Self {
            name,
            period,
            run: Arc::new(move || f().boxed()),
        }
    }
}

/// Backend acknowledgement applied after each execution
#[async_trait]
pub(crate) trait AckHooks: Send + Sync + 'static {
    async fn on_success(&self, item: &Item) -> QueueResult<()>;

    async fn on_failed(&self, item: Item) -> QueueResult<()>;
}

#[derive(Default)]
struct Running {
    shutdown: Option<CancellationToken>,
    tickers: Vec<JoinHandle<()>>,
}

pub(crate) struct Lifecycle {
    topic: String,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    handler: RwLock<Option<SharedHandler>>,
    running: Mutex<Running>,
    monitor: Option<Arc<dyn Monitor>>,
}

impl Lifecycle {
    pub(crate) fn new(topic: String, cancel: CancellationToken, monitor: Option<Arc<dyn Monitor>>) -> Self {
        Self {
            topic,
            state: Arc::new(AtomicU8::new(LifecycleState::Created as u8)),
            cancel,
            handler: RwLock::new(None),
            running: Mutex::new(Running::default()),
            monitor,
        }
    }

    pub(crate) fn topic(&self) -> &str {
        &self.topic
    }

    pub(crate) fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_started(&self) -> bool {
        self.state() == LifecycleState::Started
    }

    /// Bind the handler and spawn one task per ticker
    pub(crate) fn start(&self, handler: SharedHandler, tickers: Vec<Ticker>) -> QueueResult<()> {
        // Held across the transition so a racing close always sees the handles
        let mut running = self.running.lock();

        if let Err(current) = self.state.compare_exchange(
            LifecycleState::Created as u8,
            LifecycleState::Started as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return match LifecycleState::from_u8(current) {
                LifecycleState::Started => Err(QueueError::AlreadyStarted),
                _ => Err(QueueError::AlreadyClosed),
            };
        }

        *self.handler.write() = Some(handler);

        let shutdown = CancellationToken::new();
        running.tickers = tickers
            .into_iter()
            .map(|ticker| {
                tokio::spawn(run_ticker(
                    self.topic.clone(),
                    ticker,
                    shutdown.clone(),
                    self.cancel.clone(),
                    self.state.clone(),
                ))
            })
            .collect();
        running.shutdown = Some(shutdown);

        info!(topic = %self.topic, tickers = running.tickers.len(), "topic queue started");
        Ok(())
    }

    /// Signal every ticker and wait until all of them have exited
    pub(crate) async fn close(&self) -> QueueResult<()> {
        if self
            .state
            .compare_exchange(
                LifecycleState::Started as u8,
                LifecycleState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(QueueError::AlreadyClosed);
        }

        let tickers = {
            let mut running = self.running.lock();
            if let Some(shutdown) = running.shutdown.take() {
                shutdown.cancel();
            }
            std::mem::take(&mut running.tickers)
        };

        for handle in tickers {
            if let Err(e) = handle.await {
                warn!(topic = %self.topic, "ticker task ended abnormally: {}", e);
            }
        }

        info!(topic = %self.topic, "topic queue closed");
        Ok(())
    }

    fn handler(&self) -> Option<SharedHandler> {
        self.handler.read().clone()
    }

    /// Dispatch every item on its own task; returns without waiting
    pub(crate) fn execute<H: AckHooks>(&self, hooks: &Arc<H>, items: Vec<Item>) {
        if items.is_empty() {
            return;
        }
        let Some(handler) = self.handler() else {
            warn!(topic = %self.topic, dropped = items.len(), "no handler bound, dropping items");
            return;
        };

        for item in items {
            let handler = handler.clone();
            let hooks = Arc::clone(hooks);
            let topic = self.topic.clone();
            let monitor = self.monitor.clone();
            tokio::spawn(async move {
                execute_one_with_retry(&topic, &handler, hooks.as_ref(), monitor.as_ref(), item).await;
            });
        }
    }
}

async fn run_ticker(
    topic: String,
    ticker: Ticker,
    shutdown: CancellationToken,
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
) {
    let mut interval = tokio::time::interval(ticker.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(topic = %topic, ticker = ticker.name, period = ?ticker.period, "ticker running");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!(topic = %topic, ticker = ticker.name, "ticker shutdown");
                break;
            }

            _ = cancel.cancelled() => {
                // Hard stop: no close handshake, the queue just stops accepting work
                state.store(LifecycleState::Stopped as u8, Ordering::Release);
                info!(topic = %topic, ticker = ticker.name, "ticker cancelled");
                break;
            }

            _ = interval.tick() => {
                if let Err(e) = (ticker.run)().await {
                    warn!(topic = %topic, ticker = ticker.name, "ticker error: {}", e);
                }
            }
        }
    }
}

/// Run the handler once, turning a panic into an error
pub(crate) async fn execute_one(handler: &SharedHandler, item: &Item) -> QueueResult<()> {
    match AssertUnwindSafe(handler.handle(item)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(QueueError::Handler(e)),
        Err(panic) => Err(QueueError::HandlePanic(panic_message(panic.as_ref()))),
    }
}

/// Execute, then acknowledge through the backend hooks; hook errors are logged only
pub(crate) async fn execute_one_with_retry<H: AckHooks + ?Sized>(
    topic: &str,
    handler: &SharedHandler,
    hooks: &H,
    monitor: Option<&Arc<dyn Monitor>>,
    item: Item,
) {
    let item_id = item.id.clone();
    let outcome = match execute_one(handler, &item).await {
        Ok(()) => hooks.on_success(&item).await,
        Err(e) => {
            debug!(topic, item_id = %item_id, "handle error: {}", e);
            metrics::monitor_count(monitor, metrics::HANDLE_ERROR, topic, 1);
            hooks.on_failed(item).await
        }
    };
    if let Err(e) = outcome {
        warn!(topic, item_id = %item_id, "execute error: {}", e);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

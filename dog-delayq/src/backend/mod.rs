pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::{handler::SharedHandler, Item, QueueResult};

/// One topic's queue: storage plus its own lifecycle.
///
/// A queue is started at most once; after `close` it rejects pushes and
/// cannot be started again.
#[async_trait]
pub trait TopicQueue: Send + Sync {
    fn topic(&self) -> &str;

    /// Schedule an item. Fails with `QueueClosed` unless the queue is started.
    ///
    /// The in-process wheel rejects an id that is still pending with
    /// `DuplicateItem`; the distributed store keys members by payload, so
    /// equal payloads collapse into one entry.
    async fn push(&self, item: Item) -> QueueResult<()>;

    /// Pending items (scheduled plus in flight for the distributed backend)
    async fn length(&self) -> i64;

    /// Bind the handler and spawn the queue's tickers
    async fn start(&self, handler: SharedHandler) -> QueueResult<()>;

    /// Stop the tickers and wait for them to exit
    async fn close(&self) -> QueueResult<()>;
}

//! # dog-delayq: Delay Queue for DogRS
//!
//! **Run work items after a delay, with retries and dead-lettering**
//!
//! Callers push items tagged with a delay in seconds; the queue invokes the
//! handler registered for the item's topic once the delay has elapsed.
//! Failed executions are retried up to a ceiling, then handed to a
//! dead-letter callback.
//!
//! ## Backends
//!
//! - **In-process**: a 3600-bucket timing wheel advanced once per second.
//!   O(1) push; pending items are lost on restart.
//! - **Distributed**: two sorted sets per topic (delay set, doing set) driven
//!   by atomic Lua scripts. Claimed items become visible again after a
//!   visibility window, so delivery is at-least-once across processes.
//!
//! The registry picks the distributed backend whenever a script builder is
//! configured.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_delayq::prelude::*;
//!
//! # async fn run() -> QueueResult<()> {
//! let queue = DelayQueue::new(QueueConfig::default().with_retry_times(3));
//!
//! queue
//!     .start("reminders", handler_fn(|item: Item| async move {
//!         println!("due: {:?}", item.value);
//!         Ok(())
//!     }))
//!     .await?;
//!
//! queue.push(Item::new("reminders", "call back", 30)).await?;
//!
//! // ...
//! queue.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! With the `redis` feature, plug in a live store:
//!
//! ```rust,ignore
//! let builder = RedisScriptBuilder::connect("redis://127.0.0.1/").await?;
//! let queue = DelayQueue::new(QueueConfig::default().with_script_builder(Arc::new(builder)));
//! ```

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub(crate) mod lifecycle;
pub mod observability;
pub mod retry;
pub mod types;

// Core API exports
pub use engine::DelayQueue;
pub use types::{Item, ItemId, Score, Status};
pub use error::{HandlerError, QueueError, QueueResult};
pub use handler::{handler_fn, DeadLetterFn, HandlerFn, ItemHandler, SharedHandler};
pub use config::QueueConfig;
pub use retry::{FailureDecision, RetryPolicy};

// Backends
pub use backend::TopicQueue;
pub use backend::memory::MemoryTopicQueue;
pub use backend::redis::{RedisTopicQueue, Script, ScriptArg, ScriptBuilder, ScriptError, ScriptValue};

#[cfg(feature = "redis")]
pub use backend::redis::RedisScriptBuilder;

// Observability exports
pub use observability::{LiveCounters, Monitor};

#[cfg(feature = "tracing-basic")]
pub use observability::{init_json_tracing, init_tracing};

/// Everything needed to register handlers and push items
pub mod prelude {
    pub use crate::{
        handler_fn, DelayQueue, HandlerError, Item, ItemHandler, QueueConfig, QueueError, QueueResult,
        TopicQueue,
    };

    pub use crate::{LiveCounters, Monitor};

    #[cfg(feature = "redis")]
    pub use crate::RedisScriptBuilder;

    pub use async_trait::async_trait;
}

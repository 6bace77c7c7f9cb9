use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{HandlerError, Item};

/// Processes items once their delay has elapsed.
///
/// Delivery is at-least-once and executions run concurrently, so
/// implementations must tolerate repeated and overlapping calls. A panic
/// inside `handle` is caught and treated as a failure.
#[async_trait]
pub trait ItemHandler: Send + Sync + 'static {
    async fn handle(&self, item: &Item) -> Result<(), HandlerError>;
}

/// Shared handle to a type-erased handler
pub type SharedHandler = Arc<dyn ItemHandler>;

/// Callback receiving items whose retry budget is exhausted; runs inline on the ticker
pub type DeadLetterFn = Arc<dyn Fn(&Item) + Send + Sync>;

/// Handler backed by an async closure, see [`handler_fn`]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as an [`ItemHandler`]
///
/// ```rust
/// use dog_delayq::{handler_fn, HandlerError, Item};
///
/// let handler = handler_fn(|item: Item| async move {
///     if item.value.is_empty() {
///         return Err(HandlerError::new("empty payload"));
///     }
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Item) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> ItemHandler for HandlerFn<F>
where
    F: Fn(Item) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, item: &Item) -> Result<(), HandlerError> {
        (self.f)(item.clone()).await
    }
}

#[async_trait]
impl<H: ItemHandler + ?Sized> ItemHandler for Arc<H> {
    async fn handle(&self, item: &Item) -> Result<(), HandlerError> {
        (**self).handle(item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handler_fn_forwards_result() {
        let handler = handler_fn(|item: Item| async move {
            if item.delay_second < 0 {
                Err(HandlerError::new("retried"))
            } else {
                Ok(())
            }
        });

        assert!(handler.handle(&Item::new("t", "a", 0)).await.is_ok());
        let err = handler.handle(&Item::new("t", "a", -1)).await.unwrap_err();
        assert_eq!(err.message(), "retried");
    }
}

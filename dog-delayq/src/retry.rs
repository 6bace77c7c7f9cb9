use crate::Item;

/// Default number of retries after the first failed execution
pub const DEFAULT_RETRY_TIMES: u32 = 10;

/// What to do with an item after its handler failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Re-enqueue for another attempt
    Retry { failures: u32 },
    /// Retry budget exhausted; route to the dead-letter callback
    DeadLetter { failures: u32 },
}

/// Retry ceiling shared by both backends.
///
/// A handler sees an item at most `retry_times + 1` times: the first
/// execution plus `retry_times` retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_times: u32,
}

impl RetryPolicy {
    pub fn new(retry_times: u32) -> Self {
        Self { retry_times }
    }

    /// True once `failures` recorded failures leave no retry budget
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures > self.retry_times
    }

    /// Record one more failure on the item and decide its fate.
    ///
    /// A pending forward delay is discarded first, so a retried item is due
    /// immediately and its `delay_second` becomes the negative failure count.
    pub fn record_failure(&self, item: &mut Item) -> FailureDecision {
        if item.delay_second > 0 {
            item.delay_second = 0;
        }
        item.delay_second = item.delay_second.saturating_sub(1);

        let failures = item.failures();
        if self.is_exhausted(failures) {
            FailureDecision::DeadLetter { failures }
        } else {
            FailureDecision::Retry { failures }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_TIMES)
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use crate::QueueResult;

/// Claims that failed with a script error
pub const POLL_ERROR: &str = "delayq_poll_error";
/// Items moved back from the doing set after their visibility window
pub const RECLAIM: &str = "delayq_reclaim";
/// Reclaim passes that failed with a script error
pub const RECLAIM_ERROR: &str = "delayq_reclaim_error";
/// Handler executions that returned an error or panicked
pub const HANDLE_ERROR: &str = "delayq_handle_error";
/// Items routed to the dead-letter callback
pub const DEAD_LETTER: &str = "delayq_dead_letter";

/// Counter sink: increment a named counter for a topic by `delta`
pub trait Monitor: Send + Sync {
    fn count(&self, metric: &str, topic: &str, delta: i64) -> QueueResult<()>;
}

/// Forward to an optional monitor; sink failures are logged and dropped
pub(crate) fn monitor_count(monitor: Option<&Arc<dyn Monitor>>, metric: &str, topic: &str, delta: i64) {
    let Some(monitor) = monitor else {
        return;
    };
    if let Err(e) = monitor.count(metric, topic, delta) {
        warn!(metric, topic, "monitor counter error: {}", e);
    }
}

/// In-process counters keyed by metric name and topic
#[derive(Debug, Default)]
pub struct LiveCounters {
    counters: DashMap<(String, String), i64>,
}

impl LiveCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter
    pub fn get(&self, metric: &str, topic: &str) -> i64 {
        self.counters
            .get(&(metric.to_string(), topic.to_string()))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// Totals per metric across all topics
    pub fn totals(&self) -> HashMap<String, i64> {
        let mut totals = HashMap::new();
        for entry in self.counters.iter() {
            *totals.entry(entry.key().0.clone()).or_insert(0) += *entry.value();
        }
        totals
    }
}

impl Monitor for LiveCounters {
    fn count(&self, metric: &str, topic: &str, delta: i64) -> QueueResult<()> {
        *self
            .counters
            .entry((metric.to_string(), topic.to_string()))
            .or_insert(0) += delta;
        Ok(())
    }
}

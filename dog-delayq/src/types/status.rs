use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of every registered topic queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// topic -> pending item count
    pub queue_length: HashMap<String, i64>,
}

impl Status {
    /// Pending count for a topic, if it is registered
    pub fn length_of(&self, topic: &str) -> Option<i64> {
        self.queue_length.get(topic).copied()
    }

    /// Pending count across all topics
    pub fn total(&self) -> i64 {
        self.queue_length.values().sum()
    }
}

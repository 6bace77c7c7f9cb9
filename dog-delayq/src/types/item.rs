use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::ids::ItemId;

/// Unit of work carried through a delay queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Tracking identifier (generated when not supplied)
    pub id: ItemId,

    /// Topic the item is routed to
    pub topic: String,

    /// Opaque payload bytes; the distributed backend uses them as member identity
    pub value: Bytes,

    /// Forward delay in seconds when non-negative.
    ///
    /// Negative values only come out of the failure path and record the
    /// number of failures so far as their absolute value.
    pub delay_second: i64,
}

impl Item {
    /// Create an item with a generated id
    pub fn new(topic: impl Into<String>, value: impl Into<Bytes>, delay_second: i64) -> Self {
        Self {
            id: ItemId::new(),
            topic: topic.into(),
            value: value.into(),
            delay_second,
        }
    }

    /// Create an item that carries a JSON-encoded payload
    #[cfg(feature = "json")]
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
        delay_second: i64,
    ) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(payload)?;
        Ok(Self::new(topic, bytes, delay_second))
    }

    /// Decode the payload as JSON
    #[cfg(feature = "json")]
    pub fn decode_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.value)
    }

    /// Override the tracking id
    pub fn with_id(mut self, id: impl Into<ItemId>) -> Self {
        self.id = id.into();
        self
    }

    /// Seconds to wait before the item becomes eligible; failure records count as due now
    pub fn effective_delay(&self) -> i64 {
        self.delay_second.max(0)
    }

    /// Number of failed executions recorded on this item
    pub fn failures(&self) -> u32 {
        if self.delay_second < 0 {
            self.delay_second.unsigned_abs().min(u32::MAX as u64) as u32
        } else {
            0
        }
    }
}

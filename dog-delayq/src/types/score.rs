use serde::{Deserialize, Serialize};

/// Sorted-set score of an entry in the distributed store.
///
/// On the wire a non-negative score is a unix timestamp and a negative score
/// is a failure record whose magnitude counts failures so far. Failure
/// records always sort before any timestamp, so they are due immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Score {
    /// Eligible at this unix timestamp (seconds)
    DueAt(i64),
    /// Failed `count` times, eligible now
    Failed { count: u32 },
}

impl Score {
    /// Decode a raw score read from the store
    pub fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            Score::Failed {
                count: raw.unsigned_abs().min(u32::MAX as u64) as u32,
            }
        } else {
            Score::DueAt(raw)
        }
    }

    /// Encode for the store
    pub fn to_raw(self) -> i64 {
        match self {
            Score::DueAt(ts) => ts,
            Score::Failed { count } => -(count as i64),
        }
    }

    /// Parse a score reply. Redis renders integral scores without a fraction
    /// but may use float notation for large magnitudes.
    pub fn parse(text: &str) -> Option<Self> {
        let raw = match text.parse::<i64>() {
            Ok(raw) => raw,
            Err(_) => {
                let float = text.parse::<f64>().ok()?;
                if !float.is_finite() {
                    return None;
                }
                float.trunc() as i64
            }
        };
        Some(Self::from_raw(raw))
    }

    pub fn failures(self) -> u32 {
        match self {
            Score::DueAt(_) => 0,
            Score::Failed { count } => count,
        }
    }
}

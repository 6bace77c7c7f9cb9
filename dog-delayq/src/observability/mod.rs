pub mod metrics;
#[cfg(feature = "tracing-basic")]
pub mod tracing;

pub use metrics::{LiveCounters, Monitor};

#[cfg(feature = "tracing-basic")]
pub use self::tracing::{init_json_tracing, init_tracing};

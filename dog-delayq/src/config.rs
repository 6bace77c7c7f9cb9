use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::{
    backend::redis::ScriptBuilder,
    handler::DeadLetterFn,
    observability::Monitor,
    retry::{RetryPolicy, DEFAULT_RETRY_TIMES},
    Item,
};

/// Default key namespace for the distributed backend
pub const DEFAULT_PREFIX: &str = "__dq";

/// Default claim margin before an unacked item may be reclaimed
pub const DEFAULT_VISIBILITY_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Configuration shared by the registry and every topic queue it creates
#[derive(Clone)]
pub struct QueueConfig {
    /// Name used to label this queue in logs
    pub name: String,
    /// Key prefix for the distributed backend; empty disables prefixing
    pub prefix: String,
    /// Retries after the first failed execution before dead-lettering
    pub retry_times: u32,
    /// Receives items whose retry budget is exhausted
    pub on_dead_letter: Option<DeadLetterFn>,
    /// Presence selects the distributed backend
    pub script_builder: Option<Arc<dyn ScriptBuilder>>,
    /// Counter sink
    pub monitor: Option<Arc<dyn Monitor>>,
    /// Period of the distributed poll and reclaim passes; the in-process
    /// wheel always ticks once per second
    pub tick_interval: Duration,
    /// How long a claimed item stays invisible before reclaim
    pub visibility_window: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "delayq".to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            retry_times: DEFAULT_RETRY_TIMES,
            on_dead_letter: Some(Arc::new(log_dead_letter)),
            script_builder: None,
            monitor: None,
            tick_interval: Duration::from_secs(1),
            visibility_window: DEFAULT_VISIBILITY_WINDOW,
        }
    }
}

fn log_dead_letter(item: &Item) {
    warn!(
        topic = %item.topic,
        item_id = %item.id,
        failures = item.failures(),
        "got dead letter"
    );
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_retry_times(mut self, retry_times: u32) -> Self {
        self.retry_times = retry_times;
        self
    }

    pub fn with_on_dead_letter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Item) + Send + Sync + 'static,
    {
        self.on_dead_letter = Some(Arc::new(f));
        self
    }

    /// Drop dead letters silently
    pub fn without_dead_letter(mut self) -> Self {
        self.on_dead_letter = None;
        self
    }

    pub fn with_script_builder(mut self, builder: Arc<dyn ScriptBuilder>) -> Self {
        self.script_builder = Some(builder);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_visibility_window(mut self, window: Duration) -> Self {
        self.visibility_window = window;
        self
    }

    /// Apply overrides from environment variables starting with `prefix`.
    ///
    /// Recognized keys (after the prefix): `NAME`, `PREFIX`, `RETRY_TIMES`,
    /// `TICK_INTERVAL_MS`, `VISIBILITY_WINDOW_SECS`. Unparseable values are
    /// logged and ignored.
    ///
    /// ```bash
    /// export DELAYQ__RETRY_TIMES=3
    /// ```
    pub fn from_env(self, prefix: &str) -> Self {
        self.apply_vars(prefix, std::env::vars())
    }

    fn apply_vars<I>(mut self, prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(stripped) = key.strip_prefix(prefix) else {
                continue;
            };
            match stripped {
                "NAME" => self.name = value,
                "PREFIX" => self.prefix = value,
                "RETRY_TIMES" => match value.parse() {
                    Ok(n) => self.retry_times = n,
                    Err(_) => warn!(key = %key, value = %value, "ignoring invalid retry times"),
                },
                "TICK_INTERVAL_MS" => match value.parse::<u64>() {
                    Ok(ms) if ms > 0 => self.tick_interval = Duration::from_millis(ms),
                    _ => warn!(key = %key, value = %value, "ignoring invalid tick interval"),
                },
                "VISIBILITY_WINDOW_SECS" => match value.parse() {
                    Ok(secs) => self.visibility_window = Duration::from_secs(secs),
                    Err(_) => warn!(key = %key, value = %value, "ignoring invalid visibility window"),
                },
                _ => {}
            }
        }
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_times)
    }

    pub(crate) fn dead_letter(&self, item: &Item) {
        if let Some(f) = &self.on_dead_letter {
            f(item);
        }
    }
}

impl fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConfig")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("retry_times", &self.retry_times)
            .field("on_dead_letter", &self.on_dead_letter.is_some())
            .field("script_builder", &self.script_builder.is_some())
            .field("monitor", &self.monitor.is_some())
            .field("tick_interval", &self.tick_interval)
            .field("visibility_window", &self.visibility_window)
            .finish()
    }
}

use thiserror::Error;

use crate::backend::redis::ScriptError;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors returned synchronously by queue operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("topic queue has started")]
    AlreadyStarted,

    #[error("topic queue has closed")]
    AlreadyClosed,

    #[error("topic queue has registered")]
    AlreadyRegistered,

    /// Push or lookup against a topic that is unregistered or stopped
    #[error("topic queue is closed")]
    QueueClosed,

    /// The in-process wheel already holds a pending item with this id
    #[error("item {0} is already pending")]
    DuplicateItem(String),

    #[error("handle panic: {0}")]
    HandlePanic(String),

    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    /// The store answered with a reply shape the protocol does not expect
    #[error("malformed script reply: {0}")]
    Protocol(String),

    #[error("monitor error: {0}")]
    Monitor(String),
}

/// Failure reported by an item handler; always absorbed by the retry pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

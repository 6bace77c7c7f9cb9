use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Failure reported by a script client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The store has no compiled copy of the script; retry with the full body
    #[error("NOSCRIPT {0}")]
    NoScript(String),

    #[error("{0}")]
    Failed(String),
}

/// Positional script argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptArg {
    Int(i64),
    Bytes(Bytes),
}

impl From<i64> for ScriptArg {
    fn from(v: i64) -> Self {
        ScriptArg::Int(v)
    }
}

impl From<Bytes> for ScriptArg {
    fn from(v: Bytes) -> Self {
        ScriptArg::Bytes(v)
    }
}

impl From<&Bytes> for ScriptArg {
    fn from(v: &Bytes) -> Self {
        ScriptArg::Bytes(v.clone())
    }
}

/// One element of a script reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptValue {
    Nil,
    Int(i64),
    Bytes(Bytes),
    Array(Vec<ScriptValue>),
}

impl ScriptValue {
    /// Integer view; numeric bulk strings are accepted
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptValue::Int(v) => Some(*v),
            ScriptValue::Bytes(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ScriptValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// A compiled script bound to a store connection.
///
/// Implementations must execute the body atomically against the store.
#[async_trait]
pub trait Script: Send + Sync {
    /// Run by digest; fails with [`ScriptError::NoScript`] when the store lacks it
    async fn eval_sha(&self, keys: &[String], args: &[ScriptArg]) -> Result<Vec<ScriptValue>, ScriptError>;

    /// Run by sending the full body
    async fn eval(&self, keys: &[String], args: &[ScriptArg]) -> Result<Vec<ScriptValue>, ScriptError>;
}

/// Factory turning a script body into an executable [`Script`]
pub trait ScriptBuilder: Send + Sync {
    fn build(&self, source: &'static str) -> Arc<dyn Script>;
}

/// Evaluate by digest, falling back to the full body on `NoScript`
pub async fn run_script(
    script: &dyn Script,
    keys: &[String],
    args: &[ScriptArg],
) -> Result<Vec<ScriptValue>, ScriptError> {
    match script.eval_sha(keys, args).await {
        Err(ScriptError::NoScript(_)) => script.eval(keys, args).await,
        other => other,
    }
}

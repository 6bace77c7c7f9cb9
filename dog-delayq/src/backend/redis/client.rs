use std::sync::Arc;

use ::redis::aio::ConnectionManager;
use ::redis::{Cmd, ErrorKind, RedisError, Value};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::script::{Script, ScriptArg, ScriptBuilder, ScriptError, ScriptValue};

/// [`ScriptBuilder`] backed by a multiplexed, auto-reconnecting Redis connection
#[derive(Clone)]
pub struct RedisScriptBuilder {
    conn: ConnectionManager,
}

impl RedisScriptBuilder {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Open a connection manager for `url` (e.g. `redis://127.0.0.1/`)
    pub async fn connect(url: &str) -> Result<Self, ScriptError> {
        let client = ::redis::Client::open(url).map_err(script_error)?;
        let conn = ConnectionManager::new(client).await.map_err(script_error)?;
        debug!(url, "connected script client");
        Ok(Self { conn })
    }
}

impl ScriptBuilder for RedisScriptBuilder {
    fn build(&self, source: &'static str) -> Arc<dyn Script> {
        let hash = ::redis::Script::new(source).get_hash().to_string();
        Arc::new(RedisScript {
            source,
            hash,
            conn: self.conn.clone(),
        })
    }
}

struct RedisScript {
    source: &'static str,
    hash: String,
    conn: ConnectionManager,
}

impl RedisScript {
    async fn invoke(&self, mut cmd: Cmd, keys: &[String], args: &[ScriptArg]) -> Result<Vec<ScriptValue>, ScriptError> {
        cmd.arg(keys.len()).arg(keys);
        for arg in args {
            match arg {
                ScriptArg::Int(v) => cmd.arg(*v),
                ScriptArg::Bytes(b) => cmd.arg(b.as_ref()),
            };
        }

        let mut conn = self.conn.clone();
        let reply: Value = cmd.query_async(&mut conn).await.map_err(script_error)?;
        Ok(match reply {
            Value::Nil => Vec::new(),
            Value::Array(items) => items.into_iter().map(convert).collect(),
            other => vec![convert(other)],
        })
    }
}

#[async_trait]
impl Script for RedisScript {
    async fn eval_sha(&self, keys: &[String], args: &[ScriptArg]) -> Result<Vec<ScriptValue>, ScriptError> {
        let mut cmd = ::redis::cmd("EVALSHA");
        cmd.arg(&self.hash);
        self.invoke(cmd, keys, args).await
    }

    async fn eval(&self, keys: &[String], args: &[ScriptArg]) -> Result<Vec<ScriptValue>, ScriptError> {
        let mut cmd = ::redis::cmd("EVAL");
        cmd.arg(self.source);
        self.invoke(cmd, keys, args).await
    }
}

fn script_error(e: RedisError) -> ScriptError {
    if e.kind() == ErrorKind::NoScriptError {
        ScriptError::NoScript(e.to_string())
    } else {
        ScriptError::Failed(e.to_string())
    }
}

fn convert(value: Value) -> ScriptValue {
    match value {
        Value::Nil => ScriptValue::Nil,
        Value::Int(v) => ScriptValue::Int(v),
        Value::Boolean(v) => ScriptValue::Int(v as i64),
        Value::BulkString(b) => ScriptValue::Bytes(Bytes::from(b)),
        Value::SimpleString(s) => ScriptValue::Bytes(Bytes::from(s)),
        Value::Okay => ScriptValue::Bytes(Bytes::from_static(b"OK")),
        Value::Double(v) => ScriptValue::Bytes(Bytes::from(v.to_string())),
        Value::Array(items) | Value::Set(items) => ScriptValue::Array(items.into_iter().map(convert).collect()),
        other => ScriptValue::Bytes(Bytes::from(format!("{:?}", other))),
    }
}

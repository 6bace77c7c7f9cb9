//! Distributed backend over sorted sets and atomic scripts.
//!
//! The engine only needs the [`ScriptBuilder`] capability; a client for a
//! real Redis server lives behind the `redis` feature.

#[cfg(feature = "redis")]
pub mod client;
pub mod script;
pub mod scripts;
pub mod storage;

#[cfg(feature = "redis")]
pub use client::RedisScriptBuilder;
pub use script::{run_script, Script, ScriptArg, ScriptBuilder, ScriptError, ScriptValue};
pub use storage::{RedisTopicQueue, UnixClock};

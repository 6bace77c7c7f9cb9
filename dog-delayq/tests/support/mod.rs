//! In-memory stand-in for a Redis server running the delay-queue scripts.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use dog_delayq::backend::redis::{scripts, Script, ScriptArg, ScriptBuilder, ScriptError, ScriptValue};
use dog_delayq::backend::redis::UnixClock;

/// Sorted sets keyed by name, member -> score
#[derive(Default)]
pub struct FakeStore {
    sets: Mutex<HashMap<String, HashMap<Bytes, i64>>>,
    /// Script bodies the server has compiled (EVALSHA hits)
    loaded: Mutex<HashSet<&'static str>>,
    evals: AtomicUsize,
    failing: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Builder handing out scripts bound to this store
    pub fn builder(self: &Arc<Self>) -> Arc<dyn ScriptBuilder> {
        Arc::new(FakeBuilder { store: self.clone() })
    }

    /// Make every script call fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of full-body EVAL calls served
    pub fn evals(&self) -> usize {
        self.evals.load(Ordering::SeqCst)
    }

    pub fn score(&self, key: &str, member: &[u8]) -> Option<i64> {
        self.sets.lock().get(key).and_then(|set| set.get(member).copied())
    }

    pub fn card(&self, key: &str) -> usize {
        self.sets.lock().get(key).map(|set| set.len()).unwrap_or(0)
    }

    pub fn insert(&self, key: &str, member: &[u8], score: i64) {
        self.sets
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(Bytes::copy_from_slice(member), score);
    }

    fn zadd(sets: &mut HashMap<String, HashMap<Bytes, i64>>, key: &str, member: Bytes, score: i64) {
        sets.entry(key.to_string()).or_default().insert(member, score);
    }

    fn zrem(sets: &mut HashMap<String, HashMap<Bytes, i64>>, key: &str, member: &[u8]) {
        if let Some(set) = sets.get_mut(key) {
            set.remove(member);
        }
    }

    fn run(&self, source: &'static str, keys: &[String], args: &[ScriptArg]) -> Result<Vec<ScriptValue>, ScriptError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ScriptError::Failed("connection refused".to_string()));
        }
        let mut sets = self.sets.lock();

        if source == scripts::ADD {
            Self::zadd(&mut sets, &keys[0], bytes_arg(&args[0]), int_arg(&args[1]));
            Ok(vec![ScriptValue::Int(1)])
        } else if source == scripts::MOVE {
            let (max_score, new_score) = (int_arg(&args[0]), int_arg(&args[1]));
            let mut due: Vec<(Bytes, i64)> = sets
                .get(&keys[0])
                .map(|set| {
                    set.iter()
                        .filter(|(_, score)| **score <= max_score)
                        .map(|(member, score)| (member.clone(), *score))
                        .collect()
                })
                .unwrap_or_default();
            due.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

            let mut reply = Vec::with_capacity(due.len() * 2);
            for (member, score) in due {
                Self::zadd(&mut sets, &keys[1], member.clone(), new_score);
                Self::zrem(&mut sets, &keys[0], &member);
                reply.push(ScriptValue::Bytes(member));
                // Lua sees WITHSCORES scores as strings
                reply.push(ScriptValue::Bytes(Bytes::from(score.to_string())));
            }
            Ok(reply)
        } else if source == scripts::LENGTH {
            let card = |key: &String| sets.get(key).map(|set| set.len() as i64).unwrap_or(0);
            Ok(vec![ScriptValue::Int(card(&keys[0])), ScriptValue::Int(card(&keys[1]))])
        } else if source == scripts::ACK_SUCCESS {
            let member = bytes_arg(&args[0]);
            Self::zrem(&mut sets, &keys[0], &member);
            Self::zrem(&mut sets, &keys[1], &member);
            Ok(vec![ScriptValue::Int(1)])
        } else if source == scripts::ACK_FAILED {
            let member = bytes_arg(&args[0]);
            Self::zrem(&mut sets, &keys[1], &member);
            Self::zadd(&mut sets, &keys[0], member, int_arg(&args[1]) - 1);
            Ok(vec![ScriptValue::Int(1)])
        } else {
            Err(ScriptError::Failed("unknown script".to_string()))
        }
    }
}

fn int_arg(arg: &ScriptArg) -> i64 {
    match arg {
        ScriptArg::Int(v) => *v,
        ScriptArg::Bytes(b) => std::str::from_utf8(b).unwrap().parse().unwrap(),
    }
}

fn bytes_arg(arg: &ScriptArg) -> Bytes {
    match arg {
        ScriptArg::Bytes(b) => b.clone(),
        ScriptArg::Int(v) => Bytes::from(v.to_string()),
    }
}

struct FakeBuilder {
    store: Arc<FakeStore>,
}

impl ScriptBuilder for FakeBuilder {
    fn build(&self, source: &'static str) -> Arc<dyn Script> {
        Arc::new(FakeScript {
            source,
            store: self.store.clone(),
        })
    }
}

struct FakeScript {
    source: &'static str,
    store: Arc<FakeStore>,
}

#[async_trait]
impl Script for FakeScript {
    async fn eval_sha(&self, keys: &[String], args: &[ScriptArg]) -> Result<Vec<ScriptValue>, ScriptError> {
        if !self.store.loaded.lock().contains(self.source) {
            return Err(ScriptError::NoScript("No matching script".to_string()));
        }
        self.store.run(self.source, keys, args)
    }

    async fn eval(&self, keys: &[String], args: &[ScriptArg]) -> Result<Vec<ScriptValue>, ScriptError> {
        self.store.evals.fetch_add(1, Ordering::SeqCst);
        self.store.loaded.lock().insert(self.source);
        self.store.run(self.source, keys, args)
    }
}

/// Manually driven unix clock
#[derive(Clone)]
pub struct FakeClock(Arc<AtomicI64>);

impl FakeClock {
    pub fn at(now: i64) -> Self {
        Self(Arc::new(AtomicI64::new(now)))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn unix(&self) -> UnixClock {
        let now = self.0.clone();
        Arc::new(move || now.load(Ordering::SeqCst))
    }
}

/// Let spawned tickers and item tasks run to completion
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

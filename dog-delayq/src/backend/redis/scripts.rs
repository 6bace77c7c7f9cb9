//! Lua bodies executed atomically by the store.
//!
//! Keys are always `[delay_set, doing_set]` except for `MOVE`, which takes
//! `[source, target]`. Scores are unix seconds, or negative failure counts.

/// ARGV: value, score
pub const ADD: &str = r#"
local delay_set = KEYS[1]
local value, score = ARGV[1], ARGV[2]
redis.call('ZADD', delay_set, score or 0, value)
return {1}
"#;

/// ARGV: max_score, new_score. Returns flat `member, score` pairs.
pub const MOVE: &str = r#"
local source_set, target_set = KEYS[1], KEYS[2]
local max_score, new_score = ARGV[1], ARGV[2]
local items = redis.call('ZRANGEBYSCORE', source_set, '-inf', max_score, 'WITHSCORES')
for i, value in ipairs(items) do
    if i % 2 ~= 0 then
        redis.call('ZADD', target_set, new_score or 0, value)
        redis.call('ZREM', source_set, value)
    end
end
return items
"#;

/// Returns `{ZCARD delay_set, ZCARD doing_set}`
pub const LENGTH: &str = r#"
local delay_set, doing_set = KEYS[1], KEYS[2]
local l1 = redis.call('ZCARD', delay_set)
local l2 = redis.call('ZCARD', doing_set)
return {l1, l2}
"#;

/// ARGV: value
pub const ACK_SUCCESS: &str = r#"
local delay_set, doing_set = KEYS[1], KEYS[2]
local value = ARGV[1]
redis.call('ZREM', delay_set, value)
redis.call('ZREM', doing_set, value)
return {1}
"#;

/// ARGV: value, score. Re-adds with `score - 1`, one more failure.
pub const ACK_FAILED: &str = r#"
local delay_set, doing_set = KEYS[1], KEYS[2]
local value, score = ARGV[1], tonumber(ARGV[2])
redis.call('ZREM', doing_set, value)
redis.call('ZADD', delay_set, score - 1, value)
return {1}
"#;

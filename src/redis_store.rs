//! Redis-backed counter store.
//!
//! Every check-then-mutate composite runs as a server-side Lua script, so the
//! read, the decision and the write are one atomic unit no matter how many
//! service instances share the store. Requires Redis 7.4 or newer for
//! per-hash-field expiry (`HEXPIRE`).

use crate::error::{RateLimitError, RateLimitResult};
use crate::store::CounterStore;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;

/// Atomic fixed-window guard: increment only below the limit, arming the
/// window TTL on the first increment so sustained traffic cannot keep the
/// window open forever. Replies -1 when the stored counter is not numeric.
const CHECK_AND_INCREMENT_SCRIPT: &str = r#"
	local count = tonumber(redis.call('GET', KEYS[1]) or '0')
	if count == nil then
		return -1
	end
	if count >= tonumber(ARGV[1]) then
		return 0
	end
	redis.call('INCR', KEYS[1])
	if redis.call('TTL', KEYS[1]) < 0 then
		redis.call('EXPIRE', KEYS[1], ARGV[2])
	end
	return 1
"#;

/// Atomic sliding-window guard: sum all live sub-window buckets, increment the
/// current bucket only below the limit, and arm that bucket's expiry only on
/// its first write. Replies -1 when a stored bucket is not numeric.
const HASH_CHECK_AND_INCREMENT_SCRIPT: &str = r#"
	local total = 0
	for _, value in ipairs(redis.call('HVALS', KEYS[1])) do
		local count = tonumber(value)
		if count == nil then
			return -1
		end
		total = total + count
	end
	if total >= tonumber(ARGV[1]) then
		return 0
	end
	redis.call('HINCRBY', KEYS[1], ARGV[3], 1)
	redis.call('HEXPIRE', KEYS[1], ARGV[2], 'NX', 'FIELDS', 1, ARGV[3])
	return 1
"#;

/// Optimistic two-key compare-and-swap. Absent keys are modeled as the empty
/// string, which never collides with stored values because every value this
/// crate writes is numeric text.
const COMPARE_AND_SET_PAIR_SCRIPT: &str = r#"
	local first = redis.call('GET', KEYS[1])
	local second = redis.call('GET', KEYS[2])
	if first == false then first = '' end
	if second == false then second = '' end
	if first ~= ARGV[1] or second ~= ARGV[2] then
		return 0
	end
	redis.call('SET', KEYS[1], ARGV[3])
	redis.call('SET', KEYS[2], ARGV[4])
	return 1
"#;

/// Counter store backed by a shared Redis instance.
///
/// # Examples
///
/// ```no_run
/// use rate_gate::RedisStore;
///
/// let store = RedisStore::new("redis://127.0.0.1:6379").unwrap();
/// ```
#[derive(Clone)]
pub struct RedisStore {
	client: redis::Client,
}

impl RedisStore {
	/// Creates a new `RedisStore` connected to the specified Redis URL.
	///
	/// # Errors
	///
	/// Returns [`RateLimitError::Store`] if the URL cannot be parsed.
	pub fn new(url: &str) -> RateLimitResult<Self> {
		let client = redis::Client::open(url)?;
		Ok(Self { client })
	}

	async fn connection(&self) -> RateLimitResult<MultiplexedConnection> {
		Ok(self.client.get_multiplexed_async_connection().await?)
	}

	/// Map an admission script reply onto the admit/deny decision.
	///
	/// The scripts reply with integer 1 (admit), 0 (deny) or -1 (a stored
	/// value failed to parse back as a number); an empty or differently typed
	/// reply means the operation cannot be trusted and the call fails loudly
	/// instead of guessing.
	fn decision_from_reply(reply: redis::Value) -> RateLimitResult<bool> {
		match reply {
			redis::Value::Int(1) => Ok(true),
			redis::Value::Int(0) => Ok(false),
			redis::Value::Int(-1) => Err(RateLimitError::Protocol(
				"stored counter is not an integer".to_string(),
			)),
			redis::Value::Nil => {
				tracing::warn!("admission script returned an empty reply");
				Err(RateLimitError::Protocol(
					"admission script returned an empty reply".to_string(),
				))
			}
			other => Err(RateLimitError::Protocol(format!(
				"unexpected admission script reply: {:?}",
				other
			))),
		}
	}
}

#[async_trait]
impl CounterStore for RedisStore {
	async fn get(&self, key: &str) -> RateLimitResult<Option<String>> {
		let mut conn = self.connection().await?;
		Ok(conn.get(key).await?)
	}

	async fn check_and_increment(
		&self,
		key: &str,
		limit: u64,
		ttl_secs: u64,
	) -> RateLimitResult<bool> {
		let mut conn = self.connection().await?;
		let reply: redis::Value = Script::new(CHECK_AND_INCREMENT_SCRIPT)
			.key(key)
			.arg(limit)
			.arg(ttl_secs)
			.invoke_async(&mut conn)
			.await?;
		Self::decision_from_reply(reply)
	}

	async fn hash_get_all(&self, key: &str) -> RateLimitResult<HashMap<String, String>> {
		let mut conn = self.connection().await?;
		Ok(conn.hgetall(key).await?)
	}

	async fn hash_check_and_increment(
		&self,
		key: &str,
		field: &str,
		limit: u64,
		ttl_secs: u64,
	) -> RateLimitResult<bool> {
		let mut conn = self.connection().await?;
		let reply: redis::Value = Script::new(HASH_CHECK_AND_INCREMENT_SCRIPT)
			.key(key)
			.arg(limit)
			.arg(ttl_secs)
			.arg(field)
			.invoke_async(&mut conn)
			.await?;
		Self::decision_from_reply(reply)
	}

	async fn get_pair(
		&self,
		first: &str,
		second: &str,
	) -> RateLimitResult<(Option<String>, Option<String>)> {
		let mut conn = self.connection().await?;
		// MGET executes as one atomic command, one round trip for both keys
		let values: (Option<String>, Option<String>) = redis::cmd("MGET")
			.arg(first)
			.arg(second)
			.query_async(&mut conn)
			.await?;
		Ok(values)
	}

	async fn compare_and_set_pair(
		&self,
		first: &str,
		second: &str,
		expected_first: Option<&str>,
		expected_second: Option<&str>,
		new_first: &str,
		new_second: &str,
	) -> RateLimitResult<bool> {
		let mut conn = self.connection().await?;
		let reply: redis::Value = Script::new(COMPARE_AND_SET_PAIR_SCRIPT)
			.key(first)
			.key(second)
			.arg(expected_first.unwrap_or(""))
			.arg(expected_second.unwrap_or(""))
			.arg(new_first)
			.arg(new_second)
			.invoke_async(&mut conn)
			.await?;
		Self::decision_from_reply(reply)
	}
}

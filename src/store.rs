//! Shared counter store capability and the in-process implementation.
//!
//! Every mutating operation folds its check and its write into one atomic
//! unit, so concurrent callers for the same client can never both observe
//! remaining capacity and both commit.

use crate::clock::{Clock, SystemClock};
use crate::error::{RateLimitError, RateLimitResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Shared counter capability consumed by every limiter.
#[async_trait]
pub trait CounterStore: Send + Sync {
	/// Plain read of a string key. Expired or absent keys read as `None`.
	async fn get(&self, key: &str) -> RateLimitResult<Option<String>>;

	/// Atomically increment `key` by one if its current integer value
	/// (absent = 0) is below `limit`. The expiry is armed to `ttl_secs` only
	/// when the key carries none yet, so the window closes `ttl_secs` after
	/// its first increment even under sustained traffic. Returns whether the
	/// increment happened; a denied check leaves the key untouched.
	async fn check_and_increment(
		&self,
		key: &str,
		limit: u64,
		ttl_secs: u64,
	) -> RateLimitResult<bool>;

	/// All live fields of the hash at `key`. Absent hashes read as empty.
	async fn hash_get_all(&self, key: &str) -> RateLimitResult<HashMap<String, String>>;

	/// Atomically increment `field` of the hash at `key` by one if the sum of
	/// all live fields is below `limit`. The per-field expiry is armed to
	/// `ttl_secs` only on the field's first write, so each bucket ages out
	/// independently. Returns whether the increment happened.
	async fn hash_check_and_increment(
		&self,
		key: &str,
		field: &str,
		limit: u64,
		ttl_secs: u64,
	) -> RateLimitResult<bool>;

	/// One atomic read of two keys.
	async fn get_pair(
		&self,
		first: &str,
		second: &str,
	) -> RateLimitResult<(Option<String>, Option<String>)>;

	/// Atomically write both keys iff their current values equal the expected
	/// ones (`None` models absence). Returns whether the swap took place.
	async fn compare_and_set_pair(
		&self,
		first: &str,
		second: &str,
		expected_first: Option<&str>,
		expected_second: Option<&str>,
		new_first: &str,
		new_second: &str,
	) -> RateLimitResult<bool>;
}

/// Value with its own expiry, treated as absent once the deadline passes.
#[derive(Clone)]
struct Entry {
	value: String,
	expires_at_millis: Option<u64>,
}

impl Entry {
	fn is_expired(&self, now_millis: u64) -> bool {
		self.expires_at_millis.is_some_and(|at| now_millis >= at)
	}
}

/// Full eviction of expired entries runs roughly once per this many mutations.
const EVICTION_INTERVAL: u64 = 100;

/// In-process counter store for tests and single-instance deployments.
///
/// Each composite operation runs under a single write lock, which makes it
/// atomic with respect to every other caller of the same store.
#[derive(Clone)]
pub struct MemoryStore<C: Clock = SystemClock> {
	strings: Arc<RwLock<HashMap<String, Entry>>>,
	hashes: Arc<RwLock<HashMap<String, HashMap<String, Entry>>>>,
	clock: Arc<C>,
	/// Counter for probabilistic eviction scheduling
	ops_counter: Arc<AtomicU64>,
}

impl MemoryStore<SystemClock> {
	/// Creates a new `MemoryStore` driven by the system clock.
	///
	/// # Examples
	///
	/// ```
	/// use rate_gate::MemoryStore;
	///
	/// let store = MemoryStore::new();
	/// ```
	pub fn new() -> Self {
		Self::with_clock(Arc::new(SystemClock::new()))
	}
}

impl<C: Clock> MemoryStore<C> {
	/// Create a new `MemoryStore` with a custom clock.
	pub fn with_clock(clock: Arc<C>) -> Self {
		Self {
			strings: Arc::new(RwLock::new(HashMap::new())),
			hashes: Arc::new(RwLock::new(HashMap::new())),
			clock,
			ops_counter: Arc::new(AtomicU64::new(0)),
		}
	}

	/// Drop expired entries from both maps.
	///
	/// Called probabilistically on each mutation to bound memory growth
	/// without adding per-request overhead.
	async fn maybe_evict_expired(&self) {
		let count = self.ops_counter.fetch_add(1, Ordering::Relaxed);
		if count % EVICTION_INTERVAL != 0 {
			return;
		}
		let now = self.clock.now_millis();
		let mut strings = self.strings.write().await;
		strings.retain(|_, entry| !entry.is_expired(now));
		drop(strings);
		let mut hashes = self.hashes.write().await;
		for fields in hashes.values_mut() {
			fields.retain(|_, entry| !entry.is_expired(now));
		}
		hashes.retain(|_, fields| !fields.is_empty());
	}
}

impl Default for MemoryStore<SystemClock> {
	fn default() -> Self {
		Self::new()
	}
}

fn parse_count(raw: &str) -> RateLimitResult<u64> {
	raw.parse::<u64>().map_err(|_| {
		RateLimitError::Protocol(format!("stored counter is not an integer: {:?}", raw))
	})
}

#[async_trait]
impl<C: Clock> CounterStore for MemoryStore<C> {
	async fn get(&self, key: &str) -> RateLimitResult<Option<String>> {
		let now = self.clock.now_millis();
		let strings = self.strings.read().await;
		Ok(strings
			.get(key)
			.filter(|entry| !entry.is_expired(now))
			.map(|entry| entry.value.clone()))
	}

	async fn check_and_increment(
		&self,
		key: &str,
		limit: u64,
		ttl_secs: u64,
	) -> RateLimitResult<bool> {
		self.maybe_evict_expired().await;

		let now = self.clock.now_millis();
		let mut strings = self.strings.write().await;
		if strings.get(key).is_some_and(|entry| entry.is_expired(now)) {
			strings.remove(key);
		}

		let current = match strings.get(key) {
			Some(entry) => parse_count(&entry.value)?,
			None => 0,
		};
		if current >= limit {
			return Ok(false);
		}

		let entry = strings.entry(key.to_string()).or_insert(Entry {
			value: "0".to_string(),
			expires_at_millis: None,
		});
		entry.value = (current + 1).to_string();
		if entry.expires_at_millis.is_none() {
			entry.expires_at_millis = Some(now + ttl_secs * 1_000);
		}
		Ok(true)
	}

	async fn hash_get_all(&self, key: &str) -> RateLimitResult<HashMap<String, String>> {
		let now = self.clock.now_millis();
		let hashes = self.hashes.read().await;
		let Some(fields) = hashes.get(key) else {
			return Ok(HashMap::new());
		};
		Ok(fields
			.iter()
			.filter(|(_, entry)| !entry.is_expired(now))
			.map(|(field, entry)| (field.clone(), entry.value.clone()))
			.collect())
	}

	async fn hash_check_and_increment(
		&self,
		key: &str,
		field: &str,
		limit: u64,
		ttl_secs: u64,
	) -> RateLimitResult<bool> {
		self.maybe_evict_expired().await;

		let now = self.clock.now_millis();
		let mut hashes = self.hashes.write().await;
		let fields = hashes.entry(key.to_string()).or_default();
		fields.retain(|_, entry| !entry.is_expired(now));

		let mut total = 0u64;
		for entry in fields.values() {
			total += parse_count(&entry.value)?;
		}
		if total >= limit {
			return Ok(false);
		}

		let entry = fields.entry(field.to_string()).or_insert(Entry {
			value: "0".to_string(),
			expires_at_millis: None,
		});
		let current = parse_count(&entry.value)?;
		entry.value = (current + 1).to_string();
		if entry.expires_at_millis.is_none() {
			entry.expires_at_millis = Some(now + ttl_secs * 1_000);
		}
		Ok(true)
	}

	async fn get_pair(
		&self,
		first: &str,
		second: &str,
	) -> RateLimitResult<(Option<String>, Option<String>)> {
		let now = self.clock.now_millis();
		let strings = self.strings.read().await;
		let read = |key: &str| {
			strings
				.get(key)
				.filter(|entry| !entry.is_expired(now))
				.map(|entry| entry.value.clone())
		};
		Ok((read(first), read(second)))
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
		let now = self.clock.now_millis();
		let mut strings = self.strings.write().await;
		let current = |strings: &HashMap<String, Entry>, key: &str| -> Option<String> {
			strings
				.get(key)
				.filter(|entry| !entry.is_expired(now))
				.map(|entry| entry.value.clone())
		};
		if current(&strings, first).as_deref() != expected_first
			|| current(&strings, second).as_deref() != expected_second
		{
			return Ok(false);
		}
		strings.insert(
			first.to_string(),
			Entry {
				value: new_first.to_string(),
				expires_at_millis: None,
			},
		);
		strings.insert(
			second.to_string(),
			Entry {
				value: new_second.to_string(),
				expires_at_millis: None,
			},
		);
		Ok(true)
	}
}

//! Sliding window rate limiting.
//!
//! The rolling window is approximated by fine-grained sub-window buckets,
//! stored as fields of one hash per client. Only buckets are persisted, not
//! individual request timestamps, which amortizes the cost of exact
//! sliding-window accounting at a granularity of one sub-window. Each bucket
//! carries its own expiry equal to the full window, anchored at the bucket's
//! first write, so stale buckets age out independently.

use crate::RateLimiter;
use crate::clock::{Clock, SystemClock};
use crate::error::{RateLimitError, RateLimitResult};
use crate::key;
use crate::store::CounterStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Sliding window admission decider.
///
/// # Examples
///
/// ```
/// use rate_gate::{MemoryStore, RateLimiter, SlidingWindowLimiter};
///
/// # tokio_test::block_on(async {
/// // 100 requests per rolling minute, tracked in 10s buckets
/// let limiter = SlidingWindowLimiter::new(MemoryStore::new(), 60, 10, 100).unwrap();
/// assert!(limiter.is_allowed("client-1").await.unwrap());
/// # });
/// ```
pub struct SlidingWindowLimiter<S: CounterStore, C: Clock = SystemClock> {
	store: S,
	window_secs: u64,
	sub_window_secs: u64,
	limit: u64,
	clock: Arc<C>,
}

impl<S: CounterStore> SlidingWindowLimiter<S, SystemClock> {
	/// Creates a new sliding window limiter driven by the system clock.
	///
	/// # Errors
	///
	/// Returns [`RateLimitError::InvalidConfig`] if any parameter is zero or
	/// if `sub_window_secs` does not evenly tile `window_secs`.
	pub fn new(
		store: S,
		window_secs: u64,
		sub_window_secs: u64,
		limit: u64,
	) -> RateLimitResult<Self> {
		Self::with_clock(
			store,
			window_secs,
			sub_window_secs,
			limit,
			Arc::new(SystemClock::new()),
		)
	}
}

impl<S: CounterStore, C: Clock> SlidingWindowLimiter<S, C> {
	/// Creates a new sliding window limiter with a custom clock.
	pub fn with_clock(
		store: S,
		window_secs: u64,
		sub_window_secs: u64,
		limit: u64,
		clock: Arc<C>,
	) -> RateLimitResult<Self> {
		if window_secs == 0 {
			return Err(RateLimitError::InvalidConfig(
				"window_secs must be positive".to_string(),
			));
		}
		if sub_window_secs == 0 {
			return Err(RateLimitError::InvalidConfig(
				"sub_window_secs must be positive".to_string(),
			));
		}
		if window_secs % sub_window_secs != 0 {
			return Err(RateLimitError::InvalidConfig(format!(
				"sub_window_secs ({}) must evenly tile window_secs ({})",
				sub_window_secs, window_secs
			)));
		}
		if limit == 0 {
			return Err(RateLimitError::InvalidConfig(
				"limit must be positive".to_string(),
			));
		}
		Ok(Self {
			store,
			window_secs,
			sub_window_secs,
			limit,
			clock,
		})
	}

	/// Index of the sub-window bucket the current instant falls into.
	fn current_sub_window(&self) -> u64 {
		self.clock.now_millis() / (self.sub_window_secs * 1_000)
	}

	/// Sum of all live sub-window buckets for the client.
	pub async fn current_count(&self, client_id: &str) -> RateLimitResult<u64> {
		key::validate_client_id(client_id)?;
		let buckets = self
			.store
			.hash_get_all(&key::sliding_window_key(client_id))
			.await?;
		let mut total = 0u64;
		for raw in buckets.values() {
			total += raw.parse::<u64>().map_err(|_| {
				RateLimitError::Protocol(format!(
					"stored sub-window count is not an integer: {:?}",
					raw
				))
			})?;
		}
		Ok(total)
	}
}

#[async_trait]
impl<S: CounterStore, C: Clock> RateLimiter for SlidingWindowLimiter<S, C> {
	async fn is_allowed(&self, client_id: &str) -> RateLimitResult<bool> {
		key::validate_client_id(client_id)?;
		let window_key = key::sliding_window_key(client_id);
		let sub_window = self.current_sub_window().to_string();
		let admitted = self
			.store
			.hash_check_and_increment(&window_key, &sub_window, self.limit, self.window_secs)
			.await?;
		tracing::debug!(
			client_id = %client_id,
			sub_window = %sub_window,
			admitted = admitted,
			"sliding window decision"
		);
		Ok(admitted)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::MockClock;
	use crate::store::MemoryStore;
	use rstest::rstest;
	use std::collections::HashMap;
	use std::time::Duration;

	fn limiter_with_clock(
		window_secs: u64,
		sub_window_secs: u64,
		limit: u64,
	) -> (
		SlidingWindowLimiter<MemoryStore<MockClock>, MockClock>,
		Arc<MockClock>,
	) {
		let clock = Arc::new(MockClock::new(0));
		let store = MemoryStore::with_clock(clock.clone());
		(
			SlidingWindowLimiter::with_clock(
				store,
				window_secs,
				sub_window_secs,
				limit,
				clock.clone(),
			)
			.unwrap(),
			clock,
		)
	}

	#[rstest]
	#[tokio::test]
	async fn test_admits_up_to_limit_across_sub_windows() {
		// Arrange - 3 requests per 3s window, 1s buckets
		let (limiter, clock) = limiter_with_clock(3, 1, 3);

		// Act - one request per bucket, all inside the window
		assert!(limiter.is_allowed("c1").await.unwrap());
		clock.advance(Duration::from_secs(1));
		assert!(limiter.is_allowed("c1").await.unwrap());
		clock.advance(Duration::from_secs(1));
		assert!(limiter.is_allowed("c1").await.unwrap());

		// Assert - the rolling sum across three buckets is at the limit
		assert_eq!(limiter.current_count("c1").await.unwrap(), 3);
		assert!(!limiter.is_allowed("c1").await.unwrap());
	}

	#[rstest]
	#[tokio::test]
	async fn test_oldest_bucket_aging_out_returns_capacity() {
		// Arrange - 2 requests per 2s window, 1s buckets
		let (limiter, clock) = limiter_with_clock(2, 1, 2);
		assert!(limiter.is_allowed("c1").await.unwrap());
		clock.advance(Duration::from_secs(1));
		assert!(limiter.is_allowed("c1").await.unwrap());
		assert!(!limiter.is_allowed("c1").await.unwrap());

		// Act - the first bucket expires 2s after its first write
		clock.advance(Duration::from_millis(1_100));

		// Assert - exactly that bucket's share is available again
		assert!(limiter.is_allowed("c1").await.unwrap());
		assert!(!limiter.is_allowed("c1").await.unwrap());
	}

	#[rstest]
	#[tokio::test]
	async fn test_denied_calls_leave_buckets_untouched() {
		// Arrange
		let (limiter, _clock) = limiter_with_clock(4, 2, 2);
		limiter.is_allowed("c1").await.unwrap();
		limiter.is_allowed("c1").await.unwrap();

		// Act
		for _ in 0..3 {
			assert!(!limiter.is_allowed("c1").await.unwrap());
		}

		// Assert
		assert_eq!(limiter.current_count("c1").await.unwrap(), 2);
	}

	#[rstest]
	#[tokio::test]
	async fn test_clients_are_independent() {
		// Arrange
		let (limiter, _clock) = limiter_with_clock(2, 1, 1);

		// Act
		assert!(limiter.is_allowed("c1").await.unwrap());
		assert!(!limiter.is_allowed("c1").await.unwrap());

		// Assert
		assert!(limiter.is_allowed("c2").await.unwrap());
	}

	#[rstest]
	#[tokio::test]
	async fn test_concurrent_callers_never_over_admit() {
		// Arrange
		let store = MemoryStore::new();
		let limiter =
			Arc::new(SlidingWindowLimiter::new(store, 60, 10, 4).unwrap());

		// Act - 16 concurrent calls race for 4 slots
		let mut handles = Vec::new();
		for _ in 0..16 {
			let limiter = limiter.clone();
			handles.push(tokio::spawn(
				async move { limiter.is_allowed("c1").await },
			));
		}
		let mut admitted = 0;
		for handle in handles {
			if handle.await.unwrap().unwrap() {
				admitted += 1;
			}
		}

		// Assert
		assert_eq!(admitted, 4);
	}

	#[rstest]
	#[case::zero_window(0, 1, 3)]
	#[case::zero_sub_window(4, 0, 3)]
	#[case::zero_limit(4, 2, 0)]
	#[case::uneven_tiling(5, 2, 3)]
	fn test_rejects_invalid_config(
		#[case] window_secs: u64,
		#[case] sub_window_secs: u64,
		#[case] limit: u64,
	) {
		// Act
		let result =
			SlidingWindowLimiter::new(MemoryStore::new(), window_secs, sub_window_secs, limit);

		// Assert
		assert!(matches!(result, Err(RateLimitError::InvalidConfig(_))));
	}

	/// Store that hands back a non-numeric sub-window bucket.
	struct MalformedBucketStore;

	#[async_trait]
	impl CounterStore for MalformedBucketStore {
		async fn get(&self, _key: &str) -> RateLimitResult<Option<String>> {
			Ok(None)
		}

		async fn check_and_increment(
			&self,
			_key: &str,
			_limit: u64,
			_ttl_secs: u64,
		) -> RateLimitResult<bool> {
			Ok(true)
		}

		async fn hash_get_all(
			&self,
			_key: &str,
		) -> RateLimitResult<HashMap<String, String>> {
			Ok(HashMap::from([(
				"0".to_string(),
				"abc".to_string(),
			)]))
		}

		async fn hash_check_and_increment(
			&self,
			_key: &str,
			_field: &str,
			_limit: u64,
			_ttl_secs: u64,
		) -> RateLimitResult<bool> {
			Ok(true)
		}

		async fn get_pair(
			&self,
			_first: &str,
			_second: &str,
		) -> RateLimitResult<(Option<String>, Option<String>)> {
			Ok((None, None))
		}

		async fn compare_and_set_pair(
			&self,
			_first: &str,
			_second: &str,
			_expected_first: Option<&str>,
			_expected_second: Option<&str>,
			_new_first: &str,
			_new_second: &str,
		) -> RateLimitResult<bool> {
			Ok(true)
		}
	}

	#[rstest]
	#[tokio::test]
	async fn test_non_numeric_bucket_is_protocol_error() {
		// Arrange
		let limiter = SlidingWindowLimiter::new(MalformedBucketStore, 60, 10, 5).unwrap();

		// Act
		let result = limiter.current_count("c1").await;

		// Assert
		assert!(matches!(result, Err(RateLimitError::Protocol(_))));
	}

	#[rstest]
	#[tokio::test]
	async fn test_rejects_empty_client_id() {
		// Arrange
		let (limiter, _clock) = limiter_with_clock(2, 1, 3);

		// Act
		let result = limiter.is_allowed("").await;

		// Assert
		assert!(matches!(result, Err(RateLimitError::InvalidKey(_))));
	}
}

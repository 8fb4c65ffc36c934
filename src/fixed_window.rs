//! Fixed window rate limiting.
//!
//! Counts requests in a window of fixed length. The window opens on its first
//! request, which arms the key's expiry; later hits never extend it, so the
//! window closes on schedule even under sustained traffic.

use crate::RateLimiter;
use crate::error::{RateLimitError, RateLimitResult};
use crate::key;
use crate::store::CounterStore;
use async_trait::async_trait;

/// Fixed window admission decider.
///
/// # Examples
///
/// ```
/// use rate_gate::{FixedWindowLimiter, MemoryStore, RateLimiter};
///
/// # tokio_test::block_on(async {
/// let limiter = FixedWindowLimiter::new(MemoryStore::new(), 60, 100).unwrap();
/// assert!(limiter.is_allowed("client-1").await.unwrap());
/// # });
/// ```
pub struct FixedWindowLimiter<S: CounterStore> {
	store: S,
	window_secs: u64,
	limit: u64,
}

impl<S: CounterStore> FixedWindowLimiter<S> {
	/// Creates a new fixed window limiter.
	///
	/// # Errors
	///
	/// Returns [`RateLimitError::InvalidConfig`] if `window_secs` or `limit`
	/// is zero.
	pub fn new(store: S, window_secs: u64, limit: u64) -> RateLimitResult<Self> {
		if window_secs == 0 {
			return Err(RateLimitError::InvalidConfig(
				"window_secs must be positive".to_string(),
			));
		}
		if limit == 0 {
			return Err(RateLimitError::InvalidConfig(
				"limit must be positive".to_string(),
			));
		}
		Ok(Self {
			store,
			window_secs,
			limit,
		})
	}

	/// Number of requests counted in the client's current window.
	pub async fn current_count(&self, client_id: &str) -> RateLimitResult<u64> {
		key::validate_client_id(client_id)?;
		match self.store.get(&key::fixed_window_key(client_id)).await? {
			Some(raw) => raw.parse::<u64>().map_err(|_| {
				RateLimitError::Protocol(format!(
					"stored window count is not an integer: {:?}",
					raw
				))
			}),
			None => Ok(0),
		}
	}
}

#[async_trait]
impl<S: CounterStore> RateLimiter for FixedWindowLimiter<S> {
	async fn is_allowed(&self, client_id: &str) -> RateLimitResult<bool> {
		key::validate_client_id(client_id)?;
		let window_key = key::fixed_window_key(client_id);
		let admitted = self
			.store
			.check_and_increment(&window_key, self.limit, self.window_secs)
			.await?;
		tracing::debug!(
			client_id = %client_id,
			admitted = admitted,
			"fixed window decision"
		);
		Ok(admitted)
	}
}

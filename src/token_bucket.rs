//! Token bucket rate limiting.
//!
//! Each client owns a pool of up to `capacity` tokens that refills
//! continuously at `refill_rate_per_sec`. Refill is lazy: the balance is
//! recomputed from the stored refill timestamp on every decision, no
//! background process advances it. Each admitted request consumes one token.
//!
//! Tokens are held as integers end to end and round-trip through the store as
//! exact decimal text; the refill is a floored product of elapsed seconds and
//! the rate, so repeated float rounding can never drift the balance. The
//! refill timestamp advances on every decision, admit or deny, which means
//! fractional refill below one token is discarded rather than double-counted.

use crate::RateLimiter;
use crate::clock::{Clock, SystemClock};
use crate::error::{RateLimitError, RateLimitResult};
use crate::key;
use crate::store::CounterStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Compare-and-swap attempts before a decision is abandoned as contended.
const MAX_CAS_ATTEMPTS: u32 = 4;

/// Token bucket admission decider.
///
/// # Examples
///
/// ```
/// use rate_gate::{MemoryStore, RateLimiter, TokenBucketLimiter};
///
/// # tokio_test::block_on(async {
/// // bursts of up to 20, refilling at 5 tokens per second
/// let limiter = TokenBucketLimiter::new(MemoryStore::new(), 20, 5.0).unwrap();
/// assert!(limiter.is_allowed("client-1").await.unwrap());
/// # });
/// ```
pub struct TokenBucketLimiter<S: CounterStore, C: Clock = SystemClock> {
	store: S,
	capacity: u64,
	refill_rate_per_sec: f64,
	clock: Arc<C>,
}

impl<S: CounterStore> TokenBucketLimiter<S, SystemClock> {
	/// Creates a new token bucket limiter driven by the system clock.
	///
	/// # Errors
	///
	/// Returns [`RateLimitError::InvalidConfig`] if `capacity` is zero or
	/// `refill_rate_per_sec` is not a positive finite number.
	pub fn new(store: S, capacity: u64, refill_rate_per_sec: f64) -> RateLimitResult<Self> {
		Self::with_clock(
			store,
			capacity,
			refill_rate_per_sec,
			Arc::new(SystemClock::new()),
		)
	}
}

impl<S: CounterStore, C: Clock> TokenBucketLimiter<S, C> {
	/// Creates a new token bucket limiter with a custom clock.
	pub fn with_clock(
		store: S,
		capacity: u64,
		refill_rate_per_sec: f64,
		clock: Arc<C>,
	) -> RateLimitResult<Self> {
		if capacity == 0 {
			return Err(RateLimitError::InvalidConfig(
				"capacity must be positive".to_string(),
			));
		}
		if !refill_rate_per_sec.is_finite() || refill_rate_per_sec <= 0.0 {
			return Err(RateLimitError::InvalidConfig(
				"refill_rate_per_sec must be a positive finite number".to_string(),
			));
		}
		Ok(Self {
			store,
			capacity,
			refill_rate_per_sec,
			clock,
		})
	}

	/// Recompute the token balance from the stored state at `now_millis`.
	///
	/// Absence reads as a fresh bucket: full capacity, last refilled now.
	fn refreshed_tokens(
		&self,
		raw_last_refill: Option<&str>,
		raw_tokens: Option<&str>,
		now_millis: u64,
	) -> RateLimitResult<u64> {
		let last_refill = match raw_last_refill {
			Some(raw) => parse_stored(raw, "last refill timestamp")?,
			None => now_millis,
		};
		let stored_tokens: u64 = match raw_tokens {
			Some(raw) => parse_stored(raw, "token balance")?,
			None => self.capacity,
		};

		let elapsed_millis = now_millis.saturating_sub(last_refill);
		let tokens_to_add =
			((elapsed_millis as f64 / 1_000.0) * self.refill_rate_per_sec).floor() as u64;
		Ok(stored_tokens
			.saturating_add(tokens_to_add)
			.min(self.capacity))
	}

	/// Current refill-adjusted token balance for the client, without
	/// consuming anything or advancing the stored state.
	pub async fn tokens(&self, client_id: &str) -> RateLimitResult<u64> {
		key::validate_client_id(client_id)?;
		let last_refill_key = key::token_bucket_last_refill_key(client_id);
		let tokens_key = key::token_bucket_count_key(client_id);
		let (raw_last_refill, raw_tokens) =
			self.store.get_pair(&last_refill_key, &tokens_key).await?;
		self.refreshed_tokens(
			raw_last_refill.as_deref(),
			raw_tokens.as_deref(),
			self.clock.now_millis(),
		)
	}
}

#[async_trait]
impl<S: CounterStore, C: Clock> RateLimiter for TokenBucketLimiter<S, C> {
	async fn is_allowed(&self, client_id: &str) -> RateLimitResult<bool> {
		key::validate_client_id(client_id)?;
		let last_refill_key = key::token_bucket_last_refill_key(client_id);
		let tokens_key = key::token_bucket_count_key(client_id);

		for attempt in 1..=MAX_CAS_ATTEMPTS {
			let (raw_last_refill, raw_tokens) =
				self.store.get_pair(&last_refill_key, &tokens_key).await?;
			let now = self.clock.now_millis();
			let tokens = self.refreshed_tokens(
				raw_last_refill.as_deref(),
				raw_tokens.as_deref(),
				now,
			)?;

			let admitted = tokens > 0;
			let new_tokens = if admitted { tokens - 1 } else { tokens };

			// The new state is written whether or not the request was
			// admitted: the refill timestamp must advance on every decision
			// so fractional refill is never counted twice.
			let swapped = self
				.store
				.compare_and_set_pair(
					&tokens_key,
					&last_refill_key,
					raw_tokens.as_deref(),
					raw_last_refill.as_deref(),
					&new_tokens.to_string(),
					&now.to_string(),
				)
				.await?;
			if swapped {
				tracing::debug!(
					client_id = %client_id,
					tokens_left = new_tokens,
					admitted = admitted,
					"token bucket decision"
				);
				return Ok(admitted);
			}
			tracing::debug!(
				client_id = %client_id,
				attempt = attempt,
				"token bucket state changed under us, retrying"
			);
		}

		Err(RateLimitError::Contention {
			attempts: MAX_CAS_ATTEMPTS,
		})
	}
}

fn parse_stored(raw: &str, what: &str) -> RateLimitResult<u64> {
	raw.parse::<u64>().map_err(|_| {
		RateLimitError::Protocol(format!("stored {} is not an integer: {:?}", what, raw))
	})
}

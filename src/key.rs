//! Store key layout and client identifier validation.
//!
//! The layout is `rate-limit:<algorithm>:<client>` plus algorithm-specific
//! suffixes, and must stay stable so limiters interoperate with any
//! pre-existing state in the store.

use crate::error::{RateLimitError, RateLimitResult};

const KEY_PREFIX: &str = "rate-limit";

/// Reject unusable client identifiers before any store round trip.
pub(crate) fn validate_client_id(client_id: &str) -> RateLimitResult<()> {
	if client_id.is_empty() {
		return Err(RateLimitError::InvalidKey(
			"client id must be non-empty".to_string(),
		));
	}
	Ok(())
}

/// Counter key for the fixed window algorithm.
pub(crate) fn fixed_window_key(client_id: &str) -> String {
	format!("{}:fixed-window:{}", KEY_PREFIX, client_id)
}

/// Hash key holding one field per sub-window bucket.
pub(crate) fn sliding_window_key(client_id: &str) -> String {
	format!("{}:sliding-window:{}", KEY_PREFIX, client_id)
}

/// Key holding the current token balance.
pub(crate) fn token_bucket_count_key(client_id: &str) -> String {
	format!("{}:token-bucket:{}:count", KEY_PREFIX, client_id)
}

/// Key holding the last refill timestamp in epoch milliseconds.
pub(crate) fn token_bucket_last_refill_key(client_id: &str) -> String {
	format!("{}:token-bucket:{}:lastRefill", KEY_PREFIX, client_id)
}

//! Error types shared by limiters and counter stores.

use thiserror::Error;

/// Errors surfaced by admission decisions and store operations.
///
/// Denied requests are a normal outcome and are reported through the
/// `Ok(false)` path, never through this type. An `Err` means the decision
/// could not be made; callers must not substitute a default allow or deny.
#[derive(Debug, Error)]
pub enum RateLimitError {
	/// Non-positive or inconsistent limiter configuration. Raised at
	/// construction time only, never during an admission call.
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	/// Client identifier failed validation.
	#[error("invalid client id: {0}")]
	InvalidKey(String),

	/// The shared counter store could not be reached or rejected the command.
	#[error("counter store unavailable: {0}")]
	Store(#[from] redis::RedisError),

	/// The store executed an operation but replied with something other than
	/// the required result, or a stored value failed to parse back as a
	/// number. Fatal for the call.
	#[error("store protocol violation: {0}")]
	Protocol(String),

	/// The optimistic compare-and-swap retry budget was exhausted without
	/// committing a decision.
	#[error("admission decision lost {attempts} consecutive compare-and-swap races")]
	Contention { attempts: u32 },
}

pub type RateLimitResult<T> = Result<T, RateLimitError>;

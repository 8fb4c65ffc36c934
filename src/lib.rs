//! Distributed per-client admission control backed by a shared counter store.
//!
//! Three rate-limiting algorithms share one contract, so services can swap
//! boundary semantics without touching call sites:
//!
//! - [`FixedWindowLimiter`] counts requests in a window of fixed length
//! - [`SlidingWindowLimiter`] counts across a rolling window of sub-window
//!   buckets
//! - [`TokenBucketLimiter`] models a lazily refilled token pool
//!
//! All history lives in the [`CounterStore`]; limiters hold only their
//! configuration and are safe to replicate across any number of stateless
//! service instances. Every check-then-mutate sequence executes as one atomic
//! store-side operation, so concurrent instances racing on the same client can
//! never both observe capacity and both commit.
//!
//! [`RedisStore`] is the shared production backend (Redis 7.4+);
//! [`MemoryStore`] serves tests and single-instance deployments.
//!
//! # Examples
//!
//! ```
//! use rate_gate::{FixedWindowLimiter, MemoryStore, RateLimiter};
//!
//! # tokio_test::block_on(async {
//! // 100 requests per client per minute
//! let limiter = FixedWindowLimiter::new(MemoryStore::new(), 60, 100).unwrap();
//!
//! if limiter.is_allowed("client-1").await.unwrap() {
//!     // handle the request
//! }
//! # });
//! ```

pub mod clock;
pub mod error;
pub mod fixed_window;
mod key;
pub mod redis_store;
pub mod sliding_window;
pub mod store;
pub mod token_bucket;

pub use clock::{Clock, MockClock, SystemClock};
pub use error::{RateLimitError, RateLimitResult};
pub use fixed_window::FixedWindowLimiter;
pub use redis_store::RedisStore;
pub use sliding_window::SlidingWindowLimiter;
pub use store::{CounterStore, MemoryStore};
pub use token_bucket::TokenBucketLimiter;

use async_trait::async_trait;

/// Admission decision contract shared by all three limiter algorithms.
#[async_trait]
pub trait RateLimiter: Send + Sync {
	/// Decide whether the current request for `client_id` is admitted.
	///
	/// Denials are the expected outcome at capacity, not errors. An error
	/// means the decision could not be made — the store was unreachable or
	/// misbehaved — and must never be turned into a default allow or deny.
	async fn is_allowed(&self, client_id: &str) -> RateLimitResult<bool>;
}

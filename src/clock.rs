use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Trait for providing wall-clock time to limiters and stores.
/// This allows for time mocking in tests.
///
/// Sub-window indices and refill timestamps are shared across processes
/// through the store, so this is epoch-based wall-clock time rather than a
/// monotonic `Instant` with an arbitrary per-process epoch.
pub trait Clock: Send + Sync {
	/// Milliseconds since the UNIX epoch.
	fn now_millis(&self) -> u64;
}

/// Clock that uses the actual system clock.
#[derive(Clone, Default)]
pub struct SystemClock;

impl SystemClock {
	pub fn new() -> Self {
		Self
	}
}

impl Clock for SystemClock {
	fn now_millis(&self) -> u64 {
		SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.expect("system clock is before UNIX epoch")
			.as_millis() as u64
	}
}

/// Mock clock for testing that allows manual time control.
#[derive(Clone)]
pub struct MockClock {
	current_millis: Arc<RwLock<u64>>,
}

impl MockClock {
	pub fn new(start_millis: u64) -> Self {
		Self {
			current_millis: Arc::new(RwLock::new(start_millis)),
		}
	}

	pub fn advance(&self, duration: Duration) {
		let mut millis = self.current_millis.write();
		*millis += duration.as_millis() as u64;
	}

	pub fn set_millis(&self, millis: u64) {
		let mut current = self.current_millis.write();
		*current = millis;
	}
}

impl Default for MockClock {
	fn default() -> Self {
		Self::new(SystemClock::new().now_millis())
	}
}

impl Clock for MockClock {
	fn now_millis(&self) -> u64 {
		*self.current_millis.read()
	}
}

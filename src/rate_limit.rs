//! Asynchronous rate limiting for refresh attempts.

// crates.io
use tokio::{sync::Mutex, time};
// self
use crate::_prelude::*;

/// Permit gate enforcing a minimum interval between consecutive refresh attempts.
///
/// Permits are granted in request order (the reservation lock is fair), and a waiter that is
/// cancelled keeps its reservation, so a burst of abandoned attempts still provides backpressure
/// against the admin API. No thread blocks while waiting; the delay is a scheduled wake-up.
#[derive(Debug)]
pub struct AsyncRateLimiter {
	min_interval: Duration,
	next_permit: Mutex<Option<Instant>>,
}
impl AsyncRateLimiter {
	/// Create a limiter granting at most one permit per `min_interval`.
	pub fn new(min_interval: Duration) -> Self {
		Self { min_interval, next_permit: Mutex::new(None) }
	}

	/// Acquire the next permit, suspending until it becomes available.
	pub async fn acquire(&self) {
		let ready_at = {
			let mut next_permit = self.next_permit.lock().await;
			let now = Instant::now();
			let ready_at = match *next_permit {
				Some(at) if at > now => at,
				_ => now,
			};

			*next_permit = Some(ready_at + self.min_interval);

			ready_at
		};

		time::sleep_until(ready_at).await;
	}
}

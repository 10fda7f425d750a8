//! Per-instance refresh state machine.
//!
//! One refresher guards one instance's expiring [`ConnectionInfo`]: it keeps a "current" value
//! callers wait on and a "next" attempt that is either scheduled for the certificate's lifetime
//! midpoint or already in flight. At most one attempt runs at a time; failures retry immediately
//! behind the rate limiter without disturbing the last good value.

// std
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	sync::{Mutex, MutexGuard, PoisonError},
};
// crates.io
use tokio::{sync::watch, task::JoinHandle, time};
// self
use crate::{
	_prelude::*,
	admin::BoxFuture,
	cache::{ConnectionInfo, calculator},
	rate_limit::AsyncRateLimiter,
};

/// Supplier invoked for every refresh attempt.
pub type RefreshOp = Arc<dyn Fn() -> BoxFuture<Result<ConnectionInfo>> + Send + Sync>;

/// Handle to the refresh loop of one instance.
pub struct Refresher {
	shared: Arc<Shared>,
}
impl Refresher {
	/// Create a refresher and start the initial attempt immediately.
	pub fn new(instance: Arc<str>, refresh_op: RefreshOp, rate_limiter: AsyncRateLimiter) -> Self {
		let (current, _) = watch::channel(None);
		let shared = Arc::new(Shared {
			instance,
			refresh_op,
			rate_limiter,
			current,
			state: Mutex::new(State {
				refresh_running: false,
				last_failure: None,
				next: None,
				live_attempt: 0,
				closed: false,
			}),
		});

		{
			let mut state = shared.lock_state();

			start_attempt(&shared, &mut state, Duration::ZERO);
		}

		Self { shared }
	}

	/// Wait up to `timeout` for the current connection info.
	///
	/// Once a refresh has succeeded this returns immediately, and keeps doing so while later
	/// attempts fail. Before the first success it waits for the in-flight attempt; on timeout the
	/// error reports the most recent refresh failure when one has been recorded.
	pub async fn get(&self, timeout: Duration) -> Result<ConnectionInfo> {
		{
			let state = self.shared.lock_state();

			if state.closed {
				return Err(Error::Closed { instance: self.shared.instance.to_string() });
			}
		}

		let mut current = self.shared.current.subscribe();
		let wait = async {
			loop {
				if let Some(info) = current.borrow_and_update().clone() {
					return Some(info);
				}
				if current.changed().await.is_err() {
					return None;
				}
			}
		};

		match time::timeout(timeout, wait).await {
			Ok(Some(info)) => Ok(info),
			Ok(None) => Err(Error::Closed { instance: self.shared.instance.to_string() }),
			Err(_) => {
				let last_failure = { self.shared.lock_state().last_failure.clone() };
				let instance = self.shared.instance.to_string();
				let timeout_ms = timeout.as_millis() as u64;

				Err(match last_failure {
					Some(source) => Error::RefreshFailed { instance, timeout_ms, source },
					None => Error::RefreshTimeout { instance, timeout_ms },
				})
			},
		}
	}

	/// Read the current value without waiting.
	pub fn current(&self) -> Option<ConnectionInfo> {
		self.shared.current.borrow().clone()
	}

	/// Whether a refresh attempt is currently in flight; diagnostic only.
	pub fn refresh_running(&self) -> bool {
		self.shared.lock_state().refresh_running
	}

	/// Cancel the scheduled attempt and start a new one immediately.
	///
	/// A no-op while an attempt is already in flight, so any number of concurrent force-refresh
	/// requests collapse onto the single running attempt. The cancelled attempt is an unfired
	/// timer; a running fetch is never interrupted.
	pub fn force_refresh(&self) {
		let mut state = self.shared.lock_state();

		if state.closed || state.refresh_running {
			return;
		}

		abort_scheduled(&mut state);
		tracing::debug!(
			instance = %self.shared.instance,
			"force refresh: cancelled the scheduled attempt, starting a new one immediately"
		);
		start_attempt(&self.shared, &mut state, Duration::ZERO);
	}

	/// Stop the refresh loop: the scheduled attempt is aborted and nothing respawns.
	///
	/// Callers already waiting in [`Refresher::get`] run into their timeout; new calls fail
	/// immediately.
	pub fn close(&self) {
		let mut state = self.shared.lock_state();

		state.closed = true;
		abort_scheduled(&mut state);
	}
}
impl Debug for Refresher {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("Refresher").field("instance", &self.shared.instance).finish()
	}
}
impl Drop for Refresher {
	fn drop(&mut self) {
		// The attempt chain keeps itself alive through the shared state; without this the tasks
		// of a discarded refresher would keep polling the admin API forever.
		self.close();
	}
}

struct Shared {
	instance: Arc<str>,
	refresh_op: RefreshOp,
	rate_limiter: AsyncRateLimiter,
	current: watch::Sender<Option<ConnectionInfo>>,
	state: Mutex<State>,
}
impl Shared {
	fn lock_state(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

struct State {
	refresh_running: bool,
	last_failure: Option<Arc<Error>>,
	next: Option<JoinHandle<()>>,
	live_attempt: u64,
	closed: bool,
}

fn abort_scheduled(state: &mut State) {
	if let Some(handle) = state.next.take() {
		handle.abort();
	}
}

/// Register and spawn the next attempt. The caller holds the state guard.
fn start_attempt(shared: &Arc<Shared>, state: &mut State, delay: Duration) {
	state.live_attempt += 1;
	state.next = Some(tokio::spawn(run_attempt(shared.clone(), state.live_attempt, delay)));
}

async fn run_attempt(shared: Arc<Shared>, attempt: u64, delay: Duration) {
	if !delay.is_zero() {
		time::sleep(delay).await;
	}

	{
		let mut state = shared.lock_state();

		// A superseded attempt must not run; force_refresh may have replaced this task while it
		// was waking up, and an abort only lands at the next await point.
		if state.closed || state.live_attempt != attempt {
			return;
		}

		state.refresh_running = true;
	}

	tracing::debug!(instance = %shared.instance, attempt, "refresh attempt: acquiring rate limiter permit");
	shared.rate_limiter.acquire().await;
	tracing::debug!(instance = %shared.instance, attempt, "refresh attempt: permit acquired");

	#[cfg(feature = "metrics")]
	let started = Instant::now();

	match (shared.refresh_op)().await {
		Ok(info) => {
			let delay = calculator::next_refresh_delay(Utc::now(), info.expiration);

			tracing::debug!(
				instance = %shared.instance,
				attempt,
				expiration = %info.expiration,
				next_refresh_in = ?delay,
				"refresh attempt: completed, next refresh scheduled"
			);
			#[cfg(feature = "metrics")]
			crate::metrics::record_refresh_success(&shared.instance, started.elapsed());

			let mut state = shared.lock_state();

			if state.closed {
				return;
			}

			state.refresh_running = false;
			state.last_failure = None;
			shared.current.send_replace(Some(info));
			start_attempt(&shared, &mut state, delay);
		},
		Err(err) => {
			tracing::warn!(
				instance = %shared.instance,
				attempt,
				error = %err,
				"refresh attempt failed, retrying immediately"
			);
			#[cfg(feature = "metrics")]
			crate::metrics::record_refresh_error(&shared.instance);

			let mut state = shared.lock_state();

			if state.closed {
				return;
			}

			// `refresh_running` stays true: the retry chain counts as one in-flight refresh, so
			// force-refresh requests keep balking until a success resets it. The last good value
			// in the channel is left untouched.
			state.last_failure = Some(Arc::new(err));
			start_attempt(&shared, &mut state, Duration::ZERO);
		},
	}
}

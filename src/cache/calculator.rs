//! Refresh scheduling arithmetic.

// self
use crate::_prelude::*;

/// Compute how long to wait before starting the next refresh.
///
/// Certificates with less than an hour of remaining lifetime are refreshed immediately; everything
/// else is refreshed at the midpoint of its remaining lifetime, leaving ample headroom before
/// expiry without hammering the admin API for long-lived certificates.
pub fn next_refresh_delay(now: DateTime<Utc>, expiration: DateTime<Utc>) -> Duration {
	let lifetime = expiration - now;

	if lifetime < TimeDelta::hours(1) {
		return Duration::ZERO;
	}

	(lifetime / 2).to_std().unwrap_or(Duration::ZERO)
}

//! Fixed rate-limit windows and their persisted form.

// self
use crate::_prelude::*;

/// Accounting for one endpoint pattern over one window duration.
///
/// Invariants: `window_start < window_end` and `request_count >= success_count`. A window is
/// closed once `now >= window_end` and is never reused afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
	/// Pattern of the policy this window accounts for.
	pub endpoint_pattern: String,
	/// First instant covered by the window.
	pub window_start: OffsetDateTime,
	/// Instant the window closes.
	pub window_end: OffsetDateTime,
	/// Nominal window length.
	pub duration: Duration,
	/// Admissions granted in this window.
	pub request_count: u32,
	/// Admitted calls that succeeded.
	pub success_count: u32,
	/// Admitted calls that failed for reasons other than rate limiting.
	#[serde(default)]
	pub failure_count: u32,
	/// Admitted calls the server answered with 429.
	pub limited_count: u32,
	/// Admissions permitted in this window.
	pub ceiling: u32,
	/// Set when the server signaled a limit; no admissions until `window_end`.
	#[serde(default)]
	pub server_limited: bool,
}
impl RateLimitWindow {
	pub(crate) fn open(
		pattern: &str,
		duration: Duration,
		ceiling: u32,
		now: OffsetDateTime,
	) -> Self {
		Self {
			endpoint_pattern: pattern.to_owned(),
			window_start: now,
			window_end: now + duration,
			duration,
			request_count: 0,
			success_count: 0,
			failure_count: 0,
			limited_count: 0,
			ceiling,
			server_limited: false,
		}
	}

	/// Returns `true` while `now` falls inside the window.
	pub fn is_open_at(&self, now: OffsetDateTime) -> bool {
		now < self.window_end
	}

	/// Admissions still available in this window.
	pub fn available(&self) -> u32 {
		if self.server_limited { 0 } else { self.ceiling.saturating_sub(self.request_count) }
	}

	/// Returns `true` when no further admission fits.
	pub fn is_exhausted(&self) -> bool {
		self.available() == 0
	}

	/// Time until the window closes, clamped at zero.
	pub fn resets_in(&self, now: OffsetDateTime) -> Duration {
		let remaining = self.window_end - now;

		if remaining.is_negative() { Duration::ZERO } else { remaining }
	}
}

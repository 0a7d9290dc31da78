//! Injectable time sources.
//!
//! Pure components (policy registry, limiter, ledger) take `now` explicitly; the scheduler and
//! session manager read it from a [`Clock`] so tests can drive windows with paused Tokio time.

// crates.io
use tokio::time::Instant;
// self
use crate::_prelude::*;

/// Source of the current UTC instant.
pub trait Clock
where
	Self: Send + Sync,
{
	/// Returns the current instant.
	fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time straight from the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}

/// Wall-clock anchor advanced by Tokio's monotonic clock.
///
/// Under `tokio::time::pause` the reported instant moves only when Tokio time moves, which keeps
/// window arithmetic and `sleep` deadlines consistent with each other.
#[derive(Clone, Copy, Debug)]
pub struct TokioClock {
	anchor: OffsetDateTime,
	origin: Instant,
}
impl TokioClock {
	/// Anchors the clock at the current wall-clock instant.
	pub fn new() -> Self {
		Self::anchored_at(OffsetDateTime::now_utc())
	}

	/// Anchors the clock at a fixed instant.
	pub fn anchored_at(anchor: OffsetDateTime) -> Self {
		Self { anchor, origin: Instant::now() }
	}
}
impl Default for TokioClock {
	fn default() -> Self {
		Self::new()
	}
}
impl Clock for TokioClock {
	fn now(&self) -> OffsetDateTime {
		let elapsed = Duration::try_from(self.origin.elapsed()).unwrap_or(Duration::MAX);

		self.anchor.saturating_add(elapsed)
	}
}

/// Converts a signed duration into a `std` duration, clamping negatives to zero.
pub(crate) fn to_std(duration: Duration) -> std::time::Duration {
	std::time::Duration::try_from(duration).unwrap_or(std::time::Duration::ZERO)
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn tokio_clock_follows_paused_time() {
		let anchor = macros::datetime!(2025-01-01 00:00 UTC);
		let clock = TokioClock::anchored_at(anchor);

		assert_eq!(clock.now(), anchor);

		tokio::time::advance(std::time::Duration::from_secs(90)).await;

		assert_eq!(clock.now(), macros::datetime!(2025-01-01 00:01:30 UTC));
	}

	#[test]
	fn negative_durations_clamp_to_zero() {
		assert_eq!(to_std(Duration::seconds(-3)), std::time::Duration::ZERO);
		assert_eq!(to_std(Duration::milliseconds(1500)), std::time::Duration::from_millis(1500));
	}
}

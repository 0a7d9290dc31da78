//! Exponential retry backoff with bounded jitter.

// crates.io
use rand::Rng;
// self
use crate::_prelude::*;

/// Exponential backoff with a cap and bounded jitter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Delay before the first retry.
	pub base: Duration,
	/// Upper bound of the un-jittered delay.
	pub cap: Duration,
	/// Jitter amplitude as a fraction of the delay, in `[0, 1]`.
	pub jitter: f64,
}
impl RetryPolicy {
	/// Delay before retry number `retry_count + 1`.
	///
	/// Computes `min(base * 2^retry_count, cap)` and scales it by `1 + jitter * jitter_unit`,
	/// where `jitter_unit` is clamped to `[-1, 1]`.
	pub fn delay(&self, retry_count: u32, jitter_unit: f64) -> Duration {
		let factor = 2_f64.powi(retry_count.min(62) as i32);
		let raw = (self.base.as_seconds_f64() * factor).min(self.cap.as_seconds_f64());
		let unit = if jitter_unit.is_finite() { jitter_unit.clamp(-1., 1.) } else { 0. };
		let jittered = raw * (1. + self.jitter.clamp(0., 1.) * unit);

		Duration::seconds_f64(jittered.max(0.))
	}

	/// [`delay`](Self::delay) with a uniformly random jitter unit.
	pub fn backoff(&self, retry_count: u32) -> Duration {
		self.delay(retry_count, rand::rng().random_range(-1.0..=1.0))
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self { base: Duration::seconds(2), cap: Duration::seconds(60), jitter: 0.2 }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn delay_doubles_until_cap() {
		let policy = RetryPolicy::default();

		assert_eq!(policy.delay(0, 0.), Duration::seconds(2));
		assert_eq!(policy.delay(1, 0.), Duration::seconds(4));
		assert_eq!(policy.delay(4, 0.), Duration::seconds(32));
		assert_eq!(policy.delay(5, 0.), Duration::seconds(60));
		assert_eq!(policy.delay(40, 0.), Duration::seconds(60));
		assert_eq!(policy.delay(u32::MAX, 0.), Duration::seconds(60));
	}

	#[test]
	fn jitter_stays_within_bounds() {
		let policy = RetryPolicy::default();
		let close = |a: Duration, b: Duration| (a - b).abs() < Duration::microseconds(1);

		assert!(close(policy.delay(1, 1.), Duration::milliseconds(4_800)));
		assert!(close(policy.delay(1, -1.), Duration::milliseconds(3_200)));
		assert!(close(policy.delay(1, 7.), Duration::milliseconds(4_800)));
		assert_eq!(policy.delay(1, f64::NAN), Duration::seconds(4));

		for retry in 0..8 {
			let delay = policy.backoff(retry);
			let nominal = policy.delay(retry, 0.);

			assert!(delay >= nominal * 0.79 && delay <= nominal * 1.21);
		}
	}
}

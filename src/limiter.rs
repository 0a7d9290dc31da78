//! Per-pattern rate-limit windows and the admission decision.
//!
//! [`RateLimiter`] is a plain owned structure; the scheduler's coordinator is its only writer.
//! Every admission charges the windows of the resolved endpoint policy and, when configured, the
//! registry-wide ceiling. Admission and outcome recording are separate steps so a server 429 can
//! correct the local estimate after the fact.

pub mod window;

pub use window::*;

// self
use crate::{_prelude::*, policy::EndpointPolicy};

/// Closed windows retained for inspection.
pub const HISTORY_LIMIT: usize = 256;

type WindowKey = (String, i64);

/// Result of [`RateLimiter::try_acquire`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
	/// The call may proceed; keep the ticket for [`RateLimiter::record_outcome`].
	Admitted(AdmissionTicket),
	/// Every permit is spent until `retry_after` elapses.
	Denied {
		/// Time until the blocking window closes.
		retry_after: Duration,
	},
}

/// One window charged by an admission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargedWindow {
	/// Pattern owning the window.
	pub pattern: String,
	/// Nominal window length.
	pub duration: Duration,
	/// Start of the window at admission time.
	pub start: OffsetDateTime,
}

/// Proof of admission tying an outcome back to the windows that granted it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionTicket {
	/// Pattern of the admitting policy.
	pub pattern: String,
	/// Every window charged, endpoint windows first.
	pub windows: Vec<ChargedWindow>,
	/// Primary-window permits available before admission.
	pub tokens_before: u32,
	/// Primary-window permits available after admission.
	pub tokens_after: u32,
}

/// Observed outcome of an admitted call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
	/// The server accepted the call.
	Success,
	/// The call failed without a rate-limit signal.
	Failure,
	/// The server answered 429.
	RateLimited {
		/// Server-supplied `Retry-After`, when present.
		retry_after: Option<Duration>,
	},
}

/// Snapshot answering "how close are we to the limit" for one pattern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
	/// Pattern of the resolved policy.
	pub pattern: String,
	/// Admissions available right now.
	pub available: u32,
	/// Ceiling of the most restrictive window.
	pub ceiling: u32,
	/// Time until the most restrictive window resets.
	pub resets_in: Duration,
	/// Admissions granted in the most restrictive window.
	pub request_count: u32,
}

/// Owner of every [`RateLimitWindow`].
#[derive(Debug, Default)]
pub struct RateLimiter {
	windows: HashMap<WindowKey, RateLimitWindow>,
	history: VecDeque<RateLimitWindow>,
}
impl RateLimiter {
	/// Creates an empty limiter.
	pub fn new() -> Self {
		Self::default()
	}

	/// Admits the call when every window of `policy` and of the `global` ceiling has capacity,
	/// charging all of them.
	pub fn try_acquire(
		&mut self,
		policy: &EndpointPolicy,
		global: Option<&EndpointPolicy>,
		now: OffsetDateTime,
	) -> Admission {
		let specs = charged_specs(policy, global);
		let mut retry_after = None::<Duration>;

		for (pattern, duration, ceiling) in &specs {
			let window = self.current(pattern, *duration, *ceiling, now);

			if window.is_exhausted() {
				let wait = window.resets_in(now);

				retry_after = Some(retry_after.map_or(wait, |w| w.max(wait)));
			}
		}

		if let Some(retry_after) = retry_after {
			tracing::debug!(pattern = %policy.pattern, %retry_after, "admission denied");

			return Admission::Denied { retry_after };
		}

		let mut ticket = AdmissionTicket {
			pattern: policy.pattern.clone(),
			windows: Vec::with_capacity(specs.len()),
			tokens_before: 0,
			tokens_after: 0,
		};

		for (idx, (pattern, duration, _)) in specs.iter().enumerate() {
			if let Some(window) = self.windows.get_mut(&key(pattern, *duration)) {
				if idx == 0 {
					ticket.tokens_before = window.available();
				}

				window.request_count += 1;

				if idx == 0 {
					ticket.tokens_after = window.available();
				}

				ticket.windows.push(ChargedWindow {
					pattern: pattern.to_owned(),
					duration: *duration,
					start: window.window_start,
				});
			}
		}

		Admission::Admitted(ticket)
	}

	/// Records the outcome of an admitted call against the windows that admitted it.
	///
	/// A server 429 saturates the primary window of every charged pattern and moves its end to
	/// `now + retry_after`. When a window was already locally exhausted with a later end, the
	/// later end is kept.
	pub fn record_outcome(
		&mut self,
		ticket: &AdmissionTicket,
		outcome: AttemptOutcome,
		now: OffsetDateTime,
	) {
		for charged in &ticket.windows {
			let Some(window) = self.windows.get_mut(&key(&charged.pattern, charged.duration)) else {
				continue;
			};

			if window.window_start != charged.start {
				continue;
			}

			match outcome {
				AttemptOutcome::Success =>
					if window.success_count < window.request_count {
						window.success_count += 1;
					},
				AttemptOutcome::Failure => window.failure_count += 1,
				AttemptOutcome::RateLimited { .. } => window.limited_count += 1,
			}
		}

		if let AttemptOutcome::RateLimited { retry_after } = outcome {
			let mut seen = HashSet::new();

			for charged in &ticket.windows {
				// Windows are charged primary first for each pattern.
				if seen.insert(charged.pattern.as_str()) {
					self.apply_server_limit(&charged.pattern, charged.duration, retry_after, now);
				}
			}
		}
	}

	/// Reports the most restrictive window of `policy` and the `global` ceiling without mutating
	/// state.
	pub fn status(
		&self,
		policy: &EndpointPolicy,
		global: Option<&EndpointPolicy>,
		now: OffsetDateTime,
	) -> RateLimitStatus {
		let mut status: Option<RateLimitStatus> = None;

		for (pattern, duration, ceiling) in charged_specs(policy, global) {
			let candidate = match self.windows.get(&key(&pattern, duration)) {
				Some(window) if window.is_open_at(now) => RateLimitStatus {
					pattern: policy.pattern.clone(),
					available: window.available().min(ceiling),
					ceiling,
					resets_in: window.resets_in(now),
					request_count: window.request_count,
				},
				_ => RateLimitStatus {
					pattern: policy.pattern.clone(),
					available: ceiling,
					ceiling,
					resets_in: Duration::ZERO,
					request_count: 0,
				},
			};

			status = match status {
				Some(current) if current.available <= candidate.available => Some(current),
				_ => Some(candidate),
			};
		}

		status.unwrap_or(RateLimitStatus {
			pattern: policy.pattern.clone(),
			available: policy.requests_per_minute,
			ceiling: policy.requests_per_minute,
			resets_in: Duration::ZERO,
			request_count: 0,
		})
	}

	/// Snapshot of every open window, for persistence.
	pub fn windows(&self) -> Vec<RateLimitWindow> {
		self.windows.values().cloned().collect()
	}

	/// Reloads persisted windows, discarding any that have already elapsed.
	pub fn restore(&mut self, windows: impl IntoIterator<Item = RateLimitWindow>, now: OffsetDateTime) {
		for window in windows {
			if window.is_open_at(now) && window.window_start < window.window_end {
				self.windows.insert(key(&window.endpoint_pattern, window.duration), window);
			}
		}
	}

	/// Closed windows, oldest first.
	pub fn history(&self) -> &VecDeque<RateLimitWindow> {
		&self.history
	}

	/// Closes every window that has elapsed at `now`.
	pub fn roll(&mut self, now: OffsetDateTime) {
		let elapsed = self
			.windows
			.iter()
			.filter(|(_, w)| !w.is_open_at(now))
			.map(|(k, _)| k.clone())
			.collect::<Vec<_>>();

		for k in elapsed {
			if let Some(window) = self.windows.remove(&k) {
				self.archive(window);
			}
		}
	}

	fn current(
		&mut self,
		pattern: &str,
		duration: Duration,
		ceiling: u32,
		now: OffsetDateTime,
	) -> &mut RateLimitWindow {
		let k = key(pattern, duration);

		if let Some(window) = self.windows.get(&k)
			&& !window.is_open_at(now)
			&& let Some(closed) = self.windows.remove(&k)
		{
			self.archive(closed);
		}

		let window = self
			.windows
			.entry(k)
			.or_insert_with(|| RateLimitWindow::open(pattern, duration, ceiling, now));

		window.ceiling = ceiling;

		window
	}

	fn apply_server_limit(
		&mut self,
		pattern: &str,
		duration: Duration,
		retry_after: Option<Duration>,
		now: OffsetDateTime,
	) {
		let ceiling = self.windows.get(&key(pattern, duration)).map_or(1, |w| w.ceiling);
		let window = self.current(pattern, duration, ceiling, now);
		let locally_exhausted = window.is_exhausted();

		window.server_limited = true;

		if let Some(retry_after) = retry_after {
			let server_end = now + retry_after;

			if !(locally_exhausted && window.window_end > server_end) {
				window.window_end = server_end;
			}
		}

		let end = window.window_end;

		tracing::warn!(pattern, window_end = %end, "server signaled rate limit");

		if end <= window.window_start {
			let k = key(pattern, duration);

			if let Some(closed) = self.windows.remove(&k) {
				self.archive(closed);
			}
		}
	}

	fn archive(&mut self, window: RateLimitWindow) {
		if self.history.len() == HISTORY_LIMIT {
			self.history.pop_front();
		}

		self.history.push_back(window);
	}
}

fn charged_specs(
	policy: &EndpointPolicy,
	global: Option<&EndpointPolicy>,
) -> Vec<(String, Duration, u32)> {
	policy
		.windows()
		.into_iter()
		.map(|(duration, ceiling)| (policy.pattern.clone(), duration, ceiling))
		.chain(global.into_iter().flat_map(|g| {
			g.windows().into_iter().map(|(duration, ceiling)| (g.pattern.clone(), duration, ceiling))
		}))
		.collect()
}

fn key(pattern: &str, duration: Duration) -> WindowKey {
	(pattern.to_owned(), duration.whole_seconds())
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::policy::{GLOBAL_PATTERN, PolicyRegistry, REDDIT_GLOBAL_PER_MINUTE};

	const T0: OffsetDateTime = macros::datetime!(2025-01-01 00:00 UTC);

	fn admitted(admission: Admission) -> AdmissionTicket {
		match admission {
			Admission::Admitted(ticket) => ticket,
			Admission::Denied { retry_after } => panic!("Expected admission, denied for {retry_after}."),
		}
	}

	#[test]
	fn never_admits_more_than_ceiling_per_window() {
		let mut limiter = RateLimiter::new();
		let policy = EndpointPolicy::new("**", 100);
		let mut admitted_count = 0;

		for i in 0..150 {
			let now = T0 + Duration::milliseconds(i * 100);

			if let Admission::Admitted(_) = limiter.try_acquire(&policy, None, now) {
				admitted_count += 1;
			}
		}

		assert_eq!(admitted_count, 100);
		assert_eq!(
			limiter.try_acquire(&policy, None, T0 + Duration::seconds(30)),
			Admission::Denied { retry_after: Duration::seconds(30) }
		);

		let ticket = admitted(limiter.try_acquire(&policy, None, T0 + Duration::seconds(60)));

		assert_eq!(ticket.tokens_before, 100);
		assert_eq!(ticket.tokens_after, 99);
		assert_eq!(limiter.history().len(), 1);
		assert_eq!(limiter.history()[0].request_count, 100);
	}

	#[test]
	fn global_ceiling_caps_traffic_across_patterns() {
		let registry = PolicyRegistry::reddit().expect("Reddit defaults should build.");
		let mut limiter = RateLimiter::new();
		let mut admitted_count = 0;

		for i in 0..400 {
			let path = match i % 3 {
				0 => "/api/v1/me".to_owned(),
				1 => format!("/r/s{i}/new"),
				_ => format!("/user/u{i}/about"),
			};
			let policy = registry.resolve(&path).expect("Every path resolves.");
			let now = T0 + Duration::milliseconds(i * 100);

			if let Admission::Admitted(_) = limiter.try_acquire(policy, registry.global(), now) {
				admitted_count += 1;
			}
		}

		assert_eq!(admitted_count, 100);

		let me = registry.resolve("/api/v1/me").expect("Identity path resolves.");
		let status = limiter.status(me, registry.global(), T0 + Duration::seconds(50));

		assert_eq!(status.pattern, "/api/v1/me");
		assert_eq!(status.available, 0);
		assert_eq!(status.ceiling, REDDIT_GLOBAL_PER_MINUTE);

		let mut restored = RateLimiter::new();

		restored.restore(limiter.windows(), T0 + Duration::seconds(50));

		assert!(restored.windows().iter().any(|w| w.endpoint_pattern == GLOBAL_PATTERN));
		assert!(matches!(
			restored.try_acquire(me, registry.global(), T0 + Duration::seconds(50)),
			Admission::Denied { .. }
		));
	}

	#[test]
	fn server_limit_saturates_the_global_ceiling() {
		let mut limiter = RateLimiter::new();
		let policy = EndpointPolicy::new("/r/*/**", 100);
		let global = EndpointPolicy::global(100);
		let other = EndpointPolicy::new("**", 100);
		let ticket = admitted(limiter.try_acquire(&policy, Some(&global), T0));

		assert_eq!(ticket.windows.len(), 2);

		limiter.record_outcome(
			&ticket,
			AttemptOutcome::RateLimited { retry_after: Some(Duration::seconds(20)) },
			T0,
		);

		assert_eq!(
			limiter.try_acquire(&other, Some(&global), T0 + Duration::seconds(5)),
			Admission::Denied { retry_after: Duration::seconds(15) }
		);
		admitted(limiter.try_acquire(&other, Some(&global), T0 + Duration::seconds(20)));
	}

	#[test]
	fn hourly_window_blocks_after_minute_windows_roll() {
		let mut limiter = RateLimiter::new();
		let policy = EndpointPolicy::new("/api/v1/me", 2).with_hourly_limit(3);

		admitted(limiter.try_acquire(&policy, None, T0));
		admitted(limiter.try_acquire(&policy, None, T0));
		admitted(limiter.try_acquire(&policy, None, T0 + Duration::minutes(1)));

		assert_eq!(
			limiter.try_acquire(&policy, None, T0 + Duration::minutes(2)),
			Admission::Denied { retry_after: Duration::minutes(58) }
		);
	}

	#[test]
	fn server_limit_blocks_until_retry_after() {
		let mut limiter = RateLimiter::new();
		let policy = EndpointPolicy::new("/r/*/**", 100);
		let now = T0 + Duration::seconds(10);
		let ticket = admitted(limiter.try_acquire(&policy, None, T0));

		limiter.record_outcome(
			&ticket,
			AttemptOutcome::RateLimited { retry_after: Some(Duration::seconds(30)) },
			now,
		);

		assert_eq!(
			limiter.try_acquire(&policy, None, now + Duration::seconds(29)),
			Admission::Denied { retry_after: Duration::seconds(1) }
		);

		let resumed = admitted(limiter.try_acquire(&policy, None, now + Duration::seconds(30)));

		assert_eq!(resumed.tokens_before, 100);
		assert_eq!(limiter.history()[0].limited_count, 1);
	}

	#[test]
	fn stricter_local_estimate_wins() {
		let mut limiter = RateLimiter::new();
		let policy = EndpointPolicy::new("**", 1);
		let ticket = admitted(limiter.try_acquire(&policy, None, T0));

		limiter.record_outcome(
			&ticket,
			AttemptOutcome::RateLimited { retry_after: Some(Duration::seconds(5)) },
			T0,
		);

		assert_eq!(
			limiter.try_acquire(&policy, None, T0 + Duration::seconds(10)),
			Admission::Denied { retry_after: Duration::seconds(50) }
		);
	}

	#[test]
	fn outcomes_only_count_against_admitting_window() {
		let mut limiter = RateLimiter::new();
		let policy = EndpointPolicy::new("**", 5);
		let stale = admitted(limiter.try_acquire(&policy, None, T0));

		admitted(limiter.try_acquire(&policy, None, T0 + Duration::seconds(61)));
		limiter.record_outcome(&stale, AttemptOutcome::Success, T0 + Duration::seconds(62));

		let open = limiter.windows();

		assert_eq!(open.len(), 1);
		assert_eq!(open[0].success_count, 0);
		assert!(open[0].request_count >= open[0].success_count);
	}

	#[test]
	fn status_and_restore_round_trip() {
		let mut limiter = RateLimiter::new();
		let policy = EndpointPolicy::new("**", 10);

		admitted(limiter.try_acquire(&policy, None, T0));
		admitted(limiter.try_acquire(&policy, None, T0));

		let status = limiter.status(&policy, None, T0 + Duration::seconds(15));

		assert_eq!(status.available, 8);
		assert_eq!(status.resets_in, Duration::seconds(45));

		let mut restored = RateLimiter::new();

		restored.restore(limiter.windows(), T0 + Duration::seconds(20));

		assert_eq!(restored.status(&policy, None, T0 + Duration::seconds(20)).request_count, 2);

		let mut late = RateLimiter::new();

		late.restore(limiter.windows(), T0 + Duration::minutes(2));

		assert!(late.windows().is_empty());
	}
}

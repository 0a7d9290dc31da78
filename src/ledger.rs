//! Append-only record of every attempted call plus threshold alerting.
//!
//! The ledger is observability, not admission: its rolling aggregates are derived from
//! [`ApiCallRecord`]s and never consulted by the limiter. Threshold evaluation runs after each
//! append and reports what changed as [`AlertChange`]s, so the caller can persist them.

pub mod alert;

pub use alert::*;

// self
use crate::{_prelude::*, error::ErrorKind, scheduler::RequestId, transport::Method};

/// Immutable fact describing one attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCallRecord {
	/// Scheduler request the attempt belongs to.
	pub request_id: Option<RequestId>,
	/// Requested path.
	pub endpoint: String,
	/// Pattern of the policy that admitted the call.
	pub pattern: String,
	/// HTTP verb.
	pub method: Method,
	/// 1-based attempt number within the request.
	pub attempt: u32,
	/// HTTP status, when a response arrived.
	pub status_code: Option<u16>,
	/// Transport failure summary, when no response arrived.
	pub transport_error: Option<String>,
	/// Classification of a failed attempt.
	pub error_kind: Option<ErrorKind>,
	/// Time spent on the attempt.
	pub latency: Duration,
	/// The server answered 429.
	pub rate_limited: bool,
	/// Limiter permits available before admission.
	pub tokens_before: u32,
	/// Limiter permits available after admission.
	pub tokens_after: u32,
	/// Informational weight of the admitting policy.
	pub priority_weight: u32,
	/// Instant the attempt was admitted.
	pub timestamp: OffsetDateTime,
}
impl ApiCallRecord {
	/// Returns `true` for a 2xx response.
	pub fn is_success(&self) -> bool {
		self.error_kind.is_none() && self.status_code.is_some_and(|s| (200..300).contains(&s))
	}

	/// Returns `true` for a failure other than rate limiting.
	pub fn is_failure(&self) -> bool {
		!self.is_success() && !self.rate_limited
	}
}

/// Aggregate over the records of one pattern in a time range.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowAggregate {
	/// Attempts recorded.
	pub request_count: u32,
	/// Successful attempts.
	pub success_count: u32,
	/// Failed attempts, excluding rate limiting.
	pub failure_count: u32,
	/// Attempts answered with 429.
	pub limited_count: u32,
	/// Mean attempt latency.
	pub avg_latency: Duration,
}
impl WindowAggregate {
	fn from_records<'a>(records: impl Iterator<Item = &'a ApiCallRecord>) -> Self {
		let mut aggregate = Self::default();
		let mut total_latency = Duration::ZERO;

		for record in records {
			aggregate.request_count += 1;
			total_latency += record.latency;

			if record.rate_limited {
				aggregate.limited_count += 1;
			} else if record.is_success() {
				aggregate.success_count += 1;
			} else {
				aggregate.failure_count += 1;
			}
		}

		if aggregate.request_count > 0 {
			aggregate.avg_latency = total_latency / aggregate.request_count;
		}

		aggregate
	}

	/// Failed share of the recorded attempts.
	pub fn failure_ratio(&self) -> f64 {
		if self.request_count == 0 {
			0.
		} else {
			f64::from(self.failure_count) / f64::from(self.request_count)
		}
	}
}

/// Headline numbers exposed to the surrounding application.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
	/// Attempts recorded, including retained records restored at startup.
	pub total_requests: u64,
	/// Share of successful attempts; `1.0` before any attempt.
	pub success_rate: f64,
	/// Alerts not yet resolved.
	pub open_alerts: usize,
}

/// Owner of [`ApiCallRecord`]s and [`UsageAlert`]s.
#[derive(Debug, Default)]
pub struct UsageLedger {
	thresholds: AlertThresholds,
	records: VecDeque<ApiCallRecord>,
	alerts: Vec<UsageAlert>,
	next_alert: u64,
	total_requests: u64,
	total_successes: u64,
}
impl UsageLedger {
	/// Creates an empty ledger.
	pub fn new(thresholds: AlertThresholds) -> Self {
		Self { thresholds, ..Default::default() }
	}

	/// Active thresholds.
	pub fn thresholds(&self) -> &AlertThresholds {
		&self.thresholds
	}

	/// Appends a record and evaluates thresholds for its pattern.
	pub fn append(
		&mut self,
		record: ApiCallRecord,
		ceiling: u32,
		now: OffsetDateTime,
	) -> Vec<AlertChange> {
		let mut changes = Vec::new();
		let pattern = record.pattern.clone();

		self.total_requests += 1;

		if record.is_success() {
			self.total_successes += 1;
		}

		if record.rate_limited {
			changes.extend(self.raise(
				AlertKind::LimitExceeded,
				&pattern,
				Severity::Critical,
				f64::from(ceiling),
				f64::from(ceiling),
				format!("Reddit throttled `{pattern}`"),
				now,
			));
		} else if record.is_success() {
			changes.extend(self.resolve(AlertKind::LimitExceeded, &pattern, now));
		}

		if record.latency > self.thresholds.slow_response {
			let secs = record.latency.as_seconds_f64();

			changes.extend(self.raise(
				AlertKind::SlowResponse,
				&pattern,
				Severity::Warning,
				self.thresholds.slow_response.as_seconds_f64(),
				secs,
				format!("`{}` took {secs:.1}s", record.endpoint),
				now,
			));
		} else if record.status_code.is_some() {
			changes.extend(self.resolve(AlertKind::SlowResponse, &pattern, now));
		}

		self.records.push_back(record);
		changes.extend(self.evaluate_thresholds(&pattern, ceiling, now));

		changes
	}

	/// Records a local admission denial as a hit ceiling.
	pub fn note_denied(&mut self, pattern: &str, ceiling: u32, now: OffsetDateTime) -> Vec<AlertChange> {
		self.raise(
			AlertKind::LimitExceeded,
			pattern,
			Severity::Warning,
			f64::from(ceiling),
			f64::from(ceiling),
			format!("Local ceiling of {ceiling} for `{pattern}` is exhausted"),
			now,
		)
		.into_iter()
		.collect()
	}

	/// Raises or resolves utilisation and error-rate alerts for `pattern`.
	pub fn evaluate_thresholds(
		&mut self,
		pattern: &str,
		ceiling: u32,
		now: OffsetDateTime,
	) -> Vec<AlertChange> {
		let mut changes = Vec::new();

		if let Some(primary) = self.thresholds.windows.first().copied()
			&& ceiling > 0
		{
			let utilization =
				f64::from(self.rolling(pattern, primary, now).request_count) / f64::from(ceiling);

			if utilization >= self.thresholds.warning_utilization {
				let severity = if utilization >= self.thresholds.critical_utilization {
					Severity::Critical
				} else {
					Severity::Warning
				};

				changes.extend(self.raise(
					AlertKind::ApproachingLimit,
					pattern,
					severity,
					self.thresholds.warning_utilization,
					utilization,
					format!("`{pattern}` is at {:.0}% of its ceiling", utilization * 100.),
					now,
				));
			} else {
				changes.extend(self.resolve(AlertKind::ApproachingLimit, pattern, now));
			}
		}

		let errors = self.rolling(pattern, self.thresholds.error_window, now);
		let ratio = errors.failure_ratio();

		if errors.request_count as usize >= self.thresholds.error_min_samples
			&& ratio > self.thresholds.error_rate
		{
			changes.extend(self.raise(
				AlertKind::ErrorSpike,
				pattern,
				Severity::Warning,
				self.thresholds.error_rate,
				ratio,
				format!("{:.0}% of recent calls to `{pattern}` failed", ratio * 100.),
				now,
			));
		} else if ratio <= self.thresholds.error_rate {
			changes.extend(self.resolve(AlertKind::ErrorSpike, pattern, now));
		}

		changes
	}

	/// Aggregates records of `pattern` admitted in `[from, to)`.
	pub fn aggregate(&self, pattern: &str, from: OffsetDateTime, to: OffsetDateTime) -> WindowAggregate {
		WindowAggregate::from_records(
			self.records
				.iter()
				.filter(|r| r.pattern == pattern && r.timestamp >= from && r.timestamp < to),
		)
	}

	/// Aggregates records of `pattern` admitted in the `duration` ending at `now`.
	pub fn rolling(&self, pattern: &str, duration: Duration, now: OffsetDateTime) -> WindowAggregate {
		let from = now - duration;

		WindowAggregate::from_records(
			self.records
				.iter()
				.filter(|r| r.pattern == pattern && r.timestamp > from && r.timestamp <= now),
		)
	}

	/// Rolling aggregates for every configured window.
	pub fn rolling_windows(&self, pattern: &str, now: OffsetDateTime) -> Vec<(Duration, WindowAggregate)> {
		self.thresholds.windows.iter().map(|d| (*d, self.rolling(pattern, *d, now))).collect()
	}

	/// Headline numbers.
	pub fn metrics(&self) -> UsageMetrics {
		let success_rate = if self.total_requests == 0 {
			1.
		} else {
			self.total_successes as f64 / self.total_requests as f64
		};

		UsageMetrics {
			total_requests: self.total_requests,
			success_rate,
			open_alerts: self.alerts.iter().filter(|a| a.is_open()).count(),
		}
	}

	/// Every retained record of one request, in attempt order.
	pub fn records_for(&self, request_id: RequestId) -> Vec<&ApiCallRecord> {
		self.records.iter().filter(|r| r.request_id == Some(request_id)).collect()
	}

	/// Every retained record, oldest first.
	pub fn records(&self) -> impl Iterator<Item = &ApiCallRecord> {
		self.records.iter()
	}

	/// Marks an alert as acknowledged; returns the updated alert.
	pub fn acknowledge(&mut self, id: AlertId, now: OffsetDateTime) -> Option<UsageAlert> {
		let alert = self.alerts.iter_mut().find(|a| a.id == id)?;

		if alert.acknowledged_at.is_none() {
			alert.acknowledged_at = Some(now);
		}

		Some(alert.clone())
	}

	/// Alerts not yet resolved, oldest first.
	pub fn open_alerts(&self) -> Vec<UsageAlert> {
		self.alerts.iter().filter(|a| a.is_open()).cloned().collect()
	}

	/// Every retained alert, resolved ones included.
	pub fn alerts(&self) -> &[UsageAlert] {
		&self.alerts
	}

	/// Reloads persisted alerts; later identifiers continue after the highest restored one.
	pub fn restore_alerts(&mut self, alerts: impl IntoIterator<Item = UsageAlert>) {
		for alert in alerts {
			self.next_alert = self.next_alert.max(alert.id.0 + 1);

			match self.alerts.iter_mut().find(|a| a.id == alert.id) {
				Some(existing) => *existing = alert,
				None => self.alerts.push(alert),
			}
		}
	}

	/// Reloads persisted call records within the retention period; returns records restored.
	///
	/// Records already held are skipped, so restoring twice does not double-count.
	pub fn restore_records(
		&mut self,
		records: impl IntoIterator<Item = ApiCallRecord>,
		now: OffsetDateTime,
	) -> usize {
		let cutoff = now - self.thresholds.retention;
		let mut held = self
			.records
			.iter()
			.map(|r| (r.request_id, r.attempt, r.timestamp))
			.collect::<HashSet<_>>();
		let mut restored = records
			.into_iter()
			.filter(|r| r.timestamp >= cutoff && held.insert((r.request_id, r.attempt, r.timestamp)))
			.collect::<Vec<_>>();
		let count = restored.len();

		restored.sort_by_key(|r| r.timestamp);

		for record in &restored {
			self.total_requests += 1;

			if record.is_success() {
				self.total_successes += 1;
			}
		}

		restored.extend(self.records.drain(..));
		self.records = restored.into();

		count
	}

	/// Drops records and resolved alerts older than the retention period; returns records removed.
	pub fn prune(&mut self, now: OffsetDateTime) -> usize {
		let cutoff = now - self.thresholds.retention;
		let before = self.records.len();

		self.records.retain(|r| r.timestamp >= cutoff);
		self.alerts.retain(|a| a.resolved_at.is_none_or(|at| at >= cutoff));

		before - self.records.len()
	}

	#[allow(clippy::too_many_arguments)]
	fn raise(
		&mut self,
		kind: AlertKind,
		endpoint: &str,
		severity: Severity,
		threshold: f64,
		observed_value: f64,
		message: String,
		now: OffsetDateTime,
	) -> Option<AlertChange> {
		if let Some(open) =
			self.alerts.iter_mut().find(|a| a.is_open() && a.kind == kind && a.endpoint == endpoint)
		{
			if open.severity == severity && open.observed_value == observed_value {
				return None;
			}

			open.severity = severity;
			open.observed_value = observed_value;
			open.message = message;

			return Some(AlertChange::Updated(open.clone()));
		}

		let alert = UsageAlert {
			id: AlertId(self.next_alert),
			kind,
			endpoint: endpoint.to_owned(),
			severity,
			threshold,
			observed_value,
			message,
			triggered_at: now,
			acknowledged_at: None,
			resolved_at: None,
		};

		self.next_alert += 1;

		tracing::warn!(alert = %alert.id, ?kind, endpoint, ?severity, "usage alert raised");

		self.alerts.push(alert.clone());

		Some(AlertChange::Raised(alert))
	}

	fn resolve(&mut self, kind: AlertKind, endpoint: &str, now: OffsetDateTime) -> Option<AlertChange> {
		let open = self
			.alerts
			.iter_mut()
			.find(|a| a.is_open() && a.kind == kind && a.endpoint == endpoint)?;

		open.resolved_at = Some(now);

		tracing::debug!(alert = %open.id, ?kind, endpoint, "usage alert resolved");

		Some(AlertChange::Resolved(open.clone()))
	}
}

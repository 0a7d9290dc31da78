//! Usage alerts, thresholds, and their lifecycle.

// self
use crate::_prelude::*;

/// Identifier assigned to every alert the ledger raises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub u64);
impl Display for AlertId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "alert-{}", self.0)
	}
}

/// Condition an alert reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
	/// Utilisation of the primary window crossed the warning ratio.
	ApproachingLimit,
	/// The ceiling was hit (local denial or server 429).
	LimitExceeded,
	/// Failure ratio over the error window crossed its threshold.
	ErrorSpike,
	/// A response took longer than the slow-response threshold.
	SlowResponse,
}

/// Alert urgency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
	/// Informational.
	Info,
	/// Needs attention soon.
	Warning,
	/// Needs attention now.
	Critical,
}

/// Threshold alert derived from ledger aggregates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageAlert {
	/// Ledger-assigned identifier.
	pub id: AlertId,
	/// Condition reported.
	pub kind: AlertKind,
	/// Endpoint pattern the alert concerns.
	pub endpoint: String,
	/// Current urgency.
	pub severity: Severity,
	/// Threshold that was crossed.
	pub threshold: f64,
	/// Most recent observed value.
	pub observed_value: f64,
	/// Human-readable summary.
	pub message: String,
	/// When the alert was first raised.
	pub triggered_at: OffsetDateTime,
	/// When a user acknowledged the alert.
	pub acknowledged_at: Option<OffsetDateTime>,
	/// When the condition cleared.
	pub resolved_at: Option<OffsetDateTime>,
}
impl UsageAlert {
	/// Returns `true` until the condition clears.
	pub fn is_open(&self) -> bool {
		self.resolved_at.is_none()
	}
}

/// Change produced by a threshold evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum AlertChange {
	/// A new alert was opened.
	Raised(UsageAlert),
	/// An open alert's severity or observed value changed.
	Updated(UsageAlert),
	/// An open alert was closed because its condition cleared.
	Resolved(UsageAlert),
}
impl AlertChange {
	/// Alert affected by the change.
	pub fn alert(&self) -> &UsageAlert {
		match self {
			Self::Raised(alert) | Self::Updated(alert) | Self::Resolved(alert) => alert,
		}
	}
}

/// Thresholds and windows used by the ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
	/// Utilisation ratio that raises [`AlertKind::ApproachingLimit`].
	pub warning_utilization: f64,
	/// Utilisation ratio that escalates it to [`Severity::Critical`].
	pub critical_utilization: f64,
	/// Failure ratio that raises [`AlertKind::ErrorSpike`].
	pub error_rate: f64,
	/// Window over which the failure ratio is measured.
	pub error_window: Duration,
	/// Samples required before the failure ratio is trusted.
	pub error_min_samples: usize,
	/// Latency above which [`AlertKind::SlowResponse`] is raised.
	pub slow_response: Duration,
	/// Age after which records are pruned.
	pub retention: Duration,
	/// Rolling aggregate windows; the first one measures utilisation.
	pub windows: Vec<Duration>,
}
impl Default for AlertThresholds {
	fn default() -> Self {
		Self {
			warning_utilization: 0.8,
			critical_utilization: 0.95,
			error_rate: 0.1,
			error_window: Duration::seconds(60),
			error_min_samples: 5,
			slow_response: Duration::seconds(5),
			retention: Duration::hours(24),
			windows: vec![Duration::seconds(60), Duration::seconds(3600)],
		}
	}
}

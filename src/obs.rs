//! Observability helpers: `reddit_broker.flow` spans and optional counters.
//!
//! # Feature Flags
//!
//! - Spans are always emitted through `tracing` with the `flow` and `stage` fields.
//! - Enable `metrics` to increment `reddit_broker_flow_total{flow,outcome}` and
//!   `reddit_broker_dispatch_total{outcome}`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Flows observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Authorization-code handshake.
	Authorization,
	/// Credential refresh.
	Refresh,
	/// One scheduler attempt against a resource endpoint.
	Dispatch,
	/// Replay of persisted requests at startup.
	Recovery,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Authorization => "authorization",
			FlowKind::Refresh => "refresh",
			FlowKind::Dispatch => "dispatch",
			FlowKind::Recovery => "recovery",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a flow.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels for scheduler dispatches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DispatchOutcome {
	/// Attempt succeeded.
	Completed,
	/// Attempt failed and was re-enqueued.
	Retried,
	/// Request failed permanently or exhausted its retries.
	Failed,
	/// Local limiter deferred the request.
	Deferred,
	/// Request was cancelled.
	Cancelled,
}
impl DispatchOutcome {
	/// Returns a stable label suitable for metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			DispatchOutcome::Completed => "completed",
			DispatchOutcome::Retried => "retried",
			DispatchOutcome::Failed => "failed",
			DispatchOutcome::Deferred => "deferred",
			DispatchOutcome::Cancelled => "cancelled",
		}
	}
}

// self
use crate::{
	_prelude::*,
	obs::{DispatchOutcome, FlowKind, FlowOutcome},
};

/// Records a flow outcome via the global metrics recorder (when enabled).
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"reddit_broker_flow_total",
			"flow" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Records success or failure for a finished flow.
pub fn record_flow_result<T>(kind: FlowKind, result: &Result<T>) {
	let outcome = if result.is_ok() { FlowOutcome::Success } else { FlowOutcome::Failure };

	record_flow_outcome(kind, outcome);
}

/// Records a scheduler dispatch outcome (when enabled).
pub fn record_dispatch_outcome(outcome: DispatchOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("reddit_broker_dispatch_total", "outcome" => outcome.as_str())
			.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = outcome;
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn recorders_are_noops_without_a_recorder() {
		record_flow_outcome(FlowKind::Authorization, FlowOutcome::Failure);
		record_flow_result::<()>(FlowKind::Refresh, &Ok(()));
		record_dispatch_outcome(DispatchOutcome::Deferred);
	}
}

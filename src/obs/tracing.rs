//! `tracing` span helpers shared by every flow.

// crates.io
use tracing::{Instrument, Span, instrument::Instrumented, span::EnteredSpan};
// self
use crate::{_prelude::*, obs::FlowKind};

/// Span wrapper shared by every flow, named `reddit_broker.flow`.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	span: Span,
}
impl FlowSpan {
	/// Creates a new span tagged with the provided flow kind and stage.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		Self { span: tracing::info_span!("reddit_broker.flow", flow = kind.as_str(), stage) }
	}

	/// Creates a dispatch span carrying the request identifier and attempt number.
	pub fn dispatch(request_id: u64, attempt: u32) -> Self {
		Self {
			span: tracing::info_span!(
				"reddit_broker.flow",
				flow = FlowKind::Dispatch.as_str(),
				stage = "attempt",
				request_id,
				attempt
			),
		}
	}

	/// Enters the span for synchronous sections.
	pub fn entered(self) -> FlowSpanGuard {
		FlowSpanGuard { _guard: self.span.entered() }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		fut.instrument(self.span.clone())
	}
}

/// RAII guard returned by [`FlowSpan::entered`].
pub struct FlowSpanGuard {
	_guard: EnteredSpan,
}
impl Debug for FlowSpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("FlowSpanGuard(..)")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn guard_enters_without_subscriber() {
		let _guard = FlowSpan::new(FlowKind::Recovery, "test").entered();
	}

	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = FlowSpan::dispatch(7, 1);
		let value = FlowSpan::instrument(&span, async { 42 }).await;

		assert_eq!(value, 42);
	}
}

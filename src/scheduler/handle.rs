//! Caller-side handles for submitted requests.

// std
use std::task::{Context, Poll};
// crates.io
use tokio::sync::oneshot;
// self
use crate::{_prelude::*, scheduler::RequestId, transport::ApiResponse};

pub(crate) type Reply = oneshot::Sender<Result<ApiResponse>>;

/// Completion notification for one submitted request.
///
/// Awaiting the handle yields the final response or the terminal error. Dropping it does not
/// cancel the request; use [`Scheduler::cancel`](crate::scheduler::Scheduler::cancel).
#[derive(Debug)]
pub struct RequestHandle {
	id: RequestId,
	rx: oneshot::Receiver<Result<ApiResponse>>,
}
impl RequestHandle {
	pub(crate) fn channel(id: RequestId) -> (Self, Reply) {
		let (tx, rx) = oneshot::channel();

		(Self { id, rx }, tx)
	}

	/// Identifier of the request.
	pub fn id(&self) -> RequestId {
		self.id
	}
}
impl Future for RequestHandle {
	type Output = Result<ApiResponse>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(Ok(result)) => Poll::Ready(result),
			Poll::Ready(Err(_)) => Poll::Ready(Err(Error::SchedulerClosed)),
			Poll::Pending => Poll::Pending,
		}
	}
}

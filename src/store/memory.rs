//! Thread-safe in-memory [`SchedulerStore`] for tests and ephemeral sessions.

// self
use crate::{
	_prelude::*,
	ledger::{ApiCallRecord, UsageAlert},
	limiter::RateLimitWindow,
	scheduler::{QueuedRequest, RequestId},
	store::{SchedulerStore, StoreFuture, StoreState},
};

/// Storage backend that keeps everything in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<StoreState>>);
impl MemoryStore {
	/// Every appended call record, oldest first.
	pub fn calls(&self) -> Vec<ApiCallRecord> {
		self.0.read().calls()
	}

	/// Every persisted request, ordered by identifier.
	pub fn requests(&self) -> Vec<QueuedRequest> {
		self.0.read().requests()
	}
}
impl SchedulerStore for MemoryStore {
	fn save_request(&self, request: QueuedRequest) -> StoreFuture<'_, ()> {
		let state = self.0.clone();

		Box::pin(async move {
			state.write().save_request(request);

			Ok(())
		})
	}

	fn load_requests(&self) -> StoreFuture<'_, Vec<QueuedRequest>> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.read().requests()) })
	}

	fn load_id_watermark(&self) -> StoreFuture<'_, Option<RequestId>> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.read().id_watermark()) })
	}

	fn save_windows(&self, windows: Vec<RateLimitWindow>) -> StoreFuture<'_, ()> {
		let state = self.0.clone();

		Box::pin(async move {
			state.write().save_windows(windows);

			Ok(())
		})
	}

	fn load_windows(&self) -> StoreFuture<'_, Vec<RateLimitWindow>> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.read().windows()) })
	}

	fn append_call(&self, record: ApiCallRecord) -> StoreFuture<'_, ()> {
		let state = self.0.clone();

		Box::pin(async move {
			state.write().append_call(record);

			Ok(())
		})
	}

	fn load_calls(&self) -> StoreFuture<'_, Vec<ApiCallRecord>> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.read().calls()) })
	}

	fn save_alert(&self, alert: UsageAlert) -> StoreFuture<'_, ()> {
		let state = self.0.clone();

		Box::pin(async move {
			state.write().save_alert(alert);

			Ok(())
		})
	}

	fn load_alerts(&self) -> StoreFuture<'_, Vec<UsageAlert>> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.read().alerts()) })
	}

	fn prune(&self, before: OffsetDateTime) -> StoreFuture<'_, usize> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.write().prune(before)) })
	}
}

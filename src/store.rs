//! Persistence contract for scheduler state and the built-in backends.
//!
//! Stores hold what must survive a restart: outstanding requests, open rate-limit windows, the
//! call log, and alerts. Every method is a boxed future so backends can do real I/O. History is
//! bounded by [`SchedulerStore::prune`]; the highest request identifier ever saved outlives
//! pruning so identifiers are never reused.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	ledger::{AlertId, ApiCallRecord, UsageAlert},
	limiter::RateLimitWindow,
	scheduler::{QueuedRequest, RequestId},
};

/// Future returned by [`SchedulerStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend consumed by the scheduler.
pub trait SchedulerStore
where
	Self: Send + Sync,
{
	/// Inserts or replaces a request, keyed by its identifier.
	fn save_request(&self, request: QueuedRequest) -> StoreFuture<'_, ()>;

	/// Returns every persisted request, terminal ones not yet pruned included.
	fn load_requests(&self) -> StoreFuture<'_, Vec<QueuedRequest>>;

	/// Highest request identifier ever saved, pruned requests included.
	fn load_id_watermark(&self) -> StoreFuture<'_, Option<RequestId>>;

	/// Replaces the persisted set of open windows.
	fn save_windows(&self, windows: Vec<RateLimitWindow>) -> StoreFuture<'_, ()>;

	/// Returns the last persisted set of open windows.
	fn load_windows(&self) -> StoreFuture<'_, Vec<RateLimitWindow>>;

	/// Appends one call record.
	fn append_call(&self, record: ApiCallRecord) -> StoreFuture<'_, ()>;

	/// Returns every retained call record, oldest first.
	fn load_calls(&self) -> StoreFuture<'_, Vec<ApiCallRecord>>;

	/// Inserts or replaces an alert, keyed by its identifier.
	fn save_alert(&self, alert: UsageAlert) -> StoreFuture<'_, ()>;

	/// Returns every persisted alert.
	fn load_alerts(&self) -> StoreFuture<'_, Vec<UsageAlert>>;

	/// Drops call records, terminal requests, and resolved alerts older than `before`.
	///
	/// Returns the number of entries removed.
	fn prune(&self, before: OffsetDateTime) -> StoreFuture<'_, usize>;
}

/// Error type produced by [`SchedulerStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Contents shared by the built-in backends.
#[derive(Clone, Debug, Default)]
pub(crate) struct StoreState {
	requests: BTreeMap<RequestId, QueuedRequest>,
	id_watermark: Option<RequestId>,
	windows: Vec<RateLimitWindow>,
	calls: Vec<ApiCallRecord>,
	alerts: BTreeMap<AlertId, UsageAlert>,
}
impl StoreState {
	pub(crate) fn save_request(&mut self, request: QueuedRequest) {
		self.id_watermark = self.id_watermark.max(Some(request.id));

		self.requests.insert(request.id, request);
	}

	pub(crate) fn requests(&self) -> Vec<QueuedRequest> {
		self.requests.values().cloned().collect()
	}

	pub(crate) fn id_watermark(&self) -> Option<RequestId> {
		self.id_watermark
	}

	pub(crate) fn save_windows(&mut self, windows: Vec<RateLimitWindow>) {
		self.windows = windows;
	}

	pub(crate) fn windows(&self) -> Vec<RateLimitWindow> {
		self.windows.clone()
	}

	pub(crate) fn append_call(&mut self, record: ApiCallRecord) {
		self.calls.push(record);
	}

	pub(crate) fn calls(&self) -> Vec<ApiCallRecord> {
		self.calls.clone()
	}

	pub(crate) fn save_alert(&mut self, alert: UsageAlert) {
		self.alerts.insert(alert.id, alert);
	}

	pub(crate) fn alerts(&self) -> Vec<UsageAlert> {
		self.alerts.values().cloned().collect()
	}

	pub(crate) fn prune(&mut self, before: OffsetDateTime) -> usize {
		let total = self.requests.len() + self.calls.len() + self.alerts.len();

		self.requests.retain(|_, r| !r.status.is_terminal() || r.enqueued_at >= before);
		self.calls.retain(|c| c.timestamp >= before);
		self.alerts.retain(|_, a| a.resolved_at.is_none_or(|at| at >= before));

		total - (self.requests.len() + self.calls.len() + self.alerts.len())
	}
}

/// Serialized form of [`StoreState`]; maps flatten to lists so JSON keys stay strings.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct StoreSnapshot {
	requests: Vec<QueuedRequest>,
	id_watermark: Option<RequestId>,
	windows: Vec<RateLimitWindow>,
	calls: Vec<ApiCallRecord>,
	alerts: Vec<UsageAlert>,
}
impl From<&StoreState> for StoreSnapshot {
	fn from(state: &StoreState) -> Self {
		Self {
			requests: state.requests(),
			id_watermark: state.id_watermark(),
			windows: state.windows(),
			calls: state.calls(),
			alerts: state.alerts(),
		}
	}
}
impl From<StoreSnapshot> for StoreState {
	fn from(snapshot: StoreSnapshot) -> Self {
		let id_watermark = snapshot.requests.iter().map(|r| r.id).max().max(snapshot.id_watermark);

		Self {
			requests: snapshot.requests.into_iter().map(|r| (r.id, r)).collect(),
			id_watermark,
			windows: snapshot.windows,
			calls: snapshot.calls,
			alerts: snapshot.alerts.into_iter().map(|a| (a.id, a)).collect(),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn store_error_converts_into_crate_error_with_source() {
		let store_error = StoreError::Backend { message: "disk unavailable".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("disk unavailable"));

		let source = StdError::source(&error)
			.expect("Crate error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}
}

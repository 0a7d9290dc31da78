//! Admission scheduler: priority queue, limiter consultation, dispatch, and retry.
//!
//! One coordinator task per [`Scheduler`] is the only writer of the rate-limit windows and the
//! only consumer of the queue. Callers enqueue through [`Scheduler::submit`] and observe the
//! outcome by awaiting the returned [`RequestHandle`]; transport calls run on separate tasks,
//! bounded by [`SchedulerConfig::max_in_flight`].
//!
//! Every state change of a request is written to the [`SchedulerStore`] before it takes effect,
//! so [`Scheduler::recover`] can replay outstanding work after a restart without re-dispatching
//! completed requests.

pub mod backoff;
pub mod handle;

mod dispatch;
mod queue;

pub use backoff::*;
pub use handle::*;

// crates.io
use tokio::{
	sync::{Notify, mpsc},
	task::JoinHandle,
};
// self
use crate::{
	_prelude::*,
	auth::CredentialProvider,
	clock::Clock,
	ledger::UsageLedger,
	limiter::RateLimiter,
	obs::{self, FlowKind, FlowSpan},
	policy::{self, PolicyHandle},
	scheduler::{dispatch::Coordinator, queue::RequestQueue},
	store::SchedulerStore,
	transport::{ApiRequest, Method, Transport},
};

/// Identifier unique within a store; survives restarts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);
impl Display for RequestId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "req-{}", self.0)
	}
}

/// Caller-assigned scheduling class; higher classes always dispatch first.
#[derive(
	Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
	/// Background polling.
	Low,
	/// Default class.
	#[default]
	Normal,
	/// Interactive, user-initiated calls.
	High,
}

/// Lifecycle state of a [`QueuedRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
	/// Waiting for dispatch, possibly delayed.
	Queued,
	/// An attempt is in flight.
	Executing,
	/// Finished with a 2xx response.
	Completed,
	/// Finished with a terminal error.
	Failed,
	/// Cancelled before completion.
	Cancelled,
}
impl RequestStatus {
	/// Returns `true` once no further attempt can happen.
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
	}
}

/// A submission as the scheduler tracks and persists it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
	/// Unique identifier.
	pub id: RequestId,
	/// Requested path.
	pub endpoint: String,
	/// HTTP verb.
	pub method: Method,
	/// Scheduling class.
	pub priority: Priority,
	/// Request parameters.
	pub payload: Option<serde_json::Value>,
	/// Extra headers.
	#[serde(default)]
	pub headers: Vec<(String, String)>,
	/// Logical key used to reject duplicates while outstanding.
	pub dedup_key: String,
	/// Submission instant.
	pub enqueued_at: OffsetDateTime,
	/// Instant a delayed request becomes dispatchable again.
	pub scheduled_for: Option<OffsetDateTime>,
	/// Instant after which no further retry is scheduled.
	pub deadline: Option<OffsetDateTime>,
	/// Lifecycle state.
	pub status: RequestStatus,
	/// Retries consumed so far.
	pub retry_count: u32,
	/// Retry budget captured from the policy at submission.
	pub max_retries: u32,
}
impl QueuedRequest {
	/// Transport view of the request.
	pub fn to_api_request(&self) -> ApiRequest {
		ApiRequest {
			method: self.method,
			path: self.endpoint.clone(),
			headers: self.headers.clone(),
			payload: self.payload.clone(),
		}
	}
}

/// Parameters of [`Scheduler::submit`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubmitRequest {
	/// Path relative to the API base.
	pub endpoint: String,
	/// HTTP verb.
	pub method: Method,
	/// Request parameters.
	pub payload: Option<serde_json::Value>,
	/// Extra headers.
	pub headers: Vec<(String, String)>,
	/// Scheduling class.
	pub priority: Priority,
	/// Overrides the default deduplication key.
	pub dedup_key: Option<String>,
	/// Instant after which no further retry is scheduled.
	pub deadline: Option<OffsetDateTime>,
}
impl SubmitRequest {
	/// Creates a submission for `method endpoint` at normal priority.
	pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
		Self { method, endpoint: endpoint.into(), ..Default::default() }
	}

	/// Shorthand for a `GET`.
	pub fn get(endpoint: impl Into<String>) -> Self {
		Self::new(Method::Get, endpoint)
	}

	/// Sets the scheduling class.
	pub fn with_priority(mut self, priority: Priority) -> Self {
		self.priority = priority;

		self
	}

	/// Sets the request parameters.
	pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
		self.payload = Some(payload);

		self
	}

	/// Adds a header.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}

	/// Overrides the deduplication key.
	pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
		self.dedup_key = Some(key.into());

		self
	}

	/// Sets the retry deadline.
	pub fn with_deadline(mut self, deadline: OffsetDateTime) -> Self {
		self.deadline = Some(deadline);

		self
	}

	/// Explicit key, or `METHOD path payload` with the path normalized.
	pub fn dedup_key(&self) -> String {
		if let Some(key) = &self.dedup_key {
			return key.clone();
		}

		let path = policy::normalize_path(&self.endpoint);

		match &self.payload {
			Some(payload) => format!("{} {path} {payload}", self.method),
			None => format!("{} {path}", self.method),
		}
	}
}

/// Result of [`Scheduler::cancel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
	/// The request was queued and will never be dispatched.
	Cancelled,
	/// An attempt is in flight; it completes but is not retried.
	CancelRequested,
	/// No outstanding request has this identifier.
	Unknown,
}

/// Snapshot of queue occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
	/// Dispatchable now.
	pub queued: usize,
	/// Waiting for a backoff or a window to reset.
	pub delayed: usize,
	/// Attempts in flight.
	pub executing: usize,
}

/// Scheduler tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
	/// Concurrent transport calls.
	pub max_in_flight: usize,
	/// Outstanding requests accepted before [`Error::QueueFull`].
	pub max_queue_size: usize,
	/// Backoff applied between retries.
	pub retry: RetryPolicy,
}
impl Default for SchedulerConfig {
	fn default() -> Self {
		Self { max_in_flight: 1, max_queue_size: 1_000, retry: RetryPolicy::default() }
	}
}

/// Collaborators handed to [`Scheduler::spawn`].
#[derive(Clone)]
pub struct SchedulerParts {
	/// Active endpoint policies.
	pub policies: PolicyHandle,
	/// Rate-limit windows; written only by the coordinator.
	pub limiter: Arc<Mutex<RateLimiter>>,
	/// Usage ledger; written only by the coordinator.
	pub ledger: Arc<Mutex<UsageLedger>>,
	/// Source of bearer credentials.
	pub credentials: Arc<dyn CredentialProvider>,
	/// Resource transport.
	pub transport: Arc<dyn Transport>,
	/// Persistence for requests, windows, calls, and alerts.
	pub store: Arc<dyn SchedulerStore>,
	/// Time source.
	pub clock: Arc<dyn Clock>,
}
impl Debug for SchedulerParts {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SchedulerParts").field("policies", &self.policies).finish_non_exhaustive()
	}
}

pub(crate) struct Shared {
	pub(crate) config: SchedulerConfig,
	pub(crate) parts: SchedulerParts,
	pub(crate) queue: Mutex<RequestQueue>,
	pub(crate) notify: Notify,
}

/// Handle to a running coordinator.
pub struct Scheduler {
	shared: Arc<Shared>,
	task: Mutex<Option<JoinHandle<()>>>,
}
impl Scheduler {
	/// Starts the coordinator on the current Tokio runtime.
	pub fn spawn(config: SchedulerConfig, parts: SchedulerParts) -> Self {
		let shared = Arc::new(Shared {
			config,
			parts,
			queue: Mutex::new(RequestQueue::default()),
			notify: Notify::new(),
		});
		let (tx, rx) = mpsc::unbounded_channel();
		let task = tokio::spawn(Coordinator::new(Arc::clone(&shared), tx, rx).run());

		Self { shared, task: Mutex::new(Some(task)) }
	}

	/// Enqueues a request and returns its completion handle without waiting for dispatch.
	///
	/// The request is persisted before it becomes dispatchable.
	pub async fn submit(&self, submission: SubmitRequest) -> Result<RequestHandle> {
		let parts = &self.shared.parts;
		let now = parts.clock.now();
		let registry = parts.policies.current();
		let policy = registry.resolve(&submission.endpoint)?;
		let key = submission.dedup_key();
		let (handle, snapshot) = {
			let mut queue = self.shared.queue.lock();

			if queue.closed {
				return Err(Error::SchedulerClosed);
			}
			if let Some(existing) = queue.outstanding_key(&key) {
				return Err(Error::DuplicateRequest { key, existing });
			}
			if queue.outstanding() >= self.shared.config.max_queue_size {
				return Err(Error::QueueFull { capacity: self.shared.config.max_queue_size });
			}

			let id = queue.allocate_id();
			let request = QueuedRequest {
				id,
				endpoint: submission.endpoint,
				method: submission.method,
				priority: submission.priority,
				payload: submission.payload,
				headers: submission.headers,
				dedup_key: key,
				enqueued_at: now,
				scheduled_for: None,
				deadline: submission.deadline,
				status: RequestStatus::Queued,
				retry_count: 0,
				max_retries: policy.max_retries,
			};
			let (handle, reply) = RequestHandle::channel(id);

			queue.insert(request.clone(), Some(reply));

			(handle, request)
		};

		if let Err(e) = parts.store.save_request(snapshot).await {
			self.shared.queue.lock().finish(handle.id(), RequestStatus::Failed, Err(Error::SchedulerClosed));

			return Err(e.into());
		}

		self.shared.queue.lock().activate(handle.id());
		self.shared.notify.notify_one();

		tracing::debug!(request = %handle.id(), pattern = %policy.pattern, "request queued");

		Ok(handle)
	}

	/// Cancels a queued request, or stops retries of an executing one.
	pub async fn cancel(&self, id: RequestId) -> Result<CancelOutcome> {
		let (outcome, snapshot) = {
			let mut queue = self.shared.queue.lock();

			match queue.get(id).map(|e| e.request.status) {
				Some(RequestStatus::Queued) => (
					CancelOutcome::Cancelled,
					queue.finish(id, RequestStatus::Cancelled, Err(Error::Cancelled { id })),
				),
				Some(RequestStatus::Executing) => {
					if let Some(entry) = queue.get_mut(id) {
						entry.cancel_requested = true;
					}

					(CancelOutcome::CancelRequested, None)
				},
				_ => (CancelOutcome::Unknown, None),
			}
		};

		if let Some(snapshot) = snapshot {
			obs::record_dispatch_outcome(obs::DispatchOutcome::Cancelled);
			self.shared.parts.store.save_request(snapshot).await?;
		}

		tracing::debug!(request = %id, ?outcome, "cancel requested");

		Ok(outcome)
	}

	/// Current queue occupancy.
	pub fn queue_stats(&self) -> QueueStats {
		self.shared.queue.lock().stats()
	}

	/// Snapshot of an outstanding request.
	pub fn request(&self, id: RequestId) -> Option<QueuedRequest> {
		self.shared.queue.lock().get(id).map(|e| e.request.clone())
	}

	/// Reloads persisted windows, call history, and alerts, then re-enqueues outstanding requests.
	///
	/// A request persisted as executing was interrupted mid-attempt; that attempt counts against
	/// its retry budget and the request fails if the budget is spent. Terminal requests are never
	/// replayed. Returns a handle for every re-enqueued request.
	pub async fn recover(&self) -> Result<Vec<RequestHandle>> {
		let span = FlowSpan::new(FlowKind::Recovery, "replay");

		obs::record_flow_outcome(FlowKind::Recovery, obs::FlowOutcome::Attempt);

		let result = span.instrument(self.recover_inner()).await;

		obs::record_flow_result(FlowKind::Recovery, &result);

		result
	}

	async fn recover_inner(&self) -> Result<Vec<RequestHandle>> {
		let parts = &self.shared.parts;
		let now = parts.clock.now();
		let windows = parts.store.load_windows().await?;
		let calls = parts.store.load_calls().await?;
		let alerts = parts.store.load_alerts().await?;

		parts.limiter.lock().restore(windows, now);

		let restored_calls = {
			let mut ledger = parts.ledger.lock();

			ledger.restore_alerts(alerts);
			ledger.restore_records(calls, now)
		};
		let watermark = parts.store.load_id_watermark().await?;
		let mut requests = parts.store.load_requests().await?;

		requests.sort_by_key(|r| (r.enqueued_at, r.id));

		let mut handles = Vec::new();
		let mut snapshots = Vec::new();

		{
			let mut queue = self.shared.queue.lock();

			if let Some(watermark) = watermark {
				queue.observe_id(watermark);
			}

			for mut request in requests {
				queue.observe_id(request.id);

				if request.status.is_terminal() || queue.contains(request.id) {
					continue;
				}
				if request.status == RequestStatus::Executing {
					request.retry_count += 1;
				}
				if request.retry_count > request.max_retries {
					tracing::warn!(request = %request.id, "interrupted request has no retries left");

					request.status = RequestStatus::Failed;
					snapshots.push(request);

					continue;
				}

				request.status = RequestStatus::Queued;
				request.scheduled_for = None;

				let (handle, reply) = RequestHandle::channel(request.id);

				snapshots.push(request.clone());
				queue.insert(request, Some(reply));
				handles.push(handle);
			}
		}

		for snapshot in snapshots {
			parts.store.save_request(snapshot).await?;
		}

		{
			let mut queue = self.shared.queue.lock();

			for handle in &handles {
				queue.activate(handle.id());
			}
		}

		self.shared.notify.notify_one();

		tracing::info!(
			replayed = handles.len(),
			call_records = restored_calls,
			"recovered outstanding requests"
		);

		Ok(handles)
	}

	/// Stops the coordinator; outstanding handles resolve to [`Error::SchedulerClosed`].
	///
	/// Persisted requests stay outstanding and are replayed by the next [`recover`](Self::recover).
	pub async fn shutdown(&self) {
		self.shared.queue.lock().closed = true;
		self.shared.notify.notify_one();

		let task = self.task.lock().take();

		if let Some(task) = task
			&& let Err(e) = task.await
		{
			tracing::warn!(error = %e, "scheduler coordinator ended abnormally");
		}
	}
}
impl Debug for Scheduler {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Scheduler").field("stats", &self.queue_stats()).finish()
	}
}

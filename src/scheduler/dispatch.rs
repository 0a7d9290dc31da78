// crates.io
use tokio::{
	sync::{OwnedSemaphorePermit, Semaphore, mpsc},
	time::Instant,
};
// self
use crate::{
	_prelude::*,
	clock,
	error::{AuthError, RateLimitError, TransportError},
	ledger::{AlertChange, ApiCallRecord},
	limiter::{Admission, AdmissionTicket, AttemptOutcome},
	obs::{self, DispatchOutcome, FlowSpan},
	policy::EndpointPolicy,
	scheduler::{QueuedRequest, RequestId, RequestStatus, Shared},
	transport::{self, ApiRequest, ApiResponse, Method},
};

const STORE_PRUNE_INTERVAL: Duration = Duration::minutes(10);

pub(crate) struct Completion {
	id: RequestId,
	endpoint: String,
	method: Method,
	attempt: u32,
	policy: EndpointPolicy,
	ticket: AdmissionTicket,
	admitted_at: OffsetDateTime,
	exchange: Exchange,
}

enum Exchange {
	Response(ApiResponse),
	Failed {
		error: Error,
		latency: Duration,
		/// `false` when no call reached Reddit, e.g. the credential was unavailable.
		reached_transport: bool,
	},
}

/// Single writer of the queue's dispatch side and of the rate-limit windows.
pub(crate) struct Coordinator {
	shared: Arc<Shared>,
	permits: Arc<Semaphore>,
	completions_tx: mpsc::UnboundedSender<Completion>,
	completions: mpsc::UnboundedReceiver<Completion>,
	store_pruned_at: Mutex<Option<OffsetDateTime>>,
}
impl Coordinator {
	pub(crate) fn new(
		shared: Arc<Shared>,
		completions_tx: mpsc::UnboundedSender<Completion>,
		completions: mpsc::UnboundedReceiver<Completion>,
	) -> Self {
		let permits = Arc::new(Semaphore::new(shared.config.max_in_flight.max(1)));

		Self { shared, permits, completions_tx, completions, store_pruned_at: Mutex::new(None) }
	}

	pub(crate) async fn run(mut self) {
		loop {
			let (has_ready, next_wake) = {
				let mut queue = self.shared.queue.lock();

				if queue.closed {
					break;
				}

				queue.promote_due(Instant::now());

				(queue.has_ready(), queue.next_wake())
			};
			let permits = Arc::clone(&self.permits);
			let wake_at = next_wake.unwrap_or_else(Instant::now);

			tokio::select! {
				biased;

				Some(done) = self.completions.recv() => self.complete(done).await,
				_ = self.shared.notify.notified() => {},
				permit = permits.acquire_owned(), if has_ready => match permit {
					Ok(permit) => self.dispatch_next(permit).await,
					Err(_) => break,
				},
				_ = tokio::time::sleep_until(wake_at), if next_wake.is_some() => {},
			}
		}

		self.shutdown().await;
	}

	async fn dispatch_next(&self, permit: OwnedSemaphorePermit) {
		let parts = &self.shared.parts;
		let Some(request) = ({
			let mut queue = self.shared.queue.lock();

			queue.pop_ready().and_then(|id| queue.get(id)).map(|e| e.request.clone())
		}) else {
			return;
		};
		let now = parts.clock.now();
		let registry = parts.policies.current();
		let policy = match registry.resolve(&request.endpoint) {
			Ok(policy) => policy.clone(),
			Err(e) => {
				self.finish(request.id, RequestStatus::Failed, Err(e.into())).await;

				return;
			},
		};
		let admission = parts.limiter.lock().try_acquire(&policy, registry.global(), now);

		match admission {
			Admission::Denied { retry_after } => {
				let changes =
					parts.ledger.lock().note_denied(&policy.pattern, policy.requests_per_minute, now);

				self.persist_alerts(changes).await;

				if request.deadline.is_some_and(|deadline| now + retry_after > deadline) {
					let last = RateLimitError::Denied { pattern: policy.pattern.clone(), retry_after };
					let error = Error::DeadlineExceeded {
						id: request.id,
						attempts: request.retry_count,
						last: Box::new(last.into()),
					};

					self.finish(request.id, RequestStatus::Failed, Err(error)).await;

					return;
				}

				tracing::debug!(
					request = %request.id,
					pattern = %policy.pattern,
					%retry_after,
					"admission deferred"
				);
				obs::record_dispatch_outcome(DispatchOutcome::Deferred);

				self.defer(request.id, retry_after, now).await;
			},
			Admission::Admitted(ticket) => {
				let snapshot = {
					let mut queue = self.shared.queue.lock();

					queue.get_mut(request.id).map(|entry| {
						entry.request.status = RequestStatus::Executing;

						entry.request.clone()
					})
				};
				let Some(snapshot) = snapshot else {
					return;
				};

				self.persist_request(snapshot).await;
				self.spawn_attempt(request, policy, ticket, now, permit);
			},
		}
	}

	fn spawn_attempt(
		&self,
		request: QueuedRequest,
		policy: EndpointPolicy,
		ticket: AdmissionTicket,
		admitted_at: OffsetDateTime,
		permit: OwnedSemaphorePermit,
	) {
		let shared = Arc::clone(&self.shared);
		let tx = self.completions_tx.clone();
		let attempt = request.retry_count + 1;
		let span = FlowSpan::dispatch(request.id.0, attempt);

		tokio::spawn(span.instrument(async move {
			let api_request = request.to_api_request();
			let exchange = exchange(&shared, &api_request, policy.timeout).await;
			let done = Completion {
				id: request.id,
				endpoint: request.endpoint,
				method: request.method,
				attempt,
				policy,
				ticket,
				admitted_at,
				exchange,
			};

			if tx.send(done).is_err() {
				tracing::debug!("scheduler stopped before the attempt completed");
			}

			drop(permit);
		}));
	}

	async fn complete(&self, done: Completion) {
		let parts = &self.shared.parts;
		let now = parts.clock.now();
		let pattern = done.policy.pattern.clone();
		let (result, record) = match done.exchange {
			Exchange::Response(response) => {
				let status = response.status;
				let latency = response.latency;
				let result = transport::classify(&pattern, response);
				let record = (Some(status), latency, None, result.as_ref().err().map(Error::kind));

				(result, Some(record))
			},
			Exchange::Failed { error, latency, reached_transport } => {
				let record = reached_transport
					.then(|| (None, latency, Some(error.to_string()), Some(error.kind())));

				(Err(error), record)
			},
		};
		let outcome = match &result {
			Ok(_) => AttemptOutcome::Success,
			Err(Error::RateLimit(RateLimitError::ServerSignaled { retry_after, .. })) =>
				AttemptOutcome::RateLimited { retry_after: *retry_after },
			Err(_) => AttemptOutcome::Failure,
		};
		let windows = {
			let mut limiter = parts.limiter.lock();

			limiter.record_outcome(&done.ticket, outcome, now);
			limiter.roll(now);

			limiter.windows()
		};

		if let Some((status, latency, transport_error, error_kind)) = record {
			let record = ApiCallRecord {
				request_id: Some(done.id),
				endpoint: done.endpoint,
				pattern: pattern.clone(),
				method: done.method,
				attempt: done.attempt,
				status_code: status,
				transport_error,
				error_kind,
				latency,
				rate_limited: matches!(outcome, AttemptOutcome::RateLimited { .. }),
				tokens_before: done.ticket.tokens_before,
				tokens_after: done.ticket.tokens_after,
				priority_weight: done.policy.priority_weight,
				timestamp: done.admitted_at,
			};
			let changes = {
				let mut ledger = parts.ledger.lock();
				let changes = ledger.append(record.clone(), done.policy.requests_per_minute, now);

				ledger.prune(now);

				changes
			};

			if let Err(e) = parts.store.append_call(record).await {
				tracing::warn!(error = %e, "failed to persist call record");
			}

			self.prune_store(now).await;

			self.persist_alerts(changes).await;
		}

		if let Err(e) = parts.store.save_windows(windows).await {
			tracing::warn!(error = %e, "failed to persist rate-limit windows");
		}

		self.settle(done.id, result, now).await;
	}

	/// Trims persisted history to the ledger's retention, at most once per interval.
	async fn prune_store(&self, now: OffsetDateTime) {
		{
			let mut last = self.store_pruned_at.lock();

			if last.is_some_and(|at| now - at < STORE_PRUNE_INTERVAL) {
				return;
			}

			*last = Some(now);
		}

		let parts = &self.shared.parts;
		let before = now - parts.ledger.lock().thresholds().retention;

		match parts.store.prune(before).await {
			Ok(0) => {},
			Ok(removed) => tracing::debug!(removed, "pruned persisted history"),
			Err(e) => tracing::warn!(error = %e, "failed to prune persisted history"),
		}
	}

	async fn settle(&self, id: RequestId, result: Result<ApiResponse>, now: OffsetDateTime) {
		let error = match result {
			Ok(response) => {
				tracing::debug!(request = %id, status = response.status, "request completed");
				obs::record_dispatch_outcome(DispatchOutcome::Completed);

				self.finish(id, RequestStatus::Completed, Ok(response)).await;

				return;
			},
			Err(error) => error,
		};
		let Some((retry_count, max_retries, deadline, cancel_requested)) =
			self.shared.queue.lock().get(id).map(|e| {
				(e.request.retry_count, e.request.max_retries, e.request.deadline, e.cancel_requested)
			})
		else {
			return;
		};
		let attempts = retry_count + 1;

		if !error.is_transient() {
			if let Error::Auth(AuthError::Unauthorized { .. }) = &error {
				self.shared.parts.credentials.invalidate();
			}

			tracing::warn!(request = %id, error = %error, "request failed permanently");

			self.finish(id, RequestStatus::Failed, Err(error)).await;

			return;
		}
		if cancel_requested {
			self.finish(id, RequestStatus::Cancelled, Err(Error::Cancelled { id })).await;

			return;
		}
		if retry_count >= max_retries {
			tracing::warn!(request = %id, attempts, error = %error, "retries exhausted");

			let error = Error::RetriesExhausted { kind: error.kind(), attempts, last: Box::new(error) };

			self.finish(id, RequestStatus::Failed, Err(error)).await;

			return;
		}

		let mut delay = self.shared.config.retry.backoff(retry_count);

		if let Some(hint) = error.retry_after() {
			delay = delay.max(hint);
		}
		if deadline.is_some_and(|deadline| now + delay > deadline) {
			let error = Error::DeadlineExceeded { id, attempts, last: Box::new(error) };

			self.finish(id, RequestStatus::Failed, Err(error)).await;

			return;
		}

		if let Some(entry) = self.shared.queue.lock().get_mut(id) {
			entry.request.retry_count += 1;
		}

		tracing::debug!(request = %id, attempts, %delay, error = %error, "retrying request");
		obs::record_dispatch_outcome(DispatchOutcome::Retried);

		self.defer(id, delay, now).await;
	}

	async fn defer(&self, id: RequestId, delay: Duration, now: OffsetDateTime) {
		let snapshot = {
			let mut queue = self.shared.queue.lock();

			queue.defer(id, Instant::now() + clock::to_std(delay), now + delay);

			queue.get(id).map(|e| e.request.clone())
		};

		if let Some(snapshot) = snapshot {
			self.persist_request(snapshot).await;
		}
	}

	async fn finish(&self, id: RequestId, status: RequestStatus, result: Result<ApiResponse>) {
		if status == RequestStatus::Failed {
			obs::record_dispatch_outcome(DispatchOutcome::Failed);
		}

		let snapshot = self.shared.queue.lock().finish(id, status, result);

		if let Some(snapshot) = snapshot {
			self.persist_request(snapshot).await;
		}
	}

	async fn persist_request(&self, snapshot: QueuedRequest) {
		if let Err(e) = self.shared.parts.store.save_request(snapshot).await {
			tracing::warn!(error = %e, "failed to persist request state");
		}
	}

	async fn persist_alerts(&self, changes: Vec<AlertChange>) {
		for change in changes {
			if let Err(e) = self.shared.parts.store.save_alert(change.alert().clone()).await {
				tracing::warn!(error = %e, "failed to persist alert");
			}
		}
	}

	async fn shutdown(&mut self) {
		let windows = self.shared.parts.limiter.lock().windows();

		if let Err(e) = self.shared.parts.store.save_windows(windows).await {
			tracing::warn!(error = %e, "failed to persist rate-limit windows");
		}

		self.shared.queue.lock().drain(|| Error::SchedulerClosed);
		self.completions.close();

		tracing::debug!("scheduler coordinator stopped");
	}
}

async fn exchange(shared: &Shared, request: &ApiRequest, timeout: Duration) -> Exchange {
	let started = Instant::now();
	let elapsed = || Duration::try_from(started.elapsed()).unwrap_or(Duration::MAX);
	let credential = match shared.parts.credentials.credential().await {
		Ok(credential) => credential,
		Err(error) => return Exchange::Failed { error, latency: elapsed(), reached_transport: false },
	};
	let call = shared.parts.transport.execute(request, &credential);

	match tokio::time::timeout(clock::to_std(timeout), call).await {
		Ok(Ok(response)) => Exchange::Response(response),
		Ok(Err(error)) => Exchange::Failed { error, latency: elapsed(), reached_transport: true },
		Err(_) => Exchange::Failed {
			error: TransportError::Timeout { after: timeout }.into(),
			latency: elapsed(),
			reached_transport: true,
		},
	}
}

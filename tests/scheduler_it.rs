// crates.io
use time::macros;
// self
use reddit_broker::{
	_preludet::*,
	auth::{Credential, CredentialFuture, CredentialProvider},
	clock::{Clock, TokioClock},
	error::{ErrorKind, RateLimitError, TransportError},
	ledger::{AlertKind, AlertThresholds, ApiCallRecord, UsageLedger},
	limiter::RateLimiter,
	policy::{PolicyHandle, PolicyRegistry},
	scheduler::{
		CancelOutcome, Priority, QueuedRequest, RequestHandle, RequestId, RequestStatus, Scheduler,
		SchedulerConfig, SchedulerParts, SubmitRequest,
	},
	store::{MemoryStore, SchedulerStore},
	transport::{ApiRequest, ApiResponse, Method, Transport, TransportFuture},
};

const T0: OffsetDateTime = macros::datetime!(2025-01-01 00:00 UTC);

enum Step {
	Status(u16, Option<Duration>),
	Hang,
}

#[derive(Default)]
struct ScriptedTransport {
	script: Mutex<VecDeque<Step>>,
	calls: Mutex<Vec<String>>,
}
impl ScriptedTransport {
	fn scripted(steps: impl IntoIterator<Item = Step>) -> Self {
		Self { script: Mutex::new(steps.into_iter().collect()), ..Default::default() }
	}

	fn calls(&self) -> Vec<String> {
		self.calls.lock().clone()
	}
}
impl Transport for ScriptedTransport {
	fn execute<'a>(&'a self, request: &'a ApiRequest, _: &'a Credential) -> TransportFuture<'a> {
		Box::pin(async move {
			self.calls.lock().push(request.path.clone());

			let step = self.script.lock().pop_front().unwrap_or(Step::Status(200, None));
			let (status, retry_after) = match step {
				Step::Status(status, retry_after) => (status, retry_after),
				Step::Hang => {
					tokio::time::sleep(std::time::Duration::from_secs(3_600)).await;

					(200, None)
				},
			};

			Ok(ApiResponse {
				status,
				body: "{}".into(),
				latency: Duration::milliseconds(10),
				retry_after,
			})
		})
	}
}

struct StaticCredentials(Credential);
impl CredentialProvider for StaticCredentials {
	fn credential(&self) -> CredentialFuture<'_> {
		let credential = self.0.clone();

		Box::pin(async move { Ok(credential) })
	}
}

struct Harness {
	scheduler: Scheduler,
	transport: Arc<ScriptedTransport>,
	limiter: Arc<Mutex<RateLimiter>>,
	ledger: Arc<Mutex<UsageLedger>>,
	store: MemoryStore,
	clock: Arc<TokioClock>,
	policies: PolicyHandle,
}

fn harness(registry: PolicyRegistry, transport: ScriptedTransport, store: MemoryStore) -> Harness {
	let transport = Arc::new(transport);
	let limiter = Arc::new(Mutex::new(RateLimiter::new()));
	let ledger = Arc::new(Mutex::new(UsageLedger::new(AlertThresholds::default())));
	let clock = Arc::new(TokioClock::anchored_at(T0));
	let policies = PolicyHandle::new(registry);
	let scheduler = Scheduler::spawn(
		SchedulerConfig::default(),
		SchedulerParts {
			policies: policies.clone(),
			limiter: limiter.clone(),
			ledger: ledger.clone(),
			credentials: Arc::new(StaticCredentials(fixture_credential("access-it"))),
			transport: transport.clone(),
			store: Arc::new(store.clone()),
			clock: clock.clone(),
		},
	);

	Harness { scheduler, transport, limiter, ledger, store, clock, policies }
}

fn call_record(id: u64, timestamp: OffsetDateTime) -> ApiCallRecord {
	ApiCallRecord {
		request_id: Some(RequestId(id)),
		endpoint: format!("/r/persisted{id}/new"),
		pattern: "**".into(),
		method: Method::Get,
		attempt: 1,
		status_code: Some(200),
		transport_error: None,
		error_kind: None,
		latency: Duration::milliseconds(10),
		rate_limited: false,
		tokens_before: 100,
		tokens_after: 99,
		priority_weight: 1,
		timestamp,
	}
}

fn persisted(id: u64, status: RequestStatus, retry_count: u32) -> QueuedRequest {
	QueuedRequest {
		id: RequestId(id),
		endpoint: format!("/r/persisted{id}/new"),
		method: Method::Get,
		priority: Priority::Normal,
		payload: None,
		headers: Vec::new(),
		dedup_key: format!("GET /r/persisted{id}/new"),
		enqueued_at: T0 - Duration::minutes(5),
		scheduled_for: None,
		deadline: None,
		status,
		retry_count,
		max_retries: 3,
	}
}

#[tokio::test(start_paused = true)]
async fn burst_beyond_ceiling_spills_into_next_window() {
	let h = harness(single_policy_registry(100, 3), ScriptedTransport::default(), MemoryStore::default());
	let mut handles = Vec::new();

	for i in 0..150 {
		let priority = if i % 3 == 0 { Priority::High } else { Priority::Normal };
		let handle = h
			.scheduler
			.submit(SubmitRequest::get(format!("/r/sub{i}/new")).with_priority(priority))
			.await
			.expect("Submission within queue capacity should be accepted.");

		handles.push(handle);
	}

	for handle in handles {
		handle.await.expect("Every burst request should eventually complete.");
	}

	let ledger = h.ledger.lock();
	let first = ledger.aggregate("**", T0, T0 + Duration::minutes(1));
	let second = ledger.aggregate("**", T0 + Duration::minutes(1), T0 + Duration::minutes(2));

	assert_eq!(first.request_count, 100);
	assert_eq!(second.request_count, 50);
	assert_eq!(ledger.metrics().total_requests, 150);
	assert!((ledger.metrics().success_rate - 1.).abs() < f64::EPSILON);
	assert!(ledger.alerts().iter().any(|a| a.kind == AlertKind::ApproachingLimit));
	assert!(ledger.alerts().iter().any(|a| a.kind == AlertKind::LimitExceeded));
	assert!(h.clock.now() >= T0 + Duration::minutes(1));
	assert_eq!(h.transport.calls().len(), 150);

	let registry = h.policies.current();
	let policy = registry.resolve("/r/sub0/new").expect("Default policy should resolve.");
	let status = h.limiter.lock().status(policy, registry.global(), h.clock.now());

	assert_eq!(status.request_count, 50);
	assert_eq!(status.available, 50);
}

#[tokio::test(start_paused = true)]
async fn server_throttle_honours_retry_after() {
	let transport = ScriptedTransport::scripted([Step::Status(429, Some(Duration::seconds(30)))]);
	let h = harness(single_policy_registry(100, 3), transport, MemoryStore::default());
	let handle = h
		.scheduler
		.submit(SubmitRequest::get("/r/rust/new"))
		.await
		.expect("Submission should be accepted.");
	let id = handle.id();
	let response = handle.await.expect("Throttled request should succeed on retry.");

	assert_eq!(response.status, 200);
	assert!(h.clock.now() >= T0 + Duration::seconds(30));

	let ledger = h.ledger.lock();
	let records = ledger.records_for(id);

	assert_eq!(records.len(), 2);
	assert!(records[0].rate_limited);
	assert_eq!(records[0].status_code, Some(429));
	assert!(!records[1].rate_limited);
	assert!(records[1].timestamp >= T0 + Duration::seconds(30));

	let throttle = ledger
		.alerts()
		.iter()
		.find(|a| a.kind == AlertKind::LimitExceeded)
		.expect("A throttle should raise a limit alert.");

	assert!(throttle.resolved_at.is_some());

	let history = h.limiter.lock().history().iter().cloned().collect::<Vec<_>>();

	assert!(history.iter().any(|w| w.server_limited && w.window_end == T0 + Duration::seconds(30)));
}

#[tokio::test(start_paused = true)]
async fn repeated_timeouts_exhaust_the_retry_budget() {
	let transport = ScriptedTransport::scripted([Step::Hang, Step::Hang, Step::Hang, Step::Hang]);
	let h = harness(single_policy_registry(100, 3), transport, MemoryStore::default());
	let handle = h
		.scheduler
		.submit(SubmitRequest::get("/api/v1/me"))
		.await
		.expect("Submission should be accepted.");
	let id = handle.id();
	let err = handle.await.expect_err("Four timeouts should exhaust three retries.");

	match err {
		Error::RetriesExhausted { kind, attempts, last } => {
			assert_eq!(kind, ErrorKind::Transport);
			assert_eq!(attempts, 4);
			assert!(matches!(*last, Error::Transport(TransportError::Timeout { .. })));
		},
		other => panic!("Unexpected error: {other:?}"),
	}

	let records = h.ledger.lock().records_for(id).into_iter().cloned().collect::<Vec<_>>();

	assert_eq!(records.len(), 4);
	assert!(records.iter().all(|r| r.transport_error.is_some() && r.status_code.is_none()));
	assert_eq!(records.iter().map(|r| r.attempt).collect::<Vec<_>>(), vec![1, 2, 3, 4]);

	let stored = h.store.requests();

	assert_eq!(stored.len(), 1);
	assert_eq!(stored[0].status, RequestStatus::Failed);
	assert_eq!(stored[0].retry_count, 3);
	assert_eq!(h.store.calls().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn client_errors_fail_without_retry() {
	let transport = ScriptedTransport::scripted([Step::Status(404, None)]);
	let h = harness(single_policy_registry(100, 3), transport, MemoryStore::default());
	let handle = h
		.scheduler
		.submit(SubmitRequest::get("/r/missing/about"))
		.await
		.expect("Submission should be accepted.");
	let err = handle.await.expect_err("A 404 is permanent.");

	assert!(matches!(err, Error::Client { status: 404, .. }));
	assert_eq!(h.transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn higher_priority_dispatches_first() {
	let h = harness(single_policy_registry(100, 3), ScriptedTransport::default(), MemoryStore::default());
	let mut handles = Vec::new();

	for (path, priority) in [
		("/r/low/new", Priority::Low),
		("/r/normal/new", Priority::Normal),
		("/r/high/new", Priority::High),
		("/r/normal2/new", Priority::Normal),
	] {
		let handle = h
			.scheduler
			.submit(SubmitRequest::get(path).with_priority(priority))
			.await
			.expect("Submission should be accepted.");

		handles.push(handle);
	}

	for handle in handles {
		handle.await.expect("Every request should complete.");
	}

	assert_eq!(h.transport.calls(), vec![
		"/r/high/new".to_owned(),
		"/r/normal/new".to_owned(),
		"/r/normal2/new".to_owned(),
		"/r/low/new".to_owned(),
	]);
}

#[tokio::test(start_paused = true)]
async fn duplicate_submissions_are_rejected_while_outstanding() {
	let h = harness(single_policy_registry(100, 3), ScriptedTransport::default(), MemoryStore::default());
	let first = h
		.scheduler
		.submit(SubmitRequest::get("/r/rust/new"))
		.await
		.expect("First submission should be accepted.");
	let err = h
		.scheduler
		.submit(SubmitRequest::get("/r/rust/new/"))
		.await
		.expect_err("Equivalent submission should be rejected.");

	assert!(matches!(err, Error::DuplicateRequest { existing, .. } if existing == first.id()));

	first.await.expect("First submission should complete.");

	let again = h
		.scheduler
		.submit(SubmitRequest::get("/r/rust/new"))
		.await
		.expect("Submission should be accepted once the first one finished.");

	again.await.expect("Resubmitted request should complete.");
}

#[tokio::test(start_paused = true)]
async fn cancel_before_dispatch_and_during_execution() {
	let transport = ScriptedTransport::scripted([Step::Hang]);
	let h = harness(single_policy_registry(100, 3), transport, MemoryStore::default());
	let running = h
		.scheduler
		.submit(SubmitRequest::get("/r/slow/new"))
		.await
		.expect("Submission should be accepted.");
	let waiting = h
		.scheduler
		.submit(SubmitRequest::get("/r/waiting/new"))
		.await
		.expect("Submission should be accepted.");

	tokio::time::sleep(std::time::Duration::from_secs(1)).await;

	assert_eq!(
		h.scheduler.request(running.id()).map(|r| r.status),
		Some(RequestStatus::Executing)
	);

	let outcome =
		h.scheduler.cancel(waiting.id()).await.expect("Cancelling a queued request should work.");

	assert_eq!(outcome, CancelOutcome::Cancelled);
	assert!(matches!(waiting.await, Err(Error::Cancelled { .. })));

	let outcome =
		h.scheduler.cancel(running.id()).await.expect("Cancelling an executing request should work.");

	assert_eq!(outcome, CancelOutcome::CancelRequested);

	let running_id = running.id();

	assert!(matches!(running.await, Err(Error::Cancelled { id }) if id == running_id));
	assert_eq!(h.transport.calls(), vec!["/r/slow/new".to_owned()]);

	let outcome =
		h.scheduler.cancel(RequestId(999)).await.expect("Unknown identifiers are not an error.");

	assert_eq!(outcome, CancelOutcome::Unknown);

	let statuses = h.store.requests().into_iter().map(|r| r.status).collect::<Vec<_>>();

	assert_eq!(statuses, vec![RequestStatus::Cancelled, RequestStatus::Cancelled]);
}

#[tokio::test(start_paused = true)]
async fn deadline_stops_waiting_for_a_window() {
	let h = harness(single_policy_registry(1, 3), ScriptedTransport::default(), MemoryStore::default());
	let first = h
		.scheduler
		.submit(SubmitRequest::get("/r/one/new"))
		.await
		.expect("Submission should be accepted.");
	let second = h
		.scheduler
		.submit(SubmitRequest::get("/r/two/new").with_deadline(T0 + Duration::seconds(10)))
		.await
		.expect("Submission should be accepted.");

	first.await.expect("First request fits the window.");

	let err = second.await.expect_err("Second request cannot run before its deadline.");

	match err {
		Error::DeadlineExceeded { last, .. } =>
			assert!(matches!(*last, Error::RateLimit(RateLimitError::Denied { .. }))),
		other => panic!("Unexpected error: {other:?}"),
	}
}

#[tokio::test(start_paused = true)]
async fn recovery_replays_outstanding_requests_once() {
	let store = MemoryStore::default();
	let mut expired = persisted(9, RequestStatus::Completed, 0);

	expired.enqueued_at = T0 - Duration::days(2);

	for request in [
		persisted(1, RequestStatus::Completed, 0),
		persisted(2, RequestStatus::Executing, 0),
		persisted(3, RequestStatus::Queued, 1),
		persisted(4, RequestStatus::Executing, 3),
		expired,
	] {
		store.save_request(request).await.expect("Seeding the store should succeed.");
	}
	for (id, at) in [(1, T0 - Duration::minutes(5)), (9, T0 - Duration::days(2))] {
		store.append_call(call_record(id, at)).await.expect("Seeding call history should succeed.");
	}

	assert_eq!(
		store.prune(T0 - Duration::hours(24)).await.expect("Pruning should succeed."),
		2,
		"The expired request and its call record age out."
	);

	let h = harness(single_policy_registry(100, 3), ScriptedTransport::default(), store);
	let handles = h.scheduler.recover().await.expect("Recovery should succeed.");

	assert_eq!(handles.iter().map(RequestHandle::id).collect::<Vec<_>>(), vec![RequestId(2), RequestId(3)]);
	assert_eq!(h.ledger.lock().records_for(RequestId(1)).len(), 1);
	assert_eq!(h.ledger.lock().metrics().total_requests, 1);

	for handle in handles {
		handle.await.expect("Replayed requests should complete.");
	}

	assert_eq!(h.ledger.lock().metrics().total_requests, 3);
	assert_eq!(h.store.calls().len(), 3);

	let stored = h.store.requests();
	let status_of = |id: u64| {
		stored.iter().find(|r| r.id == RequestId(id)).map(|r| (r.status, r.retry_count))
	};

	assert_eq!(status_of(1), Some((RequestStatus::Completed, 0)));
	assert_eq!(status_of(2), Some((RequestStatus::Completed, 1)));
	assert_eq!(status_of(3), Some((RequestStatus::Completed, 1)));
	assert_eq!(status_of(4), Some((RequestStatus::Failed, 4)));
	assert_eq!(h.transport.calls(), vec!["/r/persisted2/new".to_owned(), "/r/persisted3/new".to_owned()]);

	let fresh = h
		.scheduler
		.submit(SubmitRequest::get("/r/fresh/new"))
		.await
		.expect("Submission after recovery should be accepted.");

	assert!(fresh.id() > RequestId(9), "Pruned identifiers must not be reused.");
}

#[tokio::test(start_paused = true)]
async fn shutdown_resolves_outstanding_handles() {
	let transport = ScriptedTransport::scripted([Step::Hang]);
	let h = harness(single_policy_registry(100, 3), transport, MemoryStore::default());
	let handle = h
		.scheduler
		.submit(SubmitRequest::get("/r/slow/new"))
		.await
		.expect("Submission should be accepted.");

	tokio::time::sleep(std::time::Duration::from_secs(1)).await;
	h.scheduler.shutdown().await;

	assert!(matches!(handle.await, Err(Error::SchedulerClosed)));
	assert!(matches!(
		h.scheduler.submit(SubmitRequest::get("/r/late/new")).await,
		Err(Error::SchedulerClosed)
	));

	let stored = h.store.requests();

	assert_eq!(stored[0].status, RequestStatus::Executing);
}

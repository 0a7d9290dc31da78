//! Orchestrating façade: the only surface the UI and the background poller use.
//!
//! [`RedditClient`] wires the session manager, policy registry, limiter, ledger, scheduler, and
//! store together. Callers never touch limiter or ledger state directly; they read snapshots
//! through [`RedditClient::get_rate_limit_status`] and [`RedditClient::get_metrics`].

// std
use std::path::PathBuf;
// self
use crate::{
	_prelude::*,
	auth::{AuthSession, AuthorizationRequest, Credential, OAuthConfig, REDDIT_API_BASE, SessionState},
	clock::{Clock, SystemClock},
	error::ConfigError,
	http::ReqwestHttpClient,
	ledger::{AlertId, AlertThresholds, UsageAlert, UsageLedger, UsageMetrics},
	limiter::{RateLimitStatus, RateLimiter},
	oauth::{BasicFacade, OAuth2Facade},
	policy::{PolicyHandle, PolicyRegistry},
	scheduler::{
		CancelOutcome, QueueStats, RequestHandle, RequestId, Scheduler, SchedulerConfig,
		SchedulerParts, SubmitRequest,
	},
	store::{FileStore, MemoryStore, SchedulerStore},
	transport::{ReqwestTransport, Transport},
};

/// Everything [`RedditClient::new`] needs.
#[derive(Clone, Debug)]
pub struct ClientConfig {
	/// OAuth application settings.
	pub oauth: OAuthConfig,
	/// Endpoint policies; must contain a default.
	pub policies: PolicyRegistry,
	/// Scheduler tuning.
	pub scheduler: SchedulerConfig,
	/// Ledger thresholds.
	pub alerts: AlertThresholds,
	/// Base URL of resource calls.
	pub api_base: Url,
	/// JSON snapshot location; `None` keeps state in memory.
	pub store_path: Option<PathBuf>,
}
impl ClientConfig {
	/// Reddit defaults around the provided OAuth settings.
	pub fn new(oauth: OAuthConfig) -> Result<Self, ConfigError> {
		Ok(Self {
			oauth,
			policies: PolicyRegistry::reddit()?,
			scheduler: SchedulerConfig::default(),
			alerts: AlertThresholds::default(),
			api_base: Url::parse(REDDIT_API_BASE)
				.map_err(|source| ConfigError::InvalidUrl { source })?,
			store_path: None,
		})
	}

	/// Replaces the policy table.
	pub fn with_policies(mut self, policies: PolicyRegistry) -> Self {
		self.policies = policies;

		self
	}

	/// Replaces the scheduler tuning.
	pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
		self.scheduler = scheduler;

		self
	}

	/// Replaces the ledger thresholds.
	pub fn with_alerts(mut self, alerts: AlertThresholds) -> Self {
		self.alerts = alerts;

		self
	}

	/// Points resource calls at another base URL.
	pub fn with_api_base(mut self, api_base: Url) -> Self {
		self.api_base = api_base;

		self
	}

	/// Persists scheduler state to a JSON file.
	pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.store_path = Some(path.into());

		self
	}
}

/// Pre-built collaborators for [`RedditClient::with_parts`].
pub struct ClientParts<F>
where
	F: OAuth2Facade,
{
	/// Session manager owning the credential.
	pub session: Arc<AuthSession<F>>,
	/// Endpoint policies; must contain a default.
	pub policies: PolicyRegistry,
	/// Scheduler tuning.
	pub scheduler: SchedulerConfig,
	/// Ledger thresholds.
	pub alerts: AlertThresholds,
	/// Resource transport.
	pub transport: Arc<dyn Transport>,
	/// Persistence backend.
	pub store: Arc<dyn SchedulerStore>,
	/// Time source.
	pub clock: Arc<dyn Clock>,
}

/// Rate-governed Reddit client.
pub struct RedditClient<F = BasicFacade>
where
	F: 'static + OAuth2Facade,
{
	session: Arc<AuthSession<F>>,
	policies: PolicyHandle,
	limiter: Arc<Mutex<RateLimiter>>,
	ledger: Arc<Mutex<UsageLedger>>,
	store: Arc<dyn SchedulerStore>,
	clock: Arc<dyn Clock>,
	scheduler: Scheduler,
}
impl RedditClient {
	/// Builds the reqwest-backed stack and starts the scheduler on the current Tokio runtime.
	///
	/// Fails fast on configuration problems such as a policy table without a default.
	/// Call [`Self::recover`] before submitting when the store holds state from an earlier run.
	pub fn new(config: ClientConfig) -> Result<Self> {
		let http = ReqwestHttpClient::new(&config.oauth.user_agent)?;
		let session = AuthSession::new(config.oauth, http.clone())?;
		let transport = ReqwestTransport::with_base(http, config.api_base);
		let store: Arc<dyn SchedulerStore> = match config.store_path {
			Some(path) => Arc::new(FileStore::open(path)?),
			None => Arc::new(MemoryStore::default()),
		};

		Self::with_parts(ClientParts {
			session: Arc::new(session),
			policies: config.policies,
			scheduler: config.scheduler,
			alerts: config.alerts,
			transport: Arc::new(transport),
			store,
			clock: Arc::new(SystemClock),
		})
	}
}
impl<F> RedditClient<F>
where
	F: 'static + OAuth2Facade,
{
	/// Wires pre-built collaborators and starts the scheduler.
	///
	/// Call [`Self::recover`] before submitting when the store holds state from an earlier run.
	pub fn with_parts(parts: ClientParts<F>) -> Result<Self> {
		parts.policies.ensure_default()?;

		let policies = PolicyHandle::new(parts.policies);
		let limiter = Arc::new(Mutex::new(RateLimiter::new()));
		let ledger = Arc::new(Mutex::new(UsageLedger::new(parts.alerts)));
		let scheduler = Scheduler::spawn(
			parts.scheduler,
			SchedulerParts {
				policies: policies.clone(),
				limiter: Arc::clone(&limiter),
				ledger: Arc::clone(&ledger),
				credentials: parts.session.clone(),
				transport: parts.transport,
				store: Arc::clone(&parts.store),
				clock: Arc::clone(&parts.clock),
			},
		);

		Ok(Self {
			session: parts.session,
			policies,
			limiter,
			ledger,
			store: parts.store,
			clock: parts.clock,
			scheduler,
		})
	}

	/// Starts the authorization-code handshake; open the returned URL in a browser.
	pub fn begin_authorization(&self) -> AuthorizationRequest {
		self.session.begin_authorization()
	}

	/// Completes the handshake from the callback URL the browser was redirected to.
	pub async fn complete_authorization(&self, callback_url: &str) -> Result<()> {
		self.session.complete_authorization(callback_url).await.map(|_| ())
	}

	/// Seeds a credential persisted by an earlier run.
	pub fn restore_session(&self, credential: Credential) {
		self.session.restore(credential);
	}

	/// Drops the credential; the next call requires a new handshake.
	pub fn sign_out(&self) {
		self.session.sign_out();
	}

	/// Current authentication state.
	pub fn session_state(&self) -> SessionState {
		self.session.state()
	}

	/// Enqueues a request; await the handle for the outcome.
	pub async fn submit_request(&self, request: SubmitRequest) -> Result<RequestHandle> {
		self.scheduler.submit(request).await
	}

	/// Cancels a request.
	pub async fn cancel_request(&self, id: RequestId) -> Result<CancelOutcome> {
		self.scheduler.cancel(id).await
	}

	/// Replays requests persisted by an earlier run.
	pub async fn recover(&self) -> Result<Vec<RequestHandle>> {
		self.scheduler.recover().await
	}

	/// Limiter snapshot for the policy governing `endpoint`.
	pub fn get_rate_limit_status(&self, endpoint: &str) -> Result<RateLimitStatus> {
		let registry = self.policies.current();
		let policy = registry.resolve(endpoint)?;

		Ok(self.limiter.lock().status(policy, registry.global(), self.clock.now()))
	}

	/// Limiter snapshot for the registry-wide ceiling, when one is configured.
	pub fn get_global_rate_limit_status(&self) -> Option<RateLimitStatus> {
		let registry = self.policies.current();

		registry.global().map(|global| self.limiter.lock().status(global, None, self.clock.now()))
	}

	/// Headline usage numbers.
	pub fn get_metrics(&self) -> UsageMetrics {
		self.ledger.lock().metrics()
	}

	/// Alerts not yet resolved.
	pub fn open_alerts(&self) -> Vec<UsageAlert> {
		self.ledger.lock().open_alerts()
	}

	/// Acknowledges an alert; `None` when the identifier is unknown.
	pub async fn acknowledge_alert(&self, id: AlertId) -> Result<Option<UsageAlert>> {
		let acknowledged = self.ledger.lock().acknowledge(id, self.clock.now());

		if let Some(alert) = &acknowledged {
			self.store.save_alert(alert.clone()).await?;
		}

		Ok(acknowledged)
	}

	/// Queue occupancy.
	pub fn queue_stats(&self) -> QueueStats {
		self.scheduler.queue_stats()
	}

	/// Atomically replaces the policy table; queued requests resolve against the new one.
	pub fn reload_policies(&self, registry: PolicyRegistry) -> Result<()> {
		self.policies.reload(registry)?;

		tracing::info!("endpoint policies reloaded");

		Ok(())
	}

	/// Stops the scheduler.
	pub async fn shutdown(&self) {
		self.scheduler.shutdown().await;
	}
}
impl<F> Debug for RedditClient<F>
where
	F: 'static + OAuth2Facade,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RedditClient")
			.field("session", &self.session)
			.field("scheduler", &self.scheduler)
			.finish_non_exhaustive()
	}
}

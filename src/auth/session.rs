//! Authorization-code handshake and single-flight credential refresh.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{
		CallbackParams, Credential, CredentialFuture, CredentialProvider, OAuthConfig, TokenSecret,
	},
	clock::{Clock, SystemClock},
	error::{AuthError, ConfigError, TransportError},
	http::ReqwestHttpClient,
	oauth::{BasicFacade, OAuth2Facade, ReqwestTransportErrorMapper, TokenGrant},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;

/// Lifecycle of an [`AuthSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
	/// No credential and no pending handshake.
	Unauthenticated,
	/// Authorization URL issued; waiting for the callback.
	AwaitingAuthorization,
	/// Callback accepted; code exchange in flight.
	ExchangingCode,
	/// Holding a usable credential.
	Authenticated,
	/// Single refresh in flight.
	Refreshing,
	/// Refresh token is dead; re-authorization required.
	Expired,
}

/// Authorization URL and CSRF state returned by [`AuthSession::begin_authorization`].
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
	/// URL the user should open.
	pub authorize_url: Url,
	/// CSRF token echoed back in the callback.
	pub state: String,
	/// PKCE code challenge included in the URL.
	pub code_challenge: String,
}

#[derive(Clone)]
struct PendingAuthorization {
	state: String,
	verifier: String,
}

#[derive(Clone)]
enum RefreshOutcome {
	Renewed(Credential),
	Expired,
	Unreachable(String),
}
impl RefreshOutcome {
	fn replay(&self) -> Result<Credential> {
		match self {
			Self::Renewed(credential) => Ok(credential.clone()),
			Self::Expired => Err(AuthError::SessionExpired.into()),
			Self::Unreachable(message) =>
				Err(TransportError::TokenEndpoint { message: message.clone() }.into()),
		}
	}
}

struct SessionInner {
	state: SessionState,
	pending: Option<PendingAuthorization>,
	credential: Option<Credential>,
	force_refresh: bool,
	generation: u64,
	last_refresh: Option<RefreshOutcome>,
}
impl SessionInner {
	fn usable(&self, margin: Duration, now: OffsetDateTime) -> Option<Result<Credential>> {
		match self.state {
			SessionState::Authenticated | SessionState::Refreshing => {
				let credential = self.credential.as_ref()?;

				if self.force_refresh || credential.expires_within(margin, now) {
					None
				} else {
					Some(Ok(credential.clone()))
				}
			},
			SessionState::Expired => Some(Err(AuthError::SessionExpired.into())),
			SessionState::Unauthenticated
			| SessionState::AwaitingAuthorization
			| SessionState::ExchangingCode => Some(Err(AuthError::NotAuthenticated.into())),
		}
	}
}

/// OAuth session manager; the only owner of the bearer [`Credential`].
pub struct AuthSession<F = BasicFacade>
where
	F: OAuth2Facade,
{
	config: Arc<OAuthConfig>,
	facade: F,
	clock: Arc<dyn Clock>,
	inner: Mutex<SessionInner>,
	refresh_guard: AsyncMutex<()>,
}
impl AuthSession {
	/// Creates a session over the default reqwest-backed facade.
	pub fn new(config: OAuthConfig, http: ReqwestHttpClient) -> Result<Self, ConfigError> {
		let facade: BasicFacade =
			BasicFacade::from_config(&config, http, ReqwestTransportErrorMapper)?;

		Ok(Self::with_facade(config, facade, Arc::new(SystemClock)))
	}
}
impl<F> AuthSession<F>
where
	F: OAuth2Facade,
{
	/// Creates a session over a custom facade and clock.
	pub fn with_facade(config: OAuthConfig, facade: F, clock: Arc<dyn Clock>) -> Self {
		Self {
			config: Arc::new(config),
			facade,
			clock,
			inner: Mutex::new(SessionInner {
				state: SessionState::Unauthenticated,
				pending: None,
				credential: None,
				force_refresh: false,
				generation: 0,
				last_refresh: None,
			}),
			refresh_guard: AsyncMutex::new(()),
		}
	}

	/// Current lifecycle state.
	pub fn state(&self) -> SessionState {
		self.inner.lock().state
	}

	/// Copy of the held credential, for persistence.
	pub fn credential_snapshot(&self) -> Option<Credential> {
		self.inner.lock().credential.clone()
	}

	/// Generates a CSRF token and PKCE pair and returns the authorization URL.
	///
	/// Calling again replaces any pending handshake; the earlier state stops validating.
	pub fn begin_authorization(&self) -> AuthorizationRequest {
		let _guard = FlowSpan::new(FlowKind::Authorization, "begin").entered();
		let state = random_string(STATE_LEN);
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let code_challenge = pkce_challenge(&verifier);
		let authorize_url = self.authorize_url(&state, &code_challenge);
		let mut inner = self.inner.lock();

		inner.pending = Some(PendingAuthorization { state: state.clone(), verifier });
		inner.state = SessionState::AwaitingAuthorization;

		tracing::debug!("authorization pending");

		AuthorizationRequest { authorize_url, state, code_challenge }
	}

	/// Validates the callback, exchanges the code, and stores the resulting credential.
	///
	/// `state` is verified before anything else in the callback is acted on; a mismatch is rejected
	/// without disturbing the pending handshake. Denials and exchange failures return the session
	/// to [`SessionState::Unauthenticated`].
	pub async fn complete_authorization(&self, callback: &str) -> Result<Credential> {
		let span = FlowSpan::new(FlowKind::Authorization, "complete");

		obs::record_flow_outcome(FlowKind::Authorization, FlowOutcome::Attempt);

		let result = span.instrument(self.complete_inner(callback)).await;

		obs::record_flow_result(FlowKind::Authorization, &result);

		result
	}

	async fn complete_inner(&self, callback: &str) -> Result<Credential> {
		let (code, pending) = {
			let mut inner = self.inner.lock();

			if inner.state != SessionState::AwaitingAuthorization {
				return Err(AuthError::NoPendingAuthorization.into());
			}

			let params = CallbackParams::parse(callback)?;
			let expected = inner.pending.as_ref().ok_or(AuthError::NoPendingAuthorization)?;

			if expected.state != params.state {
				tracing::warn!("authorization callback state mismatch");

				return Err(AuthError::CsrfMismatch.into());
			}

			let pending = inner.pending.take().ok_or(AuthError::NoPendingAuthorization)?;
			let code = match params.into_code() {
				Ok(code) => code,
				Err(e) => {
					inner.state = SessionState::Unauthenticated;

					tracing::warn!(error = %e, "authorization denied");

					return Err(e.into());
				},
			};

			inner.state = SessionState::ExchangingCode;

			(code, pending)
		};
		let exchanged =
			self.facade.exchange_code(&code, &pending.verifier, &self.config.redirect_uri).await;
		let mut inner = self.inner.lock();

		if inner.state != SessionState::ExchangingCode {
			return Err(AuthError::NoPendingAuthorization.into());
		}

		match exchanged.and_then(|grant| self.credential_from(grant, None)) {
			Ok(credential) => {
				inner.state = SessionState::Authenticated;
				inner.credential = Some(credential.clone());
				inner.force_refresh = false;
				inner.last_refresh = None;

				tracing::debug!(expires_at = %credential.expires_at, "session authenticated");

				Ok(credential)
			},
			Err(e) => {
				inner.state = SessionState::Unauthenticated;

				tracing::warn!(error = %e, "authorization code exchange failed");

				Err(match e {
					Error::Transport(_) | Error::RateLimit(_) | Error::Auth(_) => e,
					other => AuthError::TokenExchangeFailed { reason: other.to_string(), status: None }
						.into(),
				})
			},
		}
	}

	/// Returns a credential valid beyond the refresh margin, refreshing at most once at a time.
	///
	/// Callers arriving while a refresh is in flight wait for it and receive its outcome.
	pub async fn get_valid_credential(&self) -> Result<Credential> {
		let margin = self.config.refresh_margin;
		let observed = {
			let inner = self.inner.lock();

			if let Some(result) = inner.usable(margin, self.clock.now()) {
				return result;
			}

			inner.generation
		};
		let _guard = self.refresh_guard.lock().await;
		let refresh_token = {
			let mut inner = self.inner.lock();

			if inner.generation != observed
				&& let Some(outcome) = inner.last_refresh.as_ref()
			{
				return outcome.replay();
			}
			if let Some(result) = inner.usable(margin, self.clock.now()) {
				return result;
			}

			match inner.credential.as_ref().and_then(|c| c.refresh_token.clone()) {
				Some(token) => {
					inner.state = SessionState::Refreshing;

					token
				},
				None => {
					inner.state = SessionState::Expired;

					return self.settle(&mut inner, RefreshOutcome::Expired);
				},
			}
		};
		let span = FlowSpan::new(FlowKind::Refresh, "get_valid_credential");

		obs::record_flow_outcome(FlowKind::Refresh, FlowOutcome::Attempt);

		let refreshed = span.instrument(self.facade.refresh(refresh_token.expose())).await;
		let mut inner = self.inner.lock();

		if inner.state != SessionState::Refreshing {
			return Err(AuthError::NotAuthenticated.into());
		}

		let outcome = match refreshed.and_then(|grant| self.credential_from(grant, Some(refresh_token))) {
			Ok(credential) => {
				inner.state = SessionState::Authenticated;
				inner.credential = Some(credential.clone());
				inner.force_refresh = false;

				tracing::debug!(expires_at = %credential.expires_at, "credential refreshed");

				RefreshOutcome::Renewed(credential)
			},
			Err(e) if e.is_transient() => {
				inner.state = SessionState::Authenticated;

				let now = self.clock.now();

				match inner.credential.as_ref().filter(|c| !c.is_expired_at(now)) {
					Some(current) => {
						tracing::warn!(error = %e, "refresh deferred; current credential still valid");

						RefreshOutcome::Renewed(current.clone())
					},
					None => {
						tracing::warn!(error = %e, "token endpoint unreachable during refresh");

						RefreshOutcome::Unreachable(e.to_string())
					},
				}
			},
			Err(e) => {
				inner.state = SessionState::Expired;

				tracing::warn!(error = %e, "refresh rejected; session expired");

				RefreshOutcome::Expired
			},
		};
		let result = self.settle(&mut inner, outcome);

		obs::record_flow_result(FlowKind::Refresh, &result);

		result
	}

	/// Seeds a persisted credential.
	///
	/// Expired credentials without a refresh token leave the session [`SessionState::Expired`].
	pub fn restore(&self, credential: Credential) {
		let mut inner = self.inner.lock();
		let dead = credential.refresh_token.is_none() && credential.is_expired_at(self.clock.now());

		inner.state = if dead { SessionState::Expired } else { SessionState::Authenticated };
		inner.credential = Some(credential);
		inner.pending = None;
		inner.force_refresh = false;
		inner.last_refresh = None;
		inner.generation += 1;

		tracing::debug!(state = ?inner.state, "session restored");
	}

	/// Drops the credential and any pending handshake.
	pub fn sign_out(&self) {
		let mut inner = self.inner.lock();

		inner.state = SessionState::Unauthenticated;
		inner.credential = None;
		inner.pending = None;
		inner.force_refresh = false;
		inner.last_refresh = None;
		inner.generation += 1;
	}

	fn settle(&self, inner: &mut SessionInner, outcome: RefreshOutcome) -> Result<Credential> {
		let result = outcome.replay();

		inner.generation += 1;
		inner.last_refresh = Some(outcome);

		result
	}

	fn credential_from(
		&self,
		grant: TokenGrant,
		previous_refresh: Option<TokenSecret>,
	) -> Result<Credential> {
		let scope = grant.scope.unwrap_or_else(|| self.config.scopes.clone());

		Credential::builder()
			.access_token(grant.access_token.expose())
			.maybe_refresh_token(previous_refresh)
			.maybe_refresh_token(grant.refresh_token)
			.scope(scope)
			.issued_at(self.clock.now())
			.expires_in(grant.expires_in)
			.build()
			.map_err(|e| ConfigError::from(e).into())
	}

	fn authorize_url(&self, state: &str, code_challenge: &str) -> Url {
		let mut url = self.config.authorize_url.clone();

		url.query_pairs_mut()
			.append_pair("client_id", &self.config.client_id)
			.append_pair("response_type", "code")
			.append_pair("state", state)
			.append_pair("redirect_uri", self.config.redirect_uri.as_str())
			.append_pair("duration", self.config.duration.as_str())
			.append_pair("scope", &self.config.scopes.normalized())
			.append_pair("code_challenge", code_challenge)
			.append_pair("code_challenge_method", "S256");

		url
	}
}
impl<F> CredentialProvider for AuthSession<F>
where
	F: OAuth2Facade,
{
	fn credential(&self) -> CredentialFuture<'_> {
		Box::pin(self.get_valid_credential())
	}

	fn invalidate(&self) {
		let mut inner = self.inner.lock();

		if inner.state == SessionState::Authenticated {
			inner.force_refresh = true;
		}
	}
}
impl<F> Debug for AuthSession<F>
where
	F: OAuth2Facade,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthSession")
			.field("client_id", &self.config.client_id)
			.field("state", &self.state())
			.finish()
	}
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn pkce_challenge(verifier: &str) -> String {
	let digest = Sha256::digest(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(digest)
}

//! Crate-wide error taxonomy shared by the session manager, scheduler, and stores.
//!
//! Transient families ([`RateLimitError`], [`TransportError`], [`Error::Server`]) are retried
//! inside the scheduler and only reach callers wrapped in [`Error::RetriesExhausted`]. Permanent
//! families ([`AuthError`], [`Error::Client`], [`ConfigError`]) propagate immediately.

// self
use crate::{_prelude::*, scheduler::RequestId};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem; fatal at startup.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Authorization failure that requires user interaction.
	#[error(transparent)]
	Auth(#[from] AuthError),
	/// Locally predicted or server-signaled rate limit.
	#[error(transparent)]
	RateLimit(#[from] RateLimitError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Remote server failed with a 5xx status.
	#[error("Reddit returned server error {status}.")]
	Server {
		/// HTTP status code.
		status: u16,
		/// Truncated response body.
		body: String,
	},
	/// Remote server rejected the request with a 4xx status other than 401/403/429.
	#[error("Reddit rejected the request with status {status}.")]
	Client {
		/// HTTP status code.
		status: u16,
		/// Truncated response body.
		body: String,
	},
	/// Response body could not be decoded into the requested shape.
	#[error("Response body is malformed: {reason}.")]
	MalformedResponse {
		/// Decoder-supplied reason.
		reason: String,
	},
	/// An equivalent request is still outstanding.
	#[error("Request `{key}` is already outstanding as {existing}.")]
	DuplicateRequest {
		/// Logical deduplication key.
		key: String,
		/// Identifier of the outstanding request.
		existing: RequestId,
	},
	/// The request was cancelled before it could complete.
	#[error("Request {id} was cancelled.")]
	Cancelled {
		/// Identifier of the cancelled request.
		id: RequestId,
	},
	/// The request's own deadline passed before another retry could be scheduled.
	#[error("Request {id} exceeded its deadline after {attempts} attempt(s).")]
	DeadlineExceeded {
		/// Identifier of the expired request.
		id: RequestId,
		/// Attempts performed before giving up.
		attempts: u32,
		/// Error produced by the final attempt.
		#[source]
		last: Box<Error>,
	},
	/// The scheduler queue reached its configured capacity.
	#[error("Request queue is full ({capacity} entries).")]
	QueueFull {
		/// Configured queue capacity.
		capacity: usize,
	},
	/// The scheduler stopped before the request completed.
	#[error("Scheduler is no longer running.")]
	SchedulerClosed,
	/// Every permitted retry failed; wraps the final attempt's error verbatim.
	#[error("Request failed after {attempts} attempt(s) with a {kind} error.")]
	RetriesExhausted {
		/// Classification of the final error.
		kind: ErrorKind,
		/// Total attempts performed (initial attempt plus retries).
		attempts: u32,
		/// Error produced by the final attempt.
		#[source]
		last: Box<Error>,
	},
}
impl Error {
	/// Classifies the error into the crate taxonomy.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Storage(_) => ErrorKind::Storage,
			Self::Config(_) => ErrorKind::Config,
			Self::Auth(_) => ErrorKind::Auth,
			Self::RateLimit(_) => ErrorKind::RateLimit,
			Self::Transport(_) => ErrorKind::Transport,
			Self::Server { .. } => ErrorKind::Server,
			Self::Client { .. } | Self::MalformedResponse { .. } => ErrorKind::Client,
			Self::RetriesExhausted { kind, .. } => *kind,
			Self::DeadlineExceeded { last, .. } => last.kind(),
			Self::DuplicateRequest { .. }
			| Self::Cancelled { .. }
			| Self::QueueFull { .. }
			| Self::SchedulerClosed => ErrorKind::Scheduler,
		}
	}

	/// Returns `true` when the scheduler may retry the failed attempt.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::RateLimit(_) | Self::Transport(_) | Self::Server { .. })
	}

	/// Server- or limiter-supplied delay before the next attempt, when known.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::RateLimit(RateLimitError::Denied { retry_after, .. }) => Some(*retry_after),
			Self::RateLimit(RateLimitError::ServerSignaled { retry_after, .. }) => *retry_after,
			_ => None,
		}
	}
}

/// Coarse error classification recorded in the ledger and attached to exhausted retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	/// Authorization failures.
	Auth,
	/// Rate limits (local or server).
	RateLimit,
	/// Network-level failures and timeouts.
	Transport,
	/// 5xx responses.
	Server,
	/// 4xx responses and malformed payloads.
	Client,
	/// Configuration problems.
	Config,
	/// Scheduler bookkeeping (duplicates, cancellation, capacity).
	Scheduler,
	/// Persistence failures.
	Storage,
}
impl ErrorKind {
	/// Returns a stable label suitable for logs and ledger records.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Auth => "auth",
			Self::RateLimit => "rate_limit",
			Self::Transport => "transport",
			Self::Server => "server",
			Self::Client => "client",
			Self::Config => "config",
			Self::Scheduler => "scheduler",
			Self::Storage => "storage",
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Authorization failures; every variant requires the user to re-authorize.
#[derive(Debug, ThisError)]
pub enum AuthError {
	/// Callback `state` did not match the CSRF token generated for this session.
	#[error("Authorization state does not match the pending session.")]
	CsrfMismatch,
	/// Callback URL is unparsable or lacks `code`/`state`.
	#[error("Authorization callback is invalid: {reason}.")]
	InvalidCallback {
		/// Parsing failure summary.
		reason: String,
	},
	/// The user or the authorization server declined the request.
	#[error("Authorization was denied: {reason}.")]
	AuthorizationDenied {
		/// Value of the callback `error` parameter.
		reason: String,
	},
	/// A callback arrived while no authorization was pending.
	#[error("No authorization is pending for this session.")]
	NoPendingAuthorization,
	/// The token endpoint rejected the code or returned an unusable payload.
	#[error("Token exchange failed: {reason}.")]
	TokenExchangeFailed {
		/// Provider- or parser-supplied reason.
		reason: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The refresh token is dead; the user must authorize again.
	#[error("Session expired; re-authorization is required.")]
	SessionExpired,
	/// No credential has been acquired yet.
	#[error("Session is not authenticated.")]
	NotAuthenticated,
	/// A resource endpoint refused the bearer credential.
	#[error("Reddit refused the credential with status {status}.")]
	Unauthorized {
		/// HTTP status code (401 or 403).
		status: u16,
	},
}

/// Rate-limit signals; always transient.
#[derive(Debug, ThisError)]
pub enum RateLimitError {
	/// The local limiter predicted that the ceiling is exhausted.
	#[error("Local ceiling for `{pattern}` is exhausted; retry in {retry_after}.")]
	Denied {
		/// Endpoint pattern whose window is exhausted.
		pattern: String,
		/// Time until the window closes.
		retry_after: Duration,
	},
	/// The server answered 429.
	#[error("Reddit throttled `{pattern}`.")]
	ServerSignaled {
		/// Endpoint pattern of the throttled call.
		pattern: String,
		/// Retry-After hint from the server, if supplied.
		retry_after: Option<Duration>,
	},
}

/// Transport-level failures (network, IO, timeouts).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling Reddit.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling Reddit.")]
	Io(#[from] std::io::Error),
	/// The attempt exceeded its per-policy timeout.
	#[error("Request timed out after {after}.")]
	Timeout {
		/// Timeout that elapsed.
		after: Duration,
	},
	/// The token endpoint could not be reached during a refresh.
	#[error("Token endpoint is unreachable: {message}.")]
	TokenEndpoint {
		/// Summary of the failure.
		message: String,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Configuration and validation failures; fatal at startup, never per-request.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// No endpoint pattern matched and no default policy exists.
	#[error("No endpoint policy matches `{path}` and no default policy is configured.")]
	PolicyNotFound {
		/// Path that failed to resolve.
		path: String,
	},
	/// Policy table failed validation.
	#[error(transparent)]
	InvalidPolicy(#[from] crate::policy::PolicyRegistryError),
	/// OAuth settings failed validation.
	#[error(transparent)]
	InvalidOAuth(#[from] crate::auth::OAuthConfigError),
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Endpoint or redirect URL cannot be parsed.
	#[error("Configured URL is invalid.")]
	InvalidUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Credential builder validation failed.
	#[error("Unable to build credential.")]
	CredentialBuild(#[from] crate::auth::CredentialBuilderError),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

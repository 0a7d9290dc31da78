//! Token endpoint facade over the `oauth2` crate.
//!
//! Reddit authenticates the application with HTTP Basic (an empty password for installed apps)
//! and answers some failures with HTTP 200 plus an `error` body, which surfaces here as a parse
//! failure and is reported as [`AuthError::TokenExchangeFailed`].

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	HttpClientError, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError,
	TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	auth::{OAuthConfig, ScopeSet, TokenSecret},
	error::{AuthError, ConfigError, RateLimitError, TransportError},
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
};

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::hours(1);

type ConfiguredBasicClient =
	BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;
type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a crate error.
	fn map_transport_error(
		&self,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		_: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) if inner.is_builder() =>
				ConfigError::from(*inner).into(),
			HttpClientError::Reqwest(inner) => TransportError::from(*inner).into(),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => TransportError::TokenEndpoint { message }.into(),
			_ => TransportError::TokenEndpoint {
				message: "HTTP client error occurred while calling the token endpoint".into(),
			}
			.into(),
		}
	}
}

/// Tokens returned by a successful exchange or refresh.
#[derive(Clone, Debug)]
pub struct TokenGrant {
	/// New access token.
	pub access_token: TokenSecret,
	/// Rotated refresh token, when the endpoint issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Lifetime of the access token.
	pub expires_in: Duration,
	/// Granted scopes, when echoed.
	pub scope: Option<ScopeSet>,
}

/// Token endpoint operations used by the session manager.
pub trait OAuth2Facade
where
	Self: Send + Sync,
{
	/// Exchanges an authorization code (with its PKCE verifier) for tokens.
	fn exchange_code<'a>(
		&'a self,
		code: &'a str,
		pkce_verifier: &'a str,
		redirect_uri: &'a Url,
	) -> FacadeFuture<'a, TokenGrant>;

	/// Redeems a refresh token.
	fn refresh<'a>(&'a self, refresh_token: &'a str) -> FacadeFuture<'a, TokenGrant>;
}

/// [`OAuth2Facade`] backed by `oauth2`'s [`BasicClient`].
pub struct BasicFacade<C = ReqwestHttpClient, M = ReqwestTransportErrorMapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredBasicClient,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> BasicFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds the facade from validated OAuth settings.
	pub fn from_config(
		config: &OAuthConfig,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Result<Self, ConfigError> {
		let auth_url = AuthUrl::new(config.authorize_url.to_string())
			.map_err(|source| ConfigError::InvalidUrl { source })?;
		let token_url = TokenUrl::new(config.token_url.to_string())
			.map_err(|source| ConfigError::InvalidUrl { source })?;
		let redirect_url = RedirectUrl::new(config.redirect_uri.to_string())
			.map_err(|source| ConfigError::InvalidUrl { source })?;
		let oauth_client = BasicClient::new(ClientId::new(config.client_id.clone()))
			.set_client_secret(ClientSecret::new(config.client_secret.expose().to_owned()))
			.set_auth_uri(auth_url)
			.set_token_uri(token_url)
			.set_redirect_uri(redirect_url)
			.set_auth_type(AuthType::BasicAuth);

		Ok(Self { oauth_client, http_client: http_client.into(), error_mapper: error_mapper.into() })
	}
}
impl<C, M> OAuth2Facade for BasicFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn exchange_code<'a>(
		&'a self,
		code: &'a str,
		pkce_verifier: &'a str,
		redirect_uri: &'a Url,
	) -> FacadeFuture<'a, TokenGrant> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.with_metadata(meta.clone());
			let redirect_url = RedirectUrl::new(redirect_uri.to_string())
				.map_err(|source| ConfigError::InvalidUrl { source })?;
			let response = self
				.oauth_client
				.exchange_code(AuthorizationCode::new(code.to_owned()))
				.set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_owned()))
				.set_redirect_uri(Cow::Owned(redirect_url))
				.request_async(&instrumented)
				.await
				.map_err(|e| map_request_error(meta.take(), e, self.error_mapper.as_ref()))?;

			map_token_response(response)
		})
	}

	fn refresh<'a>(&'a self, refresh_token: &'a str) -> FacadeFuture<'a, TokenGrant> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.with_metadata(meta.clone());
			let secret = RefreshToken::new(refresh_token.to_owned());
			let response = self
				.oauth_client
				.exchange_refresh_token(&secret)
				.request_async(&instrumented)
				.await
				.map_err(|e| map_request_error(meta.take(), e, self.error_mapper.as_ref()))?;

			map_token_response(response)
		})
	}
}

fn map_token_response(response: BasicTokenResponse) -> Result<TokenGrant> {
	let expires_in = match response.expires_in() {
		Some(expires_in) => Duration::seconds(
			i64::try_from(expires_in.as_secs())
				.map_err(|_| exchange_failed("expires_in out of range", None))?,
		),
		None => DEFAULT_TOKEN_LIFETIME,
	};

	if !expires_in.is_positive() {
		return Err(exchange_failed("non-positive expires_in", None));
	}

	let scope = match response.scopes() {
		Some(scopes) => Some(
			ScopeSet::new(scopes.iter().map(|s| s.to_string()))
				.map_err(|e| exchange_failed(&e.to_string(), None))?,
		),
		None => None,
	};

	Ok(TokenGrant {
		access_token: TokenSecret::new(response.access_token().secret().to_owned()),
		refresh_token: response.refresh_token().map(|t| TokenSecret::new(t.secret().to_owned())),
		expires_in,
		scope,
	})
}

fn map_request_error<E, M>(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
	mapper: &M,
) -> Error
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let status = meta.as_ref().and_then(|m| m.status);
	let retry_after = meta.as_ref().and_then(|m| m.retry_after);

	if let Some(code) = status {
		if code == 429 {
			return RateLimitError::ServerSignaled { pattern: "token".into(), retry_after }.into();
		}
		if code >= 500 {
			return TransportError::TokenEndpoint {
				message: format!("token endpoint returned status {code}"),
			}
			.into();
		}
	}

	match err {
		RequestTokenError::ServerResponse(response) => map_server_response(response, status),
		RequestTokenError::Request(error) => mapper.map_transport_error(meta.as_ref(), error),
		RequestTokenError::Parse(error, _body) =>
			exchange_failed(&format!("malformed token response: {error}"), status),
		RequestTokenError::Other(message) => exchange_failed(&message, status),
	}
}

fn map_server_response(response: BasicErrorResponse, status: Option<u16>) -> Error {
	let reason = match response.error_description() {
		Some(description) => format!("{}: {description}", response.error().as_ref()),
		None => response.error().as_ref().to_owned(),
	};

	exchange_failed(&reason, status)
}

fn exchange_failed(reason: &str, status: Option<u16>) -> Error {
	AuthError::TokenExchangeFailed { reason: reason.to_owned(), status }.into()
}

//! OAuth application settings with Reddit defaults.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
};

/// Reddit authorization endpoint.
pub const REDDIT_AUTHORIZE_URL: &str = "https://www.reddit.com/api/v1/authorize";
/// Reddit token endpoint.
pub const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
/// Base URL for authenticated resource calls.
pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";

/// Lifetime requested for the grant via the `duration` parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenDuration {
	/// Issues a refresh token so the session survives access-token expiry.
	#[default]
	Permanent,
	/// Access token only; the user must re-authorize after expiry.
	Temporary,
}
impl TokenDuration {
	/// Wire value of the `duration` parameter.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Permanent => "permanent",
			Self::Temporary => "temporary",
		}
	}
}

/// Errors raised while validating [`OAuthConfig`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum OAuthConfigError {
	/// Client identifier is blank.
	#[error("Client identifier is required.")]
	MissingClientId,
	/// No redirect URI was configured.
	#[error("Redirect URI is required.")]
	MissingRedirectUri,
	/// Reddit rejects requests without an identifying user agent.
	#[error("User agent is required.")]
	MissingUserAgent,
	/// An endpoint uses plaintext HTTP outside loopback.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// A configured URL could not be parsed.
	#[error("The {endpoint} URL is invalid: {url}.")]
	InvalidUrl {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Raw URL value.
		url: String,
	},
	/// Refresh margin must not be negative.
	#[error("Refresh margin cannot be negative.")]
	NegativeRefreshMargin,
}

/// Immutable OAuth settings passed to the session manager.
#[derive(Clone)]
pub struct OAuthConfig {
	/// Registered application identifier.
	pub client_id: String,
	/// Application secret; empty for installed apps.
	pub client_secret: TokenSecret,
	/// Local callback target registered with Reddit.
	pub redirect_uri: Url,
	/// Identifying `User-Agent` header value.
	pub user_agent: String,
	/// Scopes requested during authorization.
	pub scopes: ScopeSet,
	/// Authorization endpoint.
	pub authorize_url: Url,
	/// Token endpoint.
	pub token_url: Url,
	/// Requested grant lifetime.
	pub duration: TokenDuration,
	/// Credentials closer than this to expiry are refreshed before use.
	pub refresh_margin: Duration,
}
impl OAuthConfig {
	/// Default refresh margin.
	pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::seconds(60);

	/// Returns a builder seeded with Reddit's endpoints and default scopes.
	pub fn builder(client_id: impl Into<String>) -> OAuthConfigBuilder {
		OAuthConfigBuilder::new(client_id)
	}
}
impl Debug for OAuthConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthConfig")
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret)
			.field("redirect_uri", &self.redirect_uri.as_str())
			.field("user_agent", &self.user_agent)
			.field("scopes", &self.scopes)
			.field("authorize_url", &self.authorize_url.as_str())
			.field("token_url", &self.token_url.as_str())
			.field("duration", &self.duration)
			.field("refresh_margin", &self.refresh_margin)
			.finish()
	}
}

/// Builder for [`OAuthConfig`].
#[derive(Debug)]
pub struct OAuthConfigBuilder {
	client_id: String,
	client_secret: Option<String>,
	redirect_uri: Option<String>,
	user_agent: Option<String>,
	scopes: ScopeSet,
	authorize_url: String,
	token_url: String,
	duration: TokenDuration,
	refresh_margin: Duration,
}
impl OAuthConfigBuilder {
	fn new(client_id: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: None,
			redirect_uri: None,
			user_agent: None,
			scopes: ScopeSet::reddit_default(),
			authorize_url: REDDIT_AUTHORIZE_URL.into(),
			token_url: REDDIT_TOKEN_URL.into(),
			duration: TokenDuration::default(),
			refresh_margin: OAuthConfig::DEFAULT_REFRESH_MARGIN,
		}
	}

	/// Sets the application secret.
	pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Sets the redirect URI.
	pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
		self.redirect_uri = Some(uri.into());

		self
	}

	/// Sets the `User-Agent` header value.
	pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
		self.user_agent = Some(agent.into());

		self
	}

	/// Overrides the requested scopes.
	pub fn scopes(mut self, scopes: ScopeSet) -> Self {
		self.scopes = scopes;

		self
	}

	/// Overrides the authorization endpoint.
	pub fn authorize_url(mut self, url: impl Into<String>) -> Self {
		self.authorize_url = url.into();

		self
	}

	/// Overrides the token endpoint.
	pub fn token_url(mut self, url: impl Into<String>) -> Self {
		self.token_url = url.into();

		self
	}

	/// Overrides the requested grant lifetime.
	pub fn duration(mut self, duration: TokenDuration) -> Self {
		self.duration = duration;

		self
	}

	/// Overrides the refresh margin.
	pub fn refresh_margin(mut self, margin: Duration) -> Self {
		self.refresh_margin = margin;

		self
	}

	/// Validates and builds the configuration.
	pub fn build(self) -> Result<OAuthConfig, OAuthConfigError> {
		if self.client_id.trim().is_empty() {
			return Err(OAuthConfigError::MissingClientId);
		}

		let user_agent = self
			.user_agent
			.filter(|agent| !agent.trim().is_empty())
			.ok_or(OAuthConfigError::MissingUserAgent)?;
		let redirect_raw = self.redirect_uri.ok_or(OAuthConfigError::MissingRedirectUri)?;
		let redirect_uri = parse_url("redirect", &redirect_raw)?;
		let authorize_url = parse_url("authorization", &self.authorize_url)?;
		let token_url = parse_url("token", &self.token_url)?;

		validate_endpoint("authorization", &authorize_url)?;
		validate_endpoint("token", &token_url)?;
		validate_endpoint("redirect", &redirect_uri)?;

		if self.refresh_margin.is_negative() {
			return Err(OAuthConfigError::NegativeRefreshMargin);
		}

		Ok(OAuthConfig {
			client_id: self.client_id,
			client_secret: TokenSecret::new(self.client_secret.unwrap_or_default()),
			redirect_uri,
			user_agent,
			scopes: self.scopes,
			authorize_url,
			token_url,
			duration: self.duration,
			refresh_margin: self.refresh_margin,
		})
	}
}

fn parse_url(endpoint: &'static str, raw: &str) -> Result<Url, OAuthConfigError> {
	Url::parse(raw).map_err(|_| OAuthConfigError::InvalidUrl { endpoint, url: raw.into() })
}

fn validate_endpoint(endpoint: &'static str, url: &Url) -> Result<(), OAuthConfigError> {
	let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));

	match url.scheme() {
		"https" => Ok(()),
		"http" if loopback => Ok(()),
		_ => Err(OAuthConfigError::InsecureEndpoint { endpoint, url: url.to_string() }),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn builder() -> OAuthConfigBuilder {
		OAuthConfig::builder("client-id")
			.redirect_uri("http://localhost:8080/callback")
			.user_agent("desktop:reddit-broker:0.1 (by /u/tester)")
	}

	#[test]
	fn defaults_target_reddit() {
		let config = builder().build().expect("Minimal config should build.");

		assert_eq!(config.authorize_url.as_str(), REDDIT_AUTHORIZE_URL);
		assert_eq!(config.token_url.as_str(), REDDIT_TOKEN_URL);
		assert_eq!(config.duration, TokenDuration::Permanent);
		assert_eq!(config.refresh_margin, Duration::seconds(60));
		assert_eq!(config.client_secret.expose(), "");
		assert_eq!(config.scopes, ScopeSet::reddit_default());
	}

	#[test]
	fn rejects_missing_or_insecure_settings() {
		assert_eq!(
			OAuthConfig::builder(" ").build().expect_err("Blank client id must fail."),
			OAuthConfigError::MissingClientId
		);
		assert_eq!(
			OAuthConfig::builder("id")
				.redirect_uri("http://localhost/cb")
				.build()
				.expect_err("Missing user agent must fail."),
			OAuthConfigError::MissingUserAgent
		);
		assert!(matches!(
			builder().token_url("http://example.com/token").build(),
			Err(OAuthConfigError::InsecureEndpoint { endpoint: "token", .. })
		));
		assert!(builder().token_url("http://127.0.0.1:9000/token").build().is_ok());
	}

	#[test]
	fn debug_redacts_secret() {
		let config = builder().client_secret("hunter2").build().expect("Config should build.");

		assert!(!format!("{config:?}").contains("hunter2"));
	}
}

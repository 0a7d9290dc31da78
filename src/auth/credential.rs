//! Bearer credential model and its redacted secret wrapper.

// self
use crate::{_prelude::*, auth::ScopeSet};

/// Token string that never renders in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the raw token. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("TokenSecret(<redacted>)")
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Errors produced by [`CredentialBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CredentialBuilderError {
	/// No access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// No expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// Expiry must follow the issue instant.
	#[error("Credential expires before it was issued.")]
	ExpiresBeforeIssue,
}

/// Bearer credential owned by the session manager.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	/// Access token sent as `Authorization: bearer ...`.
	pub access_token: TokenSecret,
	/// Refresh token, present for `duration=permanent` grants.
	pub refresh_token: Option<TokenSecret>,
	/// Scopes granted to this credential.
	pub scope: ScopeSet,
	/// Instant the token endpoint issued the credential.
	pub issued_at: OffsetDateTime,
	/// Instant the access token stops working.
	pub expires_at: OffsetDateTime,
}
impl Credential {
	/// Returns a builder.
	pub fn builder() -> CredentialBuilder {
		CredentialBuilder::default()
	}

	/// Returns `true` once `now` reaches the expiry instant.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		now >= self.expires_at
	}

	/// Returns `true` when fewer than `margin` remain before expiry.
	pub fn expires_within(&self, margin: Duration, now: OffsetDateTime) -> bool {
		self.expires_at - now <= margin
	}

	/// Value for the `Authorization` header.
	pub fn authorization_header(&self) -> String {
		format!("bearer {}", self.access_token.expose())
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("access_token", &self.access_token)
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("scope", &self.scope)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`Credential`] values.
#[derive(Debug, Default)]
pub struct CredentialBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	scope: ScopeSet,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl CredentialBuilder {
	/// Sets the access token.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the refresh token.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets an optional refresh token, keeping any previous one when `None`.
	pub fn maybe_refresh_token(mut self, token: Option<TokenSecret>) -> Self {
		if token.is_some() {
			self.refresh_token = token;
		}

		self
	}

	/// Sets the granted scopes.
	pub fn scope(mut self, scope: ScopeSet) -> Self {
		self.scope = scope;

		self
	}

	/// Sets the issue instant (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets the expiry relative to the issue instant.
	pub fn expires_in(mut self, ttl: Duration) -> Self {
		self.expires_in = Some(ttl);

		self
	}

	/// Validates and builds the credential.
	pub fn build(self) -> Result<Credential, CredentialBuilderError> {
		let access_token = self.access_token.ok_or(CredentialBuilderError::MissingAccessToken)?;

		if access_token.expose().is_empty() {
			return Err(CredentialBuilderError::MissingAccessToken);
		}

		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(at), _) => at,
			(None, Some(ttl)) => issued_at + ttl,
			(None, None) => return Err(CredentialBuilderError::MissingExpiry),
		};

		if expires_at <= issued_at {
			return Err(CredentialBuilderError::ExpiresBeforeIssue);
		}

		Ok(Credential {
			access_token,
			refresh_token: self.refresh_token,
			scope: self.scope,
			issued_at,
			expires_at,
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn secrets_never_render() {
		let credential = Credential::builder()
			.access_token("super-secret")
			.refresh_token("also-secret")
			.expires_in(Duration::hours(1))
			.build()
			.expect("Credential fixture should build.");
		let rendered = format!("{credential:?}");

		assert!(!rendered.contains("super-secret"));
		assert!(!rendered.contains("also-secret"));
		assert_eq!(credential.access_token.to_string(), "<redacted>");
		assert_eq!(credential.authorization_header(), "bearer super-secret");
	}

	#[test]
	fn expiry_margin_is_inclusive() {
		let issued = macros::datetime!(2025-03-01 12:00 UTC);
		let credential = Credential::builder()
			.access_token("a")
			.issued_at(issued)
			.expires_in(Duration::minutes(10))
			.build()
			.expect("Credential fixture should build.");

		assert!(!credential.expires_within(Duration::seconds(60), issued + Duration::minutes(8)));
		assert!(credential.expires_within(Duration::seconds(60), issued + Duration::minutes(9)));
		assert!(credential.is_expired_at(issued + Duration::minutes(10)));
	}

	#[test]
	fn builder_validates_required_fields() {
		assert_eq!(
			Credential::builder().expires_in(Duration::hours(1)).build(),
			Err(CredentialBuilderError::MissingAccessToken)
		);
		assert_eq!(
			Credential::builder().access_token("a").build(),
			Err(CredentialBuilderError::MissingExpiry)
		);
		assert_eq!(
			Credential::builder().access_token("a").expires_in(Duration::ZERO).build(),
			Err(CredentialBuilderError::ExpiresBeforeIssue)
		);
	}

	#[test]
	fn round_trips_through_json() {
		let credential = Credential::builder()
			.access_token("a")
			.issued_at(macros::datetime!(2025-03-01 12:00 UTC))
			.expires_in(Duration::hours(1))
			.scope(ScopeSet::reddit_default())
			.build()
			.expect("Credential fixture should build.");
		let json = serde_json::to_string(&credential).expect("Credential should serialize.");
		let decoded: Credential = serde_json::from_str(&json).expect("Credential should decode.");

		assert_eq!(decoded, credential);
	}
}

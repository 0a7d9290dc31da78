//! Authorization callback parsing and code normalization.

// self
use crate::{_prelude::*, error::AuthError};

/// What the provider reported in the redirect.
#[derive(Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
	/// Normalized authorization code.
	Code(String),
	/// The `error` parameter the provider sent instead of a code.
	Denied(String),
}

/// Parameters extracted from the redirect that completes an authorization.
#[derive(Clone, PartialEq, Eq)]
pub struct CallbackParams {
	/// Echoed CSRF state.
	pub state: String,
	/// Code or denial reason.
	pub outcome: CallbackOutcome,
}
impl CallbackParams {
	/// Parses a full callback URL or a bare query string.
	///
	/// A missing `state`, or a missing `code` without an `error`, yields
	/// [`AuthError::InvalidCallback`]. Denials parse successfully so the caller can verify
	/// `state` before acting on them.
	pub fn parse(callback: &str) -> Result<Self, AuthError> {
		let trimmed = callback.trim();
		let query = match Url::parse(trimmed) {
			Ok(url) => url.query().unwrap_or_default().to_owned(),
			Err(_) => {
				let raw = trimmed.trim_start_matches('?');

				raw.split('#').next().unwrap_or_default().to_owned()
			},
		};
		let mut code = None;
		let mut state = None;
		let mut error = None;

		for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
			match key.as_ref() {
				"code" => code = Some(value.into_owned()),
				"state" => state = Some(value.into_owned()),
				"error" => error = Some(value.into_owned()),
				_ => {},
			}
		}

		let state = state
			.filter(|s| !s.is_empty())
			.ok_or_else(|| AuthError::InvalidCallback { reason: "missing `state`".into() })?;
		let outcome = match error {
			Some(reason) => CallbackOutcome::Denied(reason),
			None => code
				.map(|c| normalize_code(&c).to_owned())
				.filter(|c| !c.is_empty())
				.map(CallbackOutcome::Code)
				.ok_or_else(|| AuthError::InvalidCallback { reason: "missing `code`".into() })?,
		};

		Ok(Self { state, outcome })
	}

	/// The authorization code, or [`AuthError::AuthorizationDenied`] for a denial.
	pub fn into_code(self) -> Result<String, AuthError> {
		match self.outcome {
			CallbackOutcome::Code(code) => Ok(code),
			CallbackOutcome::Denied(reason) => Err(AuthError::AuthorizationDenied { reason }),
		}
	}
}
impl Debug for CallbackParams {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let outcome = match &self.outcome {
			CallbackOutcome::Code(_) => "code=<redacted>".to_owned(),
			CallbackOutcome::Denied(reason) => format!("error={reason}"),
		};

		f.debug_struct("CallbackParams")
			.field("state", &self.state)
			.field("outcome", &outcome)
			.finish()
	}
}

/// Strips trailing non-alphanumeric artifacts (Reddit appends `#_`) from an authorization code.
pub fn normalize_code(code: &str) -> &str {
	code.trim().trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn trailing_artifact_is_stripped() {
		assert_eq!(normalize_code("abc123#_"), "abc123");
		assert_eq!(normalize_code("abc123"), "abc123");
		assert_eq!(normalize_code("  abc123_ "), "abc123");
	}

	#[test]
	fn parses_full_urls_and_bare_queries_identically() {
		let with_artifact =
			CallbackParams::parse("http://localhost:8080/callback?state=xyz&code=abc123#_")
				.expect("Callback URL with artifact should parse.");
		let bare = CallbackParams::parse("?code=abc123%23_&state=xyz")
			.expect("Bare query with encoded artifact should parse.");
		let clean = CallbackParams::parse("code=abc123&state=xyz")
			.expect("Bare query without artifact should parse.");

		assert_eq!(with_artifact, clean);
		assert_eq!(bare, clean);
		assert_eq!(clean.into_code().expect("Clean callback carries a code."), "abc123");
	}

	#[test]
	fn error_parameter_reports_denial_after_parsing() {
		let params = CallbackParams::parse("http://localhost/cb?state=xyz&error=access_denied")
			.expect("Denied callback should still parse.");

		assert_eq!(params.state, "xyz");

		let err = params.into_code().expect_err("Denied callback carries no code.");

		assert!(matches!(err, AuthError::AuthorizationDenied { ref reason } if reason == "access_denied"));
	}

	#[test]
	fn missing_parameters_are_invalid() {
		assert!(matches!(
			CallbackParams::parse("http://localhost/cb?code=abc"),
			Err(AuthError::InvalidCallback { .. })
		));
		assert!(matches!(
			CallbackParams::parse("http://localhost/cb?state=xyz"),
			Err(AuthError::InvalidCallback { .. })
		));
		assert!(matches!(
			CallbackParams::parse("http://localhost/cb?error=access_denied"),
			Err(AuthError::InvalidCallback { .. })
		));
	}
}

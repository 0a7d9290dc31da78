// crates.io
use httpmock::prelude::*;
// self
use reddit_broker::{
	_preludet::*,
	auth::{AuthSession, Credential, OAuthConfig, SessionState, TokenSecret},
	error::AuthError,
	http::ReqwestHttpClient,
};

const USER_AGENT: &str = "linux:reddit-broker-token-it:v0.1";

/// Plain-http URL on the mock server; the TLS listener's certificate is not trusted by rustls.
fn mock_url(server: &MockServer, path: &str) -> String {
	format!("http://{}{path}", server.address())
}

fn session(server: &MockServer) -> AuthSession {
	let config = OAuthConfig::builder("client-it")
		.client_secret("secret-it")
		.redirect_uri("http://localhost:8080/callback")
		.user_agent(USER_AGENT)
		.authorize_url(mock_url(server, "/api/v1/authorize"))
		.token_url(mock_url(server, "/api/v1/access_token"))
		.build()
		.expect("OAuth configuration against the mock server should build.");
	let http = ReqwestHttpClient::new(USER_AGENT).expect("HTTP client should build.");

	AuthSession::new(config, http).expect("Session should build from a valid configuration.")
}

fn nearly_expired() -> Credential {
	let now = OffsetDateTime::now_utc();

	Credential::builder()
		.access_token("access-stale")
		.refresh_token("refresh-0")
		.issued_at(now - Duration::hours(1))
		.expires_at(now + Duration::seconds(10))
		.build()
		.expect("Nearly expired credential fixture should build.")
}

#[tokio::test]
async fn refresh_keeps_the_refresh_token_when_none_is_rotated() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/api/v1/access_token")
				.header("content-type", "application/x-www-form-urlencoded")
				.header_exists("authorization")
				.header("user-agent", USER_AGENT);
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"access-rotated\",\"token_type\":\"bearer\",\"expires_in\":3600}",
			);
		})
		.await;
	let session = session(&server);

	session.restore(nearly_expired());

	let credential =
		session.get_valid_credential().await.expect("Refresh against the mock should succeed.");

	assert_eq!(credential.access_token.expose(), "access-rotated");
	assert_eq!(credential.refresh_token.as_ref().map(TokenSecret::expose), Some("refresh-0"));
	assert_eq!(session.state(), SessionState::Authenticated);

	let again = session.get_valid_credential().await.expect("Fresh credential should be reused.");

	assert_eq!(again.access_token.expose(), "access-rotated");

	mock.assert_async().await;
}

#[tokio::test]
async fn rejected_code_returns_the_session_to_unauthenticated() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/v1/access_token");
			then.status(400)
				.header("content-type", "application/json")
				.body("{\"error\":\"invalid_grant\"}");
		})
		.await;
	let session = session(&server);
	let request = session.begin_authorization();
	let err = session
		.complete_authorization(&format!(
			"http://localhost:8080/callback?state={}&code=expired-code",
			request.state
		))
		.await
		.expect_err("A rejected code must fail the handshake.");

	match err {
		Error::Auth(AuthError::TokenExchangeFailed { reason, status }) => {
			assert!(reason.contains("invalid_grant"));
			assert_eq!(status, Some(400));
		},
		other => panic!("Unexpected error: {other:?}"),
	}

	assert_eq!(session.state(), SessionState::Unauthenticated);

	mock.assert_async().await;
}

#[tokio::test]
async fn throttled_refresh_keeps_the_still_valid_credential() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/v1/access_token");
			then.status(429).header("retry-after", "7").body("Too Many Requests");
		})
		.await;
	let session = session(&server);

	session.restore(nearly_expired());

	let credential = session
		.get_valid_credential()
		.await
		.expect("The current credential is still valid while the endpoint throttles.");

	assert_eq!(credential.access_token.expose(), "access-stale");
	assert_eq!(session.state(), SessionState::Authenticated);

	mock.assert_async().await;
}

#[tokio::test]
async fn throttled_refresh_of_an_expired_credential_is_transient() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/v1/access_token");
			then.status(429).header("retry-after", "7").body("Too Many Requests");
		})
		.await;
	let session = session(&server);
	let now = OffsetDateTime::now_utc();
	let expired = Credential::builder()
		.access_token("access-expired")
		.refresh_token("refresh-0")
		.issued_at(now - Duration::hours(2))
		.expires_at(now - Duration::hours(1))
		.build()
		.expect("Expired credential fixture should build.");

	session.restore(expired);

	let err = session.get_valid_credential().await.expect_err("No usable credential remains.");

	assert!(err.is_transient(), "Throttling must stay retryable, got {err:?}.");
	assert_ne!(session.state(), SessionState::Expired);
}

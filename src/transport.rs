//! Resource-endpoint transport: one authenticated HTTP exchange per call.
//!
//! A [`Transport`] returns `Ok` for every HTTP response it receives, whatever the status, and
//! `Err` only when the exchange itself failed. [`classify`] turns a response into the crate
//! taxonomy afterwards, so the scheduler can decide between retrying and failing.

// crates.io
use reqwest::{Method as HttpMethod, header::AUTHORIZATION};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{Credential, REDDIT_API_BASE},
	error::{AuthError, ConfigError, RateLimitError, TransportError},
	http::{self, ReqwestHttpClient},
};

/// Maximum number of body characters kept in error values.
pub const ERROR_BODY_LIMIT: usize = 512;

/// Future returned by [`Transport::execute`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<ApiResponse>> + 'a + Send>>;

/// HTTP verb of a resource call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	/// `GET`
	#[default]
	Get,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
}
impl Method {
	/// Upper-case wire name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Get => "GET",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Patch => "PATCH",
			Self::Delete => "DELETE",
		}
	}

	fn to_http(self) -> HttpMethod {
		match self {
			Self::Get => HttpMethod::GET,
			Self::Post => HttpMethod::POST,
			Self::Put => HttpMethod::PUT,
			Self::Patch => HttpMethod::PATCH,
			Self::Delete => HttpMethod::DELETE,
		}
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for Method {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"GET" => Ok(Self::Get),
			"POST" => Ok(Self::Post),
			"PUT" => Ok(Self::Put),
			"PATCH" => Ok(Self::Patch),
			"DELETE" => Ok(Self::Delete),
			other => Err(format!("unsupported method `{other}`")),
		}
	}
}

/// One outbound call as the transport sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
	/// HTTP verb.
	pub method: Method,
	/// Path relative to the API base, e.g. `/r/rust/new`.
	pub path: String,
	/// Extra headers sent alongside the bearer credential.
	#[serde(default)]
	pub headers: Vec<(String, String)>,
	/// Parameters; sent as the query for `GET`/`DELETE` and as a form body otherwise.
	#[serde(default)]
	pub payload: Option<serde_json::Value>,
}
impl ApiRequest {
	/// Builds a request without headers or payload.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self { method, path: path.into(), headers: Vec::new(), payload: None }
	}

	/// Flattens a JSON object payload into string pairs.
	///
	/// Scalars render without quotes; nested values render as compact JSON.
	pub fn params(&self) -> Vec<(String, String)> {
		let Some(serde_json::Value::Object(map)) = &self.payload else {
			return Vec::new();
		};

		map.iter()
			.filter(|(_, v)| !v.is_null())
			.map(|(k, v)| {
				let value = match v {
					serde_json::Value::String(s) => s.clone(),
					other => other.to_string(),
				};

				(k.clone(), value)
			})
			.collect()
	}
}

/// Raw outcome of one HTTP exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Response body as text.
	pub body: String,
	/// Wall time spent on the exchange.
	pub latency: Duration,
	/// Parsed `Retry-After` hint.
	pub retry_after: Option<Duration>,
}
impl ApiResponse {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Decodes the body, reporting the failing JSON path on error.
	pub fn json<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let mut de = serde_json::Deserializer::from_str(&self.body);

		serde_path_to_error::deserialize(&mut de)
			.map_err(|e| Error::MalformedResponse { reason: format!("{} at `{}`", e.inner(), e.path()) })
	}
}

/// Performs authenticated resource calls.
pub trait Transport
where
	Self: Send + Sync,
{
	/// Sends `request` with `credential` as the bearer token.
	fn execute<'a>(
		&'a self,
		request: &'a ApiRequest,
		credential: &'a Credential,
	) -> TransportFuture<'a>;
}

/// [`Transport`] backed by the shared reqwest client.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
	http: ReqwestHttpClient,
	base: Url,
}
impl ReqwestTransport {
	/// Targets `https://oauth.reddit.com`.
	pub fn new(http: ReqwestHttpClient) -> Result<Self, ConfigError> {
		let base = Url::parse(REDDIT_API_BASE).map_err(|source| ConfigError::InvalidUrl { source })?;

		Ok(Self { http, base })
	}

	/// Targets a custom base URL, e.g. a mock server.
	pub fn with_base(http: ReqwestHttpClient, base: Url) -> Self {
		Self { http, base }
	}

	fn url_for(&self, path: &str) -> Result<Url> {
		self.base
			.join(path)
			.map_err(|source| ConfigError::InvalidUrl { source }.into())
	}
}
impl Transport for ReqwestTransport {
	fn execute<'a>(
		&'a self,
		request: &'a ApiRequest,
		credential: &'a Credential,
	) -> TransportFuture<'a> {
		Box::pin(async move {
			let url = self.url_for(&request.path)?;
			let params = request.params();
			let mut builder = self
				.http
				.request(request.method.to_http(), url)
				.header(AUTHORIZATION, credential.authorization_header());

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}

			builder = match request.method {
				Method::Get | Method::Delete if !params.is_empty() => builder.query(&params),
				Method::Post | Method::Put | Method::Patch if !params.is_empty() =>
					builder.form(&params),
				_ => builder,
			};

			let started = tokio::time::Instant::now();
			let response = builder.send().await.map_err(TransportError::from)?;
			let status = response.status().as_u16();
			let retry_after = http::parse_retry_after(response.headers(), OffsetDateTime::now_utc());
			let body = response.text().await.map_err(TransportError::from)?;
			let latency = Duration::try_from(started.elapsed()).unwrap_or(Duration::MAX);

			Ok(ApiResponse { status, body, latency, retry_after })
		})
	}
}

/// Maps a response onto the error taxonomy; 2xx passes through.
pub fn classify(pattern: &str, response: ApiResponse) -> Result<ApiResponse> {
	match response.status {
		200..=299 => Ok(response),
		429 => Err(RateLimitError::ServerSignaled {
			pattern: pattern.to_owned(),
			retry_after: response.retry_after,
		}
		.into()),
		401 | 403 => Err(AuthError::Unauthorized { status: response.status }.into()),
		status @ 500..=599 => Err(Error::Server { status, body: truncate(&response.body) }),
		status => Err(Error::Client { status, body: truncate(&response.body) }),
	}
}

fn truncate(body: &str) -> String {
	body.chars().take(ERROR_BODY_LIMIT).collect()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::ErrorKind;

	fn response(status: u16, body: &str) -> ApiResponse {
		ApiResponse {
			status,
			body: body.to_owned(),
			latency: Duration::milliseconds(20),
			retry_after: None,
		}
	}

	#[test]
	fn classification_follows_status_families() {
		assert!(classify("**", response(200, "{}")).is_ok());

		let throttled = classify(
			"**",
			ApiResponse { retry_after: Some(Duration::seconds(30)), ..response(429, "") },
		)
		.expect_err("429 should be an error.");

		assert_eq!(throttled.retry_after(), Some(Duration::seconds(30)));
		assert!(throttled.is_transient());

		let server = classify("**", response(502, "bad gateway")).expect_err("5xx should fail.");

		assert_eq!(server.kind(), ErrorKind::Server);
		assert!(server.is_transient());

		let missing = classify("**", response(404, "")).expect_err("404 should fail.");

		assert_eq!(missing.kind(), ErrorKind::Client);
		assert!(!missing.is_transient());

		let refused = classify("**", response(401, "")).expect_err("401 should fail.");

		assert_eq!(refused.kind(), ErrorKind::Auth);
	}

	#[test]
	fn error_bodies_are_truncated() {
		let body = "x".repeat(ERROR_BODY_LIMIT * 2);
		let Err(Error::Client { body, .. }) = classify("**", response(400, &body)) else {
			panic!("400 should map to a client error.");
		};

		assert_eq!(body.len(), ERROR_BODY_LIMIT);
	}

	#[test]
	fn payload_flattens_into_params() {
		let request = ApiRequest {
			payload: Some(serde_json::json!({ "limit": 25, "sr": "rust", "after": null })),
			..ApiRequest::new(Method::Get, "/r/rust/new")
		};
		let mut params = request.params();

		params.sort();

		assert_eq!(params, vec![("limit".into(), "25".into()), ("sr".into(), "rust".into())]);
	}

	#[test]
	fn malformed_json_reports_path() {
		#[derive(Debug, Deserialize)]
		struct Listing {
			#[allow(dead_code)]
			data: Vec<u32>,
		}

		let err = response(200, r#"{"data":[1,"two"]}"#)
			.json::<Listing>()
			.expect_err("Mixed array should not decode.");

		assert!(err.to_string().contains("data[1]"));
	}

	#[test]
	fn methods_parse_case_insensitively() {
		assert_eq!("post".parse::<Method>(), Ok(Method::Post));
		assert!("TRACE".parse::<Method>().is_err());
	}
}

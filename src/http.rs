//! HTTP plumbing shared by the token endpoint facade and the resource transport.
//!
//! [`TokenHttpClient`] hands `oauth2` an [`AsyncHttpClient`] handle that records the response
//! status and `Retry-After` hint into a [`ResponseMetadataSlot`], so token-endpoint failures can
//! be classified as throttling, server trouble, or a dead grant.

// std
use std::ops::Deref;
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
use reqwest::{
	header::{HeaderMap, RETRY_AFTER},
	redirect::Policy,
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::ConfigError};

/// HTTP transport able to run token exchanges while publishing response metadata.
pub trait TokenHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// [`AsyncHttpClient`] handle tied to a [`ResponseMetadataSlot`].
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Builds a handle that records outcomes in `slot`.
	///
	/// Implementations clear the slot before sending and store the status and retry hint as soon
	/// as response headers arrive.
	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle;
}

/// Metadata captured from the most recent token endpoint response.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code, if a response arrived.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Thread-safe slot sharing [`ResponseMetadata`] between transport and error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Shared reqwest client configured for Reddit: identifying user agent, no redirects.
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient(pub ReqwestClient);
impl ReqwestHttpClient {
	/// Builds a client sending `user_agent` on every request.
	///
	/// Redirects are disabled; token endpoints must answer directly.
	pub fn new(user_agent: &str) -> Result<Self, ConfigError> {
		let client =
			ReqwestClient::builder().user_agent(user_agent).redirect(Policy::none()).build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest client.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl TokenHttpClient for ReqwestHttpClient {
	type Handle = InstrumentedHandle;
	type TransportError = ReqwestError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		InstrumentedHandle(Arc::new(InstrumentedHttpClient { client: self.0.clone(), slot }))
	}
}

struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}

/// [`AsyncHttpClient`] handle returned by [`ReqwestHttpClient`].
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let inner = Arc::clone(&self.0);

		Box::pin(async move {
			inner.slot.take();

			let response = inner
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let retry_after = parse_retry_after(&headers, OffsetDateTime::now_utc());

			inner.slot.store(ResponseMetadata { status: Some(status.as_u16()), retry_after });

			let mut converted = HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*converted.status_mut() = status;
			*converted.headers_mut() = headers;

			Ok(converted)
		})
	}
}

/// Reads `Retry-After` as delta-seconds or an RFC 2822 date relative to `now`.
pub fn parse_retry_after(headers: &HeaderMap, now: OffsetDateTime) -> Option<Duration> {
	let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)));
	}
	if let Ok(secs) = raw.parse::<f64>()
		&& secs.is_finite()
		&& secs >= 0.
	{
		return Some(Duration::milliseconds((secs * 1_000.) as i64));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - now;

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// crates.io
	use reqwest::header::HeaderValue;
	use time::macros;
	// self
	use super::*;

	fn headers(value: &'static str) -> HeaderMap {
		let mut map = HeaderMap::new();

		map.insert(RETRY_AFTER, HeaderValue::from_static(value));

		map
	}

	#[test]
	fn retry_after_accepts_seconds_and_dates() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);

		assert_eq!(parse_retry_after(&headers("30"), now), Some(Duration::seconds(30)));
		assert_eq!(parse_retry_after(&headers("1.5"), now), Some(Duration::milliseconds(1500)));
		assert_eq!(
			parse_retry_after(&headers("Wed, 01 Jan 2025 00:00:45 +0000"), now),
			Some(Duration::seconds(45))
		);
		assert_eq!(parse_retry_after(&headers("Tue, 31 Dec 2024 23:59:00 +0000"), now), None);
		assert_eq!(parse_retry_after(&HeaderMap::new(), now), None);
	}

	#[test]
	fn metadata_slot_is_single_use() {
		let slot = ResponseMetadataSlot::default();

		slot.store(ResponseMetadata { status: Some(429), retry_after: None });

		assert_eq!(slot.take().and_then(|m| m.status), Some(429));
		assert!(slot.take().is_none());
	}
}

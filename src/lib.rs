//! Rate-governed request admission for the Reddit API: OAuth sessions, per-endpoint token
//! buckets, priority scheduling with backoff, and a usage ledger that raises alerts before the
//! ceiling is hit.
//!
//! The crate is organized leaves-first:
//!
//! - [`policy`] resolves an API path to its [`EndpointPolicy`](policy::EndpointPolicy).
//! - [`limiter`] owns the rolling rate-limit windows and answers "may this call run now".
//! - [`auth`] drives the authorization-code handshake and keeps a valid bearer credential.
//! - [`scheduler`] orders submissions by priority, consults the limiter, retries transient
//!   failures, and reports the outcome through a [`RequestHandle`](scheduler::RequestHandle).
//! - [`ledger`] records every attempt and maintains threshold alerts.
//! - [`client`] wires the pieces together behind the surface the UI and poller use.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod client;
pub mod clock;
pub mod error;
pub mod http;
pub mod ledger;
pub mod limiter;
pub mod oauth;
pub mod obs;
pub mod policy;
pub mod scheduler;
pub mod store;
pub mod transport;
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and fixtures shared by integration tests and demos.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::Credential,
		policy::{EndpointPolicy, PolicyRegistry},
	};

	/// Builds a registry with a single default policy allowing `per_minute` calls.
	pub fn single_policy_registry(per_minute: u32, max_retries: u32) -> PolicyRegistry {
		PolicyRegistry::builder()
			.default_policy(
				EndpointPolicy::new("**", per_minute)
					.with_max_retries(max_retries)
					.with_timeout(Duration::seconds(5)),
			)
			.build()
			.expect("Failed to build single-policy registry fixture.")
	}

	/// Issues a long-lived credential fixture.
	pub fn fixture_credential(access: &str) -> Credential {
		Credential::builder()
			.access_token(access)
			.refresh_token(format!("{access}-refresh"))
			.expires_in(Duration::hours(1))
			.build()
			.expect("Failed to build credential fixture.")
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, HashSet, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};

//! Endpoint policy registry mapping API paths to rate ceilings, timeouts, and retry budgets.
//!
//! The registry is immutable once built. Reloading swaps the whole table through a
//! [`PolicyHandle`], so a resolve never observes a half-updated configuration.

pub mod builder;
pub mod pattern;

pub use builder::*;
pub use pattern::*;

// self
use crate::{_prelude::*, error::ConfigError};

/// Length of the primary (per-minute) window.
pub const MINUTE_WINDOW: Duration = Duration::minutes(1);
/// Length of the optional per-hour window.
pub const HOUR_WINDOW: Duration = Duration::hours(1);

/// Pattern recorded on windows of the registry-wide ceiling; never a valid endpoint pattern.
pub const GLOBAL_PATTERN: &str = "<global>";
/// Reddit's per-client ceiling across every endpoint.
pub const REDDIT_GLOBAL_PER_MINUTE: u32 = 100;

const DEFAULT_TIMEOUT: Duration = Duration::seconds(30);
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Rate ceiling, timeout, and retry budget for one endpoint pattern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPolicy {
	/// Pattern this policy applies to (see [`EndpointPattern`]).
	pub pattern: String,
	/// Ceiling for the one-minute window.
	pub requests_per_minute: u32,
	/// Optional ceiling for the one-hour window.
	#[serde(default)]
	pub requests_per_hour: Option<u32>,
	/// Per-attempt transport timeout.
	#[serde(rename = "timeout_ms", with = "millis", default = "default_timeout")]
	pub timeout: Duration,
	/// Retries permitted after the initial attempt.
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	/// Informational weight recorded alongside ledger entries.
	#[serde(default = "default_priority_weight")]
	pub priority_weight: u32,
}
impl EndpointPolicy {
	/// Creates a policy with the default timeout (30 s) and retry budget (3).
	pub fn new(pattern: impl Into<String>, requests_per_minute: u32) -> Self {
		Self {
			pattern: pattern.into(),
			requests_per_minute,
			requests_per_hour: None,
			timeout: DEFAULT_TIMEOUT,
			max_retries: DEFAULT_MAX_RETRIES,
			priority_weight: default_priority_weight(),
		}
	}

	/// Creates the registry-wide ceiling charged alongside every endpoint policy.
	pub fn global(requests_per_minute: u32) -> Self {
		Self::new(GLOBAL_PATTERN, requests_per_minute)
	}

	/// Adds a per-hour ceiling.
	pub fn with_hourly_limit(mut self, requests_per_hour: u32) -> Self {
		self.requests_per_hour = Some(requests_per_hour);

		self
	}

	/// Overrides the per-attempt timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Overrides the retry budget.
	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;

		self
	}

	/// Overrides the informational priority weight.
	pub fn with_priority_weight(mut self, weight: u32) -> Self {
		self.priority_weight = weight;

		self
	}

	/// Window lengths and ceilings enforced for this policy, primary window first.
	pub fn windows(&self) -> Vec<(Duration, u32)> {
		let mut windows = vec![(MINUTE_WINDOW, self.requests_per_minute)];

		if let Some(hourly) = self.requests_per_hour {
			windows.push((HOUR_WINDOW, hourly));
		}

		windows
	}
}

#[derive(Clone, Debug)]
pub(crate) struct CompiledPolicy {
	pattern: EndpointPattern,
	policy: EndpointPolicy,
}

/// Serializable form of a registry, used for JSON reloads and persistence.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTable {
	/// Fallback policy.
	#[serde(default)]
	pub default: Option<EndpointPolicy>,
	/// Pattern-specific policies.
	#[serde(default)]
	pub endpoints: Vec<EndpointPolicy>,
	/// Ceiling shared by every endpoint; its `pattern` is ignored.
	#[serde(default)]
	pub global: Option<EndpointPolicy>,
}

/// Immutable lookup table resolving paths to the most specific [`EndpointPolicy`].
#[derive(Clone, Debug)]
pub struct PolicyRegistry {
	compiled: Vec<CompiledPolicy>,
	default: Option<EndpointPolicy>,
	global: Option<EndpointPolicy>,
}
impl PolicyRegistry {
	/// Returns a builder for assembling a registry.
	pub fn builder() -> PolicyRegistryBuilder {
		PolicyRegistryBuilder::default()
	}

	/// Reddit's published limits: `/api/v1/me` at 60/min, subreddit listings and the default at
	/// 100/min, all sharing one 100/min client ceiling.
	pub fn reddit() -> Result<Self, PolicyRegistryError> {
		Self::builder()
			.policy(EndpointPolicy::new("/api/v1/me", 60))
			.policy(EndpointPolicy::new("/r/*/**", 100))
			.default_policy(EndpointPolicy::new("**", 100))
			.global_limit(REDDIT_GLOBAL_PER_MINUTE)
			.build()
	}

	/// Builds a registry from its serializable table.
	pub fn from_table(table: PolicyTable) -> Result<Self, PolicyRegistryError> {
		let mut builder = Self::builder().policies(table.endpoints);

		if let Some(default) = table.default {
			builder = builder.default_policy(default);
		}
		if let Some(global) = table.global {
			builder = builder.global_policy(global);
		}

		builder.build()
	}

	/// Parses a JSON policy table, reporting the path of the first invalid field.
	pub fn from_json(raw: &str) -> Result<Self, PolicyRegistryError> {
		let mut de = serde_json::Deserializer::from_str(raw);
		let table: PolicyTable = serde_path_to_error::deserialize(&mut de).map_err(|e| {
			PolicyRegistryError::Parse { path: e.path().to_string(), message: e.inner().to_string() }
		})?;

		Self::from_table(table)
	}

	/// Returns the serializable table for this registry.
	pub fn to_table(&self) -> PolicyTable {
		PolicyTable {
			default: self.default.clone(),
			endpoints: self.compiled.iter().map(|c| c.policy.clone()).collect(),
			global: self.global.clone(),
		}
	}

	/// Resolves the most specific policy for `path`, falling back to the default.
	pub fn resolve(&self, path: &str) -> Result<&EndpointPolicy, ConfigError> {
		let normalized = normalize_path(path);

		self.compiled
			.iter()
			.find(|c| c.pattern.matches(&normalized))
			.map(|c| &c.policy)
			.or(self.default.as_ref())
			.ok_or(ConfigError::PolicyNotFound { path: normalized })
	}

	/// Registry-wide ceiling charged alongside whichever policy [`Self::resolve`] returns.
	pub fn global(&self) -> Option<&EndpointPolicy> {
		self.global.as_ref()
	}

	/// Fails unless a fallback policy is configured; run once at startup.
	pub fn ensure_default(&self) -> Result<(), ConfigError> {
		match self.default {
			Some(_) => Ok(()),
			None => Err(ConfigError::PolicyNotFound { path: "**".into() }),
		}
	}

	/// Iterates every configured policy, then the default, then the global ceiling.
	pub fn iter(&self) -> impl Iterator<Item = &EndpointPolicy> {
		self.compiled.iter().map(|c| &c.policy).chain(self.default.iter()).chain(self.global.iter())
	}
}

/// Shared, atomically reloadable reference to the active [`PolicyRegistry`].
#[derive(Clone, Debug)]
pub struct PolicyHandle(Arc<RwLock<Arc<PolicyRegistry>>>);
impl PolicyHandle {
	/// Wraps a registry.
	pub fn new(registry: PolicyRegistry) -> Self {
		Self(Arc::new(RwLock::new(Arc::new(registry))))
	}

	/// Returns the registry active right now.
	pub fn current(&self) -> Arc<PolicyRegistry> {
		self.0.read().clone()
	}

	/// Replaces the active registry; in-flight resolves keep the previous one.
	pub fn reload(&self, registry: PolicyRegistry) -> Result<(), ConfigError> {
		registry.ensure_default()?;

		*self.0.write() = Arc::new(registry);

		Ok(())
	}
}

fn default_timeout() -> Duration {
	DEFAULT_TIMEOUT
}

fn default_max_retries() -> u32 {
	DEFAULT_MAX_RETRIES
}

fn default_priority_weight() -> u32 {
	1
}

mod millis {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(i64::try_from(value.whole_milliseconds()).unwrap_or(i64::MAX))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(Duration::milliseconds(i64::deserialize(deserializer)?))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::single_policy_registry;

	#[test]
	fn resolves_most_specific_pattern() {
		let registry = PolicyRegistry::reddit().expect("Reddit defaults should build.");

		assert_eq!(
			registry.resolve("/api/v1/me").expect("Identity path should resolve.").pattern,
			"/api/v1/me"
		);
		assert_eq!(
			registry.resolve("/r/rust/new?limit=5").expect("Listing should resolve.").pattern,
			"/r/*/**"
		);
		assert_eq!(
			registry.resolve("/user/someone/about").expect("Default should apply.").pattern,
			"**"
		);
	}

	#[test]
	fn reddit_defaults_share_one_client_ceiling() {
		let registry = PolicyRegistry::reddit().expect("Reddit defaults should build.");
		let global = registry.global().expect("Reddit defaults carry a global ceiling.");

		assert_eq!(global.pattern, GLOBAL_PATTERN);
		assert_eq!(global.requests_per_minute, REDDIT_GLOBAL_PER_MINUTE);
		assert_eq!(registry.iter().last(), Some(global));
		assert!(single_policy_registry(10, 0).global().is_none());
	}

	#[test]
	fn missing_default_is_a_config_error() {
		let registry = PolicyRegistry::builder()
			.policy(EndpointPolicy::new("/api/v1/me", 60))
			.build()
			.expect("Registry without default should still build.");
		let err = registry.resolve("/r/rust").expect_err("Unmatched path must fail.");

		assert!(matches!(err, ConfigError::PolicyNotFound { ref path } if path == "/r/rust"));
		assert!(registry.ensure_default().is_err());
	}

	#[test]
	fn builder_rejects_invalid_policies() {
		let zero = PolicyRegistry::builder().policy(EndpointPolicy::new("/a", 0)).build();
		let duplicate = PolicyRegistry::builder()
			.policy(EndpointPolicy::new("/a", 1))
			.policy(EndpointPolicy::new("/a", 2))
			.build();
		let timeout = PolicyRegistry::builder()
			.default_policy(EndpointPolicy::new("**", 1).with_timeout(Duration::ZERO))
			.build();

		assert!(matches!(zero, Err(PolicyRegistryError::ZeroCeiling { .. })));
		assert!(matches!(duplicate, Err(PolicyRegistryError::DuplicatePattern { .. })));
		assert!(matches!(timeout, Err(PolicyRegistryError::NonPositiveTimeout { .. })));
	}

	#[test]
	fn json_tables_fill_defaults_and_report_paths() {
		let registry = PolicyRegistry::from_json(
			r#"{
				"default": { "pattern": "**", "requests_per_minute": 100 },
				"global": { "pattern": "ignored", "requests_per_minute": 90 },
				"endpoints": [
					{ "pattern": "/api/v1/me", "requests_per_minute": 60, "requests_per_hour": 600, "timeout_ms": 5000 }
				]
			}"#,
		)
		.expect("Policy table should parse.");
		let me = registry.resolve("/api/v1/me").expect("Identity path should resolve.");

		assert_eq!(me.timeout, Duration::seconds(5));
		assert_eq!(me.max_retries, 3);
		assert_eq!(me.windows(), vec![(MINUTE_WINDOW, 60), (HOUR_WINDOW, 600)]);
		assert_eq!(registry.global().map(|g| g.pattern.as_str()), Some(GLOBAL_PATTERN));
		assert_eq!(registry.to_table().global.map(|g| g.requests_per_minute), Some(90));

		let err = PolicyRegistry::from_json(r#"{ "endpoints": [ { "pattern": "/a" } ] }"#)
			.expect_err("Missing ceiling must fail.");

		assert!(
			matches!(err, PolicyRegistryError::Parse { ref path, .. } if path.starts_with("endpoints"))
		);
	}

	#[test]
	fn reload_swaps_registry_atomically() {
		let handle = PolicyHandle::new(PolicyRegistry::reddit().expect("Defaults should build."));
		let before = handle.current();
		let replacement = PolicyRegistry::builder()
			.default_policy(EndpointPolicy::new("**", 10))
			.build()
			.expect("Replacement should build.");

		handle.reload(replacement).expect("Replacement has a default.");

		assert_eq!(before.resolve("/x").expect("Old table is intact.").requests_per_minute, 100);
		assert_eq!(handle.current().resolve("/x").expect("New table resolves.").requests_per_minute, 10);
	}
}

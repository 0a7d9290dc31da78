//! Validating builder for [`PolicyRegistry`](crate::policy::PolicyRegistry).

// self
use crate::{
	_prelude::*,
	policy::{
		CompiledPolicy, EndpointPattern, EndpointPolicy, GLOBAL_PATTERN, PatternError, PolicyRegistry,
	},
};

/// Errors raised while constructing or validating a [`PolicyRegistry`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum PolicyRegistryError {
	/// Pattern syntax is invalid.
	#[error(transparent)]
	InvalidPattern(#[from] PatternError),
	/// The same pattern was configured twice.
	#[error("Endpoint pattern `{pattern}` is configured more than once.")]
	DuplicatePattern {
		/// Duplicated pattern.
		pattern: String,
	},
	/// A ceiling of zero would never admit anything.
	#[error("Endpoint pattern `{pattern}` must allow at least one request per window.")]
	ZeroCeiling {
		/// Offending pattern.
		pattern: String,
	},
	/// Per-attempt timeouts must be positive.
	#[error("Endpoint pattern `{pattern}` must use a positive timeout.")]
	NonPositiveTimeout {
		/// Offending pattern.
		pattern: String,
	},
	/// JSON policy table could not be decoded.
	#[error("Policy table is malformed at `{path}`: {message}.")]
	Parse {
		/// JSON path of the failing field.
		path: String,
		/// Decoder message.
		message: String,
	},
}

/// Builder for [`PolicyRegistry`] values.
#[derive(Debug, Default)]
pub struct PolicyRegistryBuilder {
	/// Pattern-specific policies in insertion order.
	pub policies: Vec<EndpointPolicy>,
	/// Fallback policy used when nothing else matches.
	pub default: Option<EndpointPolicy>,
	/// Ceiling charged for every call regardless of endpoint.
	pub global: Option<EndpointPolicy>,
}
impl PolicyRegistryBuilder {
	/// Adds a pattern-specific policy.
	pub fn policy(mut self, policy: EndpointPolicy) -> Self {
		self.policies.push(policy);

		self
	}

	/// Adds several pattern-specific policies.
	pub fn policies<I>(mut self, policies: I) -> Self
	where
		I: IntoIterator<Item = EndpointPolicy>,
	{
		self.policies.extend(policies);

		self
	}

	/// Sets the fallback policy.
	pub fn default_policy(mut self, policy: EndpointPolicy) -> Self {
		self.default = Some(policy);

		self
	}

	/// Caps total traffic at `requests_per_minute` across every endpoint.
	pub fn global_limit(self, requests_per_minute: u32) -> Self {
		self.global_policy(EndpointPolicy::global(requests_per_minute))
	}

	/// Sets the registry-wide ceiling; its pattern is replaced by [`GLOBAL_PATTERN`].
	pub fn global_policy(mut self, mut policy: EndpointPolicy) -> Self {
		GLOBAL_PATTERN.clone_into(&mut policy.pattern);

		self.global = Some(policy);

		self
	}

	/// Consumes the builder and validates the resulting registry.
	pub fn build(self) -> Result<PolicyRegistry, PolicyRegistryError> {
		let mut seen = HashSet::new();
		let mut compiled = Vec::with_capacity(self.policies.len());

		for policy in self.policies {
			validate_policy(&policy)?;

			let pattern = EndpointPattern::parse(&policy.pattern)?;

			if !seen.insert(pattern.as_str().to_owned()) {
				return Err(PolicyRegistryError::DuplicatePattern { pattern: policy.pattern });
			}

			compiled.push(CompiledPolicy { pattern, policy });
		}

		// Stable sort keeps insertion order among equally specific patterns.
		compiled.sort_by(|a, b| a.pattern.cmp_specificity(&b.pattern));

		if let Some(default) = self.default.as_ref() {
			validate_policy(default)?;
		}
		if let Some(global) = self.global.as_ref() {
			validate_policy(global)?;
		}

		Ok(PolicyRegistry { compiled, default: self.default, global: self.global })
	}
}

fn validate_policy(policy: &EndpointPolicy) -> Result<(), PolicyRegistryError> {
	if policy.requests_per_minute == 0 || policy.requests_per_hour == Some(0) {
		return Err(PolicyRegistryError::ZeroCeiling { pattern: policy.pattern.clone() });
	}
	if !policy.timeout.is_positive() {
		return Err(PolicyRegistryError::NonPositiveTimeout { pattern: policy.pattern.clone() });
	}

	Ok(())
}

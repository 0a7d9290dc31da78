//! OAuth scope sets as Reddit expects them.

// std
use std::collections::BTreeSet;
// crates.io
use serde::{Deserializer, Serializer, de::Error as DeError};
// self
use crate::_prelude::*;

/// Scopes requested by default: identity, subreddit reads, and subscriptions.
pub const REDDIT_DEFAULT_SCOPES: [&str; 3] = ["identity", "read", "mysubreddits"];

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace or commas.
	#[error("Scope contains a delimiter character: {scope}.")]
	ContainsDelimiter {
		/// The offending scope string.
		scope: String,
	},
}

/// Deduplicated, sorted set of OAuth scopes.
///
/// Serializes as the space-delimited string used on the wire. Parsing accepts both space- and
/// comma-delimited input because Reddit echoes either form.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeSet(BTreeSet<String>);
impl ScopeSet {
	/// Creates a normalized scope set from any iterator.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut set = BTreeSet::new();

		for scope in scopes {
			let owned: String = scope.into();

			if owned.is_empty() {
				return Err(ScopeValidationError::Empty);
			}
			if owned.chars().any(|c| c.is_whitespace() || c == ',') {
				return Err(ScopeValidationError::ContainsDelimiter { scope: owned });
			}

			set.insert(owned);
		}

		Ok(Self(set))
	}

	/// The scopes this crate requests unless configured otherwise.
	pub fn reddit_default() -> Self {
		Self(REDDIT_DEFAULT_SCOPES.iter().map(|s| (*s).to_owned()).collect())
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if no scopes are defined.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns true if the set contains the provided scope.
	pub fn contains(&self, scope: &str) -> bool {
		self.0.contains(scope)
	}

	/// Iterator over scopes in sorted order.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}

	/// Space-delimited wire form.
	pub fn normalized(&self) -> String {
		self.iter().collect::<Vec<_>>().join(" ")
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeSet").field(&self.normalized()).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}
impl FromStr for ScopeSet {
	type Err = ScopeValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Ok(Self::default());
		}

		let parts = s.split(|c: char| c.is_whitespace() || c == ',').filter(|p| !p.is_empty());
		let set = Self::new(parts)?;

		if set.is_empty() { Err(ScopeValidationError::Empty) } else { Ok(set) }
	}
}
impl Serialize for ScopeSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.normalized())
	}
}
impl<'de> Deserialize<'de> for ScopeSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;

		ScopeSet::from_str(&raw).map_err(DeError::custom)
	}
}

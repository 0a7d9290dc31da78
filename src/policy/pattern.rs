//! Endpoint pattern parsing, matching, and specificity ordering.

// std
use std::cmp::Ordering;
// self
use crate::_prelude::*;

/// Reasons a pattern string is rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum PatternError {
	/// Pattern was empty.
	#[error("Endpoint pattern cannot be empty.")]
	Empty,
	/// Pattern must be rooted or a bare `**`.
	#[error("Endpoint pattern `{pattern}` must start with `/`.")]
	NotRooted {
		/// Offending pattern.
		pattern: String,
	},
	/// `**` may only appear as the final segment.
	#[error("Endpoint pattern `{pattern}` uses `**` before its final segment.")]
	MisplacedRest {
		/// Offending pattern.
		pattern: String,
	},
	/// A segment mixed wildcard and literal characters.
	#[error("Endpoint pattern `{pattern}` mixes wildcards into segment `{segment}`.")]
	PartialWildcard {
		/// Offending pattern.
		pattern: String,
		/// Offending segment.
		segment: String,
	},
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Segment {
	Literal(String),
	Any,
	Rest,
}

/// Compiled `/`-separated endpoint pattern.
///
/// `*` matches exactly one segment; a trailing `**` matches any remainder, including nothing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EndpointPattern {
	raw: String,
	segments: Vec<Segment>,
}
impl EndpointPattern {
	/// Parses and validates a pattern string.
	pub fn parse(raw: &str) -> Result<Self, PatternError> {
		let trimmed = raw.trim();

		if trimmed.is_empty() {
			return Err(PatternError::Empty);
		}
		if trimmed != "**" && !trimmed.starts_with('/') {
			return Err(PatternError::NotRooted { pattern: trimmed.into() });
		}

		let parts = split_segments(trimmed).collect::<Vec<_>>();
		let mut segments = Vec::with_capacity(parts.len());

		for (idx, part) in parts.iter().enumerate() {
			let segment = match *part {
				"**" if idx + 1 == parts.len() => Segment::Rest,
				"**" => return Err(PatternError::MisplacedRest { pattern: trimmed.into() }),
				"*" => Segment::Any,
				other if other.contains('*') =>
					return Err(PatternError::PartialWildcard {
						pattern: trimmed.into(),
						segment: other.into(),
					}),
				other => Segment::Literal(other.into()),
			};

			segments.push(segment);
		}

		Ok(Self { raw: trimmed.into(), segments })
	}

	/// Returns the pattern as written.
	pub fn as_str(&self) -> &str {
		&self.raw
	}

	/// Returns `true` when the normalized `path` matches this pattern.
	pub fn matches(&self, path: &str) -> bool {
		let mut parts = split_segments(path);

		for segment in &self.segments {
			match segment {
				Segment::Rest => return true,
				Segment::Any =>
					if parts.next().is_none() {
						return false;
					},
				Segment::Literal(literal) =>
					if parts.next() != Some(literal.as_str()) {
						return false;
					},
			}
		}

		parts.next().is_none()
	}

	/// Specificity key: literal prefix length, then literal count, then segment count.
	pub fn specificity(&self) -> (usize, usize, usize) {
		let prefix = self.segments.iter().take_while(|s| matches!(s, Segment::Literal(_))).count();
		let literals = self.segments.iter().filter(|s| matches!(s, Segment::Literal(_))).count();
		let fixed = self.segments.iter().filter(|s| !matches!(s, Segment::Rest)).count();

		(prefix, literals, fixed)
	}

	/// Orders two patterns from most to least specific.
	pub fn cmp_specificity(&self, other: &Self) -> Ordering {
		other.specificity().cmp(&self.specificity())
	}
}
impl Display for EndpointPattern {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.raw)
	}
}
impl FromStr for EndpointPattern {
	type Err = PatternError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

/// Strips scheme/host, query, fragment, and trailing slashes from a request path.
pub fn normalize_path(path: &str) -> String {
	let without_origin = match path.find("://") {
		Some(idx) => {
			let rest = &path[idx + 3..];

			rest.find('/').map_or("/", |slash| &rest[slash..])
		},
		None => path,
	};
	let end = without_origin.find(['?', '#']).unwrap_or(without_origin.len());
	let trimmed = without_origin[..end].trim_end_matches('/');

	if trimmed.is_empty() {
		"/".into()
	} else if trimmed.starts_with('/') {
		trimmed.into()
	} else {
		format!("/{trimmed}")
	}
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
	path.split('/').filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn pattern(raw: &str) -> EndpointPattern {
		EndpointPattern::parse(raw).expect("Pattern fixture should parse.")
	}

	#[test]
	fn single_wildcard_matches_one_segment() {
		let p = pattern("/r/*/hot");

		assert!(p.matches("/r/rust/hot"));
		assert!(!p.matches("/r/rust"));
		assert!(!p.matches("/r/rust/hot/extra"));
	}

	#[test]
	fn rest_wildcard_matches_any_remainder() {
		let p = pattern("/r/*/**");

		assert!(p.matches("/r/rust"));
		assert!(p.matches("/r/rust/comments/abc"));
		assert!(!p.matches("/user/someone"));
		assert!(pattern("**").matches("/anything/at/all"));
	}

	#[test]
	fn literal_prefix_outranks_wildcards() {
		let me = pattern("/api/v1/me");
		let api = pattern("/api/**");
		let any = pattern("/*/v1/me");

		assert_eq!(me.cmp_specificity(&api), Ordering::Less);
		assert_eq!(api.cmp_specificity(&any), Ordering::Less);
	}

	#[test]
	fn rejects_malformed_patterns() {
		assert_eq!(EndpointPattern::parse(" "), Err(PatternError::Empty));
		assert!(matches!(EndpointPattern::parse("r/rust"), Err(PatternError::NotRooted { .. })));
		assert!(matches!(
			EndpointPattern::parse("/r/**/new"),
			Err(PatternError::MisplacedRest { .. })
		));
		assert!(matches!(
			EndpointPattern::parse("/r/ru*"),
			Err(PatternError::PartialWildcard { .. })
		));
	}

	#[test]
	fn normalize_path_strips_noise() {
		assert_eq!(normalize_path("/r/rust/new/?limit=25"), "/r/rust/new");
		assert_eq!(normalize_path("https://oauth.reddit.com/api/v1/me"), "/api/v1/me");
		assert_eq!(normalize_path("r/rust"), "/r/rust");
		assert_eq!(normalize_path("/"), "/");
	}
}

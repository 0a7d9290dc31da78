//! Loads an endpoint policy table and shows which policy governs a few Reddit paths.
//!
//! Pass a JSON table path as the first argument, or run without arguments to inspect the built-in
//! Reddit defaults.

// std
use std::{env, fs};
// crates.io
use color_eyre::Result;
// self
use reddit_broker::policy::{PolicyRegistry, normalize_path};

const SAMPLE_PATHS: [&str; 5] = [
	"/api/v1/me",
	"/r/rust/new/?limit=25",
	"/r/rust/comments/abc123/",
	"/user/spez/about",
	"/api/subscribe",
];

fn main() -> Result<()> {
	color_eyre::install()?;

	let registry = match env::args().nth(1) {
		Some(path) => PolicyRegistry::from_json(&fs::read_to_string(path)?)?,
		None => PolicyRegistry::reddit()?,
	};

	registry.ensure_default()?;

	for policy in registry.iter() {
		println!(
			"{:<16} {:>4}/min  hourly={:?}  timeout={}  retries={}",
			policy.pattern,
			policy.requests_per_minute,
			policy.requests_per_hour,
			policy.timeout,
			policy.max_retries
		);
	}

	println!();

	for path in SAMPLE_PATHS {
		let policy = registry.resolve(path)?;

		println!("{:<28} -> {:<24} governed by `{}`", path, normalize_path(path), policy.pattern);
	}

	println!();
	println!("{}", serde_json::to_string_pretty(&registry.to_table())?);

	Ok(())
}

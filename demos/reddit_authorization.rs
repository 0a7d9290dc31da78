//! Interactive authorization walkthrough against Reddit.
//!
//! The demo prints the authorize URL, waits for the browser's callback URL on stdin, exchanges the
//! code, and then sends one rate-governed identity call through the scheduler so the bearer
//! credential, limiter, and ledger are exercised end to end.

// std
use std::io::{self, Write};
// crates.io
use color_eyre::Result;
// self
use reddit_broker::{
	auth::OAuthConfig,
	client::{ClientConfig, RedditClient},
	scheduler::{Priority, SubmitRequest},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let client_id = prompt_with_default("Enter your Reddit client ID", Some("demo-reddit-client"))?;
	let client_secret =
		prompt_optional("Enter your Reddit client secret (leave blank for installed apps)")?;
	let redirect_uri = prompt_with_default(
		"Enter the redirect URI registered with Reddit",
		Some("http://localhost:8080/callback"),
	)?;
	let user_agent = prompt_with_default(
		"Enter a descriptive user agent",
		Some("desktop:reddit-broker-demo:v0.1.0 (by /u/your-name)"),
	)?;
	let mut oauth = OAuthConfig::builder(client_id).redirect_uri(redirect_uri).user_agent(user_agent);

	if let Some(secret) = client_secret {
		oauth = oauth.client_secret(secret);
	}

	let config = ClientConfig::new(oauth.build()?)?;
	let client = RedditClient::new(config)?;
	let request = client.begin_authorization();

	println!("Authorize URL: {}", request.authorize_url);
	println!("PKCE challenge (S256): {}.", request.code_challenge);
	println!("After Reddit redirects back, paste the full callback URL here.");

	let Some(callback) = prompt_optional("Callback URL (leave blank to skip the exchange)")? else {
		println!("Callback not provided; skipping token exchange.");

		return Ok(());
	};

	client.complete_authorization(&callback).await?;

	println!("Session state: {:?}.", client.session_state());

	let handle = client
		.submit_request(SubmitRequest::get("/api/v1/me").with_priority(Priority::High))
		.await?;
	let response = handle.await?;
	let me = response.json::<serde_json::Value>()?;

	println!("Signed in as: {}.", me["name"].as_str().unwrap_or("<unknown>"));

	let status = client.get_rate_limit_status("/api/v1/me")?;

	println!(
		"Rate limit for `{}`: {}/{} available, resets in {}.",
		status.pattern, status.available, status.ceiling, status.resets_in
	);
	if let Some(global) = client.get_global_rate_limit_status() {
		println!("Client-wide: {}/{} available.", global.available, global.ceiling);
	}

	println!("Usage: {:?}.", client.get_metrics());

	client.shutdown().await;

	Ok(())
}

fn prompt_with_default(message: &str, default: Option<&str>) -> Result<String> {
	loop {
		if let Some(value) = default {
			print!("{message} [{value}]: ");
		} else {
			print!("{message}: ");
		}

		io::stdout().flush()?;

		let mut input = String::new();

		io::stdin().read_line(&mut input)?;

		let trimmed = input.trim();

		if !trimmed.is_empty() {
			return Ok(trimmed.to_owned());
		}
		if let Some(value) = default {
			return Ok(value.to_owned());
		}

		println!("A value is required.");
	}
}

fn prompt_optional(message: &str) -> Result<Option<String>> {
	print!("{message}: ");
	io::stdout().flush()?;

	let mut input = String::new();

	io::stdin().read_line(&mut input)?;

	let trimmed = input.trim();

	Ok((!trimmed.is_empty()).then(|| trimmed.to_owned()))
}

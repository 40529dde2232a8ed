//! Thin HTTP client for a running daemon.
//!
//! Port resolution order: explicit `--port`, the lockfile's advertised
//! port (stale entries are accepted; the request itself is the probe),
//! then the default.

use anyhow::{Context, Result, anyhow};
use colored::Colorize;
use serde_json::Value;

use ccb::lockfile::DaemonLock;
use ccb::paths;

pub const DEFAULT_DAEMON_PORT: u16 = 18791;

pub struct DaemonClient {
	base: String,
	http: reqwest::Client,
}

impl DaemonClient {
	pub fn new(port: Option<u16>) -> Result<Self> {
		let port = match port {
			Some(port) => port,
			None => lockfile_port().unwrap_or(DEFAULT_DAEMON_PORT),
		};
		Ok(Self {
			base: format!("http://127.0.0.1:{port}"),
			http: reqwest::Client::builder()
				.no_proxy()
				.timeout(std::time::Duration::from_secs(310))
				.build()
				.context("failed to build HTTP client")?,
		})
	}

	pub async fn get(&self, route: &str) -> Result<Value> {
		let resp = self
			.http
			.get(format!("{}{route}", self.base))
			.send()
			.await
			.with_context(|| format!("daemon unreachable at {}; is `ccb serve` running?", self.base))?;
		Self::decode(resp).await
	}

	pub async fn post(&self, route: &str, body: Value) -> Result<Value> {
		let resp = self
			.http
			.post(format!("{}{route}", self.base))
			.json(&body)
			.send()
			.await
			.with_context(|| format!("daemon unreachable at {}; is `ccb serve` running?", self.base))?;
		Self::decode(resp).await
	}

	async fn decode(resp: reqwest::Response) -> Result<Value> {
		let status = resp.status();
		if status == reqwest::StatusCode::NO_CONTENT {
			return Ok(Value::Null);
		}
		let value: Value = resp.json().await.context("daemon returned non-JSON output")?;
		if value.get("success").and_then(Value::as_bool) == Some(false) {
			let message = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
			return Err(anyhow!("{message} ({status})"));
		}
		Ok(value)
	}
}

fn lockfile_port() -> Option<u16> {
	let path = paths::lockfile_path().ok()?;
	// A stale lock still carries the last known port; the caller's request
	// will fail loudly if nothing listens there.
	let (lock, _stale) = DaemonLock::load(&path).ok()??;
	Some(lock.port)
}

/// Render a response for a terminal: pretty JSON, success flag colored.
pub fn print_response(value: &Value) {
	if value.is_null() {
		println!("{}", "ok".green());
		return;
	}
	match serde_json::to_string_pretty(value) {
		Ok(pretty) => println!("{pretty}"),
		Err(_) => println!("{value}"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn client_builds_with_explicit_port() {
		let client = DaemonClient::new(Some(19999)).unwrap();
		assert_eq!(client.base, "http://127.0.0.1:19999");
	}
}

//! Vision backend: the single `analyze(image, prompt) -> text` dependency.
//!
//! The production implementation calls the Anthropic Messages API with a
//! base64 screenshot and a JSON-only prompt. Everything above this trait is
//! testable with a canned backend.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::error::{CcbError, Result};

pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const MAX_TOKENS: u32 = 1024;

#[async_trait]
pub trait VisionBackend: Send + Sync {
	/// Analyze a base64 PNG against a prompt, returning the model's text.
	async fn analyze(&self, image_base64: &str, prompt: &str) -> Result<String>;
}

/// Anthropic-backed vision analysis using `ANTHROPIC_API_KEY`.
pub struct AnthropicVision {
	client: reqwest::Client,
	api_key: String,
	model: String,
}

impl AnthropicVision {
	/// Build from the environment; fails only when the key is absent.
	pub fn from_env() -> Result<Self> {
		let api_key = std::env::var("ANTHROPIC_API_KEY")
			.map_err(|_| CcbError::VisionBackend("ANTHROPIC_API_KEY is not set".into()))?;
		let model = std::env::var("CCB_VISION_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
		Ok(Self {
			client: reqwest::Client::new(),
			api_key,
			model,
		})
	}
}

#[async_trait]
impl VisionBackend for AnthropicVision {
	async fn analyze(&self, image_base64: &str, prompt: &str) -> Result<String> {
		let body = json!({
			"model": self.model,
			"max_tokens": MAX_TOKENS,
			"messages": [{
				"role": "user",
				"content": [
					{
						"type": "image",
						"source": { "type": "base64", "media_type": "image/png", "data": image_base64 },
					},
					{ "type": "text", "text": prompt },
				],
			}],
		});

		let resp = self
			.client
			.post(ANTHROPIC_API_URL)
			.header("x-api-key", &self.api_key)
			.header("anthropic-version", "2023-06-01")
			.json(&body)
			.send()
			.await
			.map_err(|err| CcbError::VisionBackend(format!("request failed: {err}")))?;

		let status = resp.status();
		if !status.is_success() {
			let detail = resp.text().await.unwrap_or_default();
			return Err(CcbError::VisionBackend(format!("API returned {status}: {detail}")));
		}

		let value: serde_json::Value = resp
			.json()
			.await
			.map_err(|err| CcbError::VisionBackend(format!("malformed response: {err}")))?;
		let text = value["content"][0]["text"]
			.as_str()
			.ok_or_else(|| CcbError::VisionBackend("response carried no text block".into()))?;
		debug!(target = "ccb.captcha", chars = text.len(), "vision response received");
		Ok(text.to_string())
	}
}

/// Stand-in used when no API key is configured; every analysis fails as a
/// vision-backend error, which the orchestrator treats as retriable.
pub struct NoVision;

#[async_trait]
impl VisionBackend for NoVision {
	async fn analyze(&self, _image_base64: &str, _prompt: &str) -> Result<String> {
		Err(CcbError::VisionBackend("no vision backend configured (ANTHROPIC_API_KEY unset)".into()))
	}
}

/// The configured backend, falling back to [`NoVision`] without a key.
pub fn vision_from_env() -> std::sync::Arc<dyn VisionBackend> {
	match AnthropicVision::from_env() {
		Ok(vision) => std::sync::Arc::new(vision),
		Err(_) => std::sync::Arc::new(NoVision),
	}
}

/// Strip optional markdown fences and parse the remainder as JSON.
pub fn parse_fenced_json(text: &str) -> Result<serde_json::Value> {
	let trimmed = text.trim();
	let inner = if let Some(rest) = trimmed.strip_prefix("```") {
		let rest = rest.strip_prefix("json").unwrap_or(rest);
		rest.trim_start_matches(['\r', '\n']).trim_end_matches('`').trim_end()
	} else {
		trimmed
	};
	serde_json::from_str(inner).map_err(|err| CcbError::VisionBackend(format!("vision output was not JSON: {err}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_bare_json() {
		let value = parse_fenced_json(r#"{"detected": true, "type": "slider"}"#).unwrap();
		assert_eq!(value["type"], "slider");
	}

	#[test]
	fn parses_fenced_json() {
		let value = parse_fenced_json("```json\n{\"cells\": [0, 4, 8]}\n```").unwrap();
		assert_eq!(value["cells"][2], 8);
	}

	#[test]
	fn parses_fence_without_language() {
		let value = parse_fenced_json("```\n{\"solved\": false}\n```").unwrap();
		assert_eq!(value["solved"], false);
	}

	#[test]
	fn rejects_prose() {
		assert!(parse_fenced_json("I could not find a captcha.").is_err());
	}
}

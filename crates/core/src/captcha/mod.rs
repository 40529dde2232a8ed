//! CAPTCHA subsystem: detection tiers and the retrying orchestrator.
//!
//! Tier 1 is a cheap in-page probe for seven marker families; Tier 2 falls
//! back to a vision screenshot when the probe is negative. Solvers are
//! type-keyed; the orchestrator never calls a solver more than
//! `max_attempts` times per request and refuses types it has no solver for
//! without retrying.

pub mod solvers;
pub mod vision;

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use tokio::time::sleep;
use tracing::{debug, info};

use ccb_protocol::{CaptchaDetectResponse, CaptchaSolveResponse};

use crate::error::{CcbError, Result};

pub use solvers::PageCaptchaEnv;
pub use vision::{AnthropicVision, NoVision, VisionBackend, parse_fenced_json, vision_from_env};

const DETECT_JS: &str = include_str!("../js/captcha_detect.js");
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Everything the orchestrator needs from the outside world; the production
/// implementation wraps a live page, solvers, and the vision backend.
#[async_trait]
pub trait CaptchaEnvironment: Send + Sync {
	async fn detect(&self) -> Result<CaptchaDetectResponse>;
	fn has_solver(&self, captcha_type: &str) -> bool;
	/// One solve attempt; `Ok(true)` means verified solved.
	async fn solve_once(&self, captcha_type: &str) -> Result<bool>;
}

/// Tier-1 DOM probe.
pub async fn detect_dom(page: &Page) -> Result<CaptchaDetectResponse> {
	let expr = format!("(() => {{\n{DETECT_JS}\nreturn __ccbDetectCaptcha();\n}})()");
	let value = page
		.evaluate(expr)
		.await
		.map_err(|err| CcbError::Cdp(format!("captcha probe failed: {err}")))?;
	value
		.into_value::<CaptchaDetectResponse>()
		.map_err(|err| CcbError::Cdp(format!("captcha probe returned malformed data: {err}")))
}

/// Tier-2 vision detection on a base64 screenshot.
pub async fn detect_vision(vision: &dyn VisionBackend, screenshot_base64: &str) -> Result<CaptchaDetectResponse> {
	let prompt = "Look at this screenshot and decide whether it shows a CAPTCHA challenge. \
		Respond with JSON only, no prose: {\"detected\": bool, \"type\": one of \
		\"recaptcha_v2\"|\"recaptcha_image\"|\"hcaptcha\"|\"cloudflare_turnstile\"|\
		\"cloudflare_interstitial\"|\"slider\"|\"image_grid\"|\"text_captcha\"|null}";
	let raw = vision.analyze(screenshot_base64, prompt).await?;
	let value = parse_fenced_json(&raw)?;
	Ok(CaptchaDetectResponse {
		detected: value["detected"].as_bool().unwrap_or(false),
		captcha_type: value["type"].as_str().map(String::from),
		selector: None,
	})
}

/// Detect, then attempt solves with linear backoff (`attempt * 1s`).
///
/// Attempt accounting: a detected type with no registered solver reports one
/// attempt and stops; vision failures are retriable, other errors abort.
pub async fn solve(env: &dyn CaptchaEnvironment, max_attempts: u32) -> Result<CaptchaSolveResponse> {
	let detection = env.detect().await?;
	if !detection.detected {
		return Ok(CaptchaSolveResponse {
			solved: false,
			captcha_type: None,
			attempts: 0,
		});
	}
	let captcha_type = detection.captcha_type.unwrap_or_else(|| "unknown".to_string());

	if !env.has_solver(&captcha_type) {
		debug!(target = "ccb.captcha", captcha_type = %captcha_type, "no solver registered");
		return Ok(CaptchaSolveResponse {
			solved: false,
			captcha_type: Some(captcha_type),
			attempts: 1,
		});
	}

	let max_attempts = max_attempts.max(1);
	for attempt in 1..=max_attempts {
		match env.solve_once(&captcha_type).await {
			Ok(true) => {
				info!(target = "ccb.captcha", captcha_type = %captcha_type, attempt, "captcha solved");
				return Ok(CaptchaSolveResponse {
					solved: true,
					captcha_type: Some(captcha_type),
					attempts: attempt,
				});
			}
			Ok(false) => {
				debug!(target = "ccb.captcha", captcha_type = %captcha_type, attempt, "attempt did not verify");
			}
			Err(CcbError::VisionBackend(msg)) => {
				debug!(target = "ccb.captcha", attempt, error = %msg, "vision failure, retrying");
			}
			Err(other) => return Err(other),
		}
		if attempt < max_attempts {
			sleep(Duration::from_secs(u64::from(attempt))).await;
		}
	}
	Ok(CaptchaSolveResponse {
		solved: false,
		captcha_type: Some(captcha_type),
		attempts: max_attempts,
	})
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};

	use super::*;

	struct FakeEnv {
		detection: CaptchaDetectResponse,
		solvable: bool,
		succeed_on: Option<u32>,
		vision_flake: bool,
		calls: AtomicU32,
	}

	impl FakeEnv {
		fn detected(captcha_type: &str) -> Self {
			Self {
				detection: CaptchaDetectResponse {
					detected: true,
					captcha_type: Some(captcha_type.into()),
					selector: None,
				},
				solvable: true,
				succeed_on: None,
				vision_flake: false,
				calls: AtomicU32::new(0),
			}
		}
	}

	#[async_trait]
	impl CaptchaEnvironment for FakeEnv {
		async fn detect(&self) -> Result<CaptchaDetectResponse> {
			Ok(self.detection.clone())
		}

		fn has_solver(&self, _captcha_type: &str) -> bool {
			self.solvable
		}

		async fn solve_once(&self, _captcha_type: &str) -> Result<bool> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
			if self.vision_flake && call == 1 {
				return Err(CcbError::VisionBackend("blip".into()));
			}
			Ok(self.succeed_on == Some(call))
		}
	}

	#[tokio::test]
	async fn unknown_type_stops_after_one_attempt() {
		let mut env = FakeEnv::detected("unknown");
		env.solvable = false;
		let result = solve(&env, 3).await.unwrap();
		assert!(!result.solved);
		assert_eq!(result.captcha_type.as_deref(), Some("unknown"));
		assert_eq!(result.attempts, 1);
		assert_eq!(env.calls.load(Ordering::SeqCst), 0, "solver must never run");
	}

	#[tokio::test]
	async fn nothing_detected_is_zero_attempts() {
		let env = FakeEnv {
			detection: CaptchaDetectResponse {
				detected: false,
				captcha_type: None,
				selector: None,
			},
			solvable: true,
			succeed_on: None,
			vision_flake: false,
			calls: AtomicU32::new(0),
		};
		let result = solve(&env, 3).await.unwrap();
		assert!(!result.solved);
		assert_eq!(result.attempts, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn attempts_never_exceed_max() {
		let env = FakeEnv::detected("recaptcha_v2");
		let result = solve(&env, 3).await.unwrap();
		assert!(!result.solved);
		assert_eq!(result.attempts, 3);
		assert_eq!(env.calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn stops_at_first_success() {
		let mut env = FakeEnv::detected("hcaptcha");
		env.succeed_on = Some(2);
		let result = solve(&env, 3).await.unwrap();
		assert!(result.solved);
		assert_eq!(result.attempts, 2);
	}

	#[tokio::test(start_paused = true)]
	async fn vision_errors_are_retriable() {
		let mut env = FakeEnv::detected("slider");
		env.vision_flake = true;
		env.succeed_on = Some(2);
		let result = solve(&env, 3).await.unwrap();
		assert!(result.solved);
		assert_eq!(result.attempts, 2);
	}

	#[test]
	fn detect_probe_covers_all_families() {
		for family in [
			"recaptcha_v2",
			"recaptcha_image",
			"hcaptcha",
			"cloudflare_turnstile",
			"cloudflare_interstitial",
			"slider",
			"image_grid",
			"text_captcha",
		] {
			assert!(DETECT_JS.contains(family), "probe misses {family}");
		}
	}
}

//! Replay engine: executes a recorded step list against a live page.
//!
//! Each interaction step tries its locators in descending stability order,
//! waiting for visibility per strategy. Navigation steps compare the page's
//! *actual* post-load URL (read in-page, because driver-side URLs can be
//! stale across CDP redirects) against the recorded one; a pathname
//! divergence is fatal and halts the run.

use std::time::Duration;

use chromiumoxide::Page;
use rand::Rng;
use tokio::time::sleep;

use ccb_protocol::{Locator, Mode, Recording, ReplayReport, ReplayStepResult, Step};

use crate::error::{CcbError, Result};
use crate::page::input;
use crate::page::locator::{LocatorSpec, QueryResult, wait_for, with_element_expression};

pub const DEFAULT_LOCATOR_TIMEOUT_MS: u64 = 8_000;
const NAVIGATE_TIMEOUT: Duration = Duration::from_secs(30);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);
const FAST_STEP_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ReplayOptions {
	pub mode: Mode,
	pub timeout_ms: u64,
}

impl Default for ReplayOptions {
	fn default() -> Self {
		Self {
			mode: Mode::Fast,
			timeout_ms: DEFAULT_LOCATOR_TIMEOUT_MS,
		}
	}
}

/// Outcome of one executed step.
#[derive(Debug)]
pub enum StepOutcome {
	Ok(Option<String>),
	Failed(String),
	/// Halts the replay; nothing after this step runs.
	Fatal(String),
}

/// Append an outcome; returns whether the replay continues.
pub fn push_outcome(results: &mut Vec<ReplayStepResult>, index: usize, action: &str, outcome: StepOutcome) -> bool {
	match outcome {
		StepOutcome::Ok(detail) => {
			results.push(ReplayStepResult {
				index,
				action: action.to_string(),
				ok: true,
				fatal: false,
				error: None,
				detail,
			});
			true
		}
		StepOutcome::Failed(error) => {
			results.push(ReplayStepResult {
				index,
				action: action.to_string(),
				ok: false,
				fatal: false,
				error: Some(error),
				detail: None,
			});
			true
		}
		StepOutcome::Fatal(error) => {
			results.push(ReplayStepResult {
				index,
				action: action.to_string(),
				ok: false,
				fatal: true,
				error: Some(error),
				detail: None,
			});
			false
		}
	}
}

/// Aggregate a result list into the report.
pub fn summarize(recording: &str, results: Vec<ReplayStepResult>, total: usize) -> ReplayReport {
	let passed = results.iter().filter(|r| r.ok).count();
	let failed = results.iter().filter(|r| !r.ok).count();
	let fatal = results.iter().any(|r| r.fatal);
	ReplayReport {
		recording: recording.to_string(),
		total,
		passed,
		failed,
		fatal,
		results,
	}
}

/// True when the two URLs' pathnames differ (redirect divergence).
pub fn paths_diverge(expected: &str, actual: &str) -> bool {
	fn pathname(raw: &str) -> String {
		url::Url::parse(raw)
			.map(|u| u.path().trim_end_matches('/').to_string())
			.unwrap_or_else(|_| raw.trim_end_matches('/').to_string())
	}
	pathname(expected) != pathname(actual)
}

/// Execute a recording against a page.
pub async fn replay(page: &Page, recording: &Recording, opts: &ReplayOptions) -> Result<ReplayReport> {
	let mut results = Vec::with_capacity(recording.steps.len());

	for (index, step) in recording.steps.iter().enumerate() {
		wait_dom_ready(page, SETTLE_TIMEOUT).await;

		let outcome = execute_step(page, step, opts).await;
		if !push_outcome(&mut results, index, step.action(), outcome) {
			break;
		}

		let delay = match opts.mode {
			Mode::Fast => FAST_STEP_DELAY,
			Mode::Human | Mode::Stealth => {
				let ms = rand::rng().random_range(400..=900);
				Duration::from_millis(ms)
			}
		};
		sleep(delay).await;
	}

	Ok(summarize(&recording.name, results, recording.steps.len()))
}

async fn execute_step(page: &Page, step: &Step, opts: &ReplayOptions) -> StepOutcome {
	match step {
		Step::Navigate { url } => execute_navigate(page, url).await,
		Step::Click { locators } => match resolve_locators(page, locators, opts.timeout_ms).await {
			Ok((spec, query)) => {
				let Some(rect) = query.rect else {
					return StepOutcome::Failed(format!("{} resolved without geometry", spec.describe()));
				};
				let (x, y) = rect.center();
				match input::mouse_click(page, x, y, ccb_protocol::MouseButton::Left, 1, 0).await {
					Ok(()) => StepOutcome::Ok(Some(spec.describe())),
					Err(err) => StepOutcome::Failed(err.to_string()),
				}
			}
			Err(err) => StepOutcome::Failed(err.to_string()),
		},
		Step::Type { locators, value } => match resolve_locators(page, locators, opts.timeout_ms).await {
			Ok((spec, _)) => match set_field_value(page, &spec, value).await {
				Ok(()) => StepOutcome::Ok(Some(spec.describe())),
				Err(err) => StepOutcome::Failed(err.to_string()),
			},
			Err(err) => StepOutcome::Failed(err.to_string()),
		},
		Step::Select { locators, value } => match resolve_locators(page, locators, opts.timeout_ms).await {
			Ok((spec, _)) => match select_value(page, &spec, value).await {
				Ok(()) => StepOutcome::Ok(Some(spec.describe())),
				Err(err) => StepOutcome::Failed(err.to_string()),
			},
			Err(err) => StepOutcome::Failed(err.to_string()),
		},
		Step::Keypress { key, locators } => {
			// Focus the recorded element when it still resolves; otherwise
			// the key goes to the page.
			if !locators.is_empty() {
				if let Ok((spec, _)) = resolve_locators(page, locators, opts.timeout_ms.min(2_000)).await {
					let _ = page.evaluate(with_element_expression(&spec, "el.focus(); return true;")).await;
				}
			}
			match input::press_key(page, key, None).await {
				Ok(()) => StepOutcome::Ok(None),
				Err(err) => StepOutcome::Failed(err.to_string()),
			}
		}
		Step::Scroll { scroll_x, scroll_y } => {
			match page.evaluate(format!("window.scrollTo({scroll_x}, {scroll_y})")).await {
				Ok(_) => StepOutcome::Ok(None),
				Err(err) => StepOutcome::Failed(err.to_string()),
			}
		}
	}
}

async fn execute_navigate(page: &Page, url: &str) -> StepOutcome {
	match tokio::time::timeout(NAVIGATE_TIMEOUT, page.goto(url)).await {
		Ok(Ok(_)) => {}
		Ok(Err(err)) => return StepOutcome::Fatal(format!("navigation to {url} failed: {err}")),
		Err(_) => return StepOutcome::Fatal(format!("navigation to {url} timed out")),
	}

	wait_dom_ready(page, SETTLE_TIMEOUT).await;

	// Read the URL the page actually landed on. Driver-side URL can lag a
	// redirect, so ask the page itself, with one short retry on a race.
	let mut actual = read_location(page).await;
	if actual.is_empty() {
		sleep(Duration::from_millis(500)).await;
		actual = read_location(page).await;
	}

	if paths_diverge(url, &actual) {
		return StepOutcome::Fatal(format!("expected {url} but landed on {actual}; halting replay"));
	}
	StepOutcome::Ok(Some(actual))
}

async fn read_location(page: &Page) -> String {
	match page.evaluate("window.location.href").await {
		Ok(value) => value.value().and_then(|v| v.as_str().map(String::from)).unwrap_or_default(),
		Err(_) => String::new(),
	}
}

/// Best-effort DOM-ready wait; replay proceeds regardless once it expires.
async fn wait_dom_ready(page: &Page, timeout: Duration) {
	let deadline = tokio::time::Instant::now() + timeout;
	while tokio::time::Instant::now() < deadline {
		let state = page
			.evaluate("document.readyState")
			.await
			.ok()
			.and_then(|r| r.value().and_then(|v| v.as_str().map(String::from)));
		if matches!(state.as_deref(), Some("interactive") | Some("complete")) {
			return;
		}
		sleep(Duration::from_millis(100)).await;
	}
}

/// Try each locator strategy in recorded order; first resolvable wins.
async fn resolve_locators(page: &Page, locators: &[Locator], timeout_ms: u64) -> Result<(LocatorSpec, QueryResult)> {
	let mut last_err: Option<CcbError> = None;
	for locator in locators {
		let spec = spec_from_locator(locator);
		match wait_for(page, &spec, timeout_ms).await {
			Ok(query) => return Ok((spec, query)),
			Err(err) => last_err = Some(err),
		}
	}
	Err(last_err.unwrap_or_else(|| CcbError::InvalidInput("step carries no locators".into())))
}

fn spec_from_locator(locator: &Locator) -> LocatorSpec {
	match locator {
		Locator::Role { role, name } => LocatorSpec::Role {
			role: role.clone(),
			name: name.clone(),
			nth: None,
			frame_selector: None,
		},
		Locator::Text { text } => LocatorSpec::Text { text: text.clone() },
		Locator::Selector { selector } => LocatorSpec::Css { selector: selector.clone() },
		Locator::CssPath { path } => LocatorSpec::CssPath { path: path.clone() },
	}
}

async fn set_field_value(page: &Page, spec: &LocatorSpec, value: &str) -> Result<()> {
	let body = format!(
		"el.focus(); el.value = {value}; \
		 el.dispatchEvent(new Event('input', {{bubbles: true}})); \
		 el.dispatchEvent(new Event('change', {{bubbles: true}})); return true;",
		value = serde_json::to_string(value)?,
	);
	page.evaluate(with_element_expression(spec, &body))
		.await
		.map_err(|err| CcbError::Cdp(format!("type failed: {err}")))?;
	Ok(())
}

async fn select_value(page: &Page, spec: &LocatorSpec, value: &str) -> Result<()> {
	let body = format!(
		"el.value = {value}; el.dispatchEvent(new Event('change', {{bubbles: true}})); return true;",
		value = serde_json::to_string(value)?,
	);
	page.evaluate(with_element_expression(spec, &body))
		.await
		.map_err(|err| CcbError::Cdp(format!("select failed: {err}")))?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pathname_divergence_detects_redirects() {
		assert!(paths_diverge("https://site.example/login", "https://site.example/sso"));
		assert!(!paths_diverge("https://site.example/login", "https://site.example/login?next=%2F"));
		assert!(!paths_diverge("https://site.example/login/", "https://site.example/login"));
		assert!(!paths_diverge("https://site.example/login", "https://other.example/login"));
	}

	#[test]
	fn fatal_redirect_halts_and_reports() {
		// Recording: navigate /login (redirected), then a click that must
		// never run.
		let mut results = Vec::new();
		let proceed = push_outcome(
			&mut results,
			0,
			"navigate",
			StepOutcome::Fatal("expected https://site.example/login but landed on https://site.example/sso; halting replay".into()),
		);
		assert!(!proceed, "fatal outcome must halt the run");

		let report = summarize("login-flow", results, 2);
		assert_eq!(report.failed, 1);
		assert_eq!(report.passed, 0);
		assert!(report.fatal);
		assert_eq!(report.results.len(), 1, "the click step never executed");
		assert_eq!(report.total, 2);
	}

	#[test]
	fn non_fatal_failures_continue() {
		let mut results = Vec::new();
		assert!(push_outcome(&mut results, 0, "navigate", StepOutcome::Ok(Some("https://a".into()))));
		assert!(push_outcome(&mut results, 1, "click", StepOutcome::Failed("button \"Go\" was not found".into())));
		assert!(push_outcome(&mut results, 2, "scroll", StepOutcome::Ok(None)));

		let report = summarize("r", results, 3);
		assert_eq!(report.passed, 2);
		assert_eq!(report.failed, 1);
		assert!(!report.fatal);
	}

	#[test]
	fn locator_specs_preserve_order_semantics() {
		let locators = vec![
			Locator::Role { role: "button".into(), name: Some("Go".into()) },
			Locator::Text { text: "Go".into() },
			Locator::Selector { selector: "button.go".into() },
			Locator::CssPath { path: "div > button:nth-of-type(1)".into() },
		];
		let specs: Vec<LocatorSpec> = locators.iter().map(spec_from_locator).collect();
		assert!(matches!(specs[0], LocatorSpec::Role { .. }));
		assert!(matches!(specs[1], LocatorSpec::Text { .. }));
		assert!(matches!(specs[2], LocatorSpec::Css { .. }));
		assert!(matches!(specs[3], LocatorSpec::CssPath { .. }));
	}
}

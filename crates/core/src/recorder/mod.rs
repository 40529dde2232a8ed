//! Recording engine: in-page capture, drain loop, beacon merge.
//!
//! One recording may be active per daemon. The capture script (an embedded
//! JS resource) buffers events inside the page; a 250ms poll drains them,
//! and a `beforeunload` beacon catches what the poll would lose to
//! full-page navigation. Drain failures never fail the verb that triggered
//! them; a recording quietly misses events rather than breaking the verb.

pub mod normalize;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::{
	AddScriptToEvaluateOnNewDocumentParams, EventFrameNavigated, RemoveScriptToEvaluateOnNewDocumentParams,
};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ccb_protocol::{RecordStatusResponse, Recording, Step};

use crate::error::{CcbError, Result};
use crate::sessions::now_ms;

pub use normalize::{RawEvent, normalize_steps, step_from_event};

const CAPTURE_JS: &str = include_str!("../js/capture.js");
const DRAIN_INTERVAL: Duration = Duration::from_millis(250);
const DRAIN_JS: &str = "(() => { const ev = window.__ccRecorderEvents || []; return ev.splice(0, ev.length); })()";
const CLEANUP_JS: &str = "(() => { window.__ccRecorderActive = false; window.__ccRecorderEvents = []; })()";

/// Knobs the daemon exposes; defaults follow observed SPA behavior.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
	/// Navigations this close after a click are treated as SPA routing
	/// artifacts and not recorded.
	pub nav_suppress_after_click: Duration,
}

impl Default for RecorderConfig {
	fn default() -> Self {
		Self {
			nav_suppress_after_click: Duration::from_secs(2),
		}
	}
}

/// Pure recording state machine; every transition is unit-testable.
#[derive(Debug)]
pub struct RecorderCore {
	pub name: String,
	started_at: chrono::DateTime<chrono::Utc>,
	steps: Vec<Step>,
	last_click_ms: Option<u64>,
	suppress_ms: u64,
}

impl RecorderCore {
	pub fn new(name: impl Into<String>, suppress: Duration) -> Self {
		Self {
			name: name.into(),
			started_at: chrono::Utc::now(),
			steps: Vec::new(),
			last_click_ms: None,
			suppress_ms: suppress.as_millis() as u64,
		}
	}

	/// Seed the initial navigation (skipped for `about:blank`).
	pub fn seed_navigate(&mut self, url: &str) {
		if url.is_empty() || url == "about:blank" {
			return;
		}
		self.steps.push(Step::Navigate { url: url.to_string() });
	}

	/// Append drained or beaconed events.
	pub fn ingest(&mut self, events: Vec<RawEvent>, now: u64) {
		for event in events {
			if event.kind == "click" {
				self.last_click_ms = Some(event.ts.unwrap_or(now));
			}
			if let Some(step) = step_from_event(&event) {
				self.steps.push(step);
			}
		}
	}

	/// Record a main-frame navigation unless it is `about:blank` or falls
	/// inside the post-click suppression window (SPA routing artifact).
	pub fn on_navigation(&mut self, url: &str, now: u64) {
		if url.is_empty() || url == "about:blank" {
			return;
		}
		if let Some(click) = self.last_click_ms {
			if now.saturating_sub(click) < self.suppress_ms {
				debug!(target = "ccb.record", url, "suppressing navigation inside post-click window");
				return;
			}
		}
		self.steps.push(Step::Navigate { url: url.to_string() });
	}

	pub fn len(&self) -> usize {
		self.steps.len()
	}

	pub fn is_empty(&self) -> bool {
		self.steps.is_empty()
	}

	/// Finalize into a normalized recording.
	pub fn finish(self) -> Recording {
		Recording {
			name: self.name,
			recorded_at: self.started_at.to_rfc3339(),
			steps: normalize_steps(self.steps),
		}
	}
}

struct ActiveTasks {
	drain: JoinHandle<()>,
	navigation: Option<JoinHandle<()>>,
	init_script_id: Option<String>,
}

/// Daemon-side recorder handle.
#[derive(Clone)]
pub struct Recorder {
	config: RecorderConfig,
	state: Arc<Mutex<Option<RecorderCore>>>,
	tasks: Arc<Mutex<Option<ActiveTasks>>>,
}

impl Recorder {
	pub fn new(config: RecorderConfig) -> Self {
		Self {
			config,
			state: Arc::new(Mutex::new(None)),
			tasks: Arc::new(Mutex::new(None)),
		}
	}

	pub async fn is_recording(&self) -> bool {
		self.state.lock().await.is_some()
	}

	pub async fn status(&self) -> RecordStatusResponse {
		let state = self.state.lock().await;
		match state.as_ref() {
			Some(core) => RecordStatusResponse {
				recording: true,
				name: Some(core.name.clone()),
				steps: core.len(),
			},
			None => RecordStatusResponse {
				recording: false,
				name: None,
				steps: 0,
			},
		}
	}

	/// Begin capturing on `page`, injecting now and on every future document.
	pub async fn start(&self, page: &Page, name: Option<String>, beacon_port: u16) -> Result<()> {
		{
			let state = self.state.lock().await;
			if state.is_some() {
				return Err(CcbError::InvalidInput("a recording is already active; stop it first".into()));
			}
		}

		let name = name.unwrap_or_else(|| format!("recording-{}", chrono::Utc::now().format("%H%M%S")));
		let mut core = RecorderCore::new(name, self.config.nav_suppress_after_click);

		let current_url = page.url().await.ok().flatten().unwrap_or_default();
		core.seed_navigate(&current_url);

		// Beacon port first so the capture script sees it, on this document
		// and on every future one.
		let injection = format!("window.__ccRecorderBeaconPort = {beacon_port};\n{CAPTURE_JS}");
		page.evaluate(injection.clone())
			.await
			.map_err(|err| CcbError::Cdp(format!("capture injection failed: {err}")))?;
		let init_script_id = match page
			.execute(
				AddScriptToEvaluateOnNewDocumentParams::builder()
					.source(injection)
					.build()
					.map_err(CcbError::Cdp)?,
			)
			.await
		{
			Ok(resp) => Some(resp.result.identifier.inner().clone()),
			Err(err) => {
				warn!(target = "ccb.record", error = %err, "init-script registration failed; capture will not survive navigation");
				None
			}
		};

		{
			let mut state = self.state.lock().await;
			*state = Some(core);
		}

		// Main-frame navigation listener.
		let navigation = match page.event_listener::<EventFrameNavigated>().await {
			Ok(mut stream) => {
				let state = Arc::clone(&self.state);
				Some(tokio::spawn(async move {
					while let Some(event) = stream.next().await {
						if event.frame.parent_id.is_some() {
							continue;
						}
						let url = event.frame.url.clone();
						let mut guard = state.lock().await;
						if let Some(core) = guard.as_mut() {
							core.on_navigation(&url, now_ms());
						}
					}
				}))
			}
			Err(err) => {
				warn!(target = "ccb.record", error = %err, "navigation listener failed; navigate steps limited to beacon data");
				None
			}
		};

		// Drain poll. Errors are swallowed: a navigation mid-poll is normal.
		let drain = {
			let state = Arc::clone(&self.state);
			let page = page.clone();
			tokio::spawn(async move {
				loop {
					tokio::time::sleep(DRAIN_INTERVAL).await;
					let events = match page.evaluate(DRAIN_JS).await {
						Ok(value) => value.into_value::<Vec<RawEvent>>().unwrap_or_default(),
						Err(_) => continue,
					};
					if events.is_empty() {
						continue;
					}
					let mut guard = state.lock().await;
					match guard.as_mut() {
						Some(core) => core.ingest(events, now_ms()),
						None => break,
					}
				}
			})
		};

		let mut tasks = self.tasks.lock().await;
		*tasks = Some(ActiveTasks {
			drain,
			navigation,
			init_script_id,
		});
		Ok(())
	}

	/// Merge beaconed events; never errors (the browser is mid-unload).
	pub async fn beacon(&self, events: Vec<RawEvent>) {
		let mut guard = self.state.lock().await;
		if let Some(core) = guard.as_mut() {
			core.ingest(events, now_ms());
		}
	}

	/// Stop capturing: final drain, listener teardown, best-effort in-page
	/// cleanup, then normalization.
	pub async fn stop(&self, page: Option<&Page>) -> Result<Recording> {
		if let Some(page) = page {
			if let Ok(value) = page.evaluate(DRAIN_JS).await {
				let events = value.into_value::<Vec<RawEvent>>().unwrap_or_default();
				let mut guard = self.state.lock().await;
				if let Some(core) = guard.as_mut() {
					core.ingest(events, now_ms());
				}
			}
		}

		if let Some(tasks) = self.tasks.lock().await.take() {
			tasks.drain.abort();
			if let Some(nav) = tasks.navigation {
				nav.abort();
			}
			if let (Some(page), Some(id)) = (page, tasks.init_script_id) {
				let params = RemoveScriptToEvaluateOnNewDocumentParams::new(
					chromiumoxide::cdp::browser_protocol::page::ScriptIdentifier::from(id),
				);
				let _ = page.execute(params).await;
			}
		}
		if let Some(page) = page {
			let _ = page.evaluate(CLEANUP_JS).await;
		}

		let core = {
			let mut guard = self.state.lock().await;
			guard.take()
		};
		match core {
			Some(core) => Ok(core.finish()),
			None => Err(CcbError::InvalidInput("no recording is active".into())),
		}
	}
}

/// Persist a recording under `<root>/<yyyy-MM-dd_HH-mm-ss>_<slug>/recording.json`.
pub fn save_recording(root: &Path, recording: &Recording) -> Result<PathBuf> {
	let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
	let dir = root.join(format!("{stamp}_{}", slugify(&recording.name)));
	std::fs::create_dir_all(&dir)?;
	let path = dir.join("recording.json");
	std::fs::write(&path, serde_json::to_string_pretty(recording)?)?;
	Ok(path)
}

/// Newest saved recording whose directory slug contains `query`.
pub fn find_recording(root: &Path, query: &str) -> Result<Option<Recording>> {
	let needle = slugify(query);
	let Ok(entries) = std::fs::read_dir(root) else {
		return Ok(None);
	};
	let mut dirs: Vec<PathBuf> = entries
		.flatten()
		.map(|e| e.path())
		.filter(|p| p.is_dir() && p.file_name().is_some_and(|n| n.to_string_lossy().contains(&needle)))
		.collect();
	// Timestamped prefixes sort chronologically; newest last.
	dirs.sort();
	let Some(dir) = dirs.pop() else {
		return Ok(None);
	};
	let raw = std::fs::read_to_string(dir.join("recording.json"))?;
	Ok(Some(serde_json::from_str(&raw)?))
}

fn slugify(name: &str) -> String {
	let mut out = String::with_capacity(name.len());
	for c in name.chars() {
		if c.is_ascii_alphanumeric() {
			out.push(c.to_ascii_lowercase());
		} else if !out.ends_with('-') {
			out.push('-');
		}
	}
	out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
	use tempfile::tempdir;

	use super::*;

	fn click_event(ts: u64) -> RawEvent {
		serde_json::from_value(serde_json::json!({
			"kind": "click",
			"locators": [{"strategy": "role", "role": "button", "name": "Go"}],
			"ts": ts,
		}))
		.unwrap()
	}

	#[test]
	fn seed_skips_about_blank() {
		let mut core = RecorderCore::new("r", Duration::from_secs(2));
		core.seed_navigate("about:blank");
		assert!(core.is_empty());
		core.seed_navigate("https://example.com");
		assert_eq!(core.len(), 1);
	}

	#[test]
	fn spa_navigation_suppressed_after_click() {
		let mut core = RecorderCore::new("r", Duration::from_secs(2));
		core.ingest(vec![click_event(10_000)], 10_000);
		// 1.5s after the click: suppressed.
		core.on_navigation("https://app.example.com/inbox", 11_500);
		assert_eq!(core.len(), 1, "only the click should be recorded");
		// 3s after the click: a real navigation.
		core.on_navigation("https://app.example.com/other", 13_000);
		assert_eq!(core.len(), 2);
	}

	#[test]
	fn suppression_window_is_configurable() {
		let mut core = RecorderCore::new("r", Duration::from_millis(100));
		core.ingest(vec![click_event(1_000)], 1_000);
		core.on_navigation("https://example.com/next", 1_500);
		assert_eq!(core.len(), 2, "navigation outside the shortened window records");
	}

	#[test]
	fn finish_normalizes() {
		let mut core = RecorderCore::new("login", Duration::from_secs(2));
		core.seed_navigate("https://example.com/login");
		core.on_navigation("https://example.com/login", 60_000);
		let recording = core.finish();
		assert_eq!(recording.name, "login");
		assert_eq!(recording.steps.len(), 1);
	}

	#[test]
	fn save_and_find_round_trip() {
		let dir = tempdir().unwrap();
		let recording = Recording {
			name: "Checkout Flow".into(),
			recorded_at: chrono::Utc::now().to_rfc3339(),
			steps: vec![Step::Navigate { url: "https://shop.example".into() }],
		};
		let path = save_recording(dir.path(), &recording).unwrap();
		assert!(path.ends_with("recording.json"));
		assert!(path.parent().unwrap().file_name().unwrap().to_string_lossy().contains("checkout-flow"));

		let found = find_recording(dir.path(), "Checkout").unwrap().unwrap();
		assert_eq!(found.steps.len(), 1);
		assert!(find_recording(dir.path(), "refund").unwrap().is_none());
	}

	#[test]
	fn slugify_flattens() {
		assert_eq!(slugify("Login / SSO flow"), "login-sso-flow");
		assert_eq!(slugify("  --x--  "), "x");
	}

	#[test]
	fn capture_script_has_required_hooks() {
		for needle in [
			"__ccRecorderActive",
			"__ccRecorderEvents",
			"__ccRecorderBeaconPort",
			"beforeunload",
			"sendBeacon",
			"nth-of-type",
		] {
			assert!(CAPTURE_JS.contains(needle), "capture script misses {needle}");
		}
	}
}

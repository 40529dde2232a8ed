//! Request and response bodies for every daemon route.
//!
//! All fields are camelCase on the wire. Optional targeting fields default to
//! the focused tab; `targetId` pins a verb to a specific CDP target.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::recording::Recording;

/// Browser families the daemon can drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
	#[default]
	Chrome,
	Edge,
	Brave,
}

impl std::fmt::Display for BrowserKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			BrowserKind::Chrome => write!(f, "chrome"),
			BrowserKind::Edge => write!(f, "edge"),
			BrowserKind::Brave => write!(f, "brave"),
		}
	}
}

impl std::str::FromStr for BrowserKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"chrome" | "chromium" => Ok(BrowserKind::Chrome),
			"edge" | "msedge" => Ok(BrowserKind::Edge),
			"brave" => Ok(BrowserKind::Brave),
			other => Err(format!("unknown browser kind: {other}")),
		}
	}
}

/// Interaction pacing mode.
///
/// `fast` uses direct primitives with zero injected delay; `human` adds the
/// randomized timing engine; `stealth` is `human` plus suppression of the
/// workspace indicator bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
	#[default]
	Fast,
	Human,
	Stealth,
}

impl Mode {
	pub fn is_humanized(self) -> bool {
		matches!(self, Mode::Human | Mode::Stealth)
	}
}

impl std::fmt::Display for Mode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Mode::Fast => write!(f, "fast"),
			Mode::Human => write!(f, "human"),
			Mode::Stealth => write!(f, "stealth"),
		}
	}
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
	/// Browser kind, workspace slug, or alias; aliases win over kinds.
	#[serde(default)]
	pub browser: Option<String>,
	#[serde(default)]
	pub workspace: Option<String>,
	#[serde(default)]
	pub incognito: bool,
	#[serde(default)]
	pub headless: bool,
	/// Use the real OS profile directory instead of a managed one.
	#[serde(default)]
	pub system_profile: bool,
	/// Override the workspace's CDP port.
	#[serde(default)]
	pub port: Option<u16>,
	/// Explicit executable path, bypassing detection.
	#[serde(default)]
	pub executable: Option<String>,
	#[serde(default)]
	pub mode: Option<Mode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
	/// False when an already-running browser answered the CDP probe.
	pub started: bool,
	pub browser: BrowserKind,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub workspace: Option<String>,
	pub cdp_port: u16,
	pub mode: Mode,
	#[serde(default)]
	pub tabs: Vec<TabInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
	pub active: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub browser: Option<BrowserKind>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub workspace: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cdp_port: Option<u16>,
	pub incognito: bool,
	pub mode: Mode,
	pub pid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedBrowser {
	pub browser: BrowserKind,
	pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowsersResponse {
	pub browsers: Vec<DetectedBrowser>,
}

/// Disk-backed workspace descriptor as served by `/profiles`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSummary {
	pub name: String,
	pub browser: BrowserKind,
	pub workspace: String,
	pub cdp_port: u16,
	pub daemon_port: u16,
	#[serde(default)]
	pub purpose: String,
	#[serde(default)]
	pub aliases: Vec<String>,
	#[serde(default)]
	pub favorites: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub default_mode: Option<Mode>,
	#[serde(default)]
	pub indicator: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilesResponse {
	pub workspaces: Vec<WorkspaceSummary>,
}

// ---------------------------------------------------------------------------
// Navigation and page info
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
	#[default]
	Load,
	Domcontentloaded,
	Networkidle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateRequest {
	pub url: String,
	#[serde(default)]
	pub wait_until: WaitUntil,
	/// Milliseconds; defaults to 30s.
	#[serde(default)]
	pub timeout: Option<u64>,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResponse {
	pub url: String,
	pub title: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub captcha: Option<CaptchaSolveResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRequest {
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfoResponse {
	pub url: String,
	pub title: String,
	pub target_id: String,
	pub mode: Mode,
	pub console_messages: usize,
	pub page_errors: usize,
	pub network_requests: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextResponse {
	pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtmlResponse {
	pub html: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
	/// Compact accessibility tree, one `- role "name" [ref=eN]` line per node.
	pub snapshot: String,
	pub refs: usize,
	pub url: String,
	pub title: String,
}

// ---------------------------------------------------------------------------
// Interaction verbs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
	#[default]
	Left,
	Right,
	Middle,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickRequest {
	/// Exactly one of `ref`, `text`, `selector` must be set.
	#[serde(default, rename = "ref")]
	pub element_ref: Option<String>,
	#[serde(default)]
	pub text: Option<String>,
	#[serde(default)]
	pub selector: Option<String>,
	#[serde(default)]
	pub double: bool,
	#[serde(default)]
	pub button: MouseButton,
	/// Subset of Control, Shift, Alt, Meta.
	#[serde(default)]
	pub modifiers: Vec<String>,
	/// Milliseconds; default 8s, clamped to [500, 60000].
	#[serde(default)]
	pub timeout: Option<u64>,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickResponse {
	pub url: String,
	pub navigated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeRequest {
	#[serde(default, rename = "ref")]
	pub element_ref: Option<String>,
	/// Target by visible text content (distinct from `text`, the value).
	#[serde(default)]
	pub text_content: Option<String>,
	#[serde(default)]
	pub selector: Option<String>,
	/// The new value of the field.
	pub text: String,
	/// Press Enter after typing.
	#[serde(default)]
	pub submit: bool,
	/// Fast mode only: per-key 75ms delay instead of `fill`.
	#[serde(default)]
	pub slowly: bool,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PressRequest {
	pub key: String,
	#[serde(default, rename = "ref")]
	pub element_ref: Option<String>,
	#[serde(default)]
	pub selector: Option<String>,
	/// Hold duration in milliseconds.
	#[serde(default)]
	pub delay: Option<u64>,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoverRequest {
	#[serde(default, rename = "ref")]
	pub element_ref: Option<String>,
	#[serde(default)]
	pub text: Option<String>,
	#[serde(default)]
	pub selector: Option<String>,
	#[serde(default)]
	pub target_id: Option<String>,
}

/// Ref-to-ref or coordinate-to-coordinate drag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragRequest {
	#[serde(default)]
	pub start_ref: Option<String>,
	#[serde(default)]
	pub end_ref: Option<String>,
	#[serde(default)]
	pub start_x: Option<f64>,
	#[serde(default)]
	pub start_y: Option<f64>,
	#[serde(default)]
	pub end_x: Option<f64>,
	#[serde(default)]
	pub end_y: Option<f64>,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
	#[serde(default, rename = "ref")]
	pub element_ref: Option<String>,
	#[serde(default)]
	pub selector: Option<String>,
	/// One or more option values.
	#[serde(default)]
	pub values: Vec<String>,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillField {
	#[serde(rename = "ref")]
	pub element_ref: String,
	/// Input kind: `checkbox` and `radio` use set-checked semantics.
	#[serde(default, rename = "type")]
	pub field_type: Option<String>,
	pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillRequest {
	pub fields: Vec<FillField>,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
	Up,
	#[default]
	Down,
	Left,
	Right,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollRequest {
	/// Scroll this element into view instead of scrolling the viewport.
	#[serde(default, rename = "ref")]
	pub element_ref: Option<String>,
	#[serde(default)]
	pub direction: ScrollDirection,
	/// Pixels; default 500.
	#[serde(default)]
	pub amount: Option<f64>,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitRequest {
	#[serde(default)]
	pub time_ms: Option<u64>,
	/// Wait for this text to become visible.
	#[serde(default)]
	pub text: Option<String>,
	/// Wait for this text to disappear.
	#[serde(default)]
	pub text_gone: Option<String>,
	#[serde(default)]
	pub selector: Option<String>,
	/// Substring match against the page URL.
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub load_state: Option<WaitUntil>,
	/// JS predicate evaluated until truthy.
	#[serde(default, rename = "fn")]
	pub function: Option<String>,
	/// Milliseconds; default 20s.
	#[serde(default)]
	pub timeout: Option<u64>,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
	/// Source of a function expression; called with the ref-resolved element
	/// when `ref` is present, otherwise with no arguments.
	pub function: String,
	#[serde(default, rename = "ref")]
	pub element_ref: Option<String>,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
	pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
	#[default]
	Png,
	Jpeg,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRequest {
	#[serde(default)]
	pub full_page: bool,
	/// Element screenshot by ref; disallows `fullPage`.
	#[serde(default, rename = "ref")]
	pub element_ref: Option<String>,
	#[serde(default)]
	pub selector: Option<String>,
	#[serde(default)]
	pub format: ImageFormat,
	/// JPEG quality 0-100.
	#[serde(default)]
	pub quality: Option<u32>,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotResponse {
	/// Base64-encoded image payload.
	pub data: String,
	pub format: ImageFormat,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
	#[serde(default, rename = "ref")]
	pub element_ref: Option<String>,
	#[serde(default)]
	pub selector: Option<String>,
	pub files: Vec<String>,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeRequest {
	pub width: u32,
	pub height: u32,
	#[serde(default)]
	pub target_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Tabs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
	pub target_id: String,
	pub url: String,
	pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabsResponse {
	pub tabs: Vec<TabInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabOpenRequest {
	#[serde(default)]
	pub url: Option<String>,
	/// Register the new tab under this tab-session.
	#[serde(default)]
	pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabCloseRequest {
	#[serde(default)]
	pub target_id: Option<String>,
	/// Close every tab belonging to this tab-session and remove it.
	#[serde(default)]
	pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabFocusRequest {
	pub target_id: String,
}

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeRequest {
	pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeResponse {
	pub mode: Mode,
}

// ---------------------------------------------------------------------------
// CAPTCHA
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaDetectResponse {
	pub detected: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub captcha_type: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub selector: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaSolveRequest {
	/// Default 3.
	#[serde(default)]
	pub max_attempts: Option<u32>,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaSolveResponse {
	pub solved: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub captcha_type: Option<String>,
	pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Tab sessions
// ---------------------------------------------------------------------------

/// Named tab group with TTL as it appears on the wire and in `sessions.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSessionRecord {
	pub id: String,
	pub name: String,
	/// Milliseconds since the epoch.
	pub created_at: u64,
	pub last_activity: u64,
	/// 0 means the session never expires.
	pub ttl_ms: u64,
	pub tab_ids: Vec<String>,
	#[serde(default)]
	pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreateRequest {
	pub name: String,
	#[serde(default)]
	pub ttl_ms: Option<u64>,
	#[serde(default)]
	pub metadata: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdRequest {
	pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsResponse {
	pub sessions: Vec<TabSessionRecord>,
}

/// One pruned session and the tabs the caller should now close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrunedSession {
	pub session_id: String,
	pub tab_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneResponse {
	pub pruned: Vec<PrunedSession>,
}

// ---------------------------------------------------------------------------
// Record / replay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStartRequest {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStatusResponse {
	pub recording: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	pub steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStopResponse {
	#[serde(flatten)]
	pub recording: Recording,
	/// Where the recording was persisted.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRequest {
	/// Inline recording; wins over `name`.
	#[serde(default)]
	pub recording: Option<Recording>,
	/// Slug query resolved against saved recordings (newest match wins).
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub mode: Option<Mode>,
	/// Per-locator visibility timeout in milliseconds; default 8s.
	#[serde(default)]
	pub timeout_ms: Option<u64>,
	#[serde(default)]
	pub target_id: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn browser_kind_parses_aliases() {
		assert_eq!("chromium".parse::<BrowserKind>().unwrap(), BrowserKind::Chrome);
		assert_eq!("msedge".parse::<BrowserKind>().unwrap(), BrowserKind::Edge);
		assert!("firefox".parse::<BrowserKind>().is_err());
	}

	#[test]
	fn click_ref_uses_ref_key() {
		let req: ClickRequest = serde_json::from_str(r#"{"ref":"e12","double":true}"#).unwrap();
		assert_eq!(req.element_ref.as_deref(), Some("e12"));
		assert!(req.double);
		assert_eq!(req.button, MouseButton::Left);
	}

	#[test]
	fn type_separates_value_from_text_target() {
		let req: TypeRequest = serde_json::from_str(r#"{"textContent":"Email","text":"user@example.com","submit":true}"#).unwrap();
		assert_eq!(req.text_content.as_deref(), Some("Email"));
		assert_eq!(req.text, "user@example.com");
		assert!(req.submit);
	}

	#[test]
	fn wait_request_fn_alias() {
		let req: WaitRequest = serde_json::from_str(r#"{"fn":"() => document.title !== ''"}"#).unwrap();
		assert!(req.function.is_some());
	}

	#[test]
	fn session_record_camel_case() {
		let rec = TabSessionRecord {
			id: "sess_ab12cd34".into(),
			name: "research".into(),
			created_at: 1,
			last_activity: 2,
			ttl_ms: 1_800_000,
			tab_ids: vec!["T1".into()],
			metadata: HashMap::new(),
		};
		let json = serde_json::to_value(&rec).unwrap();
		assert_eq!(json["ttlMs"], 1_800_000);
		assert_eq!(json["tabIds"][0], "T1");
	}

	#[test]
	fn mode_humanized() {
		assert!(!Mode::Fast.is_humanized());
		assert!(Mode::Human.is_humanized());
		assert!(Mode::Stealth.is_humanized());
	}
}

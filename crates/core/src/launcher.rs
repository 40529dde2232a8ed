//! Browser process lifecycle: detection, launch, readiness, teardown.
//!
//! The daemon never speaks CDP here; this module only gets a Chromium-family
//! process running with `--remote-debugging-port` open on loopback and tears
//! it down again. Readiness and liveness are judged entirely through the
//! `/json/version` and `/json/list` HTTP probes.

use std::net::TcpListener as StdTcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use ccb_protocol::{DetectedBrowser, TabInfo};

use crate::error::{CcbError, Result};
use crate::paths;
use crate::types::BrowserKind;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(300);
const READY_TIMEOUT: Duration = Duration::from_secs(15);
const STOP_SETTLE: Duration = Duration::from_millis(500);

/// Fully resolved launch parameters.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
	pub browser: BrowserKind,
	pub workspace: Option<String>,
	pub port: u16,
	pub incognito: bool,
	pub headless: bool,
	pub system_profile: bool,
	pub executable: Option<PathBuf>,
}

/// A browser the launcher spawned or attached to.
#[derive(Debug, Clone)]
pub struct LaunchOutcome {
	/// False when an already-running browser answered the CDP probe.
	pub started: bool,
	pub tabs: Vec<TabInfo>,
	pub pid: Option<u32>,
	pub user_data_dir: Option<PathBuf>,
	/// Set for incognito launches; removed after a confirmed stop.
	pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct JsonVersion {
	#[serde(rename = "webSocketDebuggerUrl")]
	web_socket_debugger_url: String,
}

#[derive(Debug, Deserialize)]
struct JsonTarget {
	id: String,
	#[serde(rename = "type")]
	kind: String,
	#[serde(default)]
	url: String,
	#[serde(default)]
	title: String,
}

/// Ensure a browser with CDP on `127.0.0.1:<port>` is running.
pub async fn ensure_running(req: &LaunchRequest) -> Result<LaunchOutcome> {
	// 1) Something already answers CDP on this port: attach, don't launch.
	if probe_version(req.port, VERSION_PROBE_TIMEOUT).await.is_some() {
		info!(target = "ccb.launch", port = req.port, "browser already running, attaching");
		return Ok(LaunchOutcome {
			started: false,
			tabs: list_tabs(req.port).await.unwrap_or_default(),
			pid: None,
			user_data_dir: None,
			temp_dir: None,
		});
	}

	// 2) Locate the executable.
	let exe = resolve_executable(req.browser, req.executable.as_deref())?;

	// 3) Choose the user-data directory.
	let (user_data_dir, temp_dir) = choose_user_data_dir(req)?;

	// 4) The port may be bound by something that is not a CDP endpoint.
	if !port_available(req.port) {
		return Err(CcbError::PortInUse {
			port: req.port,
			hint: "another process is bound to the debugging port; pick a different port or stop it".into(),
		});
	}

	// 5) Spawn detached.
	let args = build_launch_args(req, &user_data_dir);
	info!(target = "ccb.launch", exe = %exe.display(), port = req.port, "spawning browser");
	debug!(target = "ccb.launch", ?args, "launch arguments");
	let child = tokio::process::Command::new(&exe)
		.args(&args)
		.stdin(std::process::Stdio::null())
		.stdout(std::process::Stdio::null())
		.stderr(std::process::Stdio::null())
		.kill_on_drop(false)
		.spawn()
		.map_err(|err| CcbError::LaunchFailed(format!("spawn {} failed: {err}", exe.display())))?;
	let pid = child.id();
	// The child is intentionally dropped; the runtime reaps it when it exits.
	drop(child);

	// 6) Wait for the CDP endpoint.
	wait_until_ready(req.port).await?;

	Ok(LaunchOutcome {
		started: true,
		tabs: list_tabs(req.port).await.unwrap_or_default(),
		pid,
		user_data_dir: Some(user_data_dir),
		temp_dir,
	})
}

/// Best-effort browser stop ladder: `/json/close`, SIGTERM by pid, then a
/// port-owner kill on Windows. Success requires the version probe to go dark.
pub async fn stop_browser(port: u16, pid: Option<u32>) -> Result<bool> {
	let client = probe_client()?;
	let _ = client
		.put(format!("http://127.0.0.1:{port}/json/close"))
		.send()
		.await;

	sleep(STOP_SETTLE).await;
	if probe_version(port, VERSION_PROBE_TIMEOUT).await.is_none() {
		return Ok(true);
	}

	if let Some(pid) = pid {
		terminate_pid(pid).await;
	} else {
		#[cfg(windows)]
		if let Some(owner) = pid_listening_on(port).await {
			terminate_pid(owner).await;
		}
	}

	sleep(STOP_SETTLE).await;
	Ok(probe_version(port, VERSION_PROBE_TIMEOUT).await.is_none())
}

/// Remove an incognito temp profile after a confirmed stop.
pub fn cleanup_temp_profile(dir: &Path) {
	if let Err(err) = std::fs::remove_dir_all(dir) {
		if err.kind() != std::io::ErrorKind::NotFound {
			warn!(target = "ccb.launch", path = %dir.display(), error = %err, "failed to remove incognito profile");
		}
	}
}

/// Installed browsers on this host, candidate-path scan plus PATH lookup.
pub fn detect_browsers() -> Vec<DetectedBrowser> {
	let mut out = Vec::new();
	for kind in [BrowserKind::Chrome, BrowserKind::Edge, BrowserKind::Brave] {
		if let Ok(path) = resolve_executable(kind, None) {
			out.push(DetectedBrowser {
				browser: kind,
				path: path.to_string_lossy().into_owned(),
			});
		}
	}
	out
}

/// Find the executable for a browser kind, honoring a caller override.
pub fn resolve_executable(kind: BrowserKind, override_path: Option<&Path>) -> Result<PathBuf> {
	if let Some(path) = override_path {
		if path.is_file() {
			return Ok(path.to_path_buf());
		}
		return Err(CcbError::LaunchFailed(format!("executable override not found: {}", path.display())));
	}

	for candidate in candidate_paths(kind) {
		let path = PathBuf::from(candidate);
		if path.is_file() {
			return Ok(path);
		}
	}
	for name in path_names(kind) {
		if let Ok(path) = which::which(name) {
			return Ok(path);
		}
	}
	Err(CcbError::LaunchFailed(format!(
		"no {kind} executable found; install it or pass an explicit path"
	)))
}

/// Command-line arguments for a launch. Pure; unit-tested.
///
/// `--enable-automation` is deliberately absent: it flips
/// `navigator.webdriver` and is the loudest bot signal. The workspace
/// indicator bar covers the "this window is automated" UX instead.
pub fn build_launch_args(req: &LaunchRequest, user_data_dir: &Path) -> Vec<String> {
	let mut args = vec![
		format!("--remote-debugging-port={}", req.port),
		format!("--user-data-dir={}", user_data_dir.display()),
		"--no-first-run".to_string(),
		"--no-default-browser-check".to_string(),
		"--new-window".to_string(),
	];
	if req.system_profile {
		args.push("--profile-directory=Default".to_string());
	} else {
		args.push("--disable-sync".to_string());
	}
	if req.incognito {
		args.push("--incognito".to_string());
	}
	if req.headless {
		args.push("--headless=new".to_string());
	}
	args.push("about:blank".to_string());
	args
}

fn choose_user_data_dir(req: &LaunchRequest) -> Result<(PathBuf, Option<PathBuf>)> {
	if req.incognito {
		let dir = tempfile::Builder::new()
			.prefix("ccb-incognito-")
			.tempdir()
			.map_err(|err| CcbError::LaunchFailed(format!("cannot create incognito profile dir: {err}")))?
			.keep();
		return Ok((dir.clone(), Some(dir)));
	}

	if req.system_profile {
		let dir = system_profile_dir(req.browser)?;
		if browser_main_process_running(req.browser) {
			return Err(CcbError::LaunchFailed(format!(
				"{} is already running on its system profile; close it first or use a workspace profile",
				req.browser
			)));
		}
		return Ok((dir, None));
	}

	let workspace = req.workspace.as_deref().unwrap_or("default");
	let dir = paths::workspace_dir(req.browser, workspace)?;
	std::fs::create_dir_all(&dir)?;
	Ok((dir, None))
}

/// Probe `/json/version`; `Some` means a CDP endpoint answered.
pub async fn probe_version(port: u16, timeout: Duration) -> Option<String> {
	let client = reqwest::Client::builder().no_proxy().timeout(timeout).build().ok()?;
	let resp = client
		.get(format!("http://127.0.0.1:{port}/json/version"))
		.send()
		.await
		.ok()?;
	if !resp.status().is_success() {
		return None;
	}
	let body: JsonVersion = resp.json().await.ok()?;
	Some(body.web_socket_debugger_url)
}

/// `/json/list` filtered to `type == "page"`.
pub async fn list_tabs(port: u16) -> Result<Vec<TabInfo>> {
	let client = probe_client()?;
	let targets: Vec<JsonTarget> = client
		.get(format!("http://127.0.0.1:{port}/json/list"))
		.send()
		.await
		.map_err(|err| CcbError::Cdp(format!("tab list probe failed: {err}")))?
		.json()
		.await
		.map_err(|err| CcbError::Cdp(format!("tab list parse failed: {err}")))?;
	Ok(targets
		.into_iter()
		.filter(|t| t.kind == "page")
		.map(|t| TabInfo {
			target_id: t.id,
			url: t.url,
			title: t.title,
		})
		.collect())
}

async fn wait_until_ready(port: u16) -> Result<()> {
	let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
	loop {
		if probe_version(port, VERSION_PROBE_TIMEOUT).await.is_some() {
			return Ok(());
		}
		if tokio::time::Instant::now() >= deadline {
			return Err(CcbError::Timeout {
				ms: READY_TIMEOUT.as_millis() as u64,
				what: format!("browser CDP endpoint on port {port} never became ready"),
			});
		}
		sleep(READY_POLL_INTERVAL).await;
	}
}

fn probe_client() -> Result<reqwest::Client> {
	reqwest::Client::builder()
		.no_proxy()
		.timeout(Duration::from_secs(5))
		.build()
		.map_err(|err| CcbError::Cdp(format!("cannot build probe client: {err}")))
}

fn port_available(port: u16) -> bool {
	StdTcpListener::bind(("127.0.0.1", port)).is_ok()
}

async fn terminate_pid(pid: u32) {
	#[cfg(unix)]
	{
		let _ = tokio::process::Command::new("kill")
			.args(["-TERM", &pid.to_string()])
			.output()
			.await;
	}
	#[cfg(windows)]
	{
		let _ = tokio::process::Command::new("taskkill")
			.args(["/PID", &pid.to_string(), "/F"])
			.output()
			.await;
	}
}

#[cfg(windows)]
async fn pid_listening_on(port: u16) -> Option<u32> {
	let output = tokio::process::Command::new("netstat").args(["-ano"]).output().await.ok()?;
	let text = String::from_utf8_lossy(&output.stdout);
	let needle = format!(":{port}");
	for line in text.lines() {
		if line.contains(&needle) && line.contains("LISTENING") {
			if let Some(pid) = line.split_whitespace().last().and_then(|p| p.parse().ok()) {
				return Some(pid);
			}
		}
	}
	None
}

fn candidate_paths(kind: BrowserKind) -> &'static [&'static str] {
	#[cfg(target_os = "linux")]
	return match kind {
		BrowserKind::Chrome => &[
			"/usr/bin/google-chrome",
			"/usr/bin/google-chrome-stable",
			"/usr/bin/chromium",
			"/usr/bin/chromium-browser",
			"/snap/bin/chromium",
		],
		BrowserKind::Edge => &["/usr/bin/microsoft-edge", "/usr/bin/microsoft-edge-stable"],
		BrowserKind::Brave => &["/usr/bin/brave-browser", "/usr/bin/brave"],
	};
	#[cfg(target_os = "macos")]
	return match kind {
		BrowserKind::Chrome => &["/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"],
		BrowserKind::Edge => &["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"],
		BrowserKind::Brave => &["/Applications/Brave Browser.app/Contents/MacOS/Brave Browser"],
	};
	#[cfg(target_os = "windows")]
	return match kind {
		BrowserKind::Chrome => &[
			"C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe",
			"C:\\Program Files (x86)\\Google\\Chrome\\Application\\chrome.exe",
		],
		BrowserKind::Edge => &["C:\\Program Files (x86)\\Microsoft\\Edge\\Application\\msedge.exe"],
		BrowserKind::Brave => &["C:\\Program Files\\BraveSoftware\\Brave-Browser\\Application\\brave.exe"],
	};
	#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
	{
		let _ = kind;
		&[]
	}
}

fn path_names(kind: BrowserKind) -> &'static [&'static str] {
	match kind {
		BrowserKind::Chrome => &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser", "chrome"],
		BrowserKind::Edge => &["microsoft-edge", "msedge"],
		BrowserKind::Brave => &["brave-browser", "brave"],
	}
}

fn system_profile_dir(kind: BrowserKind) -> Result<PathBuf> {
	#[cfg(target_os = "linux")]
	{
		let config = dirs::config_dir().ok_or_else(|| CcbError::LaunchFailed("no config directory".into()))?;
		return Ok(match kind {
			BrowserKind::Chrome => config.join("google-chrome"),
			BrowserKind::Edge => config.join("microsoft-edge"),
			BrowserKind::Brave => config.join("BraveSoftware/Brave-Browser"),
		});
	}
	#[cfg(target_os = "macos")]
	{
		let support = dirs::data_dir().ok_or_else(|| CcbError::LaunchFailed("no application support directory".into()))?;
		return Ok(match kind {
			BrowserKind::Chrome => support.join("Google/Chrome"),
			BrowserKind::Edge => support.join("Microsoft Edge"),
			BrowserKind::Brave => support.join("BraveSoftware/Brave-Browser"),
		});
	}
	#[cfg(target_os = "windows")]
	{
		let local = crate::paths::local_app_data()?;
		return Ok(match kind {
			BrowserKind::Chrome => local.join("Google\\Chrome\\User Data"),
			BrowserKind::Edge => local.join("Microsoft\\Edge\\User Data"),
			BrowserKind::Brave => local.join("BraveSoftware\\Brave-Browser\\User Data"),
		});
	}
	#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
	{
		let _ = kind;
		Err(CcbError::LaunchFailed("system profiles are not supported on this platform".into()))
	}
}

/// True when the browser's own (non-debug) main process is running, which
/// would hold the system profile's singleton lock.
fn browser_main_process_running(kind: BrowserKind) -> bool {
	#[cfg(unix)]
	{
		let Ok(output) = std::process::Command::new("ps").args(["aux"]).output() else {
			return false;
		};
		let text = String::from_utf8_lossy(&output.stdout);
		let names: &[&str] = match kind {
			BrowserKind::Chrome => &["chrome", "chromium"],
			BrowserKind::Edge => &["msedge", "microsoft-edge"],
			BrowserKind::Brave => &["brave"],
		};
		text.lines().any(|line| {
			names.iter().any(|n| line.contains(n)) && !line.contains("--remote-debugging-port=") && !line.contains("--type=")
		})
	}
	#[cfg(not(unix))]
	{
		let _ = kind;
		false
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn req(incognito: bool, headless: bool, system_profile: bool) -> LaunchRequest {
		LaunchRequest {
			browser: BrowserKind::Chrome,
			workspace: Some("work".into()),
			port: 9222,
			incognito,
			headless,
			system_profile,
			executable: None,
		}
	}

	#[test]
	fn launch_args_default_profile() {
		let args = build_launch_args(&req(false, false, false), Path::new("/data/chrome-work"));
		assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
		assert!(args.contains(&"--disable-sync".to_string()));
		assert!(!args.iter().any(|a| a.starts_with("--profile-directory")));
		assert!(!args.iter().any(|a| a.contains("enable-automation")));
		assert_eq!(args.last().unwrap(), "about:blank");
	}

	#[test]
	fn launch_args_incognito_headless() {
		let args = build_launch_args(&req(true, true, false), Path::new("/tmp/x"));
		assert!(args.contains(&"--incognito".to_string()));
		assert!(args.contains(&"--headless=new".to_string()));
	}

	#[test]
	fn launch_args_system_profile() {
		let args = build_launch_args(&req(false, false, true), Path::new("/home/u/.config/google-chrome"));
		assert!(args.contains(&"--profile-directory=Default".to_string()));
		assert!(!args.contains(&"--disable-sync".to_string()));
	}

	#[test]
	fn executable_override_must_exist() {
		let err = resolve_executable(BrowserKind::Chrome, Some(Path::new("/definitely/not/here"))).unwrap_err();
		assert!(matches!(err, CcbError::LaunchFailed(_)));
	}

	#[tokio::test]
	async fn probe_version_fails_fast_on_closed_port() {
		// Nothing listens on this port in the test environment.
		assert!(probe_version(1, Duration::from_millis(300)).await.is_none());
	}
}

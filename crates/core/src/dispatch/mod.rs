//! The daemon value: every API verb is a method here.
//!
//! HTTP handlers are thin adapters over [`Daemon`]; all mutable state (the
//! active session, connection cache, mode, sessions map, recorder) lives
//! behind its own small lock so verbs that race on different subsystems do
//! not serialize. Verbs that race on the same page are last-writer-wins by
//! design.

mod input;
mod navigate;
mod query;
mod record;
mod tabs;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::Page;
use tokio::sync::Mutex;
use tracing::{info, warn};

use ccb_protocol::{
	BrowsersResponse, Mode, ProfilesResponse, PrunedSession, SessionCreateRequest, SessionsResponse, StartRequest,
	StartResponse, StatusResponse, TabSessionRecord,
};

use crate::connection::{Connection, ConnectionCache};
use crate::error::{CcbError, Result};
use crate::launcher::{self, LaunchRequest};
use crate::lockfile::DaemonLock;
use crate::page::locator::LocatorSpec;
use crate::page::{PageEntry, PageRegistry, RefCache};
use crate::recorder::{Recorder, RecorderConfig};
use crate::sessions::{SWEEP_INTERVAL_SECS, TabSessionManager};
use crate::types::ActiveSession;
use crate::workspace::{WorkspaceConfig, WorkspaceStore};

const INDICATOR_JS: &str = include_str!("../js/indicator.js");

/// Daemon-wide settings fixed at construction.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
	/// HTTP port the daemon serves on; also the beacon port.
	pub http_port: u16,
	/// Workspace descriptor root; `None` uses the platform default.
	pub workspaces_root: Option<PathBuf>,
	/// Recording storage root; `None` uses the platform default.
	pub recordings_root: Option<PathBuf>,
	pub recorder: RecorderConfig,
}

impl Default for DaemonConfig {
	fn default() -> Self {
		Self {
			http_port: 18791,
			workspaces_root: None,
			recordings_root: None,
			recorder: RecorderConfig::default(),
		}
	}
}

struct BrowserProcess {
	pid: Option<u32>,
	temp_dir: Option<PathBuf>,
}

pub struct Daemon {
	config: DaemonConfig,
	store: WorkspaceStore,
	active: Mutex<Option<ActiveSession>>,
	active_config: Mutex<Option<WorkspaceConfig>>,
	process: Mutex<Option<BrowserProcess>>,
	mode: Mutex<Mode>,
	pub(crate) connections: ConnectionCache,
	pub(crate) registry: PageRegistry,
	pub(crate) ref_cache: Mutex<RefCache>,
	pub sessions: TabSessionManager,
	pub(crate) recorder: Recorder,
}

impl Daemon {
	pub fn new(config: DaemonConfig) -> Result<Self> {
		let store = match &config.workspaces_root {
			Some(root) => WorkspaceStore::with_root(root),
			None => WorkspaceStore::open_default()?,
		};
		let duplicates = store.duplicate_aliases();
		if !duplicates.is_empty() {
			warn!(target = "ccb.daemon", ?duplicates, "duplicate workspace aliases; first match wins");
		}
		let recorder = Recorder::new(config.recorder.clone());
		Ok(Self {
			config,
			store,
			active: Mutex::new(None),
			active_config: Mutex::new(None),
			process: Mutex::new(None),
			mode: Mutex::new(Mode::default()),
			connections: ConnectionCache::new(),
			registry: PageRegistry::new(),
			ref_cache: Mutex::new(RefCache::new()),
			sessions: TabSessionManager::new(),
			recorder,
		})
	}

	pub fn config(&self) -> &DaemonConfig {
		&self.config
	}

	// -- lifecycle ----------------------------------------------------------

	/// Bind the daemon to a browser: resolve the workspace, ensure the
	/// browser process, connect CDP, observe existing pages.
	pub async fn start(&self, req: StartRequest) -> Result<StartResponse> {
		{
			let active = self.active.lock().await;
			if let Some(session) = active.as_ref() {
				return Err(CcbError::SessionMismatch(format!(
					"a session is already active ({} port {}); call /stop first",
					session.browser, session.cdp_port
				)));
			}
		}

		let selection = self.store.resolve(req.browser.as_deref(), req.workspace.as_deref())?;
		let workspace = if req.incognito { None } else { selection.workspace.clone() };
		let port = req.port.or(selection.cdp_port).unwrap_or(9222);

		let launch = LaunchRequest {
			browser: selection.browser,
			workspace: workspace.clone(),
			port,
			incognito: req.incognito,
			headless: req.headless,
			system_profile: req.system_profile,
			executable: req.executable.as_ref().map(PathBuf::from),
		};
		let outcome = launcher::ensure_running(&launch).await?;

		let session = ActiveSession::new(selection.browser, workspace.clone(), port, req.incognito);
		let mode = req
			.mode
			.or(selection.config.as_ref().and_then(|c| c.default_mode))
			.unwrap_or_default();

		{
			let mut process = self.process.lock().await;
			*process = Some(BrowserProcess {
				pid: outcome.pid,
				temp_dir: outcome.temp_dir.clone(),
			});
		}
		{
			let mut active = self.active.lock().await;
			*active = Some(session.clone());
		}
		{
			let mut active_config = self.active_config.lock().await;
			*active_config = selection.config.clone();
		}
		{
			let mut current = self.mode.lock().await;
			*current = mode;
		}

		// Connect and observe every existing page; new pages are observed
		// lazily on first resolve. A connect failure rolls the registration
		// back so the next /start is not refused as a double-start.
		let conn = match self.connections.connect(&session.cdp_url()).await {
			Ok(conn) => conn,
			Err(err) => {
				*self.active.lock().await = None;
				*self.active_config.lock().await = None;
				*self.process.lock().await = None;
				return Err(err);
			}
		};
		for page in conn.pages().await.unwrap_or_default() {
			let _ = self.registry.ensure_observed(&page).await;
			self.install_indicator(&page, true).await;
		}

		// Restore persisted tab sessions for this workspace.
		if let Some(dir) = self.workspace_dir(&session).await {
			self.sessions.load(&dir).await;
		}

		DaemonLock::new(self.config.http_port, session.browser, session.workspace.clone())
			.write_default()
			.unwrap_or_else(|err| {
				warn!(target = "ccb.daemon", error = %err, "lockfile write failed");
				PathBuf::new()
			});

		info!(
			target = "ccb.daemon",
			browser = %session.browser,
			workspace = workspace.as_deref().unwrap_or("<none>"),
			port,
			started = outcome.started,
			"session started"
		);
		Ok(StartResponse {
			started: outcome.started,
			browser: session.browser,
			workspace: session.workspace.clone(),
			cdp_port: port,
			mode,
			tabs: outcome.tabs,
		})
	}

	/// Tear the active session down; browser stop is best-effort.
	pub async fn stop(&self) -> Result<()> {
		let session = {
			let mut active = self.active.lock().await;
			active.take().ok_or(CcbError::NoActiveSession)?
		};
		let process = {
			let mut process = self.process.lock().await;
			process.take()
		};
		{
			let mut active_config = self.active_config.lock().await;
			*active_config = None;
		}

		if let Some(dir) = self.session_dir_for(&session) {
			if let Err(err) = self.sessions.persist(&dir).await {
				warn!(target = "ccb.daemon", error = %err, "session persistence failed during stop");
			}
		}

		self.connections.clear().await;

		let pid = process.as_ref().and_then(|p| p.pid);
		match launcher::stop_browser(session.cdp_port, pid).await {
			Ok(true) => {
				if let Some(temp) = process.and_then(|p| p.temp_dir) {
					launcher::cleanup_temp_profile(&temp);
				}
			}
			Ok(false) => warn!(target = "ccb.daemon", port = session.cdp_port, "browser did not confirm stop"),
			Err(err) => warn!(target = "ccb.daemon", error = %err, "browser stop failed"),
		}

		info!(target = "ccb.daemon", "session stopped");
		Ok(())
	}

	pub async fn status(&self) -> StatusResponse {
		let active = self.active.lock().await;
		let mode = *self.mode.lock().await;
		match active.as_ref() {
			Some(session) => StatusResponse {
				active: true,
				browser: Some(session.browser),
				workspace: session.workspace.clone(),
				cdp_port: Some(session.cdp_port),
				incognito: session.incognito,
				mode,
				pid: std::process::id(),
			},
			None => StatusResponse {
				active: false,
				browser: None,
				workspace: None,
				cdp_port: None,
				incognito: false,
				mode,
				pid: std::process::id(),
			},
		}
	}

	pub fn browsers(&self) -> BrowsersResponse {
		BrowsersResponse {
			browsers: launcher::detect_browsers(),
		}
	}

	pub fn profiles(&self) -> ProfilesResponse {
		ProfilesResponse {
			workspaces: self.store.list().iter().map(WorkspaceConfig::summary).collect(),
		}
	}

	pub async fn mode(&self) -> Mode {
		*self.mode.lock().await
	}

	pub async fn set_mode(&self, mode: Mode) -> Mode {
		let mut current = self.mode.lock().await;
		*current = mode;
		mode
	}

	/// Graceful-shutdown hook: persist sessions, drop the lockfile.
	pub async fn shutdown(&self) {
		let session = self.active.lock().await.clone();
		if let Some(session) = session {
			if let Some(dir) = self.session_dir_for(&session) {
				if let Err(err) = self.sessions.persist(&dir).await {
					warn!(target = "ccb.daemon", error = %err, "session persistence failed during shutdown");
				}
			}
		}
		if let Ok(path) = crate::paths::lockfile_path() {
			DaemonLock::remove(&path);
		}
	}

	// -- tab sessions -------------------------------------------------------

	pub async fn session_create(&self, req: SessionCreateRequest) -> Result<TabSessionRecord> {
		self.require_active().await?;
		self.sessions.create(req).await
	}

	pub async fn session_heartbeat(&self, id: &str) -> Result<TabSessionRecord> {
		self.require_active().await?;
		self.sessions.touch(id).await
	}

	/// Close a session's tabs, then forget it.
	pub async fn session_close(&self, id: &str) -> Result<Vec<String>> {
		self.require_active().await?;
		let tabs = self
			.sessions
			.close(id)
			.await
			.ok_or_else(|| CcbError::InvalidInput(format!("no session with id {id}")))?;
		self.close_tabs(&tabs).await;
		Ok(tabs)
	}

	pub async fn session_list(&self) -> Result<SessionsResponse> {
		self.require_active().await?;
		self.reconcile_sessions().await;
		Ok(SessionsResponse {
			sessions: self.sessions.list().await,
		})
	}

	/// Prune expired sessions and close their tabs.
	pub async fn session_prune(&self) -> Result<Vec<PrunedSession>> {
		self.require_active().await?;
		let pruned = self.sessions.prune_expired().await;
		for entry in &pruned {
			self.close_tabs(&entry.tab_ids).await;
		}
		Ok(pruned)
	}

	/// Background expiry sweep; held only by a weak ref so it never keeps
	/// the daemon alive.
	pub fn spawn_session_sweep(self: &Arc<Self>) {
		let weak = Arc::downgrade(self);
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
			loop {
				interval.tick().await;
				let Some(daemon) = weak.upgrade() else {
					break;
				};
				let pruned = daemon.sessions.prune_expired().await;
				for entry in &pruned {
					info!(target = "ccb.session", session = %entry.session_id, tabs = entry.tab_ids.len(), "sweep expired session");
					daemon.close_tabs(&entry.tab_ids).await;
				}
			}
		});
	}

	// -- shared plumbing ----------------------------------------------------

	pub async fn require_active(&self) -> Result<ActiveSession> {
		let active = self.active.lock().await;
		active.clone().ok_or(CcbError::NoActiveSession)
	}

	pub(crate) async fn conn(&self) -> Result<Arc<Connection>> {
		let session = self.require_active().await?;
		self.connections.connect(&session.cdp_url()).await
	}

	/// Resolve the target page (by optional target id), ensure its state
	/// entry, and restore a cached ref map when the entry has none.
	pub(crate) async fn page(&self, target_id: Option<&str>) -> Result<(Page, Arc<Mutex<PageEntry>>)> {
		let conn = self.conn().await?;
		let page = match target_id {
			Some(id) => conn.find_page(id).await?,
			None => conn.focused_page().await?,
		};
		let entry = self.registry.ensure_observed(&page).await?;

		{
			let mut state = entry.lock().await;
			if state.refs.is_empty() {
				let cache = self.ref_cache.lock().await;
				if let Some(saved) = cache.get(&conn.cdp_url, &state.target_id) {
					state.refs = saved.clone();
				}
			}
		}
		Ok((page, entry))
	}

	pub(crate) async fn humanized(&self) -> bool {
		self.mode.lock().await.is_humanized()
	}

	pub(crate) async fn stealth(&self) -> bool {
		matches!(*self.mode.lock().await, Mode::Stealth)
	}

	/// Build a locator from the exactly-one-of `ref`/`text`/`selector`
	/// targeting fields.
	pub(crate) async fn target_spec(
		&self,
		entry: &Arc<Mutex<PageEntry>>,
		element_ref: Option<&str>,
		text: Option<&str>,
		selector: Option<&str>,
	) -> Result<LocatorSpec> {
		let supplied = [element_ref.is_some(), text.is_some(), selector.is_some()]
			.iter()
			.filter(|x| **x)
			.count();
		if supplied != 1 {
			return Err(CcbError::InvalidInput(
				"exactly one of ref, text, selector must be provided".into(),
			));
		}
		if let Some(element_ref) = element_ref {
			let state = entry.lock().await;
			return LocatorSpec::from_ref(element_ref, &state.refs);
		}
		if let Some(text) = text {
			return Ok(LocatorSpec::Text { text: text.to_string() });
		}
		Ok(LocatorSpec::Css {
			selector: selector.expect("checked above").to_string(),
		})
	}

	pub(crate) async fn workspace_dir(&self, session: &ActiveSession) -> Option<PathBuf> {
		self.session_dir_for(session)
	}

	fn session_dir_for(&self, session: &ActiveSession) -> Option<PathBuf> {
		let workspace = session.workspace.as_deref()?;
		match &self.config.workspaces_root {
			Some(root) => Some(root.join(format!("{}-{}", session.browser, workspace))),
			None => crate::paths::workspace_dir(session.browser, workspace).ok(),
		}
	}

	pub(crate) fn recordings_root(&self) -> Result<PathBuf> {
		match &self.config.recordings_root {
			Some(root) => Ok(root.clone()),
			None => crate::paths::recordings_root(),
		}
	}

	async fn reconcile_sessions(&self) {
		if let Ok(conn) = self.conn().await {
			if let Ok(pages) = conn.pages().await {
				let live = pages
					.iter()
					.map(|p| p.target_id().inner().clone())
					.collect::<std::collections::HashSet<_>>();
				self.sessions.reconcile(&live).await;
			}
		}
	}

	pub(crate) async fn close_tabs(&self, tab_ids: &[String]) {
		let Ok(conn) = self.conn().await else {
			return;
		};
		for tab_id in tab_ids {
			if let Err(err) = conn.close_page(tab_id).await {
				// Already closed or never existed; either way it is gone.
				tracing::debug!(target = "ccb.session", tab_id = %tab_id, error = %err, "tab close skipped");
			}
			self.registry.remove(tab_id).await;
		}
	}

	/// Inject the workspace indicator bar unless stealth mode suppresses it.
	pub(crate) async fn install_indicator(&self, page: &Page, evaluate_now: bool) {
		if self.stealth().await {
			return;
		}
		let config = self.active_config.lock().await;
		let Some(config) = config.as_ref() else {
			return;
		};
		if !config.indicator {
			return;
		}
		let label = serde_json::to_string(&config.name).unwrap_or_else(|_| "\"workspace\"".into());
		let script = INDICATOR_JS.replace("__CCB_WORKSPACE_LABEL__", &label);
		use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
		if let Ok(params) = AddScriptToEvaluateOnNewDocumentParams::builder().source(script.clone()).build() {
			let _ = page.execute(params).await;
		}
		if evaluate_now {
			let _ = page.evaluate(script).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use tempfile::tempdir;

	use super::*;

	fn daemon_with_tempdirs() -> (Daemon, tempfile::TempDir) {
		let dir = tempdir().unwrap();
		let config = DaemonConfig {
			http_port: 18791,
			workspaces_root: Some(dir.path().join("workspaces")),
			recordings_root: Some(dir.path().join("recordings")),
			recorder: RecorderConfig::default(),
		};
		(Daemon::new(config).unwrap(), dir)
	}

	#[tokio::test]
	async fn verbs_require_active_session() {
		let (daemon, _dir) = daemon_with_tempdirs();
		assert!(matches!(daemon.require_active().await, Err(CcbError::NoActiveSession)));
		assert!(matches!(daemon.session_list().await, Err(CcbError::NoActiveSession)));
		assert!(matches!(
			daemon
				.session_create(SessionCreateRequest {
					name: "x".into(),
					ttl_ms: None,
					metadata: None,
				})
				.await,
			Err(CcbError::NoActiveSession)
		));
		assert!(matches!(daemon.stop().await, Err(CcbError::NoActiveSession)));
	}

	#[tokio::test]
	async fn status_reports_inactive_daemon() {
		let (daemon, _dir) = daemon_with_tempdirs();
		let status = daemon.status().await;
		assert!(!status.active);
		assert_eq!(status.mode, Mode::Fast);
		assert_eq!(status.pid, std::process::id());
	}

	#[tokio::test]
	async fn mode_round_trip() {
		let (daemon, _dir) = daemon_with_tempdirs();
		assert_eq!(daemon.mode().await, Mode::Fast);
		assert_eq!(daemon.set_mode(Mode::Stealth).await, Mode::Stealth);
		assert!(daemon.humanized().await);
		assert!(daemon.stealth().await);
		daemon.set_mode(Mode::Human).await;
		assert!(daemon.humanized().await);
		assert!(!daemon.stealth().await);
	}

	#[tokio::test]
	async fn profiles_lists_store_contents() {
		let (daemon, _dir) = daemon_with_tempdirs();
		assert!(daemon.profiles().workspaces.is_empty());
	}
}

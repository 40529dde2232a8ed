//! CDP connection cache.
//!
//! At most one live connection exists at a time, keyed by normalized CDP
//! base URL. Concurrent connect calls coalesce behind one mutex; the first
//! caller establishes, later callers reuse. The chromiumoxide event handler
//! runs on a background task; when its stream ends (browser gone, socket
//! dropped) the cache clears itself so the next verb reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{CcbError, Result};
use crate::launcher;

/// Per-attempt connect timeouts and the delays between attempts.
const CONNECT_TIMEOUTS: [Duration; 3] = [Duration::from_secs(5), Duration::from_secs(7), Duration::from_secs(9)];
const CONNECT_DELAYS: [Duration; 2] = [Duration::from_millis(250), Duration::from_millis(500)];

/// One live browser connection shared by all verbs.
#[derive(Debug)]
pub struct Connection {
	/// Normalized `http://127.0.0.1:<port>` base.
	pub cdp_url: String,
	pub port: u16,
	browser: Mutex<Browser>,
	alive: Arc<AtomicBool>,
}

impl Connection {
	pub fn is_alive(&self) -> bool {
		self.alive.load(Ordering::Relaxed)
	}

	/// All page targets, retrying briefly while the target list populates.
	pub async fn pages(&self) -> Result<Vec<Page>> {
		let browser = self.browser.lock().await;
		let mut pages = browser.pages().await?;
		for _ in 0..10 {
			if !pages.is_empty() {
				break;
			}
			sleep(Duration::from_millis(50)).await;
			pages = browser.pages().await?;
		}
		Ok(pages)
	}

	pub async fn new_page(&self, url: &str) -> Result<Page> {
		let browser = self.browser.lock().await;
		Ok(browser.new_page(url).await?)
	}

	/// Resolve a page by CDP target id.
	///
	/// Ladder: direct target-id match → `/json/list` URL match with
	/// positional disambiguation → single-page courtesy fallback →
	/// `TabNotFound`.
	pub async fn find_page(&self, target_id: &str) -> Result<Page> {
		let pages = self.pages().await?;
		for page in &pages {
			if page.target_id().inner() == target_id {
				return Ok(page.clone());
			}
		}

		// The in-process target list can lag behind the browser; fall back
		// to the HTTP list and rematch by URL.
		if let Ok(tabs) = launcher::list_tabs(self.port).await {
			if let Some(wanted) = tabs.iter().find(|t| t.target_id == target_id) {
				let position = tabs
					.iter()
					.filter(|t| t.url == wanted.url)
					.position(|t| t.target_id == target_id)
					.unwrap_or(0);
				let mut same_url = Vec::new();
				for page in &pages {
					let url = page.url().await.ok().flatten().unwrap_or_default();
					if url == wanted.url {
						same_url.push(page.clone());
					}
				}
				if let Some(page) = same_url.into_iter().nth(position) {
					return Ok(page);
				}
			}
		}

		if pages.len() == 1 {
			debug!(target = "ccb.cdp", target_id, "target id unmatched, using the only open page");
			return Ok(pages.into_iter().next().expect("len checked"));
		}
		Err(CcbError::TabNotFound(target_id.to_string()))
	}

	/// The focused page: first visible tab, else the first page.
	pub async fn focused_page(&self) -> Result<Page> {
		let pages = self.pages().await?;
		if pages.is_empty() {
			return Err(CcbError::TabNotFound("no open pages".into()));
		}
		for page in &pages {
			let eval = timeout(
				Duration::from_millis(300),
				page.evaluate("document.visibilityState === 'visible' && (!document.hasFocus || document.hasFocus())"),
			)
			.await;
			if let Ok(Ok(result)) = eval {
				if result.value().and_then(|v| v.as_bool()).unwrap_or(false) {
					return Ok(page.clone());
				}
			}
		}
		Ok(pages.into_iter().next().expect("non-empty checked"))
	}

	pub async fn close_page(&self, target_id: &str) -> Result<()> {
		let page = self.find_page(target_id).await?;
		page.close().await?;
		Ok(())
	}

	pub async fn focus_page(&self, target_id: &str) -> Result<Page> {
		let page = self.find_page(target_id).await?;
		page.bring_to_front().await?;
		Ok(page)
	}
}

/// Holder of the single cached connection.
#[derive(Clone, Default)]
pub struct ConnectionCache {
	inner: Arc<Mutex<Option<Arc<Connection>>>>,
}

impl ConnectionCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Connect to (or reuse the cached connection for) a CDP base URL.
	pub async fn connect(&self, cdp_url: &str) -> Result<Arc<Connection>> {
		let (normalized, port) = normalize_cdp_url(cdp_url)?;

		// The lock is held across the whole attempt so concurrent callers
		// coalesce onto one in-flight connect.
		let mut guard = self.inner.lock().await;
		if let Some(conn) = guard.as_ref() {
			if conn.cdp_url == normalized && conn.is_alive() {
				return Ok(Arc::clone(conn));
			}
			debug!(target = "ccb.cdp", "dropping dead or mismatched cached connection");
			*guard = None;
		}

		let conn = self.establish(&normalized, port).await?;
		*guard = Some(Arc::clone(&conn));
		Ok(conn)
	}

	/// Currently cached live connection, if any.
	pub async fn current(&self) -> Option<Arc<Connection>> {
		let guard = self.inner.lock().await;
		guard.as_ref().filter(|c| c.is_alive()).cloned()
	}

	pub async fn clear(&self) {
		let mut guard = self.inner.lock().await;
		*guard = None;
	}

	async fn establish(&self, normalized: &str, port: u16) -> Result<Arc<Connection>> {
		let mut last_err = String::new();
		for (attempt, per_attempt) in CONNECT_TIMEOUTS.iter().enumerate() {
			let ws = match launcher::probe_version(port, Duration::from_secs(2)).await {
				Some(ws) => ws,
				None => {
					last_err = format!("no CDP endpoint answered on port {port}");
					if let Some(delay) = CONNECT_DELAYS.get(attempt) {
						sleep(*delay).await;
					}
					continue;
				}
			};

			match timeout(*per_attempt, Browser::connect(ws.clone())).await {
				Ok(Ok((browser, mut handler))) => {
					info!(target = "ccb.cdp", port, attempt = attempt + 1, "connected to browser");
					let alive = Arc::new(AtomicBool::new(true));
					let conn = Arc::new(Connection {
						cdp_url: normalized.to_string(),
						port,
						browser: Mutex::new(browser),
						alive: Arc::clone(&alive),
					});

					let cache = Arc::clone(&self.inner);
					let flag = alive;
					tokio::spawn(async move {
						while let Some(event) = handler.next().await {
							if event.is_err() {
								// Transient protocol errors are routine; the
								// stream ending is the real disconnect signal.
								continue;
							}
						}
						warn!(target = "ccb.cdp", "event handler ended; clearing connection cache");
						flag.store(false, Ordering::Relaxed);
						let mut guard = cache.lock().await;
						if guard.as_ref().is_some_and(|c| !c.is_alive()) {
							*guard = None;
						}
					});
					return Ok(conn);
				}
				Ok(Err(err)) => {
					last_err = format!("CDP connect failed: {err}");
					warn!(target = "ccb.cdp", attempt = attempt + 1, error = %last_err, "connect attempt failed");
				}
				Err(_) => {
					last_err = format!("CDP connect timed out after {}ms", per_attempt.as_millis());
					warn!(target = "ccb.cdp", attempt = attempt + 1, "connect attempt timed out");
				}
			}
			if let Some(delay) = CONNECT_DELAYS.get(attempt) {
				sleep(*delay).await;
			}
		}
		Err(CcbError::Cdp(format!("could not connect to browser: {last_err}")))
	}
}

/// Normalize a CDP base URL to `http://<host>:<port>` and extract the port.
pub fn normalize_cdp_url(raw: &str) -> Result<(String, u16)> {
	let with_scheme = if raw.contains("://") { raw.to_string() } else { format!("http://{raw}") };
	let parsed = url::Url::parse(&with_scheme).map_err(|err| CcbError::InvalidInput(format!("bad CDP URL {raw:?}: {err}")))?;
	let host = parsed
		.host_str()
		.ok_or_else(|| CcbError::InvalidInput(format!("CDP URL {raw:?} has no host")))?
		.to_ascii_lowercase();
	let port = parsed
		.port()
		.ok_or_else(|| CcbError::InvalidInput(format!("CDP URL {raw:?} has no port")))?;
	Ok((format!("http://{host}:{port}"), port))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn normalize_strips_path_and_case() {
		let (url, port) = normalize_cdp_url("HTTP://LocalHost:9222/").unwrap();
		assert_eq!(url, "http://localhost:9222");
		assert_eq!(port, 9222);

		let (url, port) = normalize_cdp_url("127.0.0.1:9333").unwrap();
		assert_eq!(url, "http://127.0.0.1:9333");
		assert_eq!(port, 9333);
	}

	#[test]
	fn normalize_requires_port() {
		assert!(normalize_cdp_url("http://127.0.0.1").is_err());
	}

	#[tokio::test]
	async fn connect_fails_cleanly_without_endpoint() {
		let cache = ConnectionCache::new();
		// Port 1 has no CDP endpoint; all three attempts fail fast.
		let err = cache.connect("http://127.0.0.1:1").await.unwrap_err();
		assert!(matches!(err, CcbError::Cdp(_)));
		assert!(cache.current().await.is_none());
	}
}

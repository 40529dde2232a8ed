//! Named tab sessions: TTL'd groups of tabs an agent can clean up together.
//!
//! Pure in-memory state behind one async mutex. Expiry is pull-based:
//! `prune_expired` removes overdue sessions and returns their tab ids
//! exactly once; actually closing those tabs is the caller's job. The
//! background sweep lives on the daemon, not here, so this type stays
//! directly testable.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use ccb_protocol::{PrunedSession, SessionCreateRequest, TabSessionRecord};

use crate::error::{CcbError, Result};

/// Default TTL: 30 minutes. A TTL of zero disables expiry.
pub const DEFAULT_TTL_MS: u64 = 30 * 60 * 1000;
/// Background sweep cadence.
pub const SWEEP_INTERVAL_SECS: u64 = 60;

pub const SESSIONS_FILE: &str = "sessions.json";

#[derive(Clone, Default)]
pub struct TabSessionManager {
	inner: Arc<Mutex<HashMap<String, TabSessionRecord>>>,
}

impl TabSessionManager {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn create(&self, req: SessionCreateRequest) -> Result<TabSessionRecord> {
		if req.name.trim().is_empty() {
			return Err(CcbError::InvalidInput("session name must be non-empty".into()));
		}
		let now = now_ms();
		let record = TabSessionRecord {
			id: new_session_id(),
			name: req.name,
			created_at: now,
			last_activity: now,
			ttl_ms: req.ttl_ms.unwrap_or(DEFAULT_TTL_MS),
			tab_ids: Vec::new(),
			metadata: req.metadata.unwrap_or_default(),
		};
		let mut sessions = self.inner.lock().await;
		sessions.insert(record.id.clone(), record.clone());
		Ok(record)
	}

	pub async fn list(&self) -> Vec<TabSessionRecord> {
		let sessions = self.inner.lock().await;
		let mut out: Vec<_> = sessions.values().cloned().collect();
		out.sort_by_key(|s| s.created_at);
		out
	}

	pub async fn get(&self, id: &str) -> Option<TabSessionRecord> {
		let sessions = self.inner.lock().await;
		sessions.get(id).cloned()
	}

	/// Register a tab under a session; touches activity.
	pub async fn add_tab(&self, id: &str, tab_id: &str) -> Result<()> {
		let mut sessions = self.inner.lock().await;
		let session = sessions
			.get_mut(id)
			.ok_or_else(|| CcbError::InvalidInput(format!("no session with id {id}")))?;
		if !session.tab_ids.iter().any(|t| t == tab_id) {
			session.tab_ids.push(tab_id.to_string());
		}
		session.last_activity = now_ms();
		Ok(())
	}

	/// Heartbeat: reset the activity clock.
	pub async fn touch(&self, id: &str) -> Result<TabSessionRecord> {
		let mut sessions = self.inner.lock().await;
		let session = sessions
			.get_mut(id)
			.ok_or_else(|| CcbError::InvalidInput(format!("no session with id {id}")))?;
		session.last_activity = now_ms();
		Ok(session.clone())
	}

	/// Remove a session explicitly, returning its tabs for closure.
	pub async fn close(&self, id: &str) -> Option<Vec<String>> {
		let mut sessions = self.inner.lock().await;
		sessions.remove(id).map(|s| s.tab_ids)
	}

	/// Remove every expired session and return each exactly once.
	pub async fn prune_expired(&self) -> Vec<PrunedSession> {
		self.prune_expired_at(now_ms()).await
	}

	pub async fn prune_expired_at(&self, now: u64) -> Vec<PrunedSession> {
		let mut sessions = self.inner.lock().await;
		let expired: Vec<String> = sessions
			.values()
			.filter(|s| s.ttl_ms > 0 && now.saturating_sub(s.last_activity) >= s.ttl_ms)
			.map(|s| s.id.clone())
			.collect();
		expired
			.into_iter()
			.filter_map(|id| {
				sessions.remove(&id).map(|s| PrunedSession {
					session_id: s.id,
					tab_ids: s.tab_ids,
				})
			})
			.collect()
	}

	/// Drop tab ids that no longer correspond to live browser tabs.
	pub async fn reconcile(&self, live: &HashSet<String>) {
		let mut sessions = self.inner.lock().await;
		for session in sessions.values_mut() {
			session.tab_ids.retain(|t| live.contains(t));
		}
	}

	/// Sessions that currently reference a tab id.
	pub async fn sessions_for_tab(&self, tab_id: &str) -> Vec<String> {
		let sessions = self.inner.lock().await;
		sessions
			.values()
			.filter(|s| s.tab_ids.iter().any(|t| t == tab_id))
			.map(|s| s.id.clone())
			.collect()
	}

	/// Persist the full list; called on graceful shutdown only.
	pub async fn persist(&self, dir: &Path) -> Result<()> {
		let records = self.list().await;
		std::fs::create_dir_all(dir)?;
		let path = dir.join(SESSIONS_FILE);
		std::fs::write(&path, serde_json::to_string_pretty(&records)?)?;
		debug!(target = "ccb.session", path = %path.display(), count = records.len(), "sessions persisted");
		Ok(())
	}

	/// Restore persisted sessions; missing or corrupt files are a no-op.
	pub async fn load(&self, dir: &Path) {
		let path = dir.join(SESSIONS_FILE);
		let raw = match std::fs::read_to_string(&path) {
			Ok(raw) => raw,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
			Err(err) => {
				warn!(target = "ccb.session", path = %path.display(), error = %err, "cannot read sessions file");
				return;
			}
		};
		match serde_json::from_str::<Vec<TabSessionRecord>>(&raw) {
			Ok(records) => {
				let mut sessions = self.inner.lock().await;
				for record in records {
					sessions.insert(record.id.clone(), record);
				}
			}
			Err(err) => {
				warn!(target = "ccb.session", path = %path.display(), error = %err, "ignoring corrupt sessions file");
			}
		}
	}
}

fn new_session_id() -> String {
	let suffix: String = rand::rng()
		.sample_iter(Alphanumeric)
		.take(8)
		.map(char::from)
		.collect();
	format!("sess_{}", suffix.to_ascii_lowercase())
}

pub(crate) fn now_ms() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
mod tests {
	use tempfile::tempdir;

	use super::*;

	fn create_req(name: &str, ttl_ms: Option<u64>) -> SessionCreateRequest {
		SessionCreateRequest {
			name: name.into(),
			ttl_ms,
			metadata: None,
		}
	}

	#[tokio::test]
	async fn create_assigns_id_and_defaults() {
		let mgr = TabSessionManager::new();
		let session = mgr.create(create_req("research", None)).await.unwrap();
		assert!(session.id.starts_with("sess_"));
		assert_eq!(session.id.len(), "sess_".len() + 8);
		assert_eq!(session.ttl_ms, DEFAULT_TTL_MS);
		assert!(session.tab_ids.is_empty());
		assert_eq!(session.created_at, session.last_activity);
	}

	#[tokio::test]
	async fn empty_name_rejected() {
		let mgr = TabSessionManager::new();
		assert!(mgr.create(create_req("  ", None)).await.is_err());
	}

	#[tokio::test]
	async fn prune_returns_tabs_exactly_once() {
		let mgr = TabSessionManager::new();
		let session = mgr.create(create_req("research", Some(100))).await.unwrap();
		mgr.add_tab(&session.id, "T1").await.unwrap();
		mgr.add_tab(&session.id, "T2").await.unwrap();

		tokio::time::sleep(std::time::Duration::from_millis(150)).await;
		let pruned = mgr.prune_expired().await;
		assert_eq!(
			pruned,
			vec![PrunedSession {
				session_id: session.id.clone(),
				tab_ids: vec!["T1".into(), "T2".into()],
			}]
		);

		// Exactly once: a second prune finds nothing, the list is empty.
		assert!(mgr.prune_expired().await.is_empty());
		assert!(mgr.list().await.is_empty());
	}

	#[tokio::test]
	async fn zero_ttl_never_expires() {
		let mgr = TabSessionManager::new();
		let session = mgr.create(create_req("pinned", Some(0))).await.unwrap();
		let pruned = mgr.prune_expired_at(now_ms() + 365 * 24 * 3600 * 1000).await;
		assert!(pruned.is_empty());
		assert!(mgr.get(&session.id).await.is_some());
	}

	#[tokio::test]
	async fn touch_extends_life() {
		let mgr = TabSessionManager::new();
		let session = mgr.create(create_req("busy", Some(50_000))).await.unwrap();
		let before = mgr.get(&session.id).await.unwrap().last_activity;
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		mgr.touch(&session.id).await.unwrap();
		let after = mgr.get(&session.id).await.unwrap().last_activity;
		assert!(after >= before);

		// Not yet expired relative to the refreshed activity.
		let pruned = mgr.prune_expired_at(after + 49_999).await;
		assert!(pruned.is_empty());
	}

	#[tokio::test]
	async fn reconcile_strips_dead_tabs() {
		let mgr = TabSessionManager::new();
		let session = mgr.create(create_req("research", None)).await.unwrap();
		mgr.add_tab(&session.id, "T1").await.unwrap();
		mgr.add_tab(&session.id, "T2").await.unwrap();

		let live: HashSet<String> = ["T2".to_string()].into_iter().collect();
		mgr.reconcile(&live).await;
		assert_eq!(mgr.get(&session.id).await.unwrap().tab_ids, vec!["T2".to_string()]);
	}

	#[tokio::test]
	async fn add_tab_deduplicates() {
		let mgr = TabSessionManager::new();
		let session = mgr.create(create_req("research", None)).await.unwrap();
		mgr.add_tab(&session.id, "T1").await.unwrap();
		mgr.add_tab(&session.id, "T1").await.unwrap();
		assert_eq!(mgr.get(&session.id).await.unwrap().tab_ids.len(), 1);
	}

	#[tokio::test]
	async fn persist_and_load_round_trip() {
		let dir = tempdir().unwrap();
		let mgr = TabSessionManager::new();
		let session = mgr.create(create_req("research", Some(0))).await.unwrap();
		mgr.add_tab(&session.id, "T1").await.unwrap();
		mgr.persist(dir.path()).await.unwrap();

		let restored = TabSessionManager::new();
		restored.load(dir.path()).await;
		let loaded = restored.get(&session.id).await.unwrap();
		assert_eq!(loaded.name, "research");
		assert_eq!(loaded.tab_ids, vec!["T1".to_string()]);
	}

	#[tokio::test]
	async fn load_ignores_corrupt_file() {
		let dir = tempdir().unwrap();
		std::fs::write(dir.path().join(SESSIONS_FILE), "{broken").unwrap();
		let mgr = TabSessionManager::new();
		mgr.load(dir.path()).await;
		assert!(mgr.list().await.is_empty());
	}
}

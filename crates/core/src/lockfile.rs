//! Daemon lockfile: advertises the running daemon's port to the client CLI.
//!
//! Written atomically at startup (temp file + rename), removed on graceful
//! shutdown. A pre-existing lockfile is overwritten (a crashed daemon must
//! not block the next start), but `load` reports staleness via a
//! pid-existence probe so callers can tell a live daemon from a leftover.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::paths;
use crate::types::BrowserKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonLock {
	/// Daemon HTTP port.
	pub port: u16,
	pub browser: BrowserKind,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub workspace: Option<String>,
	pub pid: u32,
	/// RFC3339.
	pub started_at: String,
}

impl DaemonLock {
	pub fn new(port: u16, browser: BrowserKind, workspace: Option<String>) -> Self {
		Self {
			port,
			browser,
			workspace,
			pid: std::process::id(),
			started_at: chrono::Utc::now().to_rfc3339(),
		}
	}

	/// Atomic write: serialize to a sibling temp file, then rename over.
	pub fn write(&self, path: &Path) -> Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		let tmp = path.with_extension("lock.tmp");
		fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
		fs::rename(&tmp, path)?;
		Ok(())
	}

	pub fn write_default(&self) -> Result<PathBuf> {
		let path = paths::lockfile_path()?;
		self.write(&path)?;
		Ok(path)
	}

	/// Read the lockfile if present; `stale` is true when the recorded pid
	/// no longer maps to a live process.
	pub fn load(path: &Path) -> Result<Option<(DaemonLock, bool)>> {
		let raw = match fs::read_to_string(path) {
			Ok(raw) => raw,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(err) => return Err(err.into()),
		};
		let lock: DaemonLock = serde_json::from_str(&raw)?;
		let stale = !pid_exists(lock.pid);
		Ok(Some((lock, stale)))
	}

	/// Best-effort removal; missing files are fine.
	pub fn remove(path: &Path) {
		let _ = fs::remove_file(path);
	}
}

#[cfg(target_os = "linux")]
fn pid_exists(pid: u32) -> bool {
	Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_exists(_pid: u32) -> bool {
	// No cheap probe without extra dependencies; treat as alive.
	true
}

#[cfg(test)]
mod tests {
	use tempfile::tempdir;

	use super::*;

	#[test]
	fn write_load_remove_round_trip() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("daemon.lock");

		let lock = DaemonLock::new(18791, BrowserKind::Chrome, Some("work".into()));
		lock.write(&path).unwrap();

		let (loaded, stale) = DaemonLock::load(&path).unwrap().unwrap();
		assert_eq!(loaded.port, 18791);
		assert_eq!(loaded.pid, std::process::id());
		assert!(!stale, "our own pid must read as live");

		DaemonLock::remove(&path);
		assert!(DaemonLock::load(&path).unwrap().is_none());
	}

	#[test]
	fn existing_lockfile_is_overwritten() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("daemon.lock");
		fs::write(&path, "{\"port\":1,\"browser\":\"chrome\",\"pid\":0,\"startedAt\":\"x\"}").unwrap();

		DaemonLock::new(18791, BrowserKind::Brave, None).write(&path).unwrap();
		let (loaded, _) = DaemonLock::load(&path).unwrap().unwrap();
		assert_eq!(loaded.port, 18791);
		assert_eq!(loaded.browser, BrowserKind::Brave);
	}

	#[test]
	fn dead_pid_reads_stale() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("daemon.lock");
		let mut lock = DaemonLock::new(18791, BrowserKind::Chrome, None);
		lock.pid = u32::MAX - 1;
		lock.write(&path).unwrap();

		if cfg!(target_os = "linux") {
			let (_, stale) = DaemonLock::load(&path).unwrap().unwrap();
			assert!(stale);
		}
	}
}

//! Filesystem layout under the platform's local app-data directory.
//!
//! Everything the daemon persists lives under `<LocalAppData>/cc-browser`
//! (workspace profiles, `daemon.lock`, `sessions.json`) except recordings,
//! which share the vault directory used by the companion tooling.

use std::path::PathBuf;

use crate::error::{CcbError, Result};
use crate::types::BrowserKind;

/// Platform local-data base: `%LOCALAPPDATA%` when set, else the OS
/// convention, else `$HOME`.
pub fn local_app_data() -> Result<PathBuf> {
	if let Ok(dir) = std::env::var("LOCALAPPDATA") {
		if !dir.trim().is_empty() {
			return Ok(PathBuf::from(dir));
		}
	}
	if let Some(dir) = dirs::data_local_dir() {
		return Ok(dir);
	}
	if let Some(home) = dirs::home_dir() {
		return Ok(home);
	}
	Err(CcbError::InvalidInput("cannot resolve a local data directory (no LOCALAPPDATA or HOME)".into()))
}

/// `<LocalAppData>/cc-browser`.
pub fn app_root() -> Result<PathBuf> {
	Ok(local_app_data()?.join("cc-browser"))
}

/// Persistent user-data directory for a managed workspace.
pub fn workspace_dir(browser: BrowserKind, workspace: &str) -> Result<PathBuf> {
	Ok(app_root()?.join(format!("{browser}-{workspace}")))
}

/// `daemon.lock` location.
pub fn lockfile_path() -> Result<PathBuf> {
	Ok(app_root()?.join("daemon.lock"))
}

/// Root directory recordings are persisted under.
pub fn recordings_root() -> Result<PathBuf> {
	Ok(local_app_data()?.join("cc-myvault").join("recordings"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn workspace_dir_embeds_kind_and_name() {
		let dir = workspace_dir(BrowserKind::Brave, "research").unwrap();
		assert!(dir.to_string_lossy().ends_with("cc-browser/brave-research") || dir.to_string_lossy().ends_with("cc-browser\\brave-research"));
	}
}

//! Workspace descriptor store and alias resolution.
//!
//! A workspace is a `(browser, name)` pair backed by a persistent user-data
//! directory. Each managed directory carries a `workspace.json` descriptor;
//! the store scans sibling directories on every resolve (dozens at most, a
//! linear pass is fine) and never mutates the caller's request; resolution
//! returns a separate [`WorkspaceSelection`].

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use ccb_protocol::WorkspaceSummary;

use crate::error::{CcbError, Result};
use crate::paths;
use crate::types::{BrowserKind, Mode};

pub const DESCRIPTOR_FILE: &str = "workspace.json";

/// On-disk workspace descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
	/// Display name shown in the indicator bar.
	pub name: String,
	pub browser: BrowserKind,
	/// Directory slug; unique per browser kind.
	pub workspace: String,
	pub cdp_port: u16,
	pub daemon_port: u16,
	#[serde(default)]
	pub purpose: String,
	/// Short names resolving to this workspace; globally unique.
	#[serde(default)]
	pub aliases: Vec<String>,
	#[serde(default)]
	pub favorites: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub default_mode: Option<Mode>,
	/// Show the workspace-identifying banner in every tab.
	#[serde(default)]
	pub indicator: bool,
}

impl WorkspaceConfig {
	pub fn summary(&self) -> WorkspaceSummary {
		WorkspaceSummary {
			name: self.name.clone(),
			browser: self.browser,
			workspace: self.workspace.clone(),
			cdp_port: self.cdp_port,
			daemon_port: self.daemon_port,
			purpose: self.purpose.clone(),
			aliases: self.aliases.clone(),
			favorites: self.favorites.clone(),
			default_mode: self.default_mode,
			indicator: self.indicator,
		}
	}
}

/// Result of resolving a user-supplied browser/workspace/alias triple.
#[derive(Debug, Clone)]
pub struct WorkspaceSelection {
	pub browser: BrowserKind,
	pub workspace: Option<String>,
	pub cdp_port: Option<u16>,
	pub config: Option<WorkspaceConfig>,
}

/// Directory-backed store of workspace descriptors.
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
	root: PathBuf,
}

impl WorkspaceStore {
	/// Store rooted at the default app directory.
	pub fn open_default() -> Result<Self> {
		Ok(Self { root: paths::app_root()? })
	}

	pub fn with_root(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// All readable descriptors under the root, in directory order.
	pub fn list(&self) -> Vec<WorkspaceConfig> {
		let Ok(entries) = fs::read_dir(&self.root) else {
			return Vec::new();
		};
		let mut out = Vec::new();
		let mut names: Vec<_> = entries.flatten().map(|e| e.path()).collect();
		names.sort();
		for dir in names {
			let descriptor = dir.join(DESCRIPTOR_FILE);
			if !descriptor.is_file() {
				continue;
			}
			match read_descriptor(&descriptor) {
				Ok(cfg) => out.push(cfg),
				Err(err) => {
					warn!(target = "ccb.workspace", path = %descriptor.display(), error = %err, "skipping unreadable workspace descriptor");
				}
			}
		}
		out
	}

	/// Look up by exact `(browser, slug)`.
	pub fn get(&self, browser: BrowserKind, workspace: &str) -> Option<WorkspaceConfig> {
		self.list()
			.into_iter()
			.find(|cfg| cfg.browser == browser && cfg.workspace.eq_ignore_ascii_case(workspace))
	}

	/// First workspace whose aliases contain `alias` (case-insensitive).
	pub fn resolve_alias(&self, alias: &str) -> Option<WorkspaceConfig> {
		self.list()
			.into_iter()
			.find(|cfg| cfg.aliases.iter().any(|a| a.eq_ignore_ascii_case(alias)))
	}

	/// Resolve a start request's `browser`/`workspace` strings.
	///
	/// Order: `workspace` as an alias, then `workspace` as a slug under the
	/// given (or default) browser kind, then `browser` alone as an alias.
	/// Unknown names are allowed through when they parse as a kind: a start
	/// with no descriptor still launches against an ad-hoc directory.
	pub fn resolve(&self, browser: Option<&str>, workspace: Option<&str>) -> Result<WorkspaceSelection> {
		if let Some(ws) = workspace {
			if let Some(cfg) = self.resolve_alias(ws) {
				return Ok(selection_from(cfg));
			}
			let kind = match browser {
				Some(b) => b.parse::<BrowserKind>().map_err(CcbError::InvalidInput)?,
				None => BrowserKind::default(),
			};
			if let Some(cfg) = self.get(kind, ws) {
				return Ok(selection_from(cfg));
			}
			return Ok(WorkspaceSelection {
				browser: kind,
				workspace: Some(ws.to_string()),
				cdp_port: None,
				config: None,
			});
		}

		if let Some(b) = browser {
			if let Ok(kind) = b.parse::<BrowserKind>() {
				return Ok(WorkspaceSelection {
					browser: kind,
					workspace: None,
					cdp_port: None,
					config: None,
				});
			}
			if let Some(cfg) = self.resolve_alias(b) {
				return Ok(selection_from(cfg));
			}
			return Err(CcbError::ConfigNotFound(b.to_string()));
		}

		Ok(WorkspaceSelection {
			browser: BrowserKind::default(),
			workspace: None,
			cdp_port: None,
			config: None,
		})
	}

	/// Duplicate aliases across descriptors; aliases must be globally unique.
	pub fn duplicate_aliases(&self) -> Vec<String> {
		let mut seen = std::collections::HashMap::new();
		let mut dups = Vec::new();
		for cfg in self.list() {
			for alias in &cfg.aliases {
				let key = alias.to_ascii_lowercase();
				if seen.insert(key.clone(), cfg.workspace.clone()).is_some() && !dups.contains(&key) {
					dups.push(key);
				}
			}
		}
		dups
	}

	/// Write a descriptor into its workspace directory, creating it if absent.
	pub fn save(&self, cfg: &WorkspaceConfig) -> Result<PathBuf> {
		let dir = self.root.join(format!("{}-{}", cfg.browser, cfg.workspace));
		fs::create_dir_all(&dir)?;
		let path = dir.join(DESCRIPTOR_FILE);
		let json = serde_json::to_string_pretty(cfg)?;
		fs::write(&path, json)?;
		Ok(path)
	}
}

fn selection_from(cfg: WorkspaceConfig) -> WorkspaceSelection {
	WorkspaceSelection {
		browser: cfg.browser,
		workspace: Some(cfg.workspace.clone()),
		cdp_port: Some(cfg.cdp_port),
		config: Some(cfg),
	}
}

fn read_descriptor(path: &Path) -> Result<WorkspaceConfig> {
	let raw = fs::read_to_string(path)?;
	Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
	use tempfile::tempdir;

	use super::*;

	fn cfg(browser: BrowserKind, slug: &str, aliases: &[&str], cdp_port: u16) -> WorkspaceConfig {
		WorkspaceConfig {
			name: slug.to_string(),
			browser,
			workspace: slug.to_string(),
			cdp_port,
			daemon_port: cdp_port + 1000,
			purpose: String::new(),
			aliases: aliases.iter().map(|s| s.to_string()).collect(),
			favorites: vec![],
			default_mode: None,
			indicator: true,
		}
	}

	#[test]
	fn alias_resolution_scans_siblings() {
		let dir = tempdir().unwrap();
		let store = WorkspaceStore::with_root(dir.path());
		store.save(&cfg(BrowserKind::Chrome, "work", &["w", "office"], 9222)).unwrap();
		store.save(&cfg(BrowserKind::Brave, "personal", &["p"], 9333)).unwrap();

		let hit = store.resolve_alias("OFFICE").unwrap();
		assert_eq!(hit.workspace, "work");
		assert!(store.resolve_alias("nope").is_none());
	}

	#[test]
	fn resolve_prefers_alias_over_slug() {
		let dir = tempdir().unwrap();
		let store = WorkspaceStore::with_root(dir.path());
		store.save(&cfg(BrowserKind::Chrome, "work", &["personal"], 9222)).unwrap();
		store.save(&cfg(BrowserKind::Brave, "personal", &[], 9333)).unwrap();

		// "personal" is an alias of chrome-work, so the alias wins.
		let sel = store.resolve(None, Some("personal")).unwrap();
		assert_eq!(sel.browser, BrowserKind::Chrome);
		assert_eq!(sel.workspace.as_deref(), Some("work"));
		assert_eq!(sel.cdp_port, Some(9222));
	}

	#[test]
	fn resolve_unknown_workspace_is_ad_hoc() {
		let dir = tempdir().unwrap();
		let store = WorkspaceStore::with_root(dir.path());
		let sel = store.resolve(Some("edge"), Some("scratch")).unwrap();
		assert_eq!(sel.browser, BrowserKind::Edge);
		assert_eq!(sel.workspace.as_deref(), Some("scratch"));
		assert!(sel.config.is_none());
	}

	#[test]
	fn resolve_unknown_browser_string_fails() {
		let dir = tempdir().unwrap();
		let store = WorkspaceStore::with_root(dir.path());
		assert!(matches!(store.resolve(Some("netscape"), None), Err(CcbError::ConfigNotFound(_))));
	}

	#[test]
	fn duplicate_aliases_detected() {
		let dir = tempdir().unwrap();
		let store = WorkspaceStore::with_root(dir.path());
		store.save(&cfg(BrowserKind::Chrome, "a", &["shared"], 9222)).unwrap();
		store.save(&cfg(BrowserKind::Edge, "b", &["Shared"], 9333)).unwrap();
		assert_eq!(store.duplicate_aliases(), vec!["shared".to_string()]);
	}

	#[test]
	fn unreadable_descriptor_is_skipped() {
		let dir = tempdir().unwrap();
		let store = WorkspaceStore::with_root(dir.path());
		store.save(&cfg(BrowserKind::Chrome, "good", &[], 9222)).unwrap();
		let bad = dir.path().join("chrome-bad");
		fs::create_dir_all(&bad).unwrap();
		fs::write(bad.join(DESCRIPTOR_FILE), "{not json").unwrap();
		assert_eq!(store.list().len(), 1);
	}
}

//! Element refs: the `eN` handles handed out by snapshots.
//!
//! A ref resolves to an [`ElementDescriptor`], enough to rebuild a locator
//! later without holding any live DOM handle. The per-page map is replaced
//! wholesale by each snapshot; a small global LRU keyed by
//! `(normalized_cdp_url, target_id)` lets refs survive the daemon's internal
//! page objects being recreated.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How a ref is resolved back to an element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefMode {
	/// Role + accessible-name locator rebuilt from the descriptor.
	#[default]
	Role,
	/// Engine-native `aria-ref=eN` lookup.
	Aria,
}

/// Stored description of one snapshotted element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
	pub role: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Index among same role+name matches, when ambiguous.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nth: Option<usize>,
	/// CSS selector of the owning iframe, for frame-scoped elements.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub frame_selector: Option<String>,
	#[serde(default)]
	pub mode: RefMode,
}

/// Case-insensitive `eN` → descriptor map for one page.
#[derive(Debug, Clone, Default)]
pub struct RefMap {
	map: HashMap<String, ElementDescriptor>,
}

impl RefMap {
	pub fn get(&self, element_ref: &str) -> Option<&ElementDescriptor> {
		self.map.get(&normalize_ref(element_ref))
	}

	/// Replace the whole map, as each snapshot does.
	pub fn replace(&mut self, entries: impl IntoIterator<Item = (String, ElementDescriptor)>) {
		self.map = entries.into_iter().map(|(k, v)| (normalize_ref(&k), v)).collect();
	}

	pub fn len(&self) -> usize {
		self.map.len()
	}

	pub fn is_empty(&self) -> bool {
		self.map.is_empty()
	}

	pub fn entries(&self) -> impl Iterator<Item = (&String, &ElementDescriptor)> {
		self.map.iter()
	}
}

fn normalize_ref(raw: &str) -> String {
	raw.trim().to_ascii_lowercase()
}

pub const REF_CACHE_CAP: usize = 50;

/// Insertion-order LRU of recent ref maps across all pages.
#[derive(Debug, Default)]
pub struct RefCache {
	order: Vec<(String, String)>,
	maps: HashMap<(String, String), RefMap>,
}

impl RefCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn store(&mut self, cdp_url: &str, target_id: &str, map: RefMap) {
		let key = (cdp_url.to_string(), target_id.to_string());
		if self.maps.insert(key.clone(), map).is_none() {
			self.order.push(key);
			if self.order.len() > REF_CACHE_CAP {
				let evicted = self.order.remove(0);
				self.maps.remove(&evicted);
			}
		}
	}

	pub fn get(&self, cdp_url: &str, target_id: &str) -> Option<&RefMap> {
		self.maps.get(&(cdp_url.to_string(), target_id.to_string()))
	}

	pub fn len(&self) -> usize {
		self.maps.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn descriptor(role: &str, name: Option<&str>) -> ElementDescriptor {
		ElementDescriptor {
			role: role.into(),
			name: name.map(String::from),
			..Default::default()
		}
	}

	#[test]
	fn refs_are_case_insensitive() {
		let mut map = RefMap::default();
		map.replace([("E7".to_string(), descriptor("button", Some("Save")))]);
		assert!(map.get("e7").is_some());
		assert!(map.get("E7").is_some());
		assert!(map.get(" e7 ").is_some());
		assert!(map.get("e8").is_none());
	}

	#[test]
	fn replace_is_wholesale() {
		let mut map = RefMap::default();
		map.replace([("e1".to_string(), descriptor("link", None))]);
		map.replace([("e2".to_string(), descriptor("button", None))]);
		assert!(map.get("e1").is_none());
		assert!(map.get("e2").is_some());
		assert_eq!(map.len(), 1);
	}

	#[test]
	fn cache_evicts_by_insertion_order() {
		let mut cache = RefCache::new();
		for i in 0..(REF_CACHE_CAP + 5) {
			let mut map = RefMap::default();
			map.replace([("e1".to_string(), descriptor("button", None))]);
			cache.store("http://127.0.0.1:9222", &format!("T{i}"), map);
		}
		assert_eq!(cache.len(), REF_CACHE_CAP);
		assert!(cache.get("http://127.0.0.1:9222", "T0").is_none());
		assert!(cache.get("http://127.0.0.1:9222", "T54").is_some());
	}

	#[test]
	fn cache_restore_by_target_key() {
		let mut cache = RefCache::new();
		let mut map = RefMap::default();
		map.replace([("e3".to_string(), descriptor("textbox", Some("Email")))]);
		cache.store("http://127.0.0.1:9222", "TAB1", map);

		let restored = cache.get("http://127.0.0.1:9222", "TAB1").unwrap();
		assert_eq!(restored.get("E3").unwrap().role, "textbox");
		assert!(cache.get("http://127.0.0.1:9333", "TAB1").is_none());
	}
}

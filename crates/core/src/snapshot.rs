//! Snapshot engine: compact accessibility tree plus ref map.
//!
//! The walker runs inside the page, shares role/name conventions with the
//! locator query library, tags every addressable element with a
//! `data-ccb-ref` attribute, and hands back `(tree text, ref entries)`. The
//! caller replaces the page's ref map wholesale with the result.

use chromiumoxide::Page;
use serde::Deserialize;

use crate::error::{CcbError, Result};
use crate::page::locator::QUERY_LIB;
use crate::page::refs::{ElementDescriptor, RefMode};

const SNAPSHOT_JS: &str = include_str!("js/snapshot.js");

/// Raw walker output for one page.
#[derive(Debug)]
pub struct Snapshot {
	pub tree: String,
	pub entries: Vec<(String, ElementDescriptor)>,
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
	tree: String,
	refs: Vec<RawRef>,
}

#[derive(Debug, Deserialize)]
struct RawRef {
	#[serde(rename = "ref")]
	element_ref: String,
	role: String,
	name: Option<String>,
	#[serde(default)]
	nth: Option<usize>,
	#[serde(default)]
	frame: Option<String>,
}

/// Run the walker and collect the ref map entries.
pub async fn capture(page: &Page) -> Result<Snapshot> {
	let expr = format!("(() => {{\n{QUERY_LIB}\n{SNAPSHOT_JS}\nreturn __ccbSnapshot();\n}})()");
	let value = page
		.evaluate(expr)
		.await
		.map_err(|err| CcbError::Cdp(format!("snapshot evaluation failed: {err}")))?;
	let raw: RawSnapshot = value
		.into_value()
		.map_err(|err| CcbError::Cdp(format!("snapshot returned malformed data: {err}")))?;
	Ok(Snapshot {
		tree: raw.tree,
		entries: raw
			.refs
			.into_iter()
			.map(|r| {
				(
					r.element_ref,
					ElementDescriptor {
						role: r.role,
						name: r.name.filter(|n| !n.is_empty()),
						nth: r.nth,
						frame_selector: r.frame,
						mode: RefMode::Role,
					},
				)
			})
			.collect(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn raw_snapshot_parses_walker_shape() {
		let raw: RawSnapshot = serde_json::from_str(
			r#"{
				"tree": "- button \"Save\" [ref=e1]\n- link \"Docs\" [ref=e2]",
				"refs": [
					{"ref": "e1", "role": "button", "name": "Save"},
					{"ref": "e2", "role": "link", "name": "Docs", "nth": 0, "frame": null}
				]
			}"#,
		)
		.unwrap();
		assert_eq!(raw.refs.len(), 2);
		assert_eq!(raw.refs[0].element_ref, "e1");
		assert_eq!(raw.refs[1].nth, Some(0));
	}

	#[test]
	fn walker_script_defines_snapshot_fn() {
		assert!(SNAPSHOT_JS.contains("function __ccbSnapshot"));
		assert!(SNAPSHOT_JS.contains("data-ccb-ref"));
	}
}

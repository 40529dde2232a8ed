//! Locator building and in-page element resolution.
//!
//! A [`LocatorSpec`] is the bridge between stored [`ElementDescriptor`]s (or
//! caller-supplied text/selector targets) and a concrete element in the live
//! page. Resolution happens inside the page: an embedded query library walks
//! the DOM, applies the same role/name conventions the snapshot engine used,
//! and reports geometry back. The matched element is stashed on
//! `window.__ccbHit` so the follow-up action script can operate on it
//! without re-querying.

use std::time::Duration;

use chromiumoxide::Page;
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;

use crate::error::{CcbError, Result};
use crate::page::refs::{ElementDescriptor, RefMap, RefMode};

pub(crate) const QUERY_LIB: &str = include_str!("../js/query.js");
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One resolvable element target.
#[derive(Debug, Clone, PartialEq)]
pub enum LocatorSpec {
	/// Snapshot-tagged lookup (`data-ccb-ref` attribute).
	AriaRef { element_ref: String, frame_selector: Option<String> },
	Role {
		role: String,
		name: Option<String>,
		nth: Option<usize>,
		frame_selector: Option<String>,
	},
	Text { text: String },
	Css { selector: String },
	/// Full CSS path; resolved first-match without strictness.
	CssPath { path: String },
}

impl LocatorSpec {
	/// Build the spec for a ref using the page's current ref map.
	pub fn from_ref(element_ref: &str, refs: &RefMap) -> Result<Self> {
		let descriptor = refs
			.get(element_ref)
			.ok_or_else(|| CcbError::UnknownRef(element_ref.to_string()))?;
		Ok(Self::from_descriptor(element_ref, descriptor))
	}

	pub fn from_descriptor(element_ref: &str, d: &ElementDescriptor) -> Self {
		match d.mode {
			RefMode::Aria => LocatorSpec::AriaRef {
				element_ref: element_ref.trim().to_ascii_lowercase(),
				frame_selector: d.frame_selector.clone(),
			},
			RefMode::Role => LocatorSpec::Role {
				role: d.role.clone(),
				name: d.name.clone(),
				nth: d.nth,
				frame_selector: d.frame_selector.clone(),
			},
		}
	}

	/// Human description used in translated errors.
	pub fn describe(&self) -> String {
		match self {
			LocatorSpec::AriaRef { element_ref, .. } => format!("ref {element_ref}"),
			LocatorSpec::Role { role, name: Some(name), .. } => format!("{role} \"{name}\""),
			LocatorSpec::Role { role, name: None, .. } => format!("role {role}"),
			LocatorSpec::Text { text } => format!("text \"{text}\""),
			LocatorSpec::Css { selector } => format!("selector \"{selector}\""),
			LocatorSpec::CssPath { path } => format!("css path \"{path}\""),
		}
	}

	fn query_spec(&self) -> serde_json::Value {
		match self {
			LocatorSpec::AriaRef { element_ref, frame_selector } => json!({
				"kind": "ariaRef",
				"ref": element_ref,
				"frame": frame_selector,
			}),
			LocatorSpec::Role { role, name, nth, frame_selector } => json!({
				"kind": "role",
				"role": role,
				"name": name,
				"nth": nth,
				"frame": frame_selector,
			}),
			LocatorSpec::Text { text } => json!({ "kind": "text", "text": text }),
			LocatorSpec::Css { selector } => json!({ "kind": "css", "selector": selector }),
			LocatorSpec::CssPath { path } => json!({ "kind": "cssPath", "selector": path }),
		}
	}
}

/// Geometry and match state reported by the in-page query.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResult {
	pub error: Option<String>,
	#[serde(default)]
	pub count: usize,
	pub rect: Option<Rect>,
	#[serde(default)]
	pub visible: bool,
	#[serde(default)]
	pub tag: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Rect {
	pub x: f64,
	pub y: f64,
	pub width: f64,
	pub height: f64,
}

impl Rect {
	pub fn center(&self) -> (f64, f64) {
		(self.x + self.width / 2.0, self.y + self.height / 2.0)
	}
}

/// Expression that locates the element and returns its [`QueryResult`].
pub fn query_expression(spec: &LocatorSpec) -> String {
	format!(
		"(() => {{\n{QUERY_LIB}\nreturn __ccbFind({});\n}})()",
		spec.query_spec()
	)
}

/// Expression that locates the element, then runs `body` with `el` bound to
/// the match. `body` must end in a `return`; on locator failure the query
/// result (with its `error` field) is returned instead.
pub fn with_element_expression(spec: &LocatorSpec, body: &str) -> String {
	format!(
		"(() => {{\n{QUERY_LIB}\nconst r = __ccbFind({});\nif (r.error) return r;\nconst el = window.__ccbHit;\n{body}\n}})()",
		spec.query_spec()
	)
}

/// Resolve a locator, polling until the element is present and visible.
///
/// `multiple` is fatal immediately (waiting will not fix it); `notfound`
/// polls until `timeout_ms` then surfaces as a translated timeout.
pub async fn wait_for(page: &Page, spec: &LocatorSpec, timeout_ms: u64) -> Result<QueryResult> {
	let target = spec.describe();
	let expr = query_expression(spec);
	let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

	loop {
		let result = evaluate_query(page, &expr).await?;
		match result.error.as_deref() {
			None if result.visible => return Ok(result),
			None => {
				// Present but not visible yet; keep polling.
			}
			Some("multiple") => return Err(CcbError::MultipleMatches { target: target.clone() }),
			Some("badselector") => {
				return Err(CcbError::InvalidInput(format!("invalid selector for {target}")));
			}
			Some(_) => {}
		}
		if tokio::time::Instant::now() >= deadline {
			return Err(CcbError::Timeout {
				ms: timeout_ms,
				what: format!("{target} was not found or not visible"),
			});
		}
		sleep(POLL_INTERVAL).await;
	}
}

/// Single-shot resolve without waiting; used by probes.
pub async fn find_now(page: &Page, spec: &LocatorSpec) -> Result<QueryResult> {
	evaluate_query(page, &query_expression(spec)).await
}

async fn evaluate_query(page: &Page, expr: &str) -> Result<QueryResult> {
	let value = page
		.evaluate(expr.to_string())
		.await
		.map_err(|err| CcbError::Cdp(format!("element query failed: {err}")))?;
	value
		.into_value::<QueryResult>()
		.map_err(|err| CcbError::Cdp(format!("element query returned malformed data: {err}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn from_ref_unknown_is_explicit() {
		let refs = RefMap::default();
		let err = LocatorSpec::from_ref("e4", &refs).unwrap_err();
		assert!(matches!(err, CcbError::UnknownRef(_)));
		assert!(err.to_string().contains("snapshot"));
	}

	#[test]
	fn role_descriptor_builds_role_spec() {
		let mut refs = RefMap::default();
		refs.replace([(
			"e2".to_string(),
			ElementDescriptor {
				role: "button".into(),
				name: Some("Save".into()),
				nth: Some(1),
				frame_selector: None,
				mode: RefMode::Role,
			},
		)]);
		let spec = LocatorSpec::from_ref("E2", &refs).unwrap();
		assert_eq!(
			spec,
			LocatorSpec::Role {
				role: "button".into(),
				name: Some("Save".into()),
				nth: Some(1),
				frame_selector: None,
			}
		);
	}

	#[test]
	fn aria_descriptor_builds_aria_spec() {
		let mut refs = RefMap::default();
		refs.replace([(
			"e9".to_string(),
			ElementDescriptor {
				role: "textbox".into(),
				name: None,
				nth: None,
				frame_selector: Some("iframe#login".into()),
				mode: RefMode::Aria,
			},
		)]);
		let spec = LocatorSpec::from_ref("e9", &refs).unwrap();
		assert_eq!(
			spec,
			LocatorSpec::AriaRef {
				element_ref: "e9".into(),
				frame_selector: Some("iframe#login".into()),
			}
		);
	}

	#[test]
	fn query_expression_embeds_spec_json() {
		let expr = query_expression(&LocatorSpec::Text { text: "Sign in".into() });
		assert!(expr.contains("__ccbFind"));
		assert!(expr.contains("\"kind\":\"text\""));
		assert!(expr.contains("Sign in"));
	}

	#[test]
	fn with_element_wraps_body_after_guard() {
		let expr = with_element_expression(&LocatorSpec::Css { selector: "#save".into() }, "el.focus(); return {ok: true};");
		assert!(expr.contains("if (r.error) return r;"));
		assert!(expr.contains("el.focus()"));
	}

	#[test]
	fn rect_center() {
		let rect = Rect { x: 10.0, y: 20.0, width: 100.0, height: 40.0 };
		assert_eq!(rect.center(), (60.0, 40.0));
	}
}

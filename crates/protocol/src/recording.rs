//! Recording, locator, and replay wire types.
//!
//! A recording is a normalized list of steps captured from live page events.
//! Each interaction step carries its locators in descending stability order;
//! the replayer tries them until one resolves.

use serde::{Deserialize, Serialize};

/// One way of finding an element on a page.
///
/// Ordered by stability when attached to a step: role+name survives layout
/// churn, visible text survives class renames, a tag+class selector survives
/// text edits, and the full CSS path is the last resort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "camelCase")]
pub enum Locator {
	#[serde(rename_all = "camelCase")]
	Role {
		role: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		name: Option<String>,
	},
	#[serde(rename_all = "camelCase")]
	Text { text: String },
	#[serde(rename_all = "camelCase")]
	Selector { selector: String },
	#[serde(rename_all = "camelCase")]
	CssPath { path: String },
}

impl Locator {
	/// Short human label used in replay reports.
	pub fn describe(&self) -> String {
		match self {
			Locator::Role { role, name: Some(name) } => format!("role={role} name=\"{name}\""),
			Locator::Role { role, name: None } => format!("role={role}"),
			Locator::Text { text } => format!("text=\"{text}\""),
			Locator::Selector { selector } => format!("selector={selector}"),
			Locator::CssPath { path } => format!("cssPath={path}"),
		}
	}
}

/// A single recorded step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Step {
	#[serde(rename_all = "camelCase")]
	Navigate { url: String },
	#[serde(rename_all = "camelCase")]
	Click { locators: Vec<Locator> },
	#[serde(rename_all = "camelCase")]
	Type { locators: Vec<Locator>, value: String },
	#[serde(rename_all = "camelCase")]
	Select { locators: Vec<Locator>, value: String },
	/// Only `Enter`, `Escape`, and `Tab` are recorded.
	#[serde(rename_all = "camelCase")]
	Keypress {
		key: String,
		#[serde(default, skip_serializing_if = "Vec::is_empty")]
		locators: Vec<Locator>,
	},
	#[serde(rename_all = "camelCase")]
	Scroll { scroll_x: f64, scroll_y: f64 },
}

impl Step {
	/// Action tag as it appears on the wire.
	pub fn action(&self) -> &'static str {
		match self {
			Step::Navigate { .. } => "navigate",
			Step::Click { .. } => "click",
			Step::Type { .. } => "type",
			Step::Select { .. } => "select",
			Step::Keypress { .. } => "keypress",
			Step::Scroll { .. } => "scroll",
		}
	}

	/// Locators attached to this step, if any.
	pub fn locators(&self) -> &[Locator] {
		match self {
			Step::Click { locators } | Step::Type { locators, .. } | Step::Select { locators, .. } | Step::Keypress { locators, .. } => locators,
			_ => &[],
		}
	}
}

/// A named, timestamped step list as persisted to `recording.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
	pub name: String,
	/// RFC3339 timestamp taken when recording stopped.
	pub recorded_at: String,
	pub steps: Vec<Step>,
}

/// Outcome of one replayed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStepResult {
	pub index: usize,
	pub action: String,
	pub ok: bool,
	/// Fatal failures halt the replay; nothing after this step ran.
	#[serde(default)]
	pub fatal: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// Winning locator description or navigated URL.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub detail: Option<String>,
}

/// Aggregate replay report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
	pub recording: String,
	pub total: usize,
	pub passed: usize,
	pub failed: usize,
	/// True when the run halted on a fatal step.
	pub fatal: bool,
	pub results: Vec<ReplayStepResult>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn locator_tagged_by_strategy() {
		let json = serde_json::to_value(Locator::Role {
			role: "button".into(),
			name: Some("Submit".into()),
		})
		.unwrap();
		assert_eq!(json["strategy"], "role");
		assert_eq!(json["name"], "Submit");

		let path: Locator = serde_json::from_str(r#"{"strategy":"cssPath","path":"div > button:nth-of-type(2)"}"#).unwrap();
		assert_eq!(path, Locator::CssPath { path: "div > button:nth-of-type(2)".into() });
	}

	#[test]
	fn step_scroll_uses_camel_case() {
		let json = serde_json::to_value(Step::Scroll { scroll_x: 0.0, scroll_y: 640.0 }).unwrap();
		assert_eq!(json["action"], "scroll");
		assert_eq!(json["scrollY"], 640.0);
	}

	#[test]
	fn keypress_locators_optional() {
		let step: Step = serde_json::from_str(r#"{"action":"keypress","key":"Enter"}"#).unwrap();
		assert_eq!(step, Step::Keypress { key: "Enter".into(), locators: vec![] });
	}

	#[test]
	fn recording_round_trip() {
		let rec = Recording {
			name: "login".into(),
			recorded_at: "2026-01-10T12:00:00Z".into(),
			steps: vec![
				Step::Navigate { url: "https://example.com/login".into() },
				Step::Type {
					locators: vec![Locator::Role { role: "textbox".into(), name: Some("Email".into()) }],
					value: "user@example.com".into(),
				},
				Step::Keypress { key: "Enter".into(), locators: vec![] },
			],
		};
		let json = serde_json::to_string(&rec).unwrap();
		let back: Recording = serde_json::from_str(&json).unwrap();
		assert_eq!(back.steps.len(), 3);
		assert_eq!(back.steps[1].action(), "type");
	}
}

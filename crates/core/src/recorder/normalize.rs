//! Raw capture events → normalized step lists.
//!
//! The in-page script already debounces typing, but normalization repeats
//! the collapse here so a drain racing a flush can never produce stuttered
//! `type` steps. Normalization is idempotent: running it twice yields the
//! same list.

use serde::Deserialize;

use ccb_protocol::{Locator, Step};

/// One event drained from `window.__ccRecorderEvents` or the beacon.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
	pub kind: String,
	#[serde(default)]
	pub locators: Vec<Locator>,
	#[serde(default)]
	pub value: Option<String>,
	#[serde(default)]
	pub key: Option<String>,
	#[serde(default)]
	pub scroll_x: Option<f64>,
	#[serde(default)]
	pub scroll_y: Option<f64>,
	#[serde(default)]
	pub ts: Option<u64>,
}

/// Convert a raw event into a step; unknown kinds and malformed events
/// (recorder noise) are dropped silently.
pub fn step_from_event(event: &RawEvent) -> Option<Step> {
	match event.kind.as_str() {
		"click" if !event.locators.is_empty() => Some(Step::Click {
			locators: event.locators.clone(),
		}),
		"type" if !event.locators.is_empty() => Some(Step::Type {
			locators: event.locators.clone(),
			value: event.value.clone().unwrap_or_default(),
		}),
		"select" if !event.locators.is_empty() => Some(Step::Select {
			locators: event.locators.clone(),
			value: event.value.clone().unwrap_or_default(),
		}),
		"keypress" => {
			let key = event.key.clone()?;
			if !matches!(key.as_str(), "Enter" | "Escape" | "Tab") {
				return None;
			}
			Some(Step::Keypress {
				key,
				locators: event.locators.clone(),
			})
		}
		"scroll" => Some(Step::Scroll {
			scroll_x: event.scroll_x.unwrap_or(0.0),
			scroll_y: event.scroll_y.unwrap_or(0.0),
		}),
		_ => None,
	}
}

/// Collapse stuttered input and duplicate navigation.
///
/// - consecutive `type` steps on the same locators keep only the last value
///   (the flushed state of the field),
/// - consecutive `navigate` steps to the same URL deduplicate,
/// - consecutive `scroll` steps keep only the final position.
pub fn normalize_steps(steps: Vec<Step>) -> Vec<Step> {
	let mut out: Vec<Step> = Vec::with_capacity(steps.len());
	for step in steps {
		match (&step, out.last_mut()) {
			(Step::Navigate { url }, Some(Step::Navigate { url: prev })) if url == prev => {}
			(Step::Type { locators, .. }, Some(Step::Type { locators: prev, .. })) if locators == prev => {
				*out.last_mut().expect("non-empty") = step;
			}
			(Step::Scroll { .. }, Some(Step::Scroll { .. })) => {
				*out.last_mut().expect("non-empty") = step;
			}
			_ => out.push(step),
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	fn raw(kind: &str) -> RawEvent {
		RawEvent {
			kind: kind.into(),
			locators: vec![],
			value: None,
			key: None,
			scroll_x: None,
			scroll_y: None,
			ts: None,
		}
	}

	fn email_locators() -> Vec<Locator> {
		vec![Locator::Role {
			role: "textbox".into(),
			name: Some("Email".into()),
		}]
	}

	#[test]
	fn debounced_typing_collapses_to_final_value() {
		// type "a", "ab", "abc" into the same input, submit, navigate twice.
		let mut steps = Vec::new();
		for value in ["a", "ab", "abc"] {
			let mut ev = raw("type");
			ev.locators = email_locators();
			ev.value = Some(value.into());
			steps.push(step_from_event(&ev).unwrap());
		}
		let mut enter = raw("keypress");
		enter.key = Some("Enter".into());
		steps.push(step_from_event(&enter).unwrap());
		steps.push(Step::Navigate { url: "https://app.example.com/dashboard".into() });
		steps.push(Step::Navigate { url: "https://app.example.com/dashboard".into() });

		let normalized = normalize_steps(steps);
		assert_eq!(normalized.len(), 3);
		assert_eq!(
			normalized[0],
			Step::Type {
				locators: email_locators(),
				value: "abc".into(),
			}
		);
		assert_eq!(normalized[1], Step::Keypress { key: "Enter".into(), locators: vec![] });
		assert_eq!(normalized[2], Step::Navigate { url: "https://app.example.com/dashboard".into() });
	}

	#[test]
	fn normalization_is_idempotent() {
		let steps = vec![
			Step::Navigate { url: "https://a.example".into() },
			Step::Navigate { url: "https://a.example".into() },
			Step::Click { locators: email_locators() },
			Step::Scroll { scroll_x: 0.0, scroll_y: 100.0 },
			Step::Scroll { scroll_x: 0.0, scroll_y: 600.0 },
			Step::Navigate { url: "https://b.example".into() },
		];
		let once = normalize_steps(steps);
		let twice = normalize_steps(once.clone());
		assert_eq!(once, twice);
		assert_eq!(once.len(), 4);
	}

	#[test]
	fn only_whitelisted_keys_become_steps() {
		for (key, expected) in [("Enter", true), ("Escape", true), ("Tab", true), ("a", false), ("Shift", false)] {
			let mut ev = raw("keypress");
			ev.key = Some(key.into());
			assert_eq!(step_from_event(&ev).is_some(), expected, "key {key}");
		}
	}

	#[test]
	fn clicks_without_locators_are_noise() {
		assert!(step_from_event(&raw("click")).is_none());
		assert!(step_from_event(&raw("gesture")).is_none());
	}

	#[test]
	fn distinct_navigations_survive() {
		let steps = vec![
			Step::Navigate { url: "https://a.example/login".into() },
			Step::Navigate { url: "https://a.example/app".into() },
			Step::Navigate { url: "https://a.example/login".into() },
		];
		assert_eq!(normalize_steps(steps).len(), 3);
	}
}

//! Recorder pipeline test: raw capture events (exactly as the in-page
//! script emits them) through ingest, navigation suppression, and
//! normalization, without a browser.

use std::time::Duration;

use serde_json::json;

use ccb::recorder::{RawEvent, RecorderCore, normalize_steps};
use ccb_protocol::Step;

fn events_from(value: serde_json::Value) -> Vec<RawEvent> {
	serde_json::from_value(value).unwrap()
}

#[test]
fn login_flow_produces_clean_steps() {
	let mut core = RecorderCore::new("login", Duration::from_secs(2));
	core.seed_navigate("https://app.example.com/login");

	// The capture script debounces typing in-page, but a drain can still
	// race the flush; the daemon collapses the stutter regardless.
	let drained = events_from(json!([
		{"kind": "click", "locators": [
			{"strategy": "role", "role": "textbox", "name": "Email"},
			{"strategy": "selector", "selector": "input.email"},
			{"strategy": "cssPath", "path": "form:nth-of-type(1) > input:nth-of-type(1)"}
		], "ts": 1000},
		{"kind": "type", "locators": [
			{"strategy": "role", "role": "textbox", "name": "Email"}
		], "value": "a", "ts": 1100},
		{"kind": "type", "locators": [
			{"strategy": "role", "role": "textbox", "name": "Email"}
		], "value": "ab", "ts": 1200},
		{"kind": "type", "locators": [
			{"strategy": "role", "role": "textbox", "name": "Email"}
		], "value": "abc", "ts": 1300},
		{"kind": "keypress", "key": "Enter", "ts": 1400}
	]));
	core.ingest(drained, 1_400);

	// Submit triggers a real navigation 3s later (outside the suppression
	// window), which the site reports twice.
	core.on_navigation("https://app.example.com/dashboard", 4_500);
	core.on_navigation("https://app.example.com/dashboard", 4_600);

	let recording = core.finish();
	assert_eq!(recording.name, "login");

	let actions: Vec<&str> = recording.steps.iter().map(Step::action).collect();
	assert_eq!(actions, vec!["navigate", "click", "type", "keypress", "navigate"]);

	match &recording.steps[2] {
		Step::Type { value, locators } => {
			assert_eq!(value, "abc");
			assert_eq!(locators.len(), 1);
		}
		other => panic!("expected collapsed type step, got {other:?}"),
	}
	match &recording.steps[4] {
		Step::Navigate { url } => assert_eq!(url, "https://app.example.com/dashboard"),
		other => panic!("expected deduplicated navigate, got {other:?}"),
	}
}

#[test]
fn spa_click_navigation_is_suppressed() {
	let mut core = RecorderCore::new("spa", Duration::from_secs(2));
	core.seed_navigate("https://spa.example.com/");

	let click = events_from(json!([
		{"kind": "click", "locators": [{"strategy": "text", "text": "Inbox"}], "ts": 10_000}
	]));
	core.ingest(click, 10_000);

	// Router updates the URL 300ms after the click: an artifact, not a step.
	core.on_navigation("https://spa.example.com/inbox", 10_300);

	let recording = core.finish();
	let actions: Vec<&str> = recording.steps.iter().map(Step::action).collect();
	assert_eq!(actions, vec!["navigate", "click"]);
}

#[test]
fn normalization_survives_round_trips_through_json() {
	let steps = vec![
		Step::Navigate { url: "https://a.example".into() },
		Step::Scroll { scroll_x: 0.0, scroll_y: 250.0 },
		Step::Scroll { scroll_x: 0.0, scroll_y: 900.0 },
		Step::Keypress { key: "Tab".into(), locators: vec![] },
	];
	let normalized = normalize_steps(steps);

	// Serialize as the recording file would, read back, normalize again.
	let json = serde_json::to_string(&normalized).unwrap();
	let reread: Vec<Step> = serde_json::from_str(&json).unwrap();
	assert_eq!(normalize_steps(reread.clone()), reread);
	assert_eq!(reread.len(), 3);
}

#[test]
fn beacon_shaped_events_parse() {
	// Shape produced by capture.js right before unload.
	let events = events_from(json!([
		{"kind": "type", "locators": [
			{"strategy": "role", "role": "searchbox", "name": "Search"},
			{"strategy": "cssPath", "path": "header:nth-of-type(1) > input:nth-of-type(1)"}
		], "value": "rust daemon", "ts": 99_000},
		{"kind": "scroll", "scrollX": 0, "scrollY": 480, "ts": 99_100}
	]));
	assert_eq!(events.len(), 2);

	let mut core = RecorderCore::new("search", Duration::from_secs(2));
	core.ingest(events, 99_100);
	let recording = core.finish();
	assert_eq!(recording.steps.len(), 2);
	assert!(matches!(&recording.steps[1], Step::Scroll { scroll_y, .. } if *scroll_y == 480.0));
}

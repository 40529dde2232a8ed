//! Raw Input-domain dispatch: trusted mouse and key events.
//!
//! These are the only primitives that synthesize user input; both the
//! interaction dispatcher and the CAPTCHA solvers go through here. Paths
//! with per-point delays come from the timing engine.

use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::input::{
	DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use tokio::time::sleep;

use ccb_protocol::MouseButton as ApiButton;

use crate::error::{CcbError, Result};
use crate::timing::PathPoint;

/// CDP modifier bitmask: Alt=1, Control=2, Meta=4, Shift=8.
pub fn modifier_mask(modifiers: &[String]) -> i64 {
	modifiers.iter().fold(0, |mask, m| {
		mask | match m.as_str() {
			"Alt" => 1,
			"Control" => 2,
			"Meta" => 4,
			"Shift" => 8,
			_ => 0,
		}
	})
}

fn cdp_button(button: ApiButton) -> MouseButton {
	match button {
		ApiButton::Left => MouseButton::Left,
		ApiButton::Right => MouseButton::Right,
		ApiButton::Middle => MouseButton::Middle,
	}
}

pub async fn mouse_move(page: &Page, x: f64, y: f64) -> Result<()> {
	let params = DispatchMouseEventParams::builder()
		.r#type(DispatchMouseEventType::MouseMoved)
		.x(x)
		.y(y)
		.build()
		.map_err(CcbError::Cdp)?;
	page.execute(params).await?;
	Ok(())
}

/// Move along a path point-by-point, honoring per-point delays.
pub async fn mouse_move_along(page: &Page, points: &[PathPoint]) -> Result<()> {
	for point in points {
		mouse_move(page, point.x, point.y).await?;
		if point.delay_ms > 0 {
			sleep(Duration::from_millis(point.delay_ms)).await;
		}
	}
	Ok(())
}

/// Press-and-release at a point; `click_count` 2 doubles.
pub async fn mouse_click(page: &Page, x: f64, y: f64, button: ApiButton, click_count: i64, modifiers: i64) -> Result<()> {
	let button = cdp_button(button);
	for count in 1..=click_count.max(1) {
		let down = DispatchMouseEventParams::builder()
			.r#type(DispatchMouseEventType::MousePressed)
			.x(x)
			.y(y)
			.button(button.clone())
			.click_count(count)
			.modifiers(modifiers)
			.build()
			.map_err(CcbError::Cdp)?;
		page.execute(down).await?;
		let up = DispatchMouseEventParams::builder()
			.r#type(DispatchMouseEventType::MouseReleased)
			.x(x)
			.y(y)
			.button(button.clone())
			.click_count(count)
			.modifiers(modifiers)
			.build()
			.map_err(CcbError::Cdp)?;
		page.execute(up).await?;
	}
	Ok(())
}

/// Full drag gesture: press at the first point, move through the rest,
/// release at the last.
pub async fn mouse_drag(page: &Page, points: &[PathPoint]) -> Result<()> {
	let Some(first) = points.first() else {
		return Ok(());
	};
	let last = points.last().expect("non-empty path");

	mouse_move(page, first.x, first.y).await?;
	let down = DispatchMouseEventParams::builder()
		.r#type(DispatchMouseEventType::MousePressed)
		.x(first.x)
		.y(first.y)
		.button(MouseButton::Left)
		.click_count(1)
		.build()
		.map_err(CcbError::Cdp)?;
	page.execute(down).await?;

	for point in &points[1..] {
		mouse_move(page, point.x, point.y).await?;
		if point.delay_ms > 0 {
			sleep(Duration::from_millis(point.delay_ms)).await;
		}
	}

	let up = DispatchMouseEventParams::builder()
		.r#type(DispatchMouseEventType::MouseReleased)
		.x(last.x)
		.y(last.y)
		.button(MouseButton::Left)
		.click_count(1)
		.build()
		.map_err(CcbError::Cdp)?;
	page.execute(up).await?;
	Ok(())
}

/// Wheel scroll at the viewport center.
pub async fn mouse_wheel(page: &Page, delta_x: f64, delta_y: f64) -> Result<()> {
	let params = DispatchMouseEventParams::builder()
		.r#type(DispatchMouseEventType::MouseWheel)
		.x(100.0)
		.y(100.0)
		.delta_x(delta_x)
		.delta_y(delta_y)
		.build()
		.map_err(CcbError::Cdp)?;
	page.execute(params).await?;
	Ok(())
}

/// Key name → (DOM code, key text, Windows virtual key).
fn key_details(key: &str) -> (&'static str, Option<&'static str>, i64) {
	match key {
		"Enter" => ("Enter", Some("\r"), 13),
		"Tab" => ("Tab", Some("\t"), 9),
		"Escape" => ("Escape", None, 27),
		"Backspace" => ("Backspace", None, 8),
		"Delete" => ("Delete", None, 46),
		"ArrowUp" => ("ArrowUp", None, 38),
		"ArrowDown" => ("ArrowDown", None, 40),
		"ArrowLeft" => ("ArrowLeft", None, 37),
		"ArrowRight" => ("ArrowRight", None, 39),
		"Home" => ("Home", None, 36),
		"End" => ("End", None, 35),
		"PageUp" => ("PageUp", None, 33),
		"PageDown" => ("PageDown", None, 34),
		_ => ("", None, 0),
	}
}

/// Press a named key (or a single character), optionally holding it.
pub async fn press_key(page: &Page, key: &str, hold: Option<Duration>) -> Result<()> {
	let (code, text, vk) = key_details(key);

	let mut down = DispatchKeyEventParams::builder()
		.r#type(DispatchKeyEventType::KeyDown)
		.key(key);
	if !code.is_empty() {
		down = down.code(code).windows_virtual_key_code(vk).native_virtual_key_code(vk);
	}
	if let Some(text) = text {
		down = down.text(text);
	} else if key.chars().count() == 1 {
		down = down.text(key);
	}
	page.execute(down.build().map_err(CcbError::Cdp)?).await?;

	if let Some(hold) = hold {
		sleep(hold).await;
	}

	let mut up = DispatchKeyEventParams::builder()
		.r#type(DispatchKeyEventType::KeyUp)
		.key(key);
	if !code.is_empty() {
		up = up.code(code).windows_virtual_key_code(vk).native_virtual_key_code(vk);
	}
	page.execute(up.build().map_err(CcbError::Cdp)?).await?;
	Ok(())
}

/// Type one character as a `char` key event.
pub async fn type_char(page: &Page, ch: char) -> Result<()> {
	let params = DispatchKeyEventParams::builder()
		.r#type(DispatchKeyEventType::Char)
		.text(ch.to_string())
		.build()
		.map_err(CcbError::Cdp)?;
	page.execute(params).await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn modifier_mask_matches_cdp_bits() {
		assert_eq!(modifier_mask(&[]), 0);
		assert_eq!(modifier_mask(&["Shift".into()]), 8);
		assert_eq!(modifier_mask(&["Control".into(), "Alt".into()]), 3);
		assert_eq!(modifier_mask(&["Meta".into(), "Shift".into()]), 12);
		assert_eq!(modifier_mask(&["Hyper".into()]), 0);
	}

	#[test]
	fn key_details_cover_recorded_keys() {
		for key in ["Enter", "Escape", "Tab"] {
			let (code, _, vk) = key_details(key);
			assert!(!code.is_empty());
			assert!(vk > 0);
		}
		let (code, _, _) = key_details("q");
		assert!(code.is_empty());
	}
}

//! Pointer, keyboard, and form verbs.

use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use rand::Rng;
use tokio::time::sleep;

use ccb_protocol::{
	ClickRequest, ClickResponse, DragRequest, FillRequest, HoverRequest, PressRequest, ResizeRequest, ScrollDirection,
	ScrollRequest, SelectRequest, TypeRequest, UploadRequest,
};

use super::Daemon;
use super::navigate::read_url;
use crate::error::{CcbError, Result};
use crate::page::input;
use crate::page::locator::{self, LocatorSpec};
use crate::timing::{self, PathPoint};

const DEFAULT_ACTION_TIMEOUT_MS: u64 = 8_000;
const MIN_ACTION_TIMEOUT_MS: u64 = 500;
const MAX_ACTION_TIMEOUT_MS: u64 = 60_000;
const SLOW_TYPE_DELAY: Duration = Duration::from_millis(75);
const DEFAULT_SCROLL_AMOUNT: f64 = 500.0;

fn clamp_timeout(requested: Option<u64>) -> u64 {
	requested
		.unwrap_or(DEFAULT_ACTION_TIMEOUT_MS)
		.clamp(MIN_ACTION_TIMEOUT_MS, MAX_ACTION_TIMEOUT_MS)
}

impl Daemon {
	pub async fn click(&self, req: ClickRequest) -> Result<ClickResponse> {
		let (page, entry) = self.page(req.target_id.as_deref()).await?;
		let spec = self
			.target_spec(&entry, req.element_ref.as_deref(), req.text.as_deref(), req.selector.as_deref())
			.await?;
		let timeout_ms = clamp_timeout(req.timeout);
		let query = locator::wait_for(&page, &spec, timeout_ms).await?;
		let rect = query
			.rect
			.ok_or_else(|| CcbError::DetachedElement { target: spec.describe() })?;
		let (cx, cy) = rect.center();
		let before_url = read_url(&page).await;

		let modifiers = input::modifier_mask(&req.modifiers);
		let click_count = if req.double { 2 } else { 1 };

		if self.humanized().await {
			let origin = entry.lock().await.cursor.unwrap_or((0.0, 0.0));
			let (path, pre_delay, offset) = {
				let mut rng = rand::rng();
				let path = timing::human_mouse_path(&mut rng, origin.0, origin.1, cx, cy);
				(path, timing::pre_click_delay(&mut rng), timing::click_offset(&mut rng))
			};
			// The path is traversed without per-point delays; the pause
			// happens once, just before the press.
			let points: Vec<PathPoint> = path.iter().map(|&(x, y)| PathPoint { x, y, delay_ms: 0 }).collect();
			input::mouse_move_along(&page, &points).await?;
			sleep(pre_delay).await;
			let (x, y) = (cx + offset.0, cy + offset.1);
			input::mouse_click(&page, x, y, req.button, click_count, modifiers).await?;
			entry.lock().await.cursor = Some((x, y));
		} else {
			input::mouse_click(&page, cx, cy, req.button, click_count, modifiers).await?;
			entry.lock().await.cursor = Some((cx, cy));
		}

		let after_url = read_url(&page).await;
		Ok(ClickResponse {
			navigated: before_url != after_url,
			url: after_url,
		})
	}

	pub async fn type_text(&self, req: TypeRequest) -> Result<()> {
		let (page, entry) = self.page(req.target_id.as_deref()).await?;
		let spec = self
			.target_spec(&entry, req.element_ref.as_deref(), req.text_content.as_deref(), req.selector.as_deref())
			.await?;
		let query = locator::wait_for(&page, &spec, DEFAULT_ACTION_TIMEOUT_MS).await?;

		if self.humanized().await {
			// Click into the field first, like a person would.
			let rect = query
				.rect
				.ok_or_else(|| CcbError::DetachedElement { target: spec.describe() })?;
			let (cx, cy) = rect.center();
			input::mouse_click(&page, cx, cy, ccb_protocol::MouseButton::Left, 1, 0).await?;
			entry.lock().await.cursor = Some((cx, cy));

			let pre = {
				let mut rng = rand::rng();
				timing::pre_type_delay(&mut rng)
			};
			sleep(pre).await;
			clear_field(&page, &spec).await?;
			for ch in req.text.chars() {
				input::type_char(&page, ch).await?;
				let delay = {
					let mut rng = rand::rng();
					timing::inter_key_delay(&mut rng)
				};
				sleep(delay).await;
			}
		} else if req.slowly {
			focus_element(&page, &spec).await?;
			clear_field(&page, &spec).await?;
			for ch in req.text.chars() {
				input::type_char(&page, ch).await?;
				sleep(SLOW_TYPE_DELAY).await;
			}
		} else {
			fill_value(&page, &spec, &req.text).await?;
		}

		if req.submit {
			input::press_key(&page, "Enter", None).await?;
		}
		Ok(())
	}

	pub async fn press(&self, req: PressRequest) -> Result<()> {
		let (page, entry) = self.page(req.target_id.as_deref()).await?;
		if req.element_ref.is_some() || req.selector.is_some() {
			let spec = self
				.target_spec(&entry, req.element_ref.as_deref(), None, req.selector.as_deref())
				.await?;
			locator::wait_for(&page, &spec, DEFAULT_ACTION_TIMEOUT_MS).await?;
			focus_element(&page, &spec).await?;
		}
		input::press_key(&page, &req.key, req.delay.map(Duration::from_millis)).await
	}

	pub async fn hover(&self, req: HoverRequest) -> Result<()> {
		let (page, entry) = self.page(req.target_id.as_deref()).await?;
		let spec = self
			.target_spec(&entry, req.element_ref.as_deref(), req.text.as_deref(), req.selector.as_deref())
			.await?;
		let query = locator::wait_for(&page, &spec, DEFAULT_ACTION_TIMEOUT_MS).await?;
		let rect = query
			.rect
			.ok_or_else(|| CcbError::DetachedElement { target: spec.describe() })?;
		let (cx, cy) = rect.center();

		if self.humanized().await {
			let origin = entry.lock().await.cursor.unwrap_or((0.0, 0.0));
			let path = {
				let mut rng = rand::rng();
				timing::human_mouse_path(&mut rng, origin.0, origin.1, cx, cy)
			};
			let points: Vec<PathPoint> = path.iter().map(|&(x, y)| PathPoint { x, y, delay_ms: 0 }).collect();
			input::mouse_move_along(&page, &points).await?;
		} else {
			input::mouse_move(&page, cx, cy).await?;
		}
		entry.lock().await.cursor = Some((cx, cy));
		Ok(())
	}

	/// Ref-to-ref or coordinate-to-coordinate drag.
	pub async fn drag(&self, req: DragRequest) -> Result<()> {
		let (page, entry) = self.page(req.target_id.as_deref()).await?;

		let (sx, sy) = match (&req.start_ref, req.start_x, req.start_y) {
			(Some(element_ref), _, _) => self.ref_center(&page, &entry, element_ref).await?,
			(None, Some(x), Some(y)) => (x, y),
			_ => return Err(CcbError::InvalidInput("drag needs startRef or startX/startY".into())),
		};
		let (ex, ey) = match (&req.end_ref, req.end_x, req.end_y) {
			(Some(element_ref), _, _) => self.ref_center(&page, &entry, element_ref).await?,
			(None, Some(x), Some(y)) => (x, y),
			_ => return Err(CcbError::InvalidInput("drag needs endRef or endX/endY".into())),
		};

		let points = if self.humanized().await {
			let mut rng = rand::rng();
			timing::human_drag_path(&mut rng, sx, sy, ex, ey)
		} else {
			vec![
				PathPoint { x: sx, y: sy, delay_ms: 0 },
				PathPoint { x: ex, y: ey, delay_ms: 0 },
			]
		};
		input::mouse_drag(&page, &points).await?;
		entry.lock().await.cursor = Some((ex, ey));
		Ok(())
	}

	/// Single- or multi-value select.
	pub async fn select(&self, req: SelectRequest) -> Result<()> {
		if req.values.is_empty() {
			return Err(CcbError::InvalidInput("select needs at least one value".into()));
		}
		let (page, entry) = self.page(req.target_id.as_deref()).await?;
		let spec = self
			.target_spec(&entry, req.element_ref.as_deref(), None, req.selector.as_deref())
			.await?;
		locator::wait_for(&page, &spec, DEFAULT_ACTION_TIMEOUT_MS).await?;

		let values = serde_json::to_string(&req.values)?;
		let body = format!(
			"const values = {values}; \
			 if (el.multiple) {{ \
			 for (const option of el.options) option.selected = values.includes(option.value); \
			 }} else {{ el.value = values[0]; }} \
			 el.dispatchEvent(new Event('input', {{bubbles: true}})); \
			 el.dispatchEvent(new Event('change', {{bubbles: true}})); \
			 return true;"
		);
		run_on_element(&page, &spec, &body).await
	}

	/// Ordered form fill; checkbox/radio entries use set-checked semantics.
	pub async fn fill(&self, req: FillRequest) -> Result<()> {
		if req.fields.is_empty() {
			return Err(CcbError::InvalidInput("fill needs at least one field".into()));
		}
		let (page, entry) = self.page(req.target_id.as_deref()).await?;
		let humanized = self.humanized().await;

		for field in &req.fields {
			if humanized {
				let delay = {
					let mut rng = rand::rng();
					timing::pre_type_delay(&mut rng)
				};
				sleep(delay).await;
			}
			let spec = {
				let state = entry.lock().await;
				LocatorSpec::from_ref(&field.element_ref, &state.refs)?
			};
			locator::wait_for(&page, &spec, DEFAULT_ACTION_TIMEOUT_MS).await?;

			match field.field_type.as_deref() {
				Some("checkbox") | Some("radio") => {
					let checked = truthy(&field.value);
					let body = format!(
						"el.checked = {checked}; \
						 el.dispatchEvent(new Event('input', {{bubbles: true}})); \
						 el.dispatchEvent(new Event('change', {{bubbles: true}})); \
						 return true;"
					);
					run_on_element(&page, &spec, &body).await?;
				}
				_ => fill_value(&page, &spec, &field.value).await?,
			}
		}
		Ok(())
	}

	/// Scroll a ref into view, or scroll the viewport by direction/amount.
	pub async fn scroll(&self, req: ScrollRequest) -> Result<()> {
		let (page, entry) = self.page(req.target_id.as_deref()).await?;

		if let Some(element_ref) = &req.element_ref {
			let spec = {
				let state = entry.lock().await;
				LocatorSpec::from_ref(element_ref, &state.refs)?
			};
			locator::wait_for(&page, &spec, DEFAULT_ACTION_TIMEOUT_MS).await?;
			return run_on_element(&page, &spec, "el.scrollIntoView({block: 'center', behavior: 'instant'}); return true;").await;
		}

		let amount = req.amount.unwrap_or(DEFAULT_SCROLL_AMOUNT);
		let (dx, dy) = match req.direction {
			ScrollDirection::Up => (0.0, -amount),
			ScrollDirection::Down => (0.0, amount),
			ScrollDirection::Left => (-amount, 0.0),
			ScrollDirection::Right => (amount, 0.0),
		};

		if self.humanized().await {
			let pre = {
				let mut rng = rand::rng();
				timing::pre_scroll_delay(&mut rng)
			};
			sleep(pre).await;
			let chunks = {
				let mut rng = rand::rng();
				rng.random_range(3..=6)
			};
			for _ in 0..chunks {
				let (jx, jy, pause) = {
					let mut rng = rand::rng();
					(
						rng.random_range(-10.0..=10.0),
						rng.random_range(-10.0..=10.0),
						rng.random_range(30..=100),
					)
				};
				let step_x = dx / chunks as f64 + if dx != 0.0 { jx } else { 0.0 };
				let step_y = dy / chunks as f64 + if dy != 0.0 { jy } else { 0.0 };
				input::mouse_wheel(&page, step_x, step_y).await?;
				sleep(Duration::from_millis(pause)).await;
			}
		} else {
			input::mouse_wheel(&page, dx, dy).await?;
		}
		Ok(())
	}

	/// Attach files to a file input, then dispatch the events frameworks
	/// listen for (programmatic assignment alone goes unnoticed).
	pub async fn upload(&self, req: UploadRequest) -> Result<()> {
		if req.files.is_empty() {
			return Err(CcbError::InvalidInput("upload needs at least one file".into()));
		}
		let (page, entry) = self.page(req.target_id.as_deref()).await?;
		let spec = self
			.target_spec(&entry, req.element_ref.as_deref(), None, req.selector.as_deref())
			.await?;
		locator::wait_for(&page, &spec, DEFAULT_ACTION_TIMEOUT_MS).await?;

		// Resolve the element as a remote object so DOM.setFileInputFiles
		// can address it.
		let expr = locator::with_element_expression(&spec, "return el;");
		let evaluated = page
			.evaluate(expr)
			.await
			.map_err(|err| CcbError::Cdp(format!("file input lookup failed: {err}")))?;
		let object_id = evaluated
			.object()
			.object_id
			.clone()
			.ok_or_else(|| CcbError::DetachedElement { target: spec.describe() })?;

		let params = SetFileInputFilesParams::builder()
			.files(req.files.clone())
			.object_id(object_id)
			.build()
			.map_err(CcbError::Cdp)?;
		page.execute(params).await?;

		run_on_element(
			&page,
			&spec,
			"el.dispatchEvent(new Event('input', {bubbles: true})); \
			 el.dispatchEvent(new Event('change', {bubbles: true})); return true;",
		)
		.await
	}

	pub async fn resize(&self, req: ResizeRequest) -> Result<()> {
		let (page, _entry) = self.page(req.target_id.as_deref()).await?;
		let params = SetDeviceMetricsOverrideParams::builder()
			.width(i64::from(req.width.max(320)))
			.height(i64::from(req.height.max(240)))
			.device_scale_factor(1.0)
			.mobile(false)
			.build()
			.map_err(CcbError::Cdp)?;
		page.execute(params).await?;
		Ok(())
	}

	async fn ref_center(
		&self,
		page: &Page,
		entry: &std::sync::Arc<tokio::sync::Mutex<crate::page::PageEntry>>,
		element_ref: &str,
	) -> Result<(f64, f64)> {
		let spec = {
			let state = entry.lock().await;
			LocatorSpec::from_ref(element_ref, &state.refs)?
		};
		let query = locator::wait_for(page, &spec, DEFAULT_ACTION_TIMEOUT_MS).await?;
		let rect = query
			.rect
			.ok_or_else(|| CcbError::DetachedElement { target: spec.describe() })?;
		Ok(rect.center())
	}
}

/// Truthiness for checkbox/radio fill values.
fn truthy(value: &str) -> bool {
	matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on" | "checked")
}

async fn run_on_element(page: &Page, spec: &LocatorSpec, body: &str) -> Result<()> {
	let expr = locator::with_element_expression(spec, body);
	let value = page
		.evaluate(expr)
		.await
		.map_err(|err| crate::error::translate_cdp_failure(&spec.describe(), DEFAULT_ACTION_TIMEOUT_MS, &err.to_string()))?;
	if let Ok(result) = value.into_value::<serde_json::Value>() {
		if let Some(error) = result.get("error").and_then(|e| e.as_str()) {
			return Err(crate::error::translate_cdp_failure(&spec.describe(), DEFAULT_ACTION_TIMEOUT_MS, error));
		}
	}
	Ok(())
}

async fn focus_element(page: &Page, spec: &LocatorSpec) -> Result<()> {
	run_on_element(page, spec, "el.focus(); return true;").await
}

async fn clear_field(page: &Page, spec: &LocatorSpec) -> Result<()> {
	run_on_element(
		page,
		spec,
		"if ('value' in el) { el.value = ''; el.dispatchEvent(new Event('input', {bubbles: true})); } return true;",
	)
	.await
}

async fn fill_value(page: &Page, spec: &LocatorSpec, value: &str) -> Result<()> {
	let body = format!(
		"el.focus(); el.value = {value}; \
		 el.dispatchEvent(new Event('input', {{bubbles: true}})); \
		 el.dispatchEvent(new Event('change', {{bubbles: true}})); \
		 return true;",
		value = serde_json::to_string(value)?,
	);
	run_on_element(page, spec, &body).await
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn timeout_clamping() {
		assert_eq!(clamp_timeout(None), 8_000);
		assert_eq!(clamp_timeout(Some(100)), 500);
		assert_eq!(clamp_timeout(Some(120_000)), 60_000);
		assert_eq!(clamp_timeout(Some(9_000)), 9_000);
	}

	#[test]
	fn truthy_values() {
		for v in ["true", "1", "yes", "ON", " checked "] {
			assert!(truthy(v), "{v} should be truthy");
		}
		for v in ["false", "0", "no", "", "off"] {
			assert!(!truthy(v), "{v} should be falsy");
		}
	}
}

//! Waiting, evaluation, and screenshot verbs.

use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, CaptureScreenshotParams, Viewport};
use tokio::time::sleep;

use ccb_protocol::{
	EvaluateRequest, EvaluateResponse, ImageFormat, ScreenshotRequest, ScreenshotResponse, TargetRequest, WaitRequest,
};

use super::Daemon;
use super::navigate::wait_loaded;
use crate::error::{CcbError, Result};
use crate::page::locator::{self, LocatorSpec};

const DEFAULT_WAIT_TIMEOUT_MS: u64 = 20_000;
const WAIT_POLL: Duration = Duration::from_millis(250);

impl Daemon {
	/// Composable wait conditions, applied in a fixed order: fixed time,
	/// text visible, text gone, selector visible, URL match, load state,
	/// then a custom predicate. Each is bounded by the same timeout.
	pub async fn wait(&self, req: WaitRequest) -> Result<()> {
		let (page, _entry) = self.page(req.target_id.as_deref()).await?;
		let timeout_ms = req.timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS);

		if let Some(time_ms) = req.time_ms {
			sleep(Duration::from_millis(time_ms)).await;
		}
		if let Some(text) = &req.text {
			locator::wait_for(&page, &LocatorSpec::Text { text: text.clone() }, timeout_ms).await?;
		}
		if let Some(text_gone) = &req.text_gone {
			wait_condition(timeout_ms, &format!("text \"{text_gone}\" to disappear"), || {
				let spec = LocatorSpec::Text { text: text_gone.clone() };
				let page = page.clone();
				async move {
					match locator::find_now(&page, &spec).await {
						Ok(result) => Ok(result.error.is_some() || !result.visible),
						Err(err) => Err(err),
					}
				}
			})
			.await?;
		}
		if let Some(selector) = &req.selector {
			locator::wait_for(&page, &LocatorSpec::Css { selector: selector.clone() }, timeout_ms).await?;
		}
		if let Some(url) = &req.url {
			wait_condition(timeout_ms, &format!("URL to match {url}"), || {
				let page = page.clone();
				let url = url.clone();
				async move {
					let current = super::navigate::read_url(&page).await;
					Ok(current.contains(&url))
				}
			})
			.await?;
		}
		if let Some(load_state) = req.load_state {
			wait_loaded(&page, load_state, timeout_ms).await?;
		}
		if let Some(function) = &req.function {
			let expr = predicate_expression(function)?;
			wait_condition(timeout_ms, "custom predicate to become truthy", || {
				let page = page.clone();
				let expr = expr.clone();
				async move {
					let value = page
						.evaluate(expr)
						.await
						.map_err(|err| CcbError::Cdp(format!("wait predicate failed: {err}")))?;
					Ok(extract_truthy(value.value()))
				}
			})
			.await?;
		}
		Ok(())
	}

	/// Run a string-serialized function, optionally against a ref-resolved
	/// element. Parse errors come back as invalid input, not as a crash.
	pub async fn evaluate(&self, req: EvaluateRequest) -> Result<EvaluateResponse> {
		let (page, entry) = self.page(req.target_id.as_deref()).await?;

		let expr = match &req.element_ref {
			Some(element_ref) => {
				let spec = {
					let state = entry.lock().await;
					LocatorSpec::from_ref(element_ref, &state.refs)?
				};
				locator::wait_for(&page, &spec, 8_000).await?;
				locator::with_element_expression(&spec, &safe_call_body(&req.function, true))
			}
			None => format!("(() => {{\n{}\n}})()", safe_call_body(&req.function, false)),
		};

		let value = page
			.evaluate(expr)
			.await
			.map_err(|err| CcbError::Cdp(format!("evaluation failed: {err}")))?;
		let result: serde_json::Value = value.into_value().unwrap_or(serde_json::Value::Null);

		if let Some(error) = result.get("__ccbError").and_then(|e| e.as_str()) {
			return Err(CcbError::InvalidInput(format!("function failed: {error}")));
		}
		Ok(EvaluateResponse {
			value: result.get("value").cloned().unwrap_or(serde_json::Value::Null),
		})
	}

	/// Full-page, viewport, or element screenshot as base64.
	pub async fn screenshot(&self, req: ScreenshotRequest) -> Result<ScreenshotResponse> {
		let (page, entry) = self.page(req.target_id.as_deref()).await?;

		let element_target = req.element_ref.is_some() || req.selector.is_some();
		if element_target && req.full_page {
			return Err(CcbError::InvalidInput("element screenshots cannot be fullPage".into()));
		}

		let format = match req.format {
			ImageFormat::Png => CaptureScreenshotFormat::Png,
			ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
		};
		let mut builder = CaptureScreenshotParams::builder().format(format);
		if req.format == ImageFormat::Jpeg {
			builder = builder.quality(i64::from(req.quality.unwrap_or(80).min(100)));
		}

		if element_target {
			let spec = self
				.target_spec(&entry, req.element_ref.as_deref(), None, req.selector.as_deref())
				.await?;
			let query = locator::wait_for(&page, &spec, 8_000).await?;
			let rect = query
				.rect
				.ok_or_else(|| CcbError::DetachedElement { target: spec.describe() })?;
			builder = builder.clip(
				Viewport::builder()
					.x(rect.x)
					.y(rect.y)
					.width(rect.width.max(1.0))
					.height(rect.height.max(1.0))
					.scale(1.0)
					.build()
					.map_err(CcbError::Cdp)?,
			);
		} else if req.full_page {
			builder = builder.capture_beyond_viewport(true);
		}

		let result = page
			.execute(builder.build())
			.await
			.map_err(|err| CcbError::Cdp(format!("screenshot failed: {err}")))?;
		Ok(ScreenshotResponse {
			data: result.result.data.clone().into(),
			format: req.format,
		})
	}

	/// Screenshot with ref badges drawn over snapshotted elements, so a
	/// vision model can name the ref it wants clicked.
	pub async fn screenshot_labels(&self, req: TargetRequest) -> Result<ScreenshotResponse> {
		let (page, _entry) = self.page(req.target_id.as_deref()).await?;
		overlay_labels(&page, true).await?;
		let result = page
			.execute(CaptureScreenshotParams::builder().format(CaptureScreenshotFormat::Png).build())
			.await;
		overlay_labels(&page, false).await?;
		let result = result.map_err(|err| CcbError::Cdp(format!("screenshot failed: {err}")))?;
		Ok(ScreenshotResponse {
			data: result.result.data.clone().into(),
			format: ImageFormat::Png,
		})
	}
}

async fn overlay_labels(page: &Page, show: bool) -> Result<()> {
	let expr = if show {
		"(() => { \
			document.querySelectorAll('.__ccb_label').forEach(n => n.remove()); \
			document.querySelectorAll('[data-ccb-ref]').forEach(el => { \
				const r = el.getBoundingClientRect(); \
				if (r.width <= 0 || r.height <= 0) return; \
				const tag = document.createElement('div'); \
				tag.className = '__ccb_label'; \
				tag.textContent = el.getAttribute('data-ccb-ref'); \
				tag.style.cssText = 'position:fixed;z-index:2147483647;background:#d93025;color:#fff;' + \
					'font:10px/14px monospace;padding:0 3px;border-radius:2px;pointer-events:none;' + \
					'left:' + r.x + 'px;top:' + Math.max(0, r.y - 14) + 'px;'; \
				document.body.appendChild(tag); \
			}); return true; })()"
	} else {
		"(() => { document.querySelectorAll('.__ccb_label').forEach(n => n.remove()); return true; })()"
	};
	page.evaluate(expr)
		.await
		.map_err(|err| CcbError::Cdp(format!("label overlay failed: {err}")))?;
	Ok(())
}

/// Wrap caller-supplied function source so parse errors and throws come
/// back as data instead of breaking the evaluation.
fn safe_call_body(source: &str, with_element: bool) -> String {
	let serialized = serde_json::to_string(source).unwrap_or_else(|_| "\"\"".into());
	let invoke = if with_element { "fn(el)" } else { "fn()" };
	format!(
		"let fn; \
		 try {{ fn = (0, eval)('(' + {serialized} + ')'); }} \
		 catch (e) {{ return {{__ccbError: 'parse error: ' + e.message}}; }} \
		 if (typeof fn !== 'function') return {{__ccbError: 'not a function'}}; \
		 try {{ const v = {invoke}; return {{value: v === undefined ? null : v}}; }} \
		 catch (e) {{ return {{__ccbError: String(e && e.message || e)}}; }}"
	)
}

async fn wait_condition<F, Fut>(timeout_ms: u64, what: &str, mut check: F) -> Result<()>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<bool>>,
{
	let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
	loop {
		if check().await? {
			return Ok(());
		}
		if tokio::time::Instant::now() >= deadline {
			return Err(CcbError::Timeout {
				ms: timeout_ms,
				what: format!("waiting for {what}"),
			});
		}
		sleep(WAIT_POLL).await;
	}
}

fn predicate_expression(source: &str) -> Result<String> {
	let body = safe_call_body(source, false);
	Ok(format!("(() => {{\n{body}\n}})()"))
}

fn extract_truthy(value: Option<&serde_json::Value>) -> bool {
	let Some(value) = value else {
		return false;
	};
	let Some(inner) = value.get("value") else {
		return false;
	};
	match inner {
		serde_json::Value::Null => false,
		serde_json::Value::Bool(b) => *b,
		serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
		serde_json::Value::String(s) => !s.is_empty(),
		_ => true,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn safe_call_wraps_source_as_string() {
		let body = safe_call_body("() => document.title", false);
		assert!(body.contains("eval"));
		assert!(body.contains("\"() => document.title\""));
		assert!(body.contains("__ccbError"));
		assert!(body.contains("fn()"));

		let with_el = safe_call_body("(el) => el.value", true);
		assert!(with_el.contains("fn(el)"));
	}

	#[test]
	fn truthiness_of_predicate_results() {
		use serde_json::json;
		assert!(!extract_truthy(None));
		assert!(!extract_truthy(Some(&json!({"value": null}))));
		assert!(!extract_truthy(Some(&json!({"value": false}))));
		assert!(!extract_truthy(Some(&json!({"value": 0}))));
		assert!(!extract_truthy(Some(&json!({"value": ""}))));
		assert!(extract_truthy(Some(&json!({"value": true}))));
		assert!(extract_truthy(Some(&json!({"value": 3}))));
		assert!(extract_truthy(Some(&json!({"value": "ok"}))));
		assert!(extract_truthy(Some(&json!({"value": {"k": 1}}))));
	}
}

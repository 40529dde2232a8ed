//! Navigation and page-reading verbs.

use std::time::Duration;

use chromiumoxide::Page;
use tokio::time::sleep;

use ccb_protocol::{
	CaptchaDetectResponse, CaptchaSolveRequest, CaptchaSolveResponse, HtmlResponse, NavigateRequest, NavigateResponse,
	PageInfoResponse, SnapshotResponse, TargetRequest, TextResponse, WaitUntil,
};

use super::Daemon;
use crate::captcha::{self, PageCaptchaEnv, vision_from_env};
use crate::error::{CcbError, Result};
use crate::snapshot;
use crate::timing;

const DEFAULT_NAVIGATE_TIMEOUT_MS: u64 = 30_000;

impl Daemon {
	/// Navigate the target page, honoring `waitUntil` and human-mode pacing.
	/// In human/stealth mode a cheap DOM CAPTCHA probe runs after load and,
	/// when it trips, the solver is invoked inline.
	pub async fn navigate(&self, req: NavigateRequest) -> Result<NavigateResponse> {
		let (page, _entry) = self.page(req.target_id.as_deref()).await?;
		let humanized = self.humanized().await;

		if humanized {
			let delay = {
				let mut rng = rand::rng();
				timing::navigation_delay(&mut rng)
			};
			sleep(delay).await;
		}

		let timeout_ms = req.timeout.unwrap_or(DEFAULT_NAVIGATE_TIMEOUT_MS);
		match tokio::time::timeout(Duration::from_millis(timeout_ms), page.goto(&req.url)).await {
			Ok(Ok(_)) => {}
			Ok(Err(err)) => {
				return Err(crate::error::translate_cdp_failure(&format!("page {}", req.url), timeout_ms, &err.to_string()));
			}
			Err(_) => {
				return Err(CcbError::Timeout {
					ms: timeout_ms,
					what: format!("navigation to {} did not complete", req.url),
				});
			}
		}
		wait_loaded(&page, req.wait_until, timeout_ms).await?;

		self.install_indicator(&page, true).await;

		let mut captcha = None;
		if humanized {
			let delay = {
				let mut rng = rand::rng();
				timing::post_load_delay(&mut rng)
			};
			sleep(delay).await;

			if let Ok(detection) = captcha::detect_dom(&page).await {
				if detection.detected {
					let vision = vision_from_env();
					let env = PageCaptchaEnv::new(&page, vision.as_ref());
					captcha = captcha::solve(&env, captcha::DEFAULT_MAX_ATTEMPTS).await.ok();
				}
			}
		}

		Ok(NavigateResponse {
			url: read_url(&page).await,
			title: read_title(&page).await,
			captcha,
		})
	}

	pub async fn reload(&self, req: TargetRequest) -> Result<NavigateResponse> {
		let (page, _entry) = self.page(req.target_id.as_deref()).await?;
		page.reload().await.map_err(|err| CcbError::Cdp(format!("reload failed: {err}")))?;
		wait_loaded(&page, WaitUntil::Load, DEFAULT_NAVIGATE_TIMEOUT_MS).await?;
		Ok(NavigateResponse {
			url: read_url(&page).await,
			title: read_title(&page).await,
			captcha: None,
		})
	}

	pub async fn back(&self, req: TargetRequest) -> Result<NavigateResponse> {
		self.history_step(req, "history.back()").await
	}

	pub async fn forward(&self, req: TargetRequest) -> Result<NavigateResponse> {
		self.history_step(req, "history.forward()").await
	}

	async fn history_step(&self, req: TargetRequest, expr: &str) -> Result<NavigateResponse> {
		let (page, _entry) = self.page(req.target_id.as_deref()).await?;
		page.evaluate(expr.to_string())
			.await
			.map_err(|err| CcbError::Cdp(format!("history navigation failed: {err}")))?;
		wait_loaded(&page, WaitUntil::Domcontentloaded, 10_000).await?;
		Ok(NavigateResponse {
			url: read_url(&page).await,
			title: read_title(&page).await,
			captcha: None,
		})
	}

	/// Snapshot the page: replace its ref map wholesale and remember the map
	/// in the global ref cache.
	pub async fn snapshot(&self, req: TargetRequest) -> Result<SnapshotResponse> {
		let conn = self.conn().await?;
		let (page, entry) = self.page(req.target_id.as_deref()).await?;
		let snapshot = snapshot::capture(&page).await?;

		let refs = snapshot.entries.len();
		{
			let mut state = entry.lock().await;
			state.refs.replace(snapshot.entries);
			let mut cache = self.ref_cache.lock().await;
			cache.store(&conn.cdp_url, &state.target_id, state.refs.clone());
		}

		Ok(SnapshotResponse {
			snapshot: snapshot.tree,
			refs,
			url: read_url(&page).await,
			title: read_title(&page).await,
		})
	}

	pub async fn text(&self, req: TargetRequest) -> Result<TextResponse> {
		let (page, _entry) = self.page(req.target_id.as_deref()).await?;
		let value = page
			.evaluate("document.body ? document.body.innerText : ''")
			.await
			.map_err(|err| CcbError::Cdp(format!("text extraction failed: {err}")))?;
		Ok(TextResponse {
			text: value.value().and_then(|v| v.as_str().map(String::from)).unwrap_or_default(),
		})
	}

	pub async fn html(&self, req: TargetRequest) -> Result<HtmlResponse> {
		let (page, _entry) = self.page(req.target_id.as_deref()).await?;
		let html = page
			.content()
			.await
			.map_err(|err| CcbError::Cdp(format!("html extraction failed: {err}")))?;
		Ok(HtmlResponse { html })
	}

	pub async fn info(&self, req: TargetRequest) -> Result<PageInfoResponse> {
		let (page, entry) = self.page(req.target_id.as_deref()).await?;
		let state = entry.lock().await;
		Ok(PageInfoResponse {
			url: read_url(&page).await,
			title: read_title(&page).await,
			target_id: state.target_id.clone(),
			mode: self.mode().await,
			console_messages: state.console.len(),
			page_errors: state.errors.len(),
			network_requests: state.network.len(),
		})
	}

	// -- captcha ------------------------------------------------------------

	pub async fn captcha_detect(&self, req: TargetRequest) -> Result<CaptchaDetectResponse> {
		let (page, _entry) = self.page(req.target_id.as_deref()).await?;
		let dom = captcha::detect_dom(&page).await?;
		if dom.detected {
			return Ok(dom);
		}
		let vision = vision_from_env();
		let shot = crate::captcha::solvers::screenshot_base64(&page).await?;
		match captcha::detect_vision(vision.as_ref(), &shot).await {
			Ok(detection) => Ok(detection),
			// No vision backend: the DOM answer stands.
			Err(CcbError::VisionBackend(_)) => Ok(dom),
			Err(other) => Err(other),
		}
	}

	pub async fn captcha_solve(&self, req: CaptchaSolveRequest) -> Result<CaptchaSolveResponse> {
		let (page, _entry) = self.page(req.target_id.as_deref()).await?;
		let vision = vision_from_env();
		let env = PageCaptchaEnv::new(&page, vision.as_ref());
		captcha::solve(&env, req.max_attempts.unwrap_or(captcha::DEFAULT_MAX_ATTEMPTS)).await
	}
}

pub(crate) async fn read_url(page: &Page) -> String {
	match page.evaluate("window.location.href").await {
		Ok(value) => value.value().and_then(|v| v.as_str().map(String::from)).unwrap_or_default(),
		Err(_) => page.url().await.ok().flatten().unwrap_or_default(),
	}
}

pub(crate) async fn read_title(page: &Page) -> String {
	match page.evaluate("document.title").await {
		Ok(value) => value.value().and_then(|v| v.as_str().map(String::from)).unwrap_or_default(),
		Err(_) => String::new(),
	}
}

/// Poll the document until the requested load state holds.
pub(crate) async fn wait_loaded(page: &Page, wait_until: WaitUntil, timeout_ms: u64) -> Result<()> {
	let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
	loop {
		let state = page
			.evaluate("document.readyState")
			.await
			.ok()
			.and_then(|r| r.value().and_then(|v| v.as_str().map(String::from)));
		let done = match wait_until {
			WaitUntil::Domcontentloaded => matches!(state.as_deref(), Some("interactive") | Some("complete")),
			WaitUntil::Load | WaitUntil::Networkidle => matches!(state.as_deref(), Some("complete")),
		};
		if done {
			// Networkidle approximation: a short quiet period after load.
			if wait_until == WaitUntil::Networkidle {
				sleep(Duration::from_millis(500)).await;
			}
			return Ok(());
		}
		if tokio::time::Instant::now() >= deadline {
			return Err(CcbError::Timeout {
				ms: timeout_ms,
				what: "page did not reach the requested load state".into(),
			});
		}
		sleep(Duration::from_millis(100)).await;
	}
}

//! Tab verbs: list, open, close, focus, close-all.

use ccb_protocol::{TabCloseRequest, TabFocusRequest, TabInfo, TabOpenRequest, TabsResponse};

use super::Daemon;
use super::navigate::{read_title, read_url};
use crate::error::{CcbError, Result};

impl Daemon {
	pub async fn tabs(&self) -> Result<TabsResponse> {
		let conn = self.conn().await?;
		let mut tabs = Vec::new();
		for page in conn.pages().await? {
			tabs.push(TabInfo {
				target_id: page.target_id().inner().clone(),
				url: read_url(&page).await,
				title: read_title(&page).await,
			});
		}
		Ok(TabsResponse { tabs })
	}

	/// Open a tab, optionally registering it under a tab session.
	pub async fn tab_open(&self, req: TabOpenRequest) -> Result<TabInfo> {
		let conn = self.conn().await?;
		let url = req.url.as_deref().unwrap_or("about:blank");
		let page = conn.new_page(url).await?;
		let _ = self.registry.ensure_observed(&page).await;
		self.install_indicator(&page, true).await;

		let target_id = page.target_id().inner().clone();
		if let Some(session_id) = &req.session_id {
			self.sessions.add_tab(session_id, &target_id).await?;
		}
		Ok(TabInfo {
			target_id,
			url: read_url(&page).await,
			title: read_title(&page).await,
		})
	}

	/// Close one tab (or a whole session's tabs when `sessionId` is given).
	pub async fn tab_close(&self, req: TabCloseRequest) -> Result<Vec<String>> {
		if let Some(session_id) = &req.session_id {
			return self.session_close(session_id).await;
		}

		let conn = self.conn().await?;
		let page = match req.target_id.as_deref() {
			Some(id) => conn.find_page(id).await?,
			None => conn.focused_page().await?,
		};
		let target_id = page.target_id().inner().clone();
		page.close().await.map_err(|err| CcbError::Cdp(format!("tab close failed: {err}")))?;
		self.registry.remove(&target_id).await;

		// Drop the id from any session that referenced it.
		if !self.sessions.sessions_for_tab(&target_id).await.is_empty() {
			let live = conn
				.pages()
				.await
				.unwrap_or_default()
				.iter()
				.map(|p| p.target_id().inner().clone())
				.collect();
			self.sessions.reconcile(&live).await;
		}
		Ok(vec![target_id])
	}

	pub async fn tab_focus(&self, req: TabFocusRequest) -> Result<TabInfo> {
		let conn = self.conn().await?;
		let page = conn.focus_page(&req.target_id).await?;
		Ok(TabInfo {
			target_id: req.target_id,
			url: read_url(&page).await,
			title: read_title(&page).await,
		})
	}

	pub async fn tabs_close_all(&self) -> Result<usize> {
		let conn = self.conn().await?;
		let pages = conn.pages().await?;
		let mut closed = 0;
		for page in pages {
			let target_id = page.target_id().inner().clone();
			if page.close().await.is_ok() {
				closed += 1;
			}
			self.registry.remove(&target_id).await;
		}
		self.sessions.reconcile(&std::collections::HashSet::new()).await;
		Ok(closed)
	}
}

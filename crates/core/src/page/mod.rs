//! Per-page state: bounded event rings and ref maps.
//!
//! Every observed page gets a [`PageEntry`] owned by the [`PageRegistry`],
//! keyed by CDP target id. Console messages, page errors, and network
//! records land in fixed-capacity rings (oldest dropped silently). The entry
//! disappears when the page's event streams end, which is the close signal.

pub mod input;
pub mod locator;
pub mod refs;

use std::collections::HashMap;
use std::sync::Arc;

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network;
use chromiumoxide::cdp::js_protocol::runtime;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;

pub use refs::{ElementDescriptor, RefCache, RefMap, RefMode};

pub const CONSOLE_RING_CAP: usize = 500;
pub const ERROR_RING_CAP: usize = 200;
pub const NETWORK_RING_CAP: usize = 500;

/// Fixed-capacity FIFO; pushing past capacity drops the oldest element.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
	cap: usize,
	items: std::collections::VecDeque<T>,
}

impl<T> RingBuffer<T> {
	pub fn new(cap: usize) -> Self {
		Self {
			cap,
			items: std::collections::VecDeque::with_capacity(cap.min(64)),
		}
	}

	pub fn push(&mut self, item: T) {
		if self.items.len() == self.cap {
			self.items.pop_front();
		}
		self.items.push_back(item);
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
		self.items.iter()
	}

	pub fn iter_mut(&mut self) -> std::collections::vec_deque::IterMut<'_, T> {
		self.items.iter_mut()
	}
}

#[derive(Debug, Clone)]
pub struct ConsoleEntry {
	pub level: String,
	pub text: String,
}

#[derive(Debug, Clone)]
pub struct PageErrorEntry {
	pub message: String,
}

/// One network request, correlated with its response or failure.
#[derive(Debug, Clone)]
pub struct NetworkEntry {
	pub request_id: String,
	pub method: String,
	pub url: String,
	pub status: Option<i64>,
	pub error: Option<String>,
}

/// Mutable state for one live page.
pub struct PageEntry {
	pub target_id: String,
	pub console: RingBuffer<ConsoleEntry>,
	pub errors: RingBuffer<PageErrorEntry>,
	pub network: RingBuffer<NetworkEntry>,
	pub refs: RefMap,
	/// Last human-mode mouse position, origin of the next Bezier path.
	pub cursor: Option<(f64, f64)>,
}

impl PageEntry {
	fn new(target_id: String) -> Self {
		Self {
			target_id,
			console: RingBuffer::new(CONSOLE_RING_CAP),
			errors: RingBuffer::new(ERROR_RING_CAP),
			network: RingBuffer::new(NETWORK_RING_CAP),
			refs: RefMap::default(),
			cursor: None,
		}
	}
}

enum PageEvent {
	Console(Arc<runtime::EventConsoleApiCalled>),
	Exception(Arc<runtime::EventExceptionThrown>),
	Request(Arc<network::EventRequestWillBeSent>),
	Response(Arc<network::EventResponseReceived>),
	Failed(Arc<network::EventLoadingFailed>),
}

/// All live page entries, keyed by target id.
#[derive(Clone, Default)]
pub struct PageRegistry {
	entries: Arc<Mutex<HashMap<String, Arc<Mutex<PageEntry>>>>>,
}

impl PageRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Entry for a target id, observing the page on first sight.
	///
	/// Listener installation happens at most once per target: the registry
	/// entry doubles as the observed-set, so re-resolving a page is free.
	pub async fn ensure_observed(&self, page: &Page) -> Result<Arc<Mutex<PageEntry>>> {
		let target_id = page.target_id().inner().clone();
		{
			let entries = self.entries.lock().await;
			if let Some(entry) = entries.get(&target_id) {
				return Ok(Arc::clone(entry));
			}
		}

		let entry = Arc::new(Mutex::new(PageEntry::new(target_id.clone())));
		{
			let mut entries = self.entries.lock().await;
			// A racing observe may have beaten us; keep the winner.
			if let Some(existing) = entries.get(&target_id) {
				return Ok(Arc::clone(existing));
			}
			entries.insert(target_id.clone(), Arc::clone(&entry));
		}

		self.spawn_listeners(page, target_id, Arc::clone(&entry)).await;
		Ok(entry)
	}

	pub async fn get(&self, target_id: &str) -> Option<Arc<Mutex<PageEntry>>> {
		let entries = self.entries.lock().await;
		entries.get(target_id).cloned()
	}

	pub async fn remove(&self, target_id: &str) {
		let mut entries = self.entries.lock().await;
		entries.remove(target_id);
	}

	pub async fn target_ids(&self) -> Vec<String> {
		let entries = self.entries.lock().await;
		entries.keys().cloned().collect()
	}

	async fn spawn_listeners(&self, page: &Page, target_id: String, entry: Arc<Mutex<PageEntry>>) {
		if let Err(err) = page.execute(network::EnableParams::default()).await {
			debug!(target = "ccb.cdp", error = %err, "Network.enable failed; request ring will stay empty");
		}

		let mut streams: Vec<futures::stream::BoxStream<'static, PageEvent>> = Vec::new();
		match page.event_listener::<runtime::EventConsoleApiCalled>().await {
			Ok(s) => streams.push(s.map(PageEvent::Console).boxed()),
			Err(err) => warn!(target = "ccb.cdp", error = %err, "console listener failed"),
		}
		match page.event_listener::<runtime::EventExceptionThrown>().await {
			Ok(s) => streams.push(s.map(PageEvent::Exception).boxed()),
			Err(err) => warn!(target = "ccb.cdp", error = %err, "exception listener failed"),
		}
		match page.event_listener::<network::EventRequestWillBeSent>().await {
			Ok(s) => streams.push(s.map(PageEvent::Request).boxed()),
			Err(err) => warn!(target = "ccb.cdp", error = %err, "request listener failed"),
		}
		match page.event_listener::<network::EventResponseReceived>().await {
			Ok(s) => streams.push(s.map(PageEvent::Response).boxed()),
			Err(err) => warn!(target = "ccb.cdp", error = %err, "response listener failed"),
		}
		match page.event_listener::<network::EventLoadingFailed>().await {
			Ok(s) => streams.push(s.map(PageEvent::Failed).boxed()),
			Err(err) => warn!(target = "ccb.cdp", error = %err, "loading-failed listener failed"),
		}

		let registry = self.clone();
		tokio::spawn(async move {
			let mut merged = futures::stream::select_all(streams);
			while let Some(event) = merged.next().await {
				let mut state = entry.lock().await;
				match event {
					PageEvent::Console(ev) => state.console.push(console_entry(&ev)),
					PageEvent::Exception(ev) => state.errors.push(PageErrorEntry {
						message: exception_text(&ev),
					}),
					PageEvent::Request(ev) => state.network.push(NetworkEntry {
						request_id: ev.request_id.inner().clone(),
						method: ev.request.method.clone(),
						url: ev.request.url.clone(),
						status: None,
						error: None,
					}),
					PageEvent::Response(ev) => {
						let id = ev.request_id.inner();
						if let Some(rec) = state.network.iter_mut().rev().find(|r| r.request_id == *id) {
							rec.status = Some(ev.response.status);
						}
					}
					PageEvent::Failed(ev) => {
						let id = ev.request_id.inner();
						if let Some(rec) = state.network.iter_mut().rev().find(|r| r.request_id == *id) {
							rec.error = Some(ev.error_text.clone());
						}
					}
				}
			}
			// Streams ended: the page is gone. Drop its entry.
			debug!(target = "ccb.cdp", target_id = %target_id, "page event streams ended, dropping entry");
			registry.remove(&target_id).await;
		});
	}
}

fn console_entry(ev: &runtime::EventConsoleApiCalled) -> ConsoleEntry {
	let text = ev
		.args
		.iter()
		.map(|arg| {
			arg.value
				.as_ref()
				.map(|v| match v {
					serde_json::Value::String(s) => s.clone(),
					other => other.to_string(),
				})
				.or_else(|| arg.description.clone())
				.unwrap_or_default()
		})
		.collect::<Vec<_>>()
		.join(" ");
	ConsoleEntry {
		level: format!("{:?}", ev.r#type).to_ascii_lowercase(),
		text,
	}
}

fn exception_text(ev: &runtime::EventExceptionThrown) -> String {
	let details = &ev.exception_details;
	details
		.exception
		.as_ref()
		.and_then(|e| e.description.clone())
		.unwrap_or_else(|| details.text.clone())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ring_drops_oldest_silently() {
		let mut ring = RingBuffer::new(3);
		for i in 0..5 {
			ring.push(i);
		}
		assert_eq!(ring.len(), 3);
		let items: Vec<_> = ring.iter().copied().collect();
		assert_eq!(items, vec![2, 3, 4]);
	}

	#[test]
	fn ring_caps_match_spec() {
		assert_eq!(CONSOLE_RING_CAP, 500);
		assert_eq!(ERROR_RING_CAP, 200);
		assert_eq!(NETWORK_RING_CAP, 500);
	}

	#[test]
	fn network_correlation_updates_latest_match() {
		let mut ring: RingBuffer<NetworkEntry> = RingBuffer::new(10);
		for (i, id) in ["a", "b", "a"].iter().enumerate() {
			ring.push(NetworkEntry {
				request_id: id.to_string(),
				method: "GET".into(),
				url: format!("https://example.com/{i}"),
				status: None,
				error: None,
			});
		}
		// Latest "a" wins the correlation, mirroring the listener.
		if let Some(rec) = ring.iter_mut().rev().find(|r| r.request_id == "a") {
			rec.status = Some(200);
		}
		let statuses: Vec<_> = ring.iter().map(|r| r.status).collect();
		assert_eq!(statuses, vec![None, None, Some(200)]);
	}
}

//! Record and replay verbs.

use ccb_protocol::{
	RecordStartRequest, RecordStatusResponse, RecordStopResponse, ReplayReport, ReplayRequest,
};

use super::Daemon;
use crate::error::{CcbError, Result};
use crate::recorder::{self, RawEvent};
use crate::replay::{self, ReplayOptions};

impl Daemon {
	pub async fn record_start(&self, req: RecordStartRequest) -> Result<RecordStatusResponse> {
		let (page, _entry) = self.page(req.target_id.as_deref()).await?;
		self.recorder.start(&page, req.name, self.config().http_port).await?;
		Ok(self.recorder.status().await)
	}

	/// Stop the active recording, persist it, and return the normalized
	/// steps plus storage path.
	pub async fn record_stop(&self) -> Result<RecordStopResponse> {
		// The final drain is best-effort: the page may already be gone.
		let page = match self.page(None).await {
			Ok((page, _entry)) => Some(page),
			Err(_) => None,
		};
		let recording = self.recorder.stop(page.as_ref()).await?;

		let path = match self.recordings_root() {
			Ok(root) => match recorder::save_recording(&root, &recording) {
				Ok(path) => Some(path.to_string_lossy().into_owned()),
				Err(err) => {
					tracing::warn!(target = "ccb.record", error = %err, "recording persistence failed");
					None
				}
			},
			Err(_) => None,
		};
		Ok(RecordStopResponse { recording, path })
	}

	pub async fn record_status(&self) -> RecordStatusResponse {
		self.recorder.status().await
	}

	/// Beacon sink for `beforeunload` flushes. Never errors: the sending
	/// page is already tearing itself down.
	pub async fn record_beacon(&self, events: Vec<RawEvent>) {
		self.recorder.beacon(events).await;
	}

	/// Replay an inline recording or a saved one found by slug query.
	pub async fn replay(&self, req: ReplayRequest) -> Result<ReplayReport> {
		let recording = match req.recording {
			Some(recording) => recording,
			None => {
				let name = req
					.name
					.as_deref()
					.ok_or_else(|| CcbError::InvalidInput("replay needs a recording or a name".into()))?;
				let root = self.recordings_root()?;
				recorder::find_recording(&root, name)?
					.ok_or_else(|| CcbError::InvalidInput(format!("no saved recording matches \"{name}\"")))?
			}
		};

		let (page, _entry) = self.page(req.target_id.as_deref()).await?;
		let opts = ReplayOptions {
			mode: match req.mode {
				Some(mode) => mode,
				None => self.mode().await,
			},
			timeout_ms: req.timeout_ms.unwrap_or(replay::DEFAULT_LOCATOR_TIMEOUT_MS),
		};
		replay::replay(&page, &recording, &opts).await
	}
}

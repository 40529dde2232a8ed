use thiserror::Error;

use ccb_protocol::ErrorCode;

pub type Result<T> = std::result::Result<T, CcbError>;

/// Daemon error kinds, one variant per semantic failure the API can surface.
///
/// Verbs never leak raw CDP or client-library error text; anything coming
/// from the wire goes through [`translate_cdp_failure`] first.
#[derive(Debug, Error)]
pub enum CcbError {
	#[error("workspace not found: {0}")]
	ConfigNotFound(String),

	#[error("browser launch failed: {0}")]
	LaunchFailed(String),

	#[error("port {port} is already in use: {hint}")]
	PortInUse { port: u16, hint: String },

	#[error("no active session; call /start first")]
	NoActiveSession,

	#[error("session mismatch: {0}")]
	SessionMismatch(String),

	#[error("tab not found: {0}")]
	TabNotFound(String),

	#[error("unknown ref \"{0}\"; take a new snapshot and retry with a fresh ref")]
	UnknownRef(String),

	#[error("timeout after {ms}ms: {what}")]
	Timeout { ms: u64, what: String },

	#[error("{target} matched multiple elements; take a new snapshot and use a more specific ref")]
	MultipleMatches { target: String },

	#[error("element for {target} is no longer attached; take a new snapshot")]
	DetachedElement { target: String },

	#[error("vision backend error: {0}")]
	VisionBackend(String),

	#[error("no solver for captcha type \"{0}\"")]
	UnsupportedCaptcha(String),

	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	/// CDP plumbing failure that was not worth a more specific translation.
	#[error("browser operation failed: {0}")]
	Cdp(String),

	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

impl CcbError {
	/// Wire code for the HTTP envelope.
	pub fn code(&self) -> ErrorCode {
		match self {
			CcbError::ConfigNotFound(_) => ErrorCode::ConfigNotFound,
			CcbError::LaunchFailed(_) => ErrorCode::LaunchFailed,
			CcbError::PortInUse { .. } => ErrorCode::PortInUse,
			CcbError::NoActiveSession => ErrorCode::NoActiveSession,
			CcbError::SessionMismatch(_) => ErrorCode::SessionMismatch,
			CcbError::TabNotFound(_) => ErrorCode::TabNotFound,
			CcbError::UnknownRef(_) => ErrorCode::UnknownRef,
			CcbError::Timeout { .. } => ErrorCode::Timeout,
			CcbError::MultipleMatches { .. } => ErrorCode::MultipleMatches,
			CcbError::DetachedElement { .. } => ErrorCode::DetachedElement,
			CcbError::VisionBackend(_) => ErrorCode::VisionBackendError,
			CcbError::UnsupportedCaptcha(_) => ErrorCode::UnsupportedCaptchaType,
			CcbError::InvalidInput(_) => ErrorCode::InvalidInput,
			CcbError::Io(_) | CcbError::Json(_) | CcbError::Cdp(_) | CcbError::Other(_) => ErrorCode::InternalError,
		}
	}
}

impl From<chromiumoxide::error::CdpError> for CcbError {
	fn from(err: chromiumoxide::error::CdpError) -> Self {
		CcbError::Cdp(err.to_string())
	}
}

/// Rewrite a raw locator/CDP failure into agent-friendly form.
///
/// `target` is the human description of what the verb was aimed at (a ref,
/// a text match, or a selector).
pub fn translate_cdp_failure(target: &str, timeout_ms: u64, raw: &str) -> CcbError {
	let lower = raw.to_ascii_lowercase();
	if lower.contains("detached") || lower.contains("node with given id does not belong") {
		return CcbError::DetachedElement { target: target.to_string() };
	}
	if lower.contains("multiple") || lower.contains("strict mode") {
		return CcbError::MultipleMatches { target: target.to_string() };
	}
	if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline") {
		return CcbError::Timeout {
			ms: timeout_ms,
			what: format!("{target} was not found or not visible"),
		};
	}
	CcbError::Cdp(format!("action on {target} failed"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn codes_map_one_to_one() {
		assert_eq!(CcbError::NoActiveSession.code(), ErrorCode::NoActiveSession);
		assert_eq!(CcbError::UnknownRef("e9".into()).code(), ErrorCode::UnknownRef);
		assert_eq!(
			CcbError::PortInUse { port: 9222, hint: "x".into() }.code(),
			ErrorCode::PortInUse
		);
	}

	#[test]
	fn translation_hides_raw_text() {
		let err = translate_cdp_failure("ref e3", 8000, "Timeout 8000ms exceeded while waiting for selector");
		let msg = err.to_string();
		assert!(msg.contains("not found or not visible"), "{msg}");
		assert!(!msg.contains("selector \""), "{msg}");

		let err = translate_cdp_failure("ref e3", 8000, "Node is detached from document");
		assert!(matches!(err, CcbError::DetachedElement { .. }));
		assert!(err.to_string().contains("new snapshot"));

		let err = translate_cdp_failure("text \"Save\"", 8000, "strict mode violation: resolved to 4 elements");
		assert!(matches!(err, CcbError::MultipleMatches { .. }));
	}
}

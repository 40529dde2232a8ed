//! Wire types for the cc-browser daemon HTTP API.
//!
//! Every route speaks JSON over loopback HTTP. Responses share a single
//! envelope shape: `{ "success": true, ...payload }` on success and
//! `{ "success": false, "error": "...", "code": "..." }` on failure. The
//! types here are shared by the daemon's router and the thin `ccb` client so
//! both sides agree on field names without string-typed plumbing.

mod api;
mod recording;

pub use api::*;
pub use recording::*;

use serde::{Deserialize, Serialize};

/// Success envelope wrapping a payload type.
///
/// The payload's fields are flattened next to `success`, matching the
/// `{ success: bool, ...fields }` contract of the HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
	pub success: bool,
	#[serde(flatten)]
	pub data: T,
}

impl<T> Envelope<T> {
	pub fn ok(data: T) -> Self {
		Self { success: true, data }
	}
}

/// Failure envelope returned by every route on error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
	pub success: bool,
	pub error: String,
	pub code: ErrorCode,
}

impl ErrorBody {
	pub fn new(code: ErrorCode, error: impl Into<String>) -> Self {
		Self {
			success: false,
			error: error.into(),
			code,
		}
	}
}

/// Semantic error kinds surfaced by the daemon.
///
/// These mirror the daemon-side error enum one-to-one; the client uses them
/// to decide between remediation hints (`PortInUse`), re-snapshot advice
/// (`UnknownRef`), and plain failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
	ConfigNotFound,
	LaunchFailed,
	PortInUse,
	NoActiveSession,
	SessionMismatch,
	TabNotFound,
	UnknownRef,
	Timeout,
	MultipleMatches,
	DetachedElement,
	VisionBackendError,
	UnsupportedCaptchaType,
	InvalidJson,
	BodyTooLarge,
	UnknownRoute,
	InvalidInput,
	InternalError,
}

impl ErrorCode {
	/// HTTP status the router maps this code to.
	pub fn http_status(self) -> u16 {
		match self {
			ErrorCode::ConfigNotFound
			| ErrorCode::NoActiveSession
			| ErrorCode::SessionMismatch
			| ErrorCode::TabNotFound
			| ErrorCode::UnknownRef
			| ErrorCode::InvalidJson
			| ErrorCode::BodyTooLarge
			| ErrorCode::InvalidInput => 400,
			ErrorCode::UnknownRoute => 404,
			ErrorCode::PortInUse
			| ErrorCode::Timeout
			| ErrorCode::MultipleMatches
			| ErrorCode::DetachedElement
			| ErrorCode::UnsupportedCaptchaType => 409,
			ErrorCode::LaunchFailed | ErrorCode::VisionBackendError | ErrorCode::InternalError => 500,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Serialize, Deserialize, Debug)]
	struct Payload {
		url: String,
	}

	#[test]
	fn envelope_flattens_payload() {
		let env = Envelope::ok(Payload { url: "https://example.com".into() });
		let json = serde_json::to_value(&env).unwrap();
		assert_eq!(json["success"], true);
		assert_eq!(json["url"], "https://example.com");
	}

	#[test]
	fn error_body_shape() {
		let body = ErrorBody::new(ErrorCode::TabNotFound, "no tab with id abc");
		let json = serde_json::to_value(&body).unwrap();
		assert_eq!(json["success"], false);
		assert_eq!(json["code"], "tab_not_found");
	}

	#[test]
	fn not_found_maps_to_400() {
		assert_eq!(ErrorCode::TabNotFound.http_status(), 400);
		assert_eq!(ErrorCode::UnknownRoute.http_status(), 404);
		assert_eq!(ErrorCode::LaunchFailed.http_status(), 500);
	}
}

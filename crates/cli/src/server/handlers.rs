//! One handler per API verb; all of them are thin adapters over [`Daemon`].
//!
//! Handlers translate transport concerns only: JSON extraction failures,
//! the global verb timeout, and the `{ success, ... }` envelope. Everything
//! semantic happens inside the daemon.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use ccb::error::CcbError;
use ccb::{Daemon, recorder};
use ccb_protocol::{
	CaptchaSolveRequest, ClickRequest, DragRequest, Envelope, ErrorBody, ErrorCode, EvaluateRequest, FillRequest,
	HoverRequest, ModeRequest, ModeResponse, NavigateRequest, PressRequest, PruneResponse, RecordStartRequest,
	ReplayRequest, ResizeRequest, ScreenshotRequest, ScrollRequest, SelectRequest, SessionCreateRequest,
	SessionIdRequest, StartRequest, TabCloseRequest, TabFocusRequest, TabOpenRequest, TargetRequest, TypeRequest,
	UploadRequest, WaitRequest,
};

pub(super) type AppState = Arc<Daemon>;

/// Global verb timeout; replay is allowed to run much longer.
const VERB_TIMEOUT: Duration = Duration::from_secs(60);
const REPLAY_TIMEOUT: Duration = Duration::from_secs(300);

fn respond<T: Serialize>(result: Result<T, CcbError>) -> Response {
	match result {
		Ok(data) => (StatusCode::OK, Json(Envelope::ok(data))).into_response(),
		Err(err) => error_response(&err),
	}
}

pub(super) fn error_response(err: &CcbError) -> Response {
	let code = err.code();
	let status = StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
	(status, Json(ErrorBody::new(code, err.to_string()))).into_response()
}

fn parse<T: DeserializeOwned>(body: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
	match body {
		Ok(Json(value)) => Ok(value),
		Err(rejection) => {
			let (code, message) = match &rejection {
				JsonRejection::BytesRejection(_) => (ErrorCode::BodyTooLarge, "request body too large".to_string()),
				other => (ErrorCode::InvalidJson, other.to_string()),
			};
			let status = StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
			Err((status, Json(ErrorBody::new(code, message))).into_response())
		}
	}
}

async fn bounded<T>(timeout: Duration, fut: impl Future<Output = Result<T, CcbError>>) -> Result<T, CcbError> {
	match tokio::time::timeout(timeout, fut).await {
		Ok(result) => result,
		Err(_) => Err(CcbError::Timeout {
			ms: timeout.as_millis() as u64,
			what: "the request did not complete in time".into(),
		}),
	}
}

pub(super) async fn not_found() -> Response {
	(
		StatusCode::NOT_FOUND,
		Json(ErrorBody::new(ErrorCode::UnknownRoute, "unknown route")),
	)
		.into_response()
}

// -- lifecycle --------------------------------------------------------------

pub(super) async fn status(State(daemon): State<AppState>) -> Response {
	respond(Ok(daemon.status().await))
}

pub(super) async fn start(State(daemon): State<AppState>, body: Result<Json<StartRequest>, JsonRejection>) -> Response {
	let req = match parse(body) {
		Ok(req) => req,
		Err(resp) => return resp,
	};
	respond(bounded(VERB_TIMEOUT, daemon.start(req)).await)
}

pub(super) async fn stop(State(daemon): State<AppState>) -> Response {
	respond(bounded(VERB_TIMEOUT, daemon.stop()).await.map(|()| serde_json::json!({})))
}

pub(super) async fn browsers(State(daemon): State<AppState>) -> Response {
	respond(Ok(daemon.browsers()))
}

pub(super) async fn profiles(State(daemon): State<AppState>) -> Response {
	respond(Ok(daemon.profiles()))
}

pub(super) async fn mode_get(State(daemon): State<AppState>) -> Response {
	if let Err(err) = daemon.require_active().await {
		return error_response(&err);
	}
	respond(Ok(ModeResponse {
		mode: daemon.mode().await,
	}))
}

pub(super) async fn mode_set(State(daemon): State<AppState>, body: Result<Json<ModeRequest>, JsonRejection>) -> Response {
	let req = match parse(body) {
		Ok(req) => req,
		Err(resp) => return resp,
	};
	if let Err(err) = daemon.require_active().await {
		return error_response(&err);
	}
	respond(Ok(ModeResponse {
		mode: daemon.set_mode(req.mode).await,
	}))
}

// -- navigation and reading -------------------------------------------------

macro_rules! verb {
	($name:ident, $req:ty, $method:ident) => {
		pub(super) async fn $name(State(daemon): State<AppState>, body: Result<Json<$req>, JsonRejection>) -> Response {
			let req = match parse(body) {
				Ok(req) => req,
				Err(resp) => return resp,
			};
			respond(bounded(VERB_TIMEOUT, daemon.$method(req)).await)
		}
	};
}

/// Like `verb!`, for daemon methods returning `()`: the envelope needs a
/// JSON object to flatten.
macro_rules! verb_unit {
	($name:ident, $req:ty, $method:ident) => {
		pub(super) async fn $name(State(daemon): State<AppState>, body: Result<Json<$req>, JsonRejection>) -> Response {
			let req = match parse(body) {
				Ok(req) => req,
				Err(resp) => return resp,
			};
			respond(
				bounded(VERB_TIMEOUT, daemon.$method(req))
					.await
					.map(|()| serde_json::json!({})),
			)
		}
	};
}

verb!(navigate, NavigateRequest, navigate);
verb!(reload, TargetRequest, reload);
verb!(back, TargetRequest, back);
verb!(forward, TargetRequest, forward);
verb!(snapshot, TargetRequest, snapshot);
verb!(info, TargetRequest, info);
verb!(text, TargetRequest, text);
verb!(html, TargetRequest, html);
verb!(click, ClickRequest, click);
verb!(evaluate, EvaluateRequest, evaluate);
verb!(screenshot, ScreenshotRequest, screenshot);
verb!(screenshot_labels, TargetRequest, screenshot_labels);
verb!(captcha_detect, TargetRequest, captcha_detect);
verb!(captcha_solve, CaptchaSolveRequest, captcha_solve);

verb_unit!(type_text, TypeRequest, type_text);
verb_unit!(press, PressRequest, press);
verb_unit!(hover, HoverRequest, hover);
verb_unit!(drag, DragRequest, drag);
verb_unit!(select, SelectRequest, select);
verb_unit!(fill, FillRequest, fill);
verb_unit!(scroll, ScrollRequest, scroll);
verb_unit!(wait, WaitRequest, wait);
verb_unit!(upload, UploadRequest, upload);
verb_unit!(resize, ResizeRequest, resize);

// -- tabs -------------------------------------------------------------------

pub(super) async fn tabs(State(daemon): State<AppState>) -> Response {
	respond(bounded(VERB_TIMEOUT, daemon.tabs()).await)
}

pub(super) async fn tab_open(State(daemon): State<AppState>, body: Result<Json<TabOpenRequest>, JsonRejection>) -> Response {
	let req = match parse(body) {
		Ok(req) => req,
		Err(resp) => return resp,
	};
	respond(bounded(VERB_TIMEOUT, daemon.tab_open(req)).await)
}

pub(super) async fn tab_close(State(daemon): State<AppState>, body: Result<Json<TabCloseRequest>, JsonRejection>) -> Response {
	let req = match parse(body) {
		Ok(req) => req,
		Err(resp) => return resp,
	};
	respond(
		bounded(VERB_TIMEOUT, daemon.tab_close(req))
			.await
			.map(|closed| serde_json::json!({ "closed": closed })),
	)
}

pub(super) async fn tab_focus(State(daemon): State<AppState>, body: Result<Json<TabFocusRequest>, JsonRejection>) -> Response {
	let req = match parse(body) {
		Ok(req) => req,
		Err(resp) => return resp,
	};
	respond(bounded(VERB_TIMEOUT, daemon.tab_focus(req)).await)
}

pub(super) async fn tabs_close_all(State(daemon): State<AppState>) -> Response {
	respond(
		bounded(VERB_TIMEOUT, daemon.tabs_close_all())
			.await
			.map(|closed| serde_json::json!({ "closed": closed })),
	)
}

// -- tab sessions -----------------------------------------------------------

pub(super) async fn sessions_list(State(daemon): State<AppState>) -> Response {
	respond(bounded(VERB_TIMEOUT, daemon.session_list()).await)
}

pub(super) async fn session_create(
	State(daemon): State<AppState>,
	body: Result<Json<SessionCreateRequest>, JsonRejection>,
) -> Response {
	let req = match parse(body) {
		Ok(req) => req,
		Err(resp) => return resp,
	};
	respond(bounded(VERB_TIMEOUT, daemon.session_create(req)).await)
}

pub(super) async fn session_heartbeat(
	State(daemon): State<AppState>,
	body: Result<Json<SessionIdRequest>, JsonRejection>,
) -> Response {
	let req = match parse(body) {
		Ok(req) => req,
		Err(resp) => return resp,
	};
	respond(bounded(VERB_TIMEOUT, daemon.session_heartbeat(&req.session_id)).await)
}

pub(super) async fn session_close(
	State(daemon): State<AppState>,
	body: Result<Json<SessionIdRequest>, JsonRejection>,
) -> Response {
	let req = match parse(body) {
		Ok(req) => req,
		Err(resp) => return resp,
	};
	respond(
		bounded(VERB_TIMEOUT, daemon.session_close(&req.session_id))
			.await
			.map(|tabs| serde_json::json!({ "closed": tabs })),
	)
}

pub(super) async fn session_prune(State(daemon): State<AppState>) -> Response {
	respond(
		bounded(VERB_TIMEOUT, daemon.session_prune())
			.await
			.map(|pruned| PruneResponse { pruned }),
	)
}

// -- record / replay --------------------------------------------------------

pub(super) async fn record_start(
	State(daemon): State<AppState>,
	body: Result<Json<RecordStartRequest>, JsonRejection>,
) -> Response {
	let req = match parse(body) {
		Ok(req) => req,
		Err(resp) => return resp,
	};
	respond(bounded(VERB_TIMEOUT, daemon.record_start(req)).await)
}

pub(super) async fn record_stop(State(daemon): State<AppState>) -> Response {
	respond(bounded(VERB_TIMEOUT, daemon.record_stop()).await)
}

pub(super) async fn record_status(State(daemon): State<AppState>) -> Response {
	if let Err(err) = daemon.require_active().await {
		return error_response(&err);
	}
	respond(Ok(daemon.record_status().await))
}

/// Beacon sink. Always 204: the sending page is mid-unload and can do
/// nothing with an error anyway.
pub(super) async fn record_beacon(State(daemon): State<AppState>, body: axum::body::Bytes) -> StatusCode {
	#[derive(serde::Deserialize)]
	struct BeaconBody {
		#[serde(default)]
		events: Vec<recorder::RawEvent>,
	}
	if let Ok(parsed) = serde_json::from_slice::<BeaconBody>(&body) {
		daemon.record_beacon(parsed.events).await;
	}
	StatusCode::NO_CONTENT
}

pub(super) async fn replay(State(daemon): State<AppState>, body: Result<Json<ReplayRequest>, JsonRejection>) -> Response {
	let req = match parse(body) {
		Ok(req) => req,
		Err(resp) => return resp,
	};
	respond(bounded(REPLAY_TIMEOUT, daemon.replay(req)).await)
}

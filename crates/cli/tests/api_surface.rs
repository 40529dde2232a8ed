//! Router-level API tests: envelope shape, status codes, and the
//! active-session gate, exercised without a browser or a bound socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::Value;
use tower::ServiceExt;

use ccb::{Daemon, DaemonConfig};
use ccb_cli::server::router;

fn test_router(dir: &tempfile::TempDir) -> axum::Router {
	let config = DaemonConfig {
		http_port: 18791,
		workspaces_root: Some(dir.path().join("workspaces")),
		recordings_root: Some(dir.path().join("recordings")),
		..DaemonConfig::default()
	};
	router(Arc::new(Daemon::new(config).unwrap()))
}

async fn body_json(response: axum::response::Response) -> Value {
	let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
	serde_json::from_slice(&bytes).unwrap()
}

fn post(route: &str, body: &str) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri(route)
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(body.to_string()))
		.unwrap()
}

#[tokio::test]
async fn status_works_without_a_session() {
	let dir = tempfile::tempdir().unwrap();
	let app = test_router(&dir);

	let response = app.oneshot(Request::builder().uri("/").body(Body::empty()).unwrap()).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let json = body_json(response).await;
	assert_eq!(json["success"], true);
	assert_eq!(json["active"], false);
	assert_eq!(json["mode"], "fast");
}

#[tokio::test]
async fn browsers_and_profiles_are_ungated() {
	let dir = tempfile::tempdir().unwrap();
	let app = test_router(&dir);

	let response = app
		.clone()
		.oneshot(Request::builder().uri("/browsers").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let json = body_json(response).await;
	assert_eq!(json["success"], true);
	assert!(json["browsers"].is_array());

	let response = app
		.oneshot(Request::builder().uri("/profiles").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let json = body_json(response).await;
	assert_eq!(json["workspaces"], serde_json::json!([]));
}

#[tokio::test]
async fn verbs_fail_closed_without_a_session() {
	let dir = tempfile::tempdir().unwrap();
	let app = test_router(&dir);

	for (route, body) in [
		("/navigate", r#"{"url": "https://example.com"}"#),
		("/click", r#"{"ref": "e1"}"#),
		("/snapshot", "{}"),
		("/tabs/open", "{}"),
		("/sessions/create", r#"{"name": "research"}"#),
		("/record/start", "{}"),
		("/mode", r#"{"mode": "human"}"#),
	] {
		let response = app.clone().oneshot(post(route, body)).await.unwrap();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST, "route {route}");
		let json = body_json(response).await;
		assert_eq!(json["success"], false, "route {route}");
		assert_eq!(json["code"], "no_active_session", "route {route}");
	}
}

#[tokio::test]
async fn sessions_list_is_gated_too() {
	let dir = tempfile::tempdir().unwrap();
	let app = test_router(&dir);

	let response = app
		.oneshot(Request::builder().uri("/sessions").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	let json = body_json(response).await;
	assert_eq!(json["code"], "no_active_session");
}

#[tokio::test]
async fn unknown_route_is_404() {
	let dir = tempfile::tempdir().unwrap();
	let app = test_router(&dir);

	let response = app.oneshot(post("/does-not-exist", "{}")).await.unwrap();
	assert_eq!(response.status(), StatusCode::NOT_FOUND);
	let json = body_json(response).await;
	assert_eq!(json["success"], false);
	assert_eq!(json["code"], "unknown_route");
}

#[tokio::test]
async fn invalid_json_is_400() {
	let dir = tempfile::tempdir().unwrap();
	let app = test_router(&dir);

	let response = app.oneshot(post("/navigate", "{not json")).await.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	let json = body_json(response).await;
	assert_eq!(json["success"], false);
	assert_eq!(json["code"], "invalid_json");
}

#[tokio::test]
async fn beacon_always_returns_204() {
	let dir = tempfile::tempdir().unwrap();
	let app = test_router(&dir);

	// Valid body, no active recording: still 204.
	let response = app
		.clone()
		.oneshot(post("/record/beacon", r#"{"events": [{"kind": "scroll", "scrollX": 0, "scrollY": 10}]}"#))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::NO_CONTENT);

	// Garbage body: the browser is mid-unload, never error at it.
	let response = app.oneshot(post("/record/beacon", "!!!")).await.unwrap();
	assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn stop_without_session_reports_no_active_session() {
	let dir = tempfile::tempdir().unwrap();
	let app = test_router(&dir);

	let response = app.oneshot(post("/stop", "{}")).await.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	let json = body_json(response).await;
	assert_eq!(json["code"], "no_active_session");
}

#[tokio::test]
async fn record_status_is_gated() {
	let dir = tempfile::tempdir().unwrap();
	let app = test_router(&dir);

	let response = app
		.oneshot(Request::builder().uri("/record/status").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

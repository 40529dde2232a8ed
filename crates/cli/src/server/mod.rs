//! Loopback HTTP server: one route per verb over a shared [`Daemon`].

mod handlers;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tracing::info;

use ccb::Daemon;

/// Request bodies beyond this are rejected as too large.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Build the full route table. Exposed separately from [`serve`] so tests
/// can drive the router without binding a socket.
pub fn router(daemon: Arc<Daemon>) -> Router {
	Router::new()
		.route("/", get(handlers::status))
		.route("/start", post(handlers::start))
		.route("/stop", post(handlers::stop))
		.route("/browsers", get(handlers::browsers).post(handlers::browsers))
		.route("/profiles", get(handlers::profiles).post(handlers::profiles))
		.route("/navigate", post(handlers::navigate))
		.route("/reload", post(handlers::reload))
		.route("/back", post(handlers::back))
		.route("/forward", post(handlers::forward))
		.route("/snapshot", post(handlers::snapshot))
		.route("/info", post(handlers::info))
		.route("/click", post(handlers::click))
		.route("/type", post(handlers::type_text))
		.route("/press", post(handlers::press))
		.route("/hover", post(handlers::hover))
		.route("/drag", post(handlers::drag))
		.route("/select", post(handlers::select))
		.route("/fill", post(handlers::fill))
		.route("/scroll", post(handlers::scroll))
		.route("/wait", post(handlers::wait))
		.route("/evaluate", post(handlers::evaluate))
		.route("/screenshot", post(handlers::screenshot))
		.route("/screenshot-labels", post(handlers::screenshot_labels))
		.route("/upload", post(handlers::upload))
		.route("/resize", post(handlers::resize))
		.route("/tabs", get(handlers::tabs))
		.route("/tabs/open", post(handlers::tab_open))
		.route("/tabs/close", post(handlers::tab_close))
		.route("/tabs/focus", post(handlers::tab_focus))
		.route("/tabs/close-all", post(handlers::tabs_close_all))
		.route("/text", post(handlers::text))
		.route("/html", post(handlers::html))
		.route("/mode", get(handlers::mode_get).post(handlers::mode_set))
		.route("/captcha/detect", post(handlers::captcha_detect))
		.route("/captcha/solve", post(handlers::captcha_solve))
		.route("/sessions", get(handlers::sessions_list))
		.route("/sessions/create", post(handlers::session_create))
		.route("/sessions/heartbeat", post(handlers::session_heartbeat))
		.route("/sessions/close", post(handlers::session_close))
		.route("/sessions/prune", post(handlers::session_prune))
		.route("/record/start", post(handlers::record_start))
		.route("/record/stop", post(handlers::record_stop))
		.route("/record/status", get(handlers::record_status).post(handlers::record_status))
		.route("/record/beacon", post(handlers::record_beacon))
		.route("/replay", post(handlers::replay))
		.fallback(handlers::not_found)
		.layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
		.with_state(daemon)
}

/// Bind the loopback listener and serve until a shutdown signal arrives.
/// Graceful shutdown persists tab sessions and removes the lockfile.
pub async fn serve(daemon: Arc<Daemon>, port: u16) -> Result<()> {
	let app = router(Arc::clone(&daemon));
	daemon.spawn_session_sweep();

	let addr = format!("127.0.0.1:{port}");
	let listener = tokio::net::TcpListener::bind(&addr)
		.await
		.with_context(|| format!("failed to bind daemon HTTP server on {addr}"))?;
	info!(target = "ccb.daemon", addr, "daemon listening");

	let shutdown_daemon = Arc::clone(&daemon);
	axum::serve(listener, app)
		.with_graceful_shutdown(async move {
			wait_for_signal().await;
			info!(target = "ccb.daemon", "shutdown signal received");
			shutdown_daemon.shutdown().await;
		})
		.await
		.context("daemon HTTP server failed")?;
	Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler");
	let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler");
	tokio::select! {
		_ = sigterm.recv() => {}
		_ = sigint.recv() => {}
	}
}

#[cfg(not(unix))]
async fn wait_for_signal() {
	let _ = tokio::signal::ctrl_c().await;
}

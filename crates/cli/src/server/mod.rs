//! HTTP and WebSocket boundary over a [`SessionManager`].
//!
//! | route | handler |
//! |---|---|
//! | `GET /`, `GET /health` | liveness |
//! | `GET /failures` | recent lifecycle failures |
//! | `POST /sessions`, `GET /sessions` | create, list |
//! | `GET /sessions/{id}`, `DELETE /sessions/{id}` | detail, destroy |
//! | `POST /sessions/{id}/messages` | send |
//! | `GET /sessions/{id}/history` | recent messages with an address |
//! | `GET /events` | WebSocket push channel |

mod events;
mod http;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use chatmux::SessionManager;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
	pub manager: SessionManager,
	shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
	pub fn new(manager: SessionManager) -> Self {
		let (shutdown, _) = watch::channel(false);
		Self {
			manager,
			shutdown: Arc::new(shutdown),
		}
	}

	/// Asks every open push connection to close.
	pub fn begin_shutdown(&self) {
		self.shutdown.send_replace(true);
	}

	fn shutdown_signal(&self) -> watch::Receiver<bool> {
		self.shutdown.subscribe()
	}
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/", get(|| async { "OK" }))
		.route("/health", get(http::health))
		.route("/failures", get(http::failures))
		.route("/sessions", get(http::list_sessions).post(http::create_session))
		.route("/sessions/{id}", get(http::session_detail).delete(http::destroy_session))
		.route("/sessions/{id}/messages", post(http::send_message))
		.route("/sessions/{id}/history", get(http::history))
		.route("/events", get(events::upgrade))
		.with_state(state)
}

/// Binds `host` and `port`. Host names such as `localhost` are resolved and
/// bare IPv6 literals like `::1` are accepted.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
	TcpListener::bind((host, port))
		.await
		.with_context(|| format!("Failed to bind server to {host}:{port}"))
}

/// Binds `host:port` and serves until SIGINT/SIGTERM, then destroys every session.
pub async fn serve(host: &str, port: u16, manager: SessionManager) -> Result<()> {
	let listener = bind(host, port).await?;
	run(listener, manager, wait_for_signal()).await
}

/// Serves on an already bound listener until `shutdown` resolves.
pub async fn run(
	listener: TcpListener,
	manager: SessionManager,
	shutdown: impl std::future::Future<Output = Result<()>> + Send + 'static,
) -> Result<()> {
	let local = listener.local_addr().context("Failed to read listener address")?;
	info!(target = "chatmux.server", %local, "listening");

	let state = AppState::new(manager.clone());
	let app = router(state.clone());

	let signal_state = state.clone();
	axum::serve(listener, app)
		.with_graceful_shutdown(async move {
			if let Err(err) = shutdown.await {
				tracing::error!(target = "chatmux.server", error = %err, "shutdown signal failed");
			}
			info!(target = "chatmux.server", "shutting down");
			signal_state.begin_shutdown();
		})
		.await
		.context("Server error")?;

	manager.shutdown().await;
	info!(target = "chatmux.server", "stopped");
	Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
	let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

	tokio::select! {
		_ = sigterm.recv() => info!(target = "chatmux.server", "received SIGTERM"),
		_ = sigint.recv() => info!(target = "chatmux.server", "received SIGINT"),
	}
	Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
	tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
	info!(target = "chatmux.server", "received ctrl-c");
	Ok(())
}

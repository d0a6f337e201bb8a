//! `GET /events`: push channel over WebSocket.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use chatmux::{ConnectionId, Subscription, SubscriptionFilter};
use chatmux_protocol::{ClientFrame, ServerFrame};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use super::AppState;
use crate::error::ErrorCode;

pub(super) async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
	ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
	let Subscription {
		connection_id,
		receiver,
	} = state.manager.hub().connect();
	info!(target = "chatmux.server", %connection_id, "subscriber connected");

	// Replies to this connection only; drained ahead of hub events so
	// `connected` is always the first frame.
	let (reply_tx, reply_rx) = mpsc::unbounded_channel();
	let _ = reply_tx.send(ServerFrame::Connected {
		connection_id: connection_id.to_string(),
	});

	let mut replies = UnboundedReceiverStream::new(reply_rx);
	let mut events = UnboundedReceiverStream::new(receiver).map(ServerFrame::from);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		loop {
			let frame = tokio::select! {
				biased;
				Some(frame) = replies.next() => frame,
				Some(frame) = events.next() => frame,
				else => break,
			};
			let text = match serde_json::to_string(&frame) {
				Ok(text) => text,
				Err(err) => {
					warn!(target = "chatmux.server", error = %err, "failed to encode frame");
					continue;
				}
			};
			if ws_tx.send(Message::Text(text.into())).await.is_err() {
				return;
			}
		}
		let _ = ws_tx.send(Message::Close(None)).await;
	});

	let mut shutdown = state.shutdown_signal();
	loop {
		let msg = tokio::select! {
			_ = shutdown.wait_for(|stopping| *stopping) => break,
			msg = ws_rx.next() => msg,
		};
		match msg {
			Some(Ok(Message::Text(text))) => {
				if let Some(reply) = handle_client_frame(&state, connection_id, text.as_str()) {
					let _ = reply_tx.send(reply);
				}
			}
			Some(Ok(Message::Close(_))) | None => break,
			Some(Ok(_)) => {}
			Some(Err(err)) => {
				warn!(target = "chatmux.server", %connection_id, error = %err, "subscriber websocket error");
				break;
			}
		}
	}

	// Dropping both senders ends the send task, which then closes the socket.
	state.manager.hub().disconnect(connection_id);
	drop(reply_tx);
	let _ = send_task.await;
	info!(target = "chatmux.server", %connection_id, "subscriber disconnected");
}

fn handle_client_frame(state: &AppState, connection_id: ConnectionId, raw: &str) -> Option<ServerFrame> {
	let frame = match serde_json::from_str::<ClientFrame>(raw) {
		Ok(frame) => frame,
		Err(err) => {
			debug!(target = "chatmux.server", %connection_id, error = %err, "invalid client frame");
			return Some(error_frame(ErrorCode::InvalidInput, format!("Invalid frame: {err}")));
		}
	};

	match frame {
		ClientFrame::CreateSession { session_id } => match state.manager.create_session(session_id.clone()) {
			Ok(_) => Some(ServerFrame::Accepted { session_id }),
			Err(err @ chatmux::Error::InvalidInput(_)) => Some(error_frame(ErrorCode::InvalidInput, err.to_string())),
			// Duplicates and factory failures are already published as events.
			Err(err) => {
				debug!(target = "chatmux.server", %connection_id, session_id = %session_id, error = %err, "create not started");
				None
			}
		},
		ClientFrame::Subscribe { sessions } => {
			debug!(target = "chatmux.server", %connection_id, ?sessions, "subscription changed");
			state
				.manager
				.hub()
				.set_filter(connection_id, SubscriptionFilter::from_sessions(sessions));
			None
		}
	}
}

fn error_frame(code: ErrorCode, message: String) -> ServerFrame {
	ServerFrame::Error {
		code: code.to_string(),
		message,
	}
}

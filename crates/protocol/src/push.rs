//! Frames exchanged over the push channel (`GET /events`).
//!
//! 1. Server sends [`ServerFrame::Connected`] with the connection id
//! 2. Server streams [`ServerFrame::Event`] for every matching session event
//! 3. Client may send [`ClientFrame::CreateSession`] or [`ClientFrame::Subscribe`]
//! 4. Server answers commands with [`ServerFrame::Accepted`] or [`ServerFrame::Error`]

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{EventEnvelope, EventKind};
use crate::session::SessionId;

/// Message sent from the server to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
	/// Connection acknowledgement, always the first frame.
	Connected { connection_id: String },
	/// A session event.
	Event {
		/// Composite `{kind}-{sessionId}` name.
		name: String,
		session_id: SessionId,
		kind: EventKind,
		payload: Value,
	},
	/// A client command was accepted; its outcome follows as events.
	Accepted { session_id: SessionId },
	/// A client frame was rejected.
	Error { code: String, message: String },
}

impl From<EventEnvelope> for ServerFrame {
	fn from(envelope: EventEnvelope) -> Self {
		ServerFrame::Event {
			name: envelope.event_name(),
			session_id: envelope.session_id,
			kind: envelope.kind,
			payload: envelope.payload,
		}
	}
}

/// Message sent from a subscriber to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
	/// Ask the server to create (and initialize) a session.
	CreateSession { session_id: SessionId },
	/// Restrict delivery to the listed sessions; `None` restores all sessions.
	Subscribe {
		#[serde(default)]
		sessions: Option<Vec<SessionId>>,
	},
}

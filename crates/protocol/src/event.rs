//! Session events published through the hub.
//!
//! Every event is addressed by the pair (session id, kind). Older clients
//! listen on a composite name such as `ready-abc`; [`EventEnvelope::event_name`]
//! derives it from the typed envelope so both addressing styles agree.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{AccountInfo, SessionId, SessionStatus};

/// Kind of a session event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
	/// Authentication challenge (QR payload) produced by the engine.
	Qr,
	Authenticated,
	Ready,
	AuthFailure,
	Disconnected,
	/// Inbound message received by the session's account.
	Message,
	/// Lifecycle error; the session may or may not have been removed.
	Error,
	/// Session was removed after an explicit teardown request.
	Destroyed,
}

impl EventKind {
	pub fn as_str(self) -> &'static str {
		match self {
			EventKind::Qr => "qr",
			EventKind::Authenticated => "authenticated",
			EventKind::Ready => "ready",
			EventKind::AuthFailure => "auth_failure",
			EventKind::Disconnected => "disconnected",
			EventKind::Message => "message",
			EventKind::Error => "error",
			EventKind::Destroyed => "destroyed",
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Typed event envelope `{sessionId, kind, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
	pub session_id: SessionId,
	pub kind: EventKind,
	#[serde(default)]
	pub payload: Value,
}

impl EventEnvelope {
	pub fn new(session_id: SessionId, kind: EventKind, payload: impl Serialize) -> Self {
		Self {
			session_id,
			kind,
			payload: serde_json::to_value(payload).unwrap_or(Value::Null),
		}
	}

	/// Composite `{kind}-{sessionId}` name used by name-addressed listeners.
	pub fn event_name(&self) -> String {
		format!("{}-{}", self.kind.as_str(), self.session_id)
	}
}

/// Payload of [`EventKind::Qr`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
	pub qr: String,
	/// 1-based challenge counter for this session.
	pub attempt: u32,
}

/// Payload of [`EventKind::Ready`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub account: Option<AccountInfo>,
}

/// Payload of [`EventKind::Disconnected`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectedPayload {
	pub reason: String,
	/// Whether the session was removed because of this disconnect.
	pub removed: bool,
}

/// Payload of [`EventKind::Error`] and [`EventKind::AuthFailure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleErrorPayload {
	/// Stable error code, e.g. `INITIALIZATION_FAILED`.
	pub code: String,
	pub message: String,
	pub status: SessionStatus,
}

/// Payload of [`EventKind::Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	pub from: String,
	/// Normalized recipient address.
	pub to: String,
	pub body: String,
	/// Unix epoch seconds.
	pub timestamp: u64,
	/// Identity of the receiving session's own account.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub account: Option<AccountInfo>,
}

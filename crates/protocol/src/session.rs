//! Session identity and lifecycle status types.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Externally supplied identifier selecting one session/account pairing.
///
/// Opaque to the server: it is only compared, hashed and used as the event
/// namespace prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for SessionId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl From<String> for SessionId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

impl Borrow<str> for SessionId {
	fn borrow(&self) -> &str {
		&self.0
	}
}

/// Lifecycle status of a session.
///
/// Ordered: a session only ever moves to a later variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
	Created,
	Initializing,
	AwaitingAuth,
	Authenticated,
	Ready,
	Failed,
	Destroyed,
}

impl SessionStatus {
	/// Returns true for `Failed` and `Destroyed`.
	pub fn is_terminal(self) -> bool {
		matches!(self, SessionStatus::Failed | SessionStatus::Destroyed)
	}

	/// Returns true for every non-terminal status before `Ready`.
	pub fn is_pre_ready(self) -> bool {
		self < SessionStatus::Ready
	}

	pub fn connection_state(self) -> ConnectionState {
		if self == SessionStatus::Ready {
			ConnectionState::Connected
		} else {
			ConnectionState::Disconnected
		}
	}
}

impl fmt::Display for SessionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SessionStatus::Created => "created",
			SessionStatus::Initializing => "initializing",
			SessionStatus::AwaitingAuth => "awaiting_auth",
			SessionStatus::Authenticated => "authenticated",
			SessionStatus::Ready => "ready",
			SessionStatus::Failed => "failed",
			SessionStatus::Destroyed => "destroyed",
		};
		f.write_str(name)
	}
}

/// Coarse status reported by session listings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
	Connected,
	Disconnected,
}

/// Identity of the remote account a session is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
	/// Account address as reported by the engine (e.g. `15551234567@c.us`).
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pushname: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub platform: Option<String>,
}

/// Entry of `GET /sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
	pub session_id: SessionId,
	pub status: ConnectionState,
}

/// Body of `GET /sessions/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
	pub session_id: SessionId,
	pub status: ConnectionState,
	pub lifecycle: SessionStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub account: Option<AccountInfo>,
	pub auth_attempts: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_error: Option<String>,
	/// Unix epoch seconds.
	pub created_at: u64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_order_matches_lifecycle() {
		assert!(SessionStatus::Created < SessionStatus::Initializing);
		assert!(SessionStatus::AwaitingAuth < SessionStatus::Authenticated);
		assert!(SessionStatus::Ready < SessionStatus::Failed);
		assert!(SessionStatus::Authenticated.is_pre_ready());
		assert!(!SessionStatus::Ready.is_pre_ready());
		assert!(SessionStatus::Destroyed.is_terminal());
	}

	#[test]
	fn only_ready_is_connected() {
		assert_eq!(SessionStatus::Ready.connection_state(), ConnectionState::Connected);
		assert_eq!(SessionStatus::Authenticated.connection_state(), ConnectionState::Disconnected);
		assert_eq!(SessionStatus::Created.connection_state(), ConnectionState::Disconnected);
	}

	#[test]
	fn summary_serializes_camel_case() {
		let summary = SessionSummary {
			session_id: SessionId::new("B"),
			status: ConnectionState::Connected,
		};
		let json = serde_json::to_value(&summary).unwrap();
		assert_eq!(json, serde_json::json!({"sessionId": "B", "status": "connected"}));
	}

	#[test]
	fn blank_session_id_is_empty() {
		assert!(SessionId::new("  ").is_empty());
		assert!(!SessionId::new("a").is_empty());
	}
}

//! Engine abstraction: the per-session automation handle.
//!
//! An [`Engine`] drives one messaging account. It is created by an
//! [`EngineFactory`] together with the channel on which it reports
//! [`EngineEvent`]s; the session lifecycle task is the only consumer of that
//! channel, so per-session event order is exactly the engine's emission order.

use std::sync::Arc;

use async_trait::async_trait;
use chatmux_protocol::{AccountInfo, HistoryMessage, SessionId};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::Result;

/// Automation handle bound to one session.
///
/// Implementations must be cheap to construct: [`EngineFactory::create`] runs
/// inside the registry's check-and-insert section. Expensive work (spawning
/// processes, opening connections) belongs in [`initialize`](Engine::initialize).
#[async_trait]
pub trait Engine: Send + Sync {
	/// Starts the engine. Authentication progress is reported as events.
	async fn initialize(&self) -> Result<()>;

	/// Sends `body` to the normalized address `to`, returning the message id.
	async fn send_message(&self, to: &str, body: &str) -> Result<String>;

	/// Returns up to `limit` most recent messages exchanged with `chat_id`.
	async fn fetch_history(&self, chat_id: &str, limit: usize) -> Result<Vec<HistoryMessage>>;

	/// Releases every resource held by the engine. Closes the event channel.
	async fn destroy(&self) -> Result<()>;
}

/// Builds engines for new sessions.
pub trait EngineFactory: Send + Sync {
	/// Creates an engine for `id` and the receiving end of its event channel.
	fn create(&self, id: &SessionId) -> Result<(Arc<dyn Engine>, mpsc::UnboundedReceiver<EngineEvent>)>;
}

/// Lifecycle and traffic notifications emitted by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
	/// A new authentication challenge (QR payload) is available.
	AuthChallenge { qr: String },
	/// The engine gave up producing challenges.
	AuthChallengeExhausted,
	Authenticated,
	Ready { account: Option<AccountInfo> },
	AuthFailure { message: String },
	Disconnected { reason: DisconnectReason },
	Message(IncomingMessage),
}

impl EngineEvent {
	pub fn ready(account_id: impl Into<String>) -> Self {
		EngineEvent::Ready {
			account: Some(AccountInfo {
				id: account_id.into(),
				..Default::default()
			}),
		}
	}
}

/// Message received by the session's account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IncomingMessage {
	#[serde(default)]
	pub id: Option<String>,
	pub from: String,
	#[serde(default)]
	pub to: String,
	#[serde(default)]
	pub body: String,
	#[serde(default)]
	pub timestamp: u64,
}

/// Why an engine lost its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
	/// The account logged out from another device.
	Logout,
	/// The linked device was removed.
	Unpaired,
	Other(String),
}

impl DisconnectReason {
	/// Parses an engine-reported reason. Matching is case-insensitive.
	pub fn parse(reason: &str) -> Self {
		match reason.trim().to_ascii_uppercase().as_str() {
			"LOGOUT" => DisconnectReason::Logout,
			"UNPAIRED" => DisconnectReason::Unpaired,
			_ => DisconnectReason::Other(reason.to_string()),
		}
	}

	pub fn as_str(&self) -> &str {
		match self {
			DisconnectReason::Logout => "LOGOUT",
			DisconnectReason::Unpaired => "UNPAIRED",
			DisconnectReason::Other(reason) => reason,
		}
	}

	/// Returns true when the session cannot recover and must be removed.
	pub fn is_terminal(&self) -> bool {
		matches!(self, DisconnectReason::Logout | DisconnectReason::Unpaired)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn logout_and_unpaired_are_terminal() {
		assert!(DisconnectReason::parse("LOGOUT").is_terminal());
		assert!(DisconnectReason::parse("unpaired").is_terminal());
		assert!(!DisconnectReason::parse("NAVIGATION").is_terminal());
	}

	#[test]
	fn other_reason_keeps_original_text() {
		let reason = DisconnectReason::parse("CONFLICT");
		assert_eq!(reason, DisconnectReason::Other("CONFLICT".into()));
		assert_eq!(reason.as_str(), "CONFLICT");
	}

	#[test]
	fn incoming_message_tolerates_missing_fields() {
		let message: IncomingMessage = serde_json::from_str(r#"{"from":"1555@c.us","body":"hi"}"#).unwrap();
		assert_eq!(message.id, None);
		assert_eq!(message.to, "");
		assert_eq!(message.timestamp, 0);
	}
}

//! Messages spoken with a driver process over newline-delimited JSON.
//!
//! Requests carry an `id` that the driver echoes in its response. Anything
//! without an `id` but with a `method` is an event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Driver method names.
pub mod methods {
	pub const INITIALIZE: &str = "initialize";
	pub const SEND_MESSAGE: &str = "sendMessage";
	pub const FETCH_MESSAGES: &str = "fetchMessages";
	pub const DESTROY: &str = "destroy";
}

/// Driver event names.
pub mod events {
	pub const QR: &str = "qr";
	pub const QR_EXHAUSTED: &str = "qr_exhausted";
	pub const AUTHENTICATED: &str = "authenticated";
	pub const READY: &str = "ready";
	pub const AUTH_FAILURE: &str = "auth_failure";
	pub const DISCONNECTED: &str = "disconnected";
	pub const MESSAGE: &str = "message";
}

/// Request sent to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	pub id: u32,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Response received from the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	pub id: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
}

/// Driver-side error details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
}

/// Event pushed by the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Any message read from the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	Response(Response),
	Event(Event),
	/// Forward-compatible catch-all.
	Unknown(Value),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn distinguishes_responses_from_events() {
		let response: Message = serde_json::from_str(r#"{"id":3,"result":{"id":"m1"}}"#).unwrap();
		assert!(matches!(response, Message::Response(Response { id: 3, .. })));

		let error: Message = serde_json::from_str(r#"{"id":4,"error":{"message":"boom"}}"#).unwrap();
		match error {
			Message::Response(Response { error: Some(err), .. }) => assert_eq!(err.message, "boom"),
			other => panic!("expected error response, got {other:?}"),
		}

		let event: Message = serde_json::from_str(r#"{"method":"qr","params":{"qr":"abc"}}"#).unwrap();
		match event {
			Message::Event(event) => {
				assert_eq!(event.method, events::QR);
				assert_eq!(event.params["qr"], "abc");
			}
			other => panic!("expected event, got {other:?}"),
		}

		let unknown: Message = serde_json::from_str(r#"{"hello":"world"}"#).unwrap();
		assert!(matches!(unknown, Message::Unknown(_)));
	}
}

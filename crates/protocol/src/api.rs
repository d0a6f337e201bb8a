//! Request and response bodies of the HTTP API.

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// Default number of messages returned by the history endpoint.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Body of `POST /sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
	pub session_id: SessionId,
}

/// Response of `POST /sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
	pub session_id: SessionId,
	pub accepted: bool,
}

/// Body of `POST /sessions/{id}/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
	/// Recipient address; the canonical suffix may be omitted.
	pub to: String,
	pub body: String,
}

/// Response of `POST /sessions/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
	pub message_id: String,
}

/// Response of `DELETE /sessions/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestroySessionResponse {
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
	pub ok: bool,
	pub sessions: usize,
	pub subscribers: usize,
}

/// Query of `GET /sessions/{id}/history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
	pub address: String,
	#[serde(default = "default_history_limit")]
	pub limit: usize,
}

fn default_history_limit() -> usize {
	DEFAULT_HISTORY_LIMIT
}

/// Entry of `GET /sessions/{id}/history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
	pub id: String,
	pub from: String,
	pub body: String,
	/// Unix epoch seconds.
	pub timestamp: u64,
}

/// Entry of `GET /failures`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
	pub session_id: SessionId,
	/// Stable error code, e.g. `AUTH_FAILED`.
	pub code: String,
	pub message: String,
	/// Unix epoch seconds.
	pub at: u64,
}

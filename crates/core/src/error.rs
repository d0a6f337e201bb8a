//! Error types for session management.

use chatmux_protocol::{SessionId, SessionStatus};
use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable codes carried by lifecycle `error` events and the failure log.
pub mod codes {
	pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
	pub const INITIALIZATION_FAILED: &str = "INITIALIZATION_FAILED";
	pub const AUTH_FAILURE: &str = "AUTH_FAILURE";
	pub const AUTH_RETRIES_EXHAUSTED: &str = "AUTH_RETRIES_EXHAUSTED";
	pub const TEARDOWN_FAILED: &str = "TEARDOWN_FAILED";
	pub const ENGINE_CLOSED: &str = "ENGINE_CLOSED";
}

/// Errors surfaced by the session layer.
#[derive(Debug, Error)]
pub enum Error {
	/// A session with this id is already registered.
	#[error("Session {id} already exists ({status})")]
	AlreadyExists { id: SessionId, status: SessionStatus },

	#[error("Session {0} not found")]
	NotFound(SessionId),

	/// The session exists but has not reached `ready`.
	#[error("Session {id} is not ready ({status})")]
	NotReady { id: SessionId, status: SessionStatus },

	#[error("Initialization failed: {0}")]
	InitializationFailure(String),

	#[error("Authentication failed: {0}")]
	AuthFailure(String),

	#[error("Send failed: {0}")]
	SendFailure(String),

	#[error("History fetch failed: {0}")]
	HistoryFailure(String),

	/// Engine teardown failed. Logged, never returned from destroy.
	#[error("Teardown failed: {0}")]
	TeardownFailure(String),

	#[error("Invalid input: {0}")]
	InvalidInput(String),

	#[error(transparent)]
	Engine(#[from] chatmux_runtime::Error),
}

//! Error types for the driver runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a driver process.
#[derive(Debug, Error)]
pub enum Error {
	/// Failed to launch the driver process.
	#[error("Failed to launch driver: {0}")]
	LaunchFailed(String),

	/// Transport-level error (stdio communication).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Protocol-level error (malformed or uncorrelated message).
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// Error reported by the driver for a request.
	#[error("{name}: {message}")]
	Remote {
		/// Error type name reported by the driver (defaults to "Error").
		name: String,
		message: String,
	},

	/// Timeout waiting for a response.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// Channel closed unexpectedly (driver exited or connection stopped).
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		match self {
			Error::Timeout(_) => true,
			Error::Remote { name, .. } => name == "TimeoutError",
			_ => false,
		}
	}

	/// Returns true if the driver is gone.
	pub fn is_closed(&self) -> bool {
		matches!(self, Error::ChannelClosed | Error::TransportError(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn remote_error_display_includes_name() {
		let err = Error::Remote {
			name: "TimeoutError".into(),
			message: "send took too long".into(),
		};
		assert_eq!(err.to_string(), "TimeoutError: send took too long");
		assert!(err.is_timeout());
		assert!(!err.is_closed());
	}

	#[test]
	fn channel_closed_is_closed() {
		assert!(Error::ChannelClosed.is_closed());
		assert!(!Error::ChannelClosed.is_timeout());
	}
}

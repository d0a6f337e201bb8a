//! HTTP error mapping.
//!
//! Every failed request answers with `{"error": {"code", "message", "details"}}`
//! and a status derived from its [`ErrorCode`].

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Stable error codes returned by the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// Malformed body, query or session id
	InvalidInput,
	/// No session with that id
	NotFound,
	/// Session exists but has not reached `ready`
	NotReady,
	AlreadyExists,
	SendFailed,
	HistoryFailed,
	InitializationFailed,
	AuthFailed,
	TeardownFailed,
	/// Driver transport or protocol failure
	EngineError,
	InternalError,
}

impl ErrorCode {
	pub fn status(self) -> StatusCode {
		match self {
			ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
			ErrorCode::NotFound => StatusCode::NOT_FOUND,
			ErrorCode::NotReady | ErrorCode::AlreadyExists => StatusCode::CONFLICT,
			ErrorCode::SendFailed
			| ErrorCode::HistoryFailed
			| ErrorCode::InitializationFailed
			| ErrorCode::AuthFailed
			| ErrorCode::EngineError => StatusCode::BAD_GATEWAY,
			ErrorCode::TeardownFailed | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
			ErrorCode::NotFound => write!(f, "NOT_FOUND"),
			ErrorCode::NotReady => write!(f, "NOT_READY"),
			ErrorCode::AlreadyExists => write!(f, "ALREADY_EXISTS"),
			ErrorCode::SendFailed => write!(f, "SEND_FAILED"),
			ErrorCode::HistoryFailed => write!(f, "HISTORY_FAILED"),
			ErrorCode::InitializationFailed => write!(f, "INITIALIZATION_FAILED"),
			ErrorCode::AuthFailed => write!(f, "AUTH_FAILED"),
			ErrorCode::TeardownFailed => write!(f, "TEARDOWN_FAILED"),
			ErrorCode::EngineError => write!(f, "ENGINE_ERROR"),
			ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
		}
	}
}

/// Body of the `error` member in a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
	pub code: ErrorCode,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<Value>,
}

/// Error returned from HTTP handlers.
#[derive(Debug, Clone)]
pub struct ApiError {
	pub body: ApiErrorBody,
}

impl ApiError {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			body: ApiErrorBody {
				code,
				message: message.into(),
				details: None,
			},
		}
	}

	pub fn with_details(mut self, details: Value) -> Self {
		self.body.details = Some(details);
		self
	}

	pub fn invalid_input(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::InvalidInput, message)
	}

	pub fn code(&self) -> ErrorCode {
		self.body.code
	}
}

impl std::fmt::Display for ApiError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}: {}", self.body.code, self.body.message)
	}
}

impl std::error::Error for ApiError {}

impl From<chatmux::Error> for ApiError {
	fn from(err: chatmux::Error) -> Self {
		use chatmux::Error;

		let message = err.to_string();
		match err {
			Error::InvalidInput(_) => ApiError::new(ErrorCode::InvalidInput, message),
			Error::NotFound(id) => ApiError::new(ErrorCode::NotFound, message).with_details(json!({ "sessionId": id })),
			Error::NotReady { id, status } => {
				ApiError::new(ErrorCode::NotReady, message).with_details(json!({ "sessionId": id, "status": status }))
			}
			Error::AlreadyExists { id, status } => ApiError::new(ErrorCode::AlreadyExists, message)
				.with_details(json!({ "sessionId": id, "status": status })),
			Error::SendFailure(_) => ApiError::new(ErrorCode::SendFailed, message),
			Error::HistoryFailure(_) => ApiError::new(ErrorCode::HistoryFailed, message),
			Error::InitializationFailure(_) => ApiError::new(ErrorCode::InitializationFailed, message),
			Error::AuthFailure(_) => ApiError::new(ErrorCode::AuthFailed, message),
			Error::TeardownFailure(_) => ApiError::new(ErrorCode::TeardownFailed, message),
			Error::Engine(_) => ApiError::new(ErrorCode::EngineError, message),
		}
	}
}

impl From<JsonRejection> for ApiError {
	fn from(rejection: JsonRejection) -> Self {
		ApiError::invalid_input(rejection.body_text())
	}
}

impl From<QueryRejection> for ApiError {
	fn from(rejection: QueryRejection) -> Self {
		ApiError::invalid_input(rejection.body_text())
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.body.code.status();
		(status, Json(json!({ "error": self.body }))).into_response()
	}
}

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chatmux_protocol::{
	CreateSessionRequest, CreateSessionResponse, DestroySessionResponse, FailureRecord, HealthResponse, HistoryMessage,
	HistoryQuery, SendMessageRequest, SendMessageResponse, SessionDetail, SessionSummary,
};
use tracing::debug;

use super::AppState;
use crate::error::ApiError;

pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
	Json(HealthResponse {
		ok: true,
		sessions: state.manager.session_count(),
		subscribers: state.manager.hub().subscriber_count(),
	})
}

pub(super) async fn failures(State(state): State<AppState>) -> Json<Vec<FailureRecord>> {
	Json(state.manager.recent_failures())
}

/// Starts a session. Only input errors are reported here; everything else
/// (duplicates, driver failures, auth progress) arrives over `/events`.
pub(super) async fn create_session(
	State(state): State<AppState>,
	payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
	let Json(request) = payload?;

	let accepted = match state.manager.create_session(request.session_id.clone()) {
		Ok(_) => true,
		Err(err @ chatmux::Error::InvalidInput(_)) => return Err(err.into()),
		Err(err) => {
			debug!(target = "chatmux.server", session_id = %request.session_id, error = %err, "create not started");
			false
		}
	};

	Ok((
		StatusCode::ACCEPTED,
		Json(CreateSessionResponse {
			session_id: request.session_id,
			accepted,
		}),
	))
}

pub(super) async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
	Json(state.manager.list_sessions())
}

pub(super) async fn session_detail(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
	let session = state
		.manager
		.get(&id)
		.ok_or_else(|| chatmux::Error::NotFound(id.as_str().into()))?;
	Ok(Json(session.detail()))
}

pub(super) async fn destroy_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
	match state.manager.destroy_session(&id).await {
		Ok(()) => Json(DestroySessionResponse {
			success: true,
			error: None,
		})
		.into_response(),
		Err(err) => (
			StatusCode::NOT_FOUND,
			Json(DestroySessionResponse {
				success: false,
				error: Some(err.to_string()),
			}),
		)
			.into_response(),
	}
}

pub(super) async fn send_message(
	State(state): State<AppState>,
	Path(id): Path<String>,
	payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, ApiError> {
	let Json(request) = payload?;
	if request.to.trim().is_empty() {
		return Err(ApiError::invalid_input("`to` must not be empty"));
	}

	let message_id = state.manager.send_message(&id, &request.to, &request.body).await?;
	Ok(Json(SendMessageResponse { message_id }))
}

pub(super) async fn history(
	State(state): State<AppState>,
	Path(id): Path<String>,
	query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<HistoryMessage>>, ApiError> {
	let Query(query) = query?;
	if query.address.trim().is_empty() {
		return Err(ApiError::invalid_input("`address` must not be empty"));
	}

	let messages = state.manager.fetch_history(&id, &query.address, query.limit).await?;
	Ok(Json(messages))
}

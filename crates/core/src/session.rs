//! A live session and its observable state.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chatmux_protocol::{AccountInfo, SessionDetail, SessionId, SessionStatus, SessionSummary};
use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::engine::Engine;

/// Seconds since the Unix epoch.
pub fn now_ts() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[derive(Debug)]
struct SessionState {
	status: SessionStatus,
	account: Option<AccountInfo>,
	auth_attempts: u32,
	last_error: Option<String>,
}

/// Point-in-time view of the fields the lifecycle decides on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
	pub status: SessionStatus,
	pub auth_attempts: u32,
	pub account: Option<AccountInfo>,
}

/// One messaging session bound to one engine.
///
/// Shared as `Arc<Session>`: the registry, the lifecycle task and callers all
/// hold the same instance, and the registry compares instances by pointer.
pub struct Session {
	id: SessionId,
	engine: Arc<dyn Engine>,
	created_at: u64,
	state: Mutex<SessionState>,
	task: Mutex<Option<AbortHandle>>,
}

impl Session {
	pub fn new(id: SessionId, engine: Arc<dyn Engine>) -> Self {
		Self {
			id,
			engine,
			created_at: now_ts(),
			state: Mutex::new(SessionState {
				status: SessionStatus::Created,
				account: None,
				auth_attempts: 0,
				last_error: None,
			}),
			task: Mutex::new(None),
		}
	}

	pub fn id(&self) -> &SessionId {
		&self.id
	}

	pub fn engine(&self) -> &Arc<dyn Engine> {
		&self.engine
	}

	pub fn status(&self) -> SessionStatus {
		self.state.lock().status
	}

	pub fn is_ready(&self) -> bool {
		self.status() == SessionStatus::Ready
	}

	/// Account identity, known once the session reached ready.
	pub fn account(&self) -> Option<AccountInfo> {
		self.state.lock().account.clone()
	}

	pub fn auth_attempts(&self) -> u32 {
		self.state.lock().auth_attempts
	}

	pub fn last_error(&self) -> Option<String> {
		self.state.lock().last_error.clone()
	}

	pub fn created_at(&self) -> u64 {
		self.created_at
	}

	pub fn snapshot(&self) -> Snapshot {
		let state = self.state.lock();
		Snapshot {
			status: state.status,
			auth_attempts: state.auth_attempts,
			account: state.account.clone(),
		}
	}

	pub fn summary(&self) -> SessionSummary {
		SessionSummary {
			session_id: self.id.clone(),
			status: self.status().connection_state(),
		}
	}

	pub fn detail(&self) -> SessionDetail {
		let state = self.state.lock();
		SessionDetail {
			session_id: self.id.clone(),
			status: state.status.connection_state(),
			lifecycle: state.status,
			account: state.account.clone(),
			auth_attempts: state.auth_attempts,
			last_error: state.last_error.clone(),
			created_at: self.created_at,
		}
	}

	/// Moves the status forward. Returns false (and changes nothing) when
	/// `next` would move it backwards.
	pub(crate) fn advance(&self, next: SessionStatus) -> bool {
		let mut state = self.state.lock();
		if next < state.status {
			return false;
		}
		state.status = next;
		true
	}

	pub(crate) fn set_auth_attempts(&self, attempts: u32) {
		self.state.lock().auth_attempts = attempts;
	}

	pub(crate) fn set_account(&self, account: Option<AccountInfo>) {
		self.state.lock().account = account;
	}

	/// Marks the session failed with `message`.
	pub(crate) fn fail(&self, message: &str) {
		let mut state = self.state.lock();
		state.last_error = Some(message.to_string());
		if state.status < SessionStatus::Failed {
			state.status = SessionStatus::Failed;
		}
	}

	pub(crate) fn attach_task(&self, handle: AbortHandle) {
		*self.task.lock() = Some(handle);
	}

	/// Stops the lifecycle task, if any is attached.
	pub(crate) fn abort_task(&self) {
		if let Some(handle) = self.task.lock().take() {
			handle.abort();
		}
	}
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.id)
			.field("status", &self.status())
			.field("created_at", &self.created_at)
			.finish_non_exhaustive()
	}
}

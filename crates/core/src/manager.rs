//! Session orchestration: registry, lifecycle tasks, hub and engine factory.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chatmux_protocol::{
	EventEnvelope, EventKind, FailureRecord, HistoryMessage, LifecycleErrorPayload, ReadyPayload, SessionId, SessionStatus,
	SessionSummary,
};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::address::normalize_recipient;
use crate::engine::EngineFactory;
use crate::error::{Error, Result, codes};
use crate::hub::Hub;
use crate::lifecycle::{self, LifecyclePolicy};
use crate::registry::Registry;
use crate::session::{Session, now_ts};

/// Number of lifecycle failures kept for inspection.
pub const FAILURE_LOG_CAPACITY: usize = 100;

/// Tunables of a [`SessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
	pub max_auth_challenges: u32,
	/// Upper bound on a single engine teardown.
	pub teardown_timeout: Duration,
}

impl Default for ManagerConfig {
	fn default() -> Self {
		Self {
			max_auth_challenges: LifecyclePolicy::default().max_auth_challenges,
			teardown_timeout: Duration::from_secs(10),
		}
	}
}

impl ManagerConfig {
	pub fn policy(&self) -> LifecyclePolicy {
		LifecyclePolicy {
			max_auth_challenges: self.max_auth_challenges,
		}
	}
}

/// State shared between the manager handle and lifecycle tasks.
pub(crate) struct Shared {
	pub(crate) registry: Registry,
	pub(crate) hub: Arc<Hub>,
	pub(crate) config: ManagerConfig,
	factory: Arc<dyn EngineFactory>,
	failures: Mutex<VecDeque<FailureRecord>>,
}

impl Shared {
	pub(crate) fn publish(&self, session_id: &SessionId, kind: EventKind, payload: impl serde::Serialize) {
		self.hub.publish(EventEnvelope::new(session_id.clone(), kind, payload));
	}

	pub(crate) fn record_failure(&self, session_id: &SessionId, code: &str, message: &str) {
		let mut failures = self.failures.lock();
		if failures.len() == FAILURE_LOG_CAPACITY {
			failures.pop_front();
		}
		failures.push_back(FailureRecord {
			session_id: session_id.clone(),
			code: code.to_string(),
			message: message.to_string(),
			at: now_ts(),
		});
	}

	/// Best-effort engine teardown bounded by the configured timeout.
	///
	/// Failures are logged and recorded; the session ends up `Destroyed`
	/// regardless.
	pub(crate) async fn teardown(&self, session: &Arc<Session>) {
		let timeout = self.config.teardown_timeout;
		let failure = match tokio::time::timeout(timeout, session.engine().destroy()).await {
			Ok(Ok(())) => None,
			Ok(Err(err @ Error::TeardownFailure(_))) => Some(err),
			Ok(Err(err)) => Some(Error::TeardownFailure(err.to_string())),
			Err(_) => Some(Error::TeardownFailure(format!("engine did not stop within {}ms", timeout.as_millis()))),
		};

		if let Some(err) = failure {
			warn!(target = "chatmux.session", session_id = %session.id(), error = %err, "teardown failed");
			self.record_failure(session.id(), codes::TEARDOWN_FAILED, &err.to_string());
		} else {
			debug!(target = "chatmux.session", session_id = %session.id(), "engine torn down");
		}
		session.advance(SessionStatus::Destroyed);
	}
}

/// Handle to the set of live sessions.
///
/// Cheap to clone; every clone drives the same registry and hub.
#[derive(Clone)]
pub struct SessionManager {
	shared: Arc<Shared>,
}

impl SessionManager {
	pub fn new(factory: Arc<dyn EngineFactory>, config: ManagerConfig) -> Self {
		Self {
			shared: Arc::new(Shared {
				registry: Registry::new(),
				hub: Arc::new(Hub::new()),
				config,
				factory,
				failures: Mutex::new(VecDeque::new()),
			}),
		}
	}

	pub fn hub(&self) -> &Arc<Hub> {
		&self.shared.hub
	}

	pub fn config(&self) -> &ManagerConfig {
		&self.shared.config
	}

	/// Registers a session and starts its lifecycle in the background.
	///
	/// Returns as soon as the session is registered; authentication progress
	/// and readiness are reported through the hub. Must be called from within
	/// a tokio runtime.
	///
	/// # Errors
	///
	/// - [`Error::InvalidInput`] for an empty id
	/// - [`Error::AlreadyExists`] if the id is taken. A `ready` notice is
	///   re-published when the existing session is ready, an `error` event
	///   otherwise.
	/// - [`Error::InitializationFailure`] if no engine could be built
	pub fn create_session(&self, id: SessionId) -> Result<Arc<Session>> {
		if id.is_empty() {
			return Err(Error::InvalidInput("sessionId must not be empty".to_string()));
		}

		let mut events = None;
		let created = self.shared.registry.create(&id, |id| {
			let (engine, rx) = self
				.shared
				.factory
				.create(id)
				.map_err(|err| Error::InitializationFailure(err.to_string()))?;
			events = Some(rx);
			Ok(Arc::new(Session::new(id.clone(), engine)))
		});

		let session = match created {
			Ok(session) => session,
			Err(err @ Error::AlreadyExists { .. }) => {
				self.notify_existing(&id, &err);
				return Err(err);
			}
			Err(err) => {
				warn!(target = "chatmux.session", session_id = %id, error = %err, "engine creation failed");
				self.shared.record_failure(&id, codes::INITIALIZATION_FAILED, &err.to_string());
				self.shared.publish(
					&id,
					EventKind::Error,
					LifecycleErrorPayload {
						code: codes::INITIALIZATION_FAILED.to_string(),
						message: err.to_string(),
						status: SessionStatus::Failed,
					},
				);
				return Err(err);
			}
		};

		let Some(events) = events else {
			return Err(Error::InitializationFailure("engine event channel missing".to_string()));
		};

		info!(target = "chatmux.session", session_id = %id, "session created");
		let task = tokio::spawn(lifecycle::run(Arc::clone(&self.shared), Arc::clone(&session), events));
		session.attach_task(task.abort_handle());
		Ok(session)
	}

	fn notify_existing(&self, id: &SessionId, err: &Error) {
		match self.shared.registry.get(id.as_str()) {
			Some(existing) if existing.is_ready() => {
				debug!(target = "chatmux.session", session_id = %id, "session already ready, re-announcing");
				self.shared.publish(id, EventKind::Ready, ReadyPayload { account: existing.account() });
			}
			existing => {
				let status = existing.map(|s| s.status()).unwrap_or(SessionStatus::Created);
				self.shared.publish(
					id,
					EventKind::Error,
					LifecycleErrorPayload {
						code: codes::ALREADY_EXISTS.to_string(),
						message: err.to_string(),
						status,
					},
				);
			}
		}
	}

	pub fn get(&self, id: &str) -> Option<Arc<Session>> {
		self.shared.registry.get(id)
	}

	/// Lists sessions sorted by id.
	pub fn list_sessions(&self) -> Vec<SessionSummary> {
		self.shared.registry.list().iter().map(|session| session.summary()).collect()
	}

	pub fn session_count(&self) -> usize {
		self.shared.registry.len()
	}

	fn ready_session(&self, id: &str) -> Result<Arc<Session>> {
		let session = self.get(id).ok_or_else(|| Error::NotFound(id.into()))?;
		let status = session.status();
		if status != SessionStatus::Ready {
			return Err(Error::NotReady { id: id.into(), status });
		}
		Ok(session)
	}

	/// Sends a message from session `id`. The recipient is normalized first.
	///
	/// # Errors
	///
	/// [`Error::NotFound`], [`Error::NotReady`], or [`Error::SendFailure`]
	/// wrapping the engine's error.
	pub async fn send_message(&self, id: &str, to: &str, body: &str) -> Result<String> {
		let session = self.ready_session(id)?;
		let to = normalize_recipient(to);
		debug!(target = "chatmux.session", session_id = %id, %to, "sending message");

		session.engine().send_message(&to, body).await.map_err(|err| {
			warn!(target = "chatmux.session", session_id = %id, error = %err, "send failed");
			match err {
				Error::SendFailure(_) => err,
				other => Error::SendFailure(other.to_string()),
			}
		})
	}

	/// Fetches up to `limit` recent messages exchanged with `address`.
	pub async fn fetch_history(&self, id: &str, address: &str, limit: usize) -> Result<Vec<HistoryMessage>> {
		let session = self.ready_session(id)?;
		let chat_id = normalize_recipient(address);

		session.engine().fetch_history(&chat_id, limit).await.map_err(|err| {
			warn!(target = "chatmux.session", session_id = %id, error = %err, "history fetch failed");
			match err {
				Error::HistoryFailure(_) => err,
				other => Error::HistoryFailure(other.to_string()),
			}
		})
	}

	/// Unregisters session `id` and tears its engine down.
	///
	/// The session is unreachable as soon as this is called. Teardown errors
	/// are logged, not returned.
	///
	/// # Errors
	///
	/// [`Error::NotFound`] if no such session is registered (including a
	/// second destroy of the same id).
	pub async fn destroy_session(&self, id: &str) -> Result<()> {
		let session = self.shared.registry.remove(id).ok_or_else(|| Error::NotFound(id.into()))?;
		session.abort_task();
		info!(target = "chatmux.session", session_id = %id, "destroying session");

		self.shared.publish(session.id(), EventKind::Destroyed, json!({}));
		self.shared.teardown(&session).await;
		Ok(())
	}

	/// Most recent lifecycle failures, oldest first.
	pub fn recent_failures(&self) -> Vec<FailureRecord> {
		self.shared.failures.lock().iter().cloned().collect()
	}

	/// Destroys every session. Used on process shutdown.
	pub async fn shutdown(&self) {
		let sessions = self.shared.registry.drain();
		if sessions.is_empty() {
			return;
		}
		info!(target = "chatmux.session", count = sessions.len(), "shutting down sessions");

		join_all(sessions.iter().map(|session| {
			session.abort_task();
			self.shared.teardown(session)
		}))
		.await;
	}
}

impl std::fmt::Debug for SessionManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionManager")
			.field("sessions", &self.shared.registry.len())
			.field("hub", &self.shared.hub)
			.field("config", &self.shared.config)
			.finish()
	}
}

//! Session registry: the only place live sessions are looked up.
//!
//! Every operation takes the map lock for a short synchronous section and
//! never across an `.await`, which is what makes check-and-insert atomic.

use std::collections::HashMap;
use std::sync::Arc;

use chatmux_protocol::SessionId;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::session::Session;

/// Map of live sessions keyed by id.
#[derive(Debug, Default)]
pub struct Registry {
	sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a new session for `id` unless one already exists.
	///
	/// `make` runs under the registry lock, only when the id is free, so it
	/// must not block. Concurrent calls for the same id: exactly one succeeds,
	/// the others get [`Error::AlreadyExists`] carrying the winner's status.
	pub fn create<F>(&self, id: &SessionId, make: F) -> Result<Arc<Session>>
	where
		F: FnOnce(&SessionId) -> Result<Arc<Session>>,
	{
		let mut sessions = self.sessions.lock();
		if let Some(existing) = sessions.get(id) {
			return Err(Error::AlreadyExists {
				id: id.clone(),
				status: existing.status(),
			});
		}
		let session = make(id)?;
		sessions.insert(id.clone(), Arc::clone(&session));
		Ok(session)
	}

	pub fn get(&self, id: &str) -> Option<Arc<Session>> {
		self.sessions.lock().get(id).cloned()
	}

	/// Unregisters `id`. Removing an absent id is a no-op returning `None`.
	pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
		self.sessions.lock().remove(id)
	}

	/// Unregisters `session` only if it is still the registered instance.
	pub fn remove_if_current(&self, session: &Arc<Session>) -> bool {
		let mut sessions = self.sessions.lock();
		match sessions.get(session.id().as_str()) {
			Some(current) if Arc::ptr_eq(current, session) => {
				sessions.remove(session.id().as_str());
				true
			}
			_ => false,
		}
	}

	/// Returns true if `session` is the instance registered under its id.
	pub fn is_current(&self, session: &Arc<Session>) -> bool {
		self.sessions
			.lock()
			.get(session.id().as_str())
			.is_some_and(|current| Arc::ptr_eq(current, session))
	}

	/// Snapshot of all sessions, sorted by id.
	pub fn list(&self) -> Vec<Arc<Session>> {
		let mut sessions: Vec<_> = self.sessions.lock().values().cloned().collect();
		sessions.sort_by(|a, b| a.id().cmp(b.id()));
		sessions
	}

	/// Unregisters every session and returns them.
	pub fn drain(&self) -> Vec<Arc<Session>> {
		self.sessions.lock().drain().map(|(_, session)| session).collect()
	}

	pub fn len(&self) -> usize {
		self.sessions.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

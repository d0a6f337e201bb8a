//! Scripted engines for exercising the session layer without a driver.
//!
//! [`ScriptedFactory`] hands out [`ScriptedEngine`]s and keeps a handle to
//! each, so a test can push engine events and inject failures after the
//! session has been created:
//!
//! ```ignore
//! let factory = Arc::new(ScriptedFactory::new());
//! let manager = SessionManager::new(factory.clone(), ManagerConfig::default());
//! manager.create_session("s1".into())?;
//!
//! let engine = factory.engine("s1").unwrap();
//! engine.emit(EngineEvent::ready("1555@c.us"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chatmux_protocol::{HistoryMessage, SessionId};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use crate::engine::{Engine, EngineEvent, EngineFactory};
use crate::error::{Error, Result};

/// Engine whose behaviour is set by the test.
pub struct ScriptedEngine {
	id: SessionId,
	events: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
	on_initialize: Mutex<Vec<EngineEvent>>,
	init_error: Mutex<Option<String>>,
	init_gate: Mutex<Option<Arc<Notify>>>,
	send_error: Mutex<Option<String>>,
	history_error: Mutex<Option<String>>,
	destroy_error: Mutex<Option<String>>,
	history: Mutex<Vec<HistoryMessage>>,
	sent: Mutex<Vec<(String, String)>>,
	history_requests: Mutex<Vec<(String, usize)>>,
	initialize_calls: AtomicUsize,
	destroy_calls: AtomicUsize,
}

impl ScriptedEngine {
	/// Creates an engine and the receiving end of its event channel.
	pub fn new(id: impl Into<SessionId>) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let engine = Self {
			id: id.into(),
			events: Mutex::new(Some(tx)),
			on_initialize: Mutex::new(Vec::new()),
			init_error: Mutex::new(None),
			init_gate: Mutex::new(None),
			send_error: Mutex::new(None),
			history_error: Mutex::new(None),
			destroy_error: Mutex::new(None),
			history: Mutex::new(Vec::new()),
			sent: Mutex::new(Vec::new()),
			history_requests: Mutex::new(Vec::new()),
			initialize_calls: AtomicUsize::new(0),
			destroy_calls: AtomicUsize::new(0),
		};
		(engine, rx)
	}

	/// Engine nobody listens to.
	pub fn detached(id: impl Into<SessionId>) -> Self {
		Self::new(id).0
	}

	pub fn id(&self) -> &SessionId {
		&self.id
	}

	/// Pushes an event to the session. Returns false once the channel is closed.
	pub fn emit(&self, event: EngineEvent) -> bool {
		match self.events.lock().as_ref() {
			Some(tx) => tx.send(event).is_ok(),
			None => false,
		}
	}

	/// Closes the event channel, as a crashed driver would.
	pub fn close_events(&self) {
		self.events.lock().take();
	}

	/// Events emitted from within `initialize()`, before it returns.
	pub fn emit_on_initialize(&self, events: Vec<EngineEvent>) {
		*self.on_initialize.lock() = events;
	}

	pub fn fail_initialize(&self, message: impl Into<String>) {
		*self.init_error.lock() = Some(message.into());
	}

	/// `initialize()` blocks until `gate` is notified.
	pub fn hold_initialize(&self, gate: Arc<Notify>) {
		*self.init_gate.lock() = Some(gate);
	}

	pub fn fail_send(&self, message: impl Into<String>) {
		*self.send_error.lock() = Some(message.into());
	}

	pub fn fail_history(&self, message: impl Into<String>) {
		*self.history_error.lock() = Some(message.into());
	}

	pub fn fail_destroy(&self, message: impl Into<String>) {
		*self.destroy_error.lock() = Some(message.into());
	}

	pub fn set_history(&self, messages: Vec<HistoryMessage>) {
		*self.history.lock() = messages;
	}

	/// `(to, body)` pairs passed to `send_message`.
	pub fn sent_messages(&self) -> Vec<(String, String)> {
		self.sent.lock().clone()
	}

	/// `(chat_id, limit)` pairs passed to `fetch_history`.
	pub fn history_requests(&self) -> Vec<(String, usize)> {
		self.history_requests.lock().clone()
	}

	pub fn initialize_calls(&self) -> usize {
		self.initialize_calls.load(Ordering::SeqCst)
	}

	pub fn destroy_calls(&self) -> usize {
		self.destroy_calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Engine for ScriptedEngine {
	async fn initialize(&self) -> Result<()> {
		self.initialize_calls.fetch_add(1, Ordering::SeqCst);
		let gate = self.init_gate.lock().clone();
		if let Some(gate) = gate {
			gate.notified().await;
		}
		if let Some(message) = self.init_error.lock().clone() {
			return Err(Error::InitializationFailure(message));
		}
		let scripted = std::mem::take(&mut *self.on_initialize.lock());
		for event in scripted {
			self.emit(event);
		}
		Ok(())
	}

	async fn send_message(&self, to: &str, body: &str) -> Result<String> {
		if let Some(message) = self.send_error.lock().clone() {
			return Err(Error::SendFailure(message));
		}
		let mut sent = self.sent.lock();
		sent.push((to.to_string(), body.to_string()));
		Ok(format!("{}-msg-{}", self.id, sent.len()))
	}

	async fn fetch_history(&self, chat_id: &str, limit: usize) -> Result<Vec<HistoryMessage>> {
		self.history_requests.lock().push((chat_id.to_string(), limit));
		if let Some(message) = self.history_error.lock().clone() {
			return Err(Error::HistoryFailure(message));
		}
		Ok(self.history.lock().iter().take(limit).cloned().collect())
	}

	async fn destroy(&self) -> Result<()> {
		self.destroy_calls.fetch_add(1, Ordering::SeqCst);
		self.close_events();
		match self.destroy_error.lock().clone() {
			Some(message) => Err(Error::TeardownFailure(message)),
			None => Ok(()),
		}
	}
}

/// Factory producing [`ScriptedEngine`]s.
#[derive(Default)]
pub struct ScriptedFactory {
	engines: Mutex<HashMap<SessionId, Vec<Arc<ScriptedEngine>>>>,
	on_initialize: Mutex<Vec<EngineEvent>>,
	init_error: Mutex<Option<String>>,
	init_gate: Mutex<Option<Arc<Notify>>>,
	create_error: Mutex<Option<String>>,
	created: AtomicUsize,
}

impl ScriptedFactory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Every engine created afterwards emits `events` during `initialize()`.
	pub fn with_initialize_events(self, events: Vec<EngineEvent>) -> Self {
		*self.on_initialize.lock() = events;
		self
	}

	/// Every engine created afterwards fails `initialize()`.
	pub fn with_initialize_error(self, message: impl Into<String>) -> Self {
		*self.init_error.lock() = Some(message.into());
		self
	}

	/// Every engine created afterwards holds `initialize()` until `gate` is
	/// notified.
	pub fn with_initialize_gate(self, gate: Arc<Notify>) -> Self {
		*self.init_gate.lock() = Some(gate);
		self
	}

	/// `create` itself fails.
	pub fn with_create_error(self, message: impl Into<String>) -> Self {
		*self.create_error.lock() = Some(message.into());
		self
	}

	/// Latest engine created for `id`.
	pub fn engine(&self, id: &str) -> Option<Arc<ScriptedEngine>> {
		self.engines.lock().get(id).and_then(|engines| engines.last().cloned())
	}

	/// Number of engines ever created for `id`.
	pub fn engines_for(&self, id: &str) -> usize {
		self.engines.lock().get(id).map_or(0, Vec::len)
	}

	pub fn created(&self) -> usize {
		self.created.load(Ordering::SeqCst)
	}
}

impl EngineFactory for ScriptedFactory {
	fn create(&self, id: &SessionId) -> Result<(Arc<dyn Engine>, mpsc::UnboundedReceiver<EngineEvent>)> {
		if let Some(message) = self.create_error.lock().clone() {
			return Err(Error::InitializationFailure(message));
		}

		let (engine, rx) = ScriptedEngine::new(id.clone());
		engine.emit_on_initialize(self.on_initialize.lock().clone());
		if let Some(message) = self.init_error.lock().clone() {
			engine.fail_initialize(message);
		}
		if let Some(gate) = self.init_gate.lock().clone() {
			engine.hold_initialize(gate);
		}

		let engine = Arc::new(engine);
		self.engines.lock().entry(id.clone()).or_default().push(Arc::clone(&engine));
		self.created.fetch_add(1, Ordering::SeqCst);
		Ok((engine as Arc<dyn Engine>, rx))
	}
}

/// Polls `condition` every few milliseconds until it holds.
///
/// Returns false if it still does not hold after `timeout`.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
	let deadline = tokio::time::Instant::now() + timeout;
	loop {
		if condition() {
			return true;
		}
		if tokio::time::Instant::now() >= deadline {
			return false;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
}

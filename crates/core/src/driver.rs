//! Engine backed by an external driver process.
//!
//! Each session gets its own driver process, started on `initialize()` with
//! `CHATMUX_SESSION_ID` and `CHATMUX_AUTH_DIR` in its environment. The
//! per-session credential directory is created before the process starts and
//! is otherwise owned by the driver.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatmux_protocol::driver::{events, methods};
use chatmux_protocol::{AccountInfo, HistoryMessage, SessionId};
use chatmux_runtime::{Connection, DriverCommand, DriverProcess, Event};
use serde_json::{Value, json};
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::{DisconnectReason, Engine, EngineEvent, EngineFactory, IncomingMessage};
use crate::error::{Error, Result};

/// How driver processes are launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
	pub program: PathBuf,
	pub args: Vec<String>,
	/// Parent of the per-session credential directories.
	pub auth_dir: PathBuf,
	/// Bound on every driver request, `initialize` and `destroy` included.
	pub request_timeout: Duration,
}

impl DriverConfig {
	pub fn new(program: impl Into<PathBuf>, auth_dir: impl Into<PathBuf>) -> Self {
		Self {
			program: program.into(),
			args: Vec::new(),
			auth_dir: auth_dir.into(),
			request_timeout: Duration::from_secs(30),
		}
	}

	/// Credential directory of session `id`.
	///
	/// Characters outside `[A-Za-z0-9_-]` are replaced so an id can never
	/// escape `auth_dir`.
	pub fn session_dir(&self, id: &SessionId) -> PathBuf {
		let safe: String = id
			.as_str()
			.chars()
			.map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
			.collect();
		self.auth_dir.join(format!("session-{safe}"))
	}

	fn command(&self, id: &SessionId, session_dir: &Path) -> DriverCommand {
		DriverCommand {
			program: self.program.clone(),
			args: self.args.clone(),
			env: vec![
				("CHATMUX_SESSION_ID".to_string(), id.to_string()),
				("CHATMUX_AUTH_DIR".to_string(), session_dir.to_string_lossy().into_owned()),
			],
		}
	}
}

/// Builds one [`DriverEngine`] per session.
#[derive(Debug, Clone)]
pub struct DriverEngineFactory {
	config: Arc<DriverConfig>,
}

impl DriverEngineFactory {
	pub fn new(config: DriverConfig) -> Self {
		Self { config: Arc::new(config) }
	}
}

impl EngineFactory for DriverEngineFactory {
	fn create(&self, id: &SessionId) -> Result<(Arc<dyn Engine>, mpsc::UnboundedReceiver<EngineEvent>)> {
		let (tx, rx) = mpsc::unbounded_channel();
		let engine = DriverEngine {
			id: id.clone(),
			config: Arc::clone(&self.config),
			events: parking_lot::Mutex::new(Some(tx)),
			running: TokioMutex::new(None),
		};
		Ok((Arc::new(engine) as Arc<dyn Engine>, rx))
	}
}

struct Running {
	process: DriverProcess,
	connection: Arc<Connection>,
	tasks: Vec<JoinHandle<()>>,
}

/// [`Engine`] speaking newline-delimited JSON with a driver process.
pub struct DriverEngine {
	id: SessionId,
	config: Arc<DriverConfig>,
	/// Handed to the event pump on initialize; dropping it closes the channel.
	events: parking_lot::Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
	running: TokioMutex<Option<Running>>,
}

impl DriverEngine {
	async fn connection(&self) -> Result<Arc<Connection>> {
		match self.running.lock().await.as_ref() {
			Some(running) if !running.connection.is_closed() => Ok(Arc::clone(&running.connection)),
			_ => Err(chatmux_runtime::Error::ChannelClosed.into()),
		}
	}

	async fn request(&self, method: &str, params: Value) -> Result<Value> {
		let connection = self.connection().await?;
		Ok(connection
			.send_message_with_timeout(method, params, self.config.request_timeout)
			.await?)
	}
}

#[async_trait]
impl Engine for DriverEngine {
	async fn initialize(&self) -> Result<()> {
		let mut running = self.running.lock().await;
		if running.is_some() {
			return Err(Error::InitializationFailure("driver already started".to_string()));
		}
		let events_tx = self
			.events
			.lock()
			.take()
			.ok_or_else(|| Error::InitializationFailure("engine was destroyed".to_string()))?;

		let session_dir = self.config.session_dir(&self.id);
		tokio::fs::create_dir_all(&session_dir).await.map_err(|err| {
			Error::InitializationFailure(format!("cannot create {}: {err}", session_dir.display()))
		})?;

		let command = self.config.command(&self.id, &session_dir);
		let (process, connection, driver_events) = DriverProcess::launch(&command)
			.await
			.map_err(|err| Error::InitializationFailure(err.to_string()))?;
		debug!(target = "chatmux.driver", session_id = %self.id, pid = process.id(), "driver started");

		let runner = {
			let connection = Arc::clone(&connection);
			let id = self.id.clone();
			tokio::spawn(async move {
				if let Err(err) = connection.run().await {
					warn!(target = "chatmux.driver", session_id = %id, error = %err, "driver connection ended with error");
				}
			})
		};
		let pump = tokio::spawn(pump_events(self.id.clone(), driver_events, events_tx));

		*running = Some(Running {
			process,
			connection: Arc::clone(&connection),
			tasks: vec![runner, pump],
		});
		drop(running);

		connection
			.send_message_with_timeout(methods::INITIALIZE, json!({}), self.config.request_timeout)
			.await
			.map_err(|err| Error::InitializationFailure(err.to_string()))?;
		Ok(())
	}

	async fn send_message(&self, to: &str, body: &str) -> Result<String> {
		let result = self.request(methods::SEND_MESSAGE, json!({ "to": to, "body": body })).await?;
		result
			.get("id")
			.and_then(Value::as_str)
			.map(str::to_string)
			.ok_or_else(|| Error::SendFailure(format!("driver returned no message id: {result}")))
	}

	async fn fetch_history(&self, chat_id: &str, limit: usize) -> Result<Vec<HistoryMessage>> {
		let result = self
			.request(methods::FETCH_MESSAGES, json!({ "chatId": chat_id, "limit": limit }))
			.await?;
		serde_json::from_value(result)
			.map_err(|err| Error::HistoryFailure(format!("malformed history from driver: {err}")))
	}

	async fn destroy(&self) -> Result<()> {
		self.events.lock().take();
		let Some(running) = self.running.lock().await.take() else {
			return Ok(());
		};

		let timeout = self.config.request_timeout;
		let requested = if running.connection.is_closed() {
			Ok(Value::Null)
		} else {
			running.connection.send_message_with_timeout(methods::DESTROY, json!({}), timeout).await
		};

		let stopped = running.process.shutdown(timeout).await;
		for task in running.tasks {
			task.abort();
		}

		if let Err(err) = requested {
			debug!(target = "chatmux.driver", session_id = %self.id, error = %err, "driver did not acknowledge destroy");
		}
		stopped.map_err(|err| Error::TeardownFailure(err.to_string()))
	}
}

/// Forwards translated driver events until the driver goes away.
async fn pump_events(id: SessionId, mut driver_events: mpsc::UnboundedReceiver<Event>, tx: mpsc::UnboundedSender<EngineEvent>) {
	while let Some(event) = driver_events.recv().await {
		match translate(&event) {
			Some(translated) => {
				if tx.send(translated).is_err() {
					break;
				}
			}
			None => debug!(target = "chatmux.driver", session_id = %id, method = %event.method, "unhandled driver event"),
		}
	}
	debug!(target = "chatmux.driver", session_id = %id, "driver event stream ended");
}

/// Maps a driver event onto an [`EngineEvent`].
fn translate(event: &Event) -> Option<EngineEvent> {
	let params = &event.params;
	let text = |key: &str| params.get(key).and_then(Value::as_str).map(str::to_string);

	match event.method.as_str() {
		events::QR => Some(EngineEvent::AuthChallenge { qr: text("qr")? }),
		events::QR_EXHAUSTED => Some(EngineEvent::AuthChallengeExhausted),
		events::AUTHENTICATED => Some(EngineEvent::Authenticated),
		events::READY => Some(EngineEvent::Ready {
			account: params
				.get("account")
				.and_then(|account| serde_json::from_value::<AccountInfo>(account.clone()).ok()),
		}),
		events::AUTH_FAILURE => Some(EngineEvent::AuthFailure {
			message: text("message").unwrap_or_else(|| "authentication failed".to_string()),
		}),
		events::DISCONNECTED => Some(EngineEvent::Disconnected {
			reason: DisconnectReason::parse(&text("reason").unwrap_or_default()),
		}),
		events::MESSAGE => serde_json::from_value::<IncomingMessage>(params.clone())
			.ok()
			.map(EngineEvent::Message),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn event(method: &str, params: Value) -> Event {
		Event {
			method: method.to_string(),
			params,
		}
	}

	#[test]
	fn translates_lifecycle_events() {
		assert_eq!(
			translate(&event("qr", json!({"qr": "2@abc"}))),
			Some(EngineEvent::AuthChallenge { qr: "2@abc".into() })
		);
		assert_eq!(translate(&event("qr_exhausted", Value::Null)), Some(EngineEvent::AuthChallengeExhausted));
		assert_eq!(translate(&event("authenticated", Value::Null)), Some(EngineEvent::Authenticated));
		assert_eq!(
			translate(&event("ready", json!({"account": {"id": "1555@c.us", "pushname": "Ops"}}))),
			Some(EngineEvent::Ready {
				account: Some(AccountInfo {
					id: "1555@c.us".into(),
					pushname: Some("Ops".into()),
					platform: None,
				})
			})
		);
		assert_eq!(
			translate(&event("disconnected", json!({"reason": "LOGOUT"}))),
			Some(EngineEvent::Disconnected {
				reason: DisconnectReason::Logout
			})
		);
	}

	#[test]
	fn qr_without_payload_is_dropped() {
		assert_eq!(translate(&event("qr", json!({}))), None);
	}

	#[test]
	fn translates_messages() {
		let translated = translate(&event(
			"message",
			json!({"id": "m1", "from": "1555@c.us", "to": "1999@c.us", "body": "hi", "timestamp": 42}),
		));
		let Some(EngineEvent::Message(message)) = translated else {
			panic!("expected message, got {translated:?}");
		};
		assert_eq!(message.body, "hi");
		assert_eq!(message.timestamp, 42);
	}

	#[test]
	fn unknown_events_are_ignored() {
		assert_eq!(translate(&event("change_battery", json!({}))), None);
	}

	#[test]
	fn session_dir_is_confined_to_auth_dir() {
		let config = DriverConfig::new("driver", "/var/lib/chatmux");
		assert_eq!(
			config.session_dir(&"../../etc".into()),
			PathBuf::from("/var/lib/chatmux/session-______etc")
		);
		assert_eq!(config.session_dir(&"sales-1".into()), PathBuf::from("/var/lib/chatmux/session-sales-1"));
	}

	#[tokio::test]
	async fn calls_before_initialize_fail() {
		let factory = DriverEngineFactory::new(DriverConfig::new("driver", "/tmp"));
		let (engine, _events) = factory.create(&"s1".into()).unwrap();
		let err = engine.send_message("1555@c.us", "hi").await.unwrap_err();
		assert!(matches!(err, Error::Engine(chatmux_runtime::Error::ChannelClosed)));
		engine.destroy().await.unwrap();
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn driver_lifecycle_over_stdio() {
		use std::io::Write;

		let dir = tempfile::tempdir().unwrap();
		let script = dir.path().join("driver.sh");
		let mut file = std::fs::File::create(&script).unwrap();
		// Acknowledges every request, emits ready after initialize, answers sendMessage with an id.
		writeln!(
			file,
			r#"while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -e 's/.*"id":\([0-9]*\).*/\1/')
  case "$line" in
    *'"initialize"'*)
      printf '{{"id":%s,"result":null}}\n' "$id"
      printf '{{"method":"ready","params":{{"account":{{"id":"%s@c.us"}}}}}}\n' "$CHATMUX_SESSION_ID" ;;
    *'"sendMessage"'*) printf '{{"id":%s,"result":{{"id":"wamid-1"}}}}\n' "$id" ;;
    *'"destroy"'*) printf '{{"id":%s,"result":null}}\n' "$id"; exit 0 ;;
    *) printf '{{"id":%s,"error":{{"message":"unsupported"}}}}\n' "$id" ;;
  esac
done"#
		)
		.unwrap();

		let mut config = DriverConfig::new("/bin/sh", dir.path().join("auth"));
		config.args = vec![script.to_string_lossy().into_owned()];
		config.request_timeout = Duration::from_secs(5);
		let factory = DriverEngineFactory::new(config.clone());
		let (engine, mut events) = factory.create(&"42".into()).unwrap();

		engine.initialize().await.unwrap();
		assert!(config.session_dir(&"42".into()).is_dir());

		let ready = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
		assert_eq!(ready, Some(EngineEvent::ready("42@c.us")));

		assert_eq!(engine.send_message("1555@c.us", "hi").await.unwrap(), "wamid-1");
		assert!(matches!(
			engine.fetch_history("1555@c.us", 10).await,
			Err(Error::Engine(chatmux_runtime::Error::Remote { .. }))
		));

		engine.destroy().await.unwrap();
		let closed = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
		assert_eq!(closed, None);
	}
}

//! Push channel exercised over a real socket with tokio-tungstenite.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chatmux::testing::ScriptedFactory;
use chatmux::{EngineEvent, EngineFactory, ManagerConfig, SessionManager};
use chatmux_cli::server;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const WAIT: Duration = Duration::from_secs(2);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
	addr: SocketAddr,
	manager: SessionManager,
	factory: Arc<ScriptedFactory>,
	stop: Option<oneshot::Sender<()>>,
	handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
	async fn start(factory: ScriptedFactory) -> Self {
		let factory = Arc::new(factory);
		let manager = SessionManager::new(Arc::clone(&factory) as Arc<dyn EngineFactory>, ManagerConfig::default());
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();

		let (stop, stopped) = oneshot::channel::<()>();
		let handle = tokio::spawn(server::run(listener, manager.clone(), async move {
			let _ = stopped.await;
			Ok(())
		}));

		Self {
			addr,
			manager,
			factory,
			stop: Some(stop),
			handle,
		}
	}

	/// Connects and consumes the `connected` frame.
	async fn connect(&self) -> (Client, String) {
		let (mut ws, _) = connect_async(format!("ws://{}/events", self.addr)).await.unwrap();
		let hello = next_frame(&mut ws).await;
		assert_eq!(hello["type"], "connected");
		let connection_id = hello["connectionId"].as_str().unwrap().to_string();
		(ws, connection_id)
	}

	async fn stop(mut self) -> anyhow::Result<()> {
		if let Some(stop) = self.stop.take() {
			let _ = stop.send(());
		}
		tokio::time::timeout(WAIT, self.handle)
			.await
			.expect("server did not stop")
			.unwrap()
	}
}

fn ready_factory() -> ScriptedFactory {
	ScriptedFactory::new().with_initialize_events(vec![
		EngineEvent::AuthChallenge { qr: "qr-1".into() },
		EngineEvent::Authenticated,
		EngineEvent::ready("1999@c.us"),
	])
}

async fn next_frame(ws: &mut Client) -> Value {
	loop {
		let msg = tokio::time::timeout(WAIT, ws.next())
			.await
			.expect("timed out waiting for frame")
			.expect("socket closed")
			.expect("websocket error");
		if let Message::Text(text) = msg {
			return serde_json::from_str(text.as_str()).unwrap();
		}
	}
}

async fn send(ws: &mut Client, frame: Value) {
	ws.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Invalid frames are answered in order, so a round trip proves earlier
/// frames were handled.
async fn sync(ws: &mut Client) {
	send(ws, json!({"type": "ping"})).await;
	let reply = next_frame(ws).await;
	assert_eq!(reply["type"], "error");
}

/// Collects event frames until `kind` arrives for `session_id`.
async fn events_until(ws: &mut Client, session_id: &str, kind: &str) -> Vec<Value> {
	let mut seen = Vec::new();
	loop {
		let frame = next_frame(ws).await;
		if frame["type"] != "event" {
			continue;
		}
		let done = frame["sessionId"] == session_id && frame["kind"] == kind;
		seen.push(frame);
		if done {
			return seen;
		}
	}
}

#[tokio::test]
async fn connected_frame_carries_unique_id() {
	let server = TestServer::start(ScriptedFactory::new()).await;

	let (_a, first) = server.connect().await;
	let (_b, second) = server.connect().await;
	assert_ne!(first, second);

	server.stop().await.unwrap();
}

#[tokio::test]
async fn create_over_socket_streams_lifecycle() {
	let server = TestServer::start(ready_factory()).await;
	let (mut ws, _) = server.connect().await;

	send(&mut ws, json!({"type": "create_session", "sessionId": "s1"})).await;
	let accepted = next_frame(&mut ws).await;
	assert_eq!(accepted, json!({"type": "accepted", "sessionId": "s1"}));

	let events = events_until(&mut ws, "s1", "ready").await;
	let names: Vec<&str> = events.iter().map(|e| e["name"].as_str().unwrap()).collect();
	assert_eq!(names, vec!["qr-s1", "authenticated-s1", "ready-s1"]);
	assert_eq!(events[0]["payload"]["qr"], "qr-1");
	assert_eq!(events[2]["payload"]["account"]["id"], "1999@c.us");

	server.stop().await.unwrap();
}

#[tokio::test]
async fn invalid_frame_gets_error_and_connection_survives() {
	let server = TestServer::start(ready_factory()).await;
	let (mut ws, _) = server.connect().await;

	ws.send(Message::Text("not json".to_string())).await.unwrap();
	let error = next_frame(&mut ws).await;
	assert_eq!(error["type"], "error");
	assert_eq!(error["code"], "INVALID_INPUT");

	send(&mut ws, json!({"type": "create_session", "sessionId": ""})).await;
	let error = next_frame(&mut ws).await;
	assert_eq!(error["code"], "INVALID_INPUT");

	send(&mut ws, json!({"type": "create_session", "sessionId": "s1"})).await;
	assert_eq!(next_frame(&mut ws).await["type"], "accepted");

	server.stop().await.unwrap();
}

#[tokio::test]
async fn duplicate_create_publishes_already_exists() {
	let server = TestServer::start(ScriptedFactory::new()).await;
	let (mut ws, _) = server.connect().await;

	send(&mut ws, json!({"type": "create_session", "sessionId": "dup"})).await;
	assert_eq!(next_frame(&mut ws).await["type"], "accepted");

	send(&mut ws, json!({"type": "create_session", "sessionId": "dup"})).await;
	let events = events_until(&mut ws, "dup", "error").await;
	let error = events.last().unwrap();
	assert_eq!(error["payload"]["code"], "ALREADY_EXISTS");
	assert_eq!(server.factory.engines_for("dup"), 1);

	server.stop().await.unwrap();
}

#[tokio::test]
async fn subscribe_filters_by_session() {
	let server = TestServer::start(ready_factory()).await;
	let (mut only_a, _) = server.connect().await;
	let (mut everything, _) = server.connect().await;

	send(&mut only_a, json!({"type": "subscribe", "sessions": ["a"]})).await;
	sync(&mut only_a).await;

	server.manager.create_session("b".into()).unwrap();
	server.manager.create_session("a".into()).unwrap();

	let filtered = events_until(&mut only_a, "a", "ready").await;
	assert!(filtered.iter().all(|e| e["sessionId"] == "a"), "{filtered:?}");
	assert_eq!(filtered.len(), 3);

	let all = events_until(&mut everything, "a", "ready").await;
	assert!(all.iter().any(|e| e["sessionId"] == "b"));

	send(&mut only_a, json!({"type": "subscribe", "sessions": null})).await;
	sync(&mut only_a).await;
	server.manager.destroy_session("b").await.unwrap();
	let destroyed = events_until(&mut only_a, "b", "destroyed").await;
	assert_eq!(destroyed.last().unwrap()["name"], "destroyed-b");

	server.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_subscribers_and_destroys_sessions() {
	let server = TestServer::start(ready_factory()).await;
	let (mut ws, _) = server.connect().await;

	server.manager.create_session("s1".into()).unwrap();
	events_until(&mut ws, "s1", "ready").await;
	let engine = server.factory.engine("s1").unwrap();
	let manager = server.manager.clone();

	server.stop().await.unwrap();

	let closed = tokio::time::timeout(WAIT, async {
		loop {
			match ws.next().await {
				None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
				Some(Ok(_)) => {}
			}
		}
	})
	.await;
	assert!(closed.is_ok(), "socket stayed open after shutdown");
	assert_eq!(engine.destroy_calls(), 1);
	assert_eq!(manager.session_count(), 0);
}

#[tokio::test]
async fn binds_host_names() {
	let listener = server::bind("localhost", 0).await.unwrap();
	let addr = listener.local_addr().unwrap();
	assert!(addr.ip().is_loopback());

	let manager = SessionManager::new(Arc::new(ready_factory()), ManagerConfig::default());
	let (stop, stopped) = oneshot::channel::<()>();
	let handle = tokio::spawn(server::run(listener, manager, async move {
		let _ = stopped.await;
		Ok(())
	}));

	let (mut ws, _) = connect_async(format!("ws://{addr}/events")).await.unwrap();
	assert_eq!(next_frame(&mut ws).await["type"], "connected");

	stop.send(()).unwrap();
	handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn bind_failure_names_the_address() {
	let err = server::bind("not a host", 0).await.unwrap_err();
	assert!(err.to_string().contains("Failed to bind server to not a host:0"), "{err}");
}

//! Request/response correlation on top of the pipe transport.
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Connection::send_message`] with a method and params
//! 2. Connection assigns a unique id and parks a oneshot sender under it
//! 3. Request is queued for the writer task
//! 4. The dispatch loop reads a response, looks up the id and completes the oneshot
//! 5. Messages without an id are events and go to the event channel
//!
//! When the driver goes away, every parked request fails with
//! [`Error::ChannelClosed`] and the event channel closes.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use chatmux_protocol::driver::{ErrorPayload, Event, Message, Request};
use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::transport::{PipeTransport, PipeTransportReceiver, PipeTransportSender};

/// Pending request callbacks keyed by request id.
type CallbackMap = Arc<TokioMutex<HashMap<u32, oneshot::Sender<Result<Value>>>>>;

/// RAII guard removing the parked callback when a request future is dropped.
struct CancelGuard {
	id: u32,
	callbacks: CallbackMap,
	completed: bool,
}

impl CancelGuard {
	fn new(id: u32, callbacks: CallbackMap) -> Self {
		Self {
			id,
			callbacks,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}

		let id = self.id;
		let callbacks = Arc::clone(&self.callbacks);

		if let Ok(handle) = tokio::runtime::Handle::try_current() {
			handle.spawn(async move {
				if callbacks.lock().await.remove(&id).is_some() {
					debug!(target = "chatmux.runtime", id, "removed orphaned callback");
				}
			});
		}
	}
}

/// Future returned by [`Connection::send_message`].
struct ResponseFuture {
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Halves consumed by [`Connection::run`].
struct RunParts {
	sender: PipeTransportSender,
	receiver: PipeTransportReceiver,
	message_rx: mpsc::UnboundedReceiver<Value>,
	outbound_rx: mpsc::UnboundedReceiver<Value>,
	events_tx: mpsc::UnboundedSender<Event>,
}

/// Connection to one driver process.
pub struct Connection {
	last_id: AtomicU32,
	callbacks: CallbackMap,
	closed: AtomicBool,
	outbound_tx: mpsc::UnboundedSender<Value>,
	parts: TokioMutex<Option<RunParts>>,
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("last_id", &self.last_id.load(Ordering::Relaxed))
			.field("closed", &self.is_closed())
			.finish_non_exhaustive()
	}
}

impl Connection {
	/// Creates a connection over `transport`.
	///
	/// Returns the connection and the channel of driver events. The event
	/// channel closes when [`run`](Self::run) returns.
	pub fn new(transport: PipeTransport, message_rx: mpsc::UnboundedReceiver<Value>) -> (Self, mpsc::UnboundedReceiver<Event>) {
		let (sender, receiver) = transport.into_parts();
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (events_tx, events_rx) = mpsc::unbounded_channel();

		let connection = Self {
			last_id: AtomicU32::new(0),
			callbacks: Arc::new(TokioMutex::new(HashMap::new())),
			closed: AtomicBool::new(false),
			outbound_tx,
			parts: TokioMutex::new(Some(RunParts {
				sender,
				receiver,
				message_rx,
				outbound_rx,
				events_tx,
			})),
		};
		(connection, events_rx)
	}

	/// Sends a request and awaits its response.
	pub async fn send_message(&self, method: &str, params: Value) -> Result<Value> {
		let id = self.last_id.fetch_add(1, Ordering::SeqCst);

		let (tx, rx) = oneshot::channel();
		self.callbacks.lock().await.insert(id, tx);
		let guard = CancelGuard::new(id, Arc::clone(&self.callbacks));
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}

		let request = Request {
			id,
			method: method.to_string(),
			params,
		};
		debug!(target = "chatmux.runtime", id, method, "sending driver request");

		if self.outbound_tx.send(serde_json::to_value(&request)?).is_err() {
			error!(target = "chatmux.runtime", "outbound channel closed");
			return Err(Error::ChannelClosed);
		}

		ResponseFuture { rx, guard }.await
	}

	/// Like [`send_message`](Self::send_message) but fails with [`Error::Timeout`] after `timeout`.
	pub async fn send_message_with_timeout(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
		tokio::time::timeout(timeout, self.send_message(method, params))
			.await
			.map_err(|_| Error::Timeout(format!("{method} exceeded {}ms", timeout.as_millis())))?
	}

	/// Runs the read, write and dispatch loops until the driver closes stdout.
	///
	/// Can only be called once; later calls return [`Error::ProtocolError`].
	pub async fn run(self: &Arc<Self>) -> Result<()> {
		let RunParts {
			mut sender,
			mut receiver,
			mut message_rx,
			mut outbound_rx,
			events_tx,
		} = self
			.parts
			.lock()
			.await
			.take()
			.ok_or_else(|| Error::ProtocolError("connection already running".to_string()))?;

		let reader_handle = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				error!(target = "chatmux.runtime", error = %e, "transport read error");
			}
		});

		let writer_handle = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				if let Err(e) = sender.send(message).await {
					error!(target = "chatmux.runtime", error = %e, "transport write error");
					break;
				}
			}
		});

		while let Some(value) = message_rx.recv().await {
			match serde_json::from_value::<Message>(value) {
				Ok(message) => {
					if let Err(e) = self.dispatch(message, &events_tx).await {
						debug!(target = "chatmux.runtime", error = %e, "dispatch failed");
					}
				}
				Err(e) => error!(target = "chatmux.runtime", error = %e, "failed to parse driver message"),
			}
		}

		let _ = reader_handle.await;
		writer_handle.abort();
		self.closed.store(true, Ordering::SeqCst);
		self.fail_pending().await;
		Ok(())
	}

	/// Returns true once the driver has gone away.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	async fn dispatch(&self, message: Message, events_tx: &mpsc::UnboundedSender<Event>) -> Result<()> {
		match message {
			Message::Response(response) => {
				let callback = self
					.callbacks
					.lock()
					.await
					.remove(&response.id)
					.ok_or_else(|| Error::ProtocolError(format!("Cannot find request to respond: id={}", response.id)))?;

				let result = match response.error {
					Some(payload) => Err(remote_error(payload)),
					None => Ok(response.result.unwrap_or(Value::Null)),
				};
				let _ = callback.send(result);
				Ok(())
			}
			Message::Event(event) => {
				debug!(target = "chatmux.runtime", method = %event.method, "driver event");
				let _ = events_tx.send(event);
				Ok(())
			}
			Message::Unknown(value) => {
				debug!(target = "chatmux.runtime", message = %value, "unknown driver message ignored");
				Ok(())
			}
		}
	}

	async fn fail_pending(&self) {
		let pending: Vec<_> = self.callbacks.lock().await.drain().collect();
		for (id, callback) in pending {
			debug!(target = "chatmux.runtime", id, "failing pending request, driver gone");
			let _ = callback.send(Err(Error::ChannelClosed));
		}
	}
}

fn remote_error(payload: ErrorPayload) -> Error {
	Error::Remote {
		name: payload.name.unwrap_or_else(|| "Error".to_string()),
		message: payload.message,
	}
}

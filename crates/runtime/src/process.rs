//! Driver process management
//!
//! One driver process backs one session. The process speaks newline-delimited
//! JSON on stdin/stdout; stderr is inherited so driver diagnostics end up next
//! to the server's own logs.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::transport::PipeTransport;
use chatmux_protocol::driver::Event;

/// How to start a driver process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverCommand {
	pub program: PathBuf,
	pub args: Vec<String>,
	pub env: Vec<(String, String)>,
}

impl DriverCommand {
	pub fn new(program: impl Into<PathBuf>) -> Self {
		Self {
			program: program.into(),
			..Default::default()
		}
	}

	pub fn arg(mut self, arg: impl Into<String>) -> Self {
		self.args.push(arg.into());
		self
	}

	pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env.push((key.into(), value.into()));
		self
	}
}

/// A running driver process.
#[derive(Debug)]
pub struct DriverProcess {
	process: Child,
}

impl DriverProcess {
	/// Launches the driver and wires a [`Connection`] to its stdio.
	///
	/// The returned connection is not running yet; spawn
	/// [`Connection::run`] to start exchanging messages.
	///
	/// # Errors
	///
	/// Returns `Error::LaunchFailed` if the process cannot be spawned or exits immediately.
	pub async fn launch(command: &DriverCommand) -> Result<(Self, Arc<Connection>, mpsc::UnboundedReceiver<Event>)> {
		let mut cmd = Command::new(&command.program);
		cmd.args(&command.args)
			.envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.kill_on_drop(true);

		let mut child = cmd
			.spawn()
			.map_err(|e| Error::LaunchFailed(format!("Failed to spawn {}: {e}", command.program.display())))?;

		let stdin = child
			.stdin
			.take()
			.ok_or_else(|| Error::LaunchFailed("driver stdin unavailable".to_string()))?;
		let stdout = child
			.stdout
			.take()
			.ok_or_else(|| Error::LaunchFailed("driver stdout unavailable".to_string()))?;

		// Catch drivers that die on startup (bad path, missing runtime).
		tokio::time::sleep(Duration::from_millis(100)).await;
		match child.try_wait() {
			Ok(Some(status)) => {
				return Err(Error::LaunchFailed(format!("Driver exited immediately with status: {status}")));
			}
			Ok(None) => {}
			Err(e) => {
				return Err(Error::LaunchFailed(format!("Failed to check driver status: {e}")));
			}
		}

		debug!(target = "chatmux.runtime", program = %command.program.display(), pid = child.id(), "driver launched");

		let (transport, message_rx) = PipeTransport::new(stdin, stdout);
		let (connection, events) = Connection::new(transport, message_rx);
		Ok((Self { process: child }, Arc::new(connection), events))
	}

	/// OS process id, if the process is still running.
	pub fn id(&self) -> Option<u32> {
		self.process.id()
	}

	/// Kills the process and reaps it, waiting at most `grace`.
	pub async fn shutdown(mut self, grace: Duration) -> Result<()> {
		if let Ok(Some(_)) = self.process.try_wait() {
			return Ok(());
		}

		self.process
			.kill()
			.await
			.map_err(|e| Error::LaunchFailed(format!("Failed to kill driver: {e}")))?;

		match tokio::time::timeout(grace, self.process.wait()).await {
			Ok(Ok(_)) => Ok(()),
			Ok(Err(e)) => Err(Error::Io(e)),
			Err(_) => Err(Error::Timeout(format!("driver did not exit within {}ms", grace.as_millis()))),
		}
	}
}

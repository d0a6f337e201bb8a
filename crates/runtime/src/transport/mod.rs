//! Newline-delimited JSON transport over a pair of byte pipes.
//!
//! Each message is one JSON document followed by `\n`. Blank lines are
//! skipped. Lines that are not valid JSON (including non-UTF-8 bytes) or
//! longer than [`MAX_LINE_BYTES`] are logged and dropped; the read loop keeps
//! going with the next line.


use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Longest accepted line. Longer lines are discarded up to the next newline.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Bidirectional pipe transport (driver stdin + stdout).
pub struct PipeTransport {
	sender: PipeTransportSender,
	receiver: PipeTransportReceiver,
}

impl PipeTransport {
	/// Creates a transport writing to `writer` and reading from `reader`.
	///
	/// Returns the transport and the channel on which decoded inbound
	/// messages are delivered once the receiver is running.
	pub fn new<W, R>(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<Value>)
	where
		W: AsyncWrite + Send + Unpin + 'static,
		R: AsyncRead + Send + Unpin + 'static,
	{
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let transport = Self {
			sender: PipeTransportSender {
				writer: Box::new(writer),
			},
			receiver: PipeTransportReceiver {
				reader: BufReader::new(Box::new(reader)),
				message_tx,
				max_line: MAX_LINE_BYTES,
			},
		};
		(transport, message_rx)
	}

	/// Splits into independently owned halves.
	pub fn into_parts(self) -> (PipeTransportSender, PipeTransportReceiver) {
		(self.sender, self.receiver)
	}
}

/// Write half of a [`PipeTransport`].
pub struct PipeTransportSender {
	writer: BoxedWriter,
}

impl PipeTransportSender {
	/// Writes one message followed by a newline and flushes.
	pub async fn send(&mut self, message: Value) -> Result<()> {
		let mut line = serde_json::to_vec(&message)?;
		line.push(b'\n');
		self.writer
			.write_all(&line)
			.await
			.map_err(|e| Error::TransportError(format!("write failed: {e}")))?;
		self.writer
			.flush()
			.await
			.map_err(|e| Error::TransportError(format!("flush failed: {e}")))?;
		Ok(())
	}
}

/// Read half of a [`PipeTransport`].
pub struct PipeTransportReceiver {
	reader: BufReader<BoxedReader>,
	message_tx: mpsc::UnboundedSender<Value>,
	max_line: usize,
}

enum ReadLine {
	Line,
	/// Discarded line and its length in bytes.
	TooLong(usize),
	Eof,
}

impl PipeTransportReceiver {
	#[cfg(test)]
	pub(crate) fn with_max_line(mut self, max_line: usize) -> Self {
		self.max_line = max_line;
		self
	}

	/// Reads messages until EOF or until nobody listens anymore.
	///
	/// Only a failing read ends the loop with an error.
	pub async fn run(&mut self) -> Result<()> {
		let mut line = Vec::new();
		loop {
			match self.read_line(&mut line).await? {
				ReadLine::Eof => {
					debug!(target = "chatmux.runtime", "driver stdout closed");
					return Ok(());
				}
				ReadLine::TooLong(bytes) => {
					warn!(target = "chatmux.runtime", bytes, limit = self.max_line, "dropping oversized driver line");
					continue;
				}
				ReadLine::Line => {}
			}

			let trimmed = line.trim_ascii();
			if trimmed.is_empty() {
				continue;
			}

			match serde_json::from_slice::<Value>(trimmed) {
				Ok(message) => {
					if self.message_tx.send(message).is_err() {
						return Ok(());
					}
				}
				Err(err) => {
					warn!(
						target = "chatmux.runtime",
						error = %err,
						line = %String::from_utf8_lossy(trimmed),
						"ignoring malformed driver line"
					);
				}
			}
		}
	}

	/// Reads one line into `line` without its newline, keeping at most
	/// `max_line` bytes buffered.
	async fn read_line(&mut self, line: &mut Vec<u8>) -> Result<ReadLine> {
		line.clear();
		let mut dropped = 0usize;
		loop {
			let available = self
				.reader
				.fill_buf()
				.await
				.map_err(|e| Error::TransportError(format!("read failed: {e}")))?;
			if available.is_empty() {
				return Ok(match (dropped, line.is_empty()) {
					(0, true) => ReadLine::Eof,
					(0, false) => ReadLine::Line,
					(bytes, _) => ReadLine::TooLong(bytes),
				});
			}

			let newline = available.iter().position(|&b| b == b'\n');
			let chunk = &available[..newline.unwrap_or(available.len())];
			let chunk_len = chunk.len();
			if dropped == 0 && line.len() + chunk_len <= self.max_line {
				line.extend_from_slice(chunk);
			} else {
				dropped += line.len() + chunk_len;
				line.clear();
			}
			self.reader.consume(chunk_len + usize::from(newline.is_some()));

			if newline.is_some() {
				return Ok(if dropped == 0 { ReadLine::Line } else { ReadLine::TooLong(dropped) });
			}
		}
	}
}

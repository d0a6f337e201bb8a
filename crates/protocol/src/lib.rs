//! Wire types for the chatmux session server.
//!
//! This crate holds the serde-serializable shapes exchanged at every edge of
//! the system:
//!
//! - [`session`]: session identifiers, lifecycle status and listing views
//! - [`event`]: typed session event envelopes published by the hub
//! - [`push`]: frames exchanged over the push (WebSocket) channel
//! - [`api`]: request/response bodies of the HTTP API
//! - [`driver`]: newline-delimited JSON messages spoken with driver processes
//!
//! Types here are pure data. Behavior lives in `chatmux-core`.

pub mod api;
pub mod driver;
pub mod event;
pub mod push;
pub mod session;

pub use api::*;
pub use event::*;
pub use push::{ClientFrame, ServerFrame};
pub use session::*;

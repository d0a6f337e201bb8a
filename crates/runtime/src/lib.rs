//! chatmux runtime - driver process lifecycle and request correlation
//!
//! This crate provides the low-level plumbing for talking to an automation
//! driver process:
//!
//! - **Process**: launching and killing the driver child process
//! - **Transport**: newline-delimited JSON over the child's stdio pipes
//! - **Connection**: request/response correlation by id and event forwarding
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ chatmux-core │  DriverEngine (Engine trait impl)
//! └──────┬───────┘
//!        │ requests / events
//! ┌──────▼───────┐
//! │   runtime    │  This crate
//! │  ┌────────┐  │
//! │  │ Conn   │  │  id correlation
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Trans  │  │  NDJSON pipes
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Proc   │  │  child process
//! │  └────────┘  │
//! └──────────────┘
//! ```

pub mod connection;
pub mod error;
pub mod process;
pub mod transport;

pub use chatmux_protocol::driver::Event;
pub use connection::Connection;
pub use error::{Error, Result};
pub use process::{DriverCommand, DriverProcess};
pub use transport::{PipeTransport, PipeTransportReceiver, PipeTransportSender};

//! chatmux: multi-session messaging automation
//!
//! Keeps any number of independent messaging sessions alive at once, each one
//! backed by its own automation [`Engine`], and fans their lifecycle events out
//! to push subscribers.
//!
//! - [`Registry`]: session id to live [`Session`], atomic check-and-insert
//! - [`lifecycle`]: per-session state machine fed by engine events
//! - [`Hub`]: filtered fan-out of [`EventEnvelope`]s to subscribers
//! - [`SessionManager`]: the handle boundary adapters are given
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use chatmux::{DriverConfig, DriverEngineFactory, ManagerConfig, SessionManager};
//!
//! let factory = Arc::new(DriverEngineFactory::new(DriverConfig::new("chatmux-driver", "/var/lib/chatmux")));
//! let manager = SessionManager::new(factory, ManagerConfig::default());
//!
//! let mut events = manager.hub().connect();
//! manager.create_session("support".into())?;
//! while let Some(envelope) = events.receiver.recv().await {
//!     println!("{}", envelope.event_name());
//! }
//! ```

pub mod address;
pub mod driver;
pub mod engine;
pub mod error;
pub mod hub;
pub mod lifecycle;
pub mod manager;
pub mod registry;
pub mod session;
pub mod testing;

pub use address::{CANONICAL_SUFFIX, normalize_recipient};
pub use chatmux_protocol::{AccountInfo, EventEnvelope, EventKind, SessionId, SessionStatus};
pub use driver::{DriverConfig, DriverEngine, DriverEngineFactory};
pub use engine::{DisconnectReason, Engine, EngineEvent, EngineFactory, IncomingMessage};
pub use error::{Error, Result};
pub use hub::{ConnectionId, Hub, Subscription, SubscriptionFilter};
pub use lifecycle::LifecyclePolicy;
pub use manager::{ManagerConfig, SessionManager};
pub use registry::Registry;
pub use session::Session;

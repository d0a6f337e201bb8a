//! Event fan-out hub.
//!
//! Each subscriber owns an unbounded channel, so a publish never blocks and
//! never drops an event for a live subscriber; a slow subscriber only grows its
//! own queue. Subscribers whose receiving end is gone are pruned on the next
//! publish.

use std::collections::HashSet;

use chatmux_protocol::{EventEnvelope, SessionId};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Opaque subscriber identifier.
pub type ConnectionId = Uuid;

/// Which sessions a subscriber wants to hear about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SubscriptionFilter {
	#[default]
	All,
	Sessions(HashSet<SessionId>),
}

impl SubscriptionFilter {
	/// Builds a filter from an optional list; `None` means all sessions.
	pub fn from_sessions(sessions: Option<Vec<SessionId>>) -> Self {
		match sessions {
			None => SubscriptionFilter::All,
			Some(ids) => SubscriptionFilter::Sessions(ids.into_iter().collect()),
		}
	}

	pub fn matches(&self, session_id: &SessionId) -> bool {
		match self {
			SubscriptionFilter::All => true,
			SubscriptionFilter::Sessions(ids) => ids.contains(session_id),
		}
	}
}

struct Subscriber {
	filter: SubscriptionFilter,
	tx: mpsc::UnboundedSender<EventEnvelope>,
}

/// A registered subscriber's receiving side.
#[derive(Debug)]
pub struct Subscription {
	pub connection_id: ConnectionId,
	pub receiver: mpsc::UnboundedReceiver<EventEnvelope>,
}

/// Broadcasts session events to connected subscribers.
#[derive(Default)]
pub struct Hub {
	subscribers: DashMap<ConnectionId, Subscriber>,
}

impl Hub {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a subscriber receiving events of all sessions.
	pub fn connect(&self) -> Subscription {
		let connection_id = Uuid::new_v4();
		let (tx, receiver) = mpsc::unbounded_channel();
		self.subscribers.insert(
			connection_id,
			Subscriber {
				filter: SubscriptionFilter::All,
				tx,
			},
		);
		debug!(target = "chatmux.hub", %connection_id, "subscriber connected");
		Subscription { connection_id, receiver }
	}

	/// Replaces a subscriber's filter. Returns false for unknown ids.
	pub fn set_filter(&self, connection_id: ConnectionId, filter: SubscriptionFilter) -> bool {
		match self.subscribers.get_mut(&connection_id) {
			Some(mut subscriber) => {
				debug!(target = "chatmux.hub", %connection_id, ?filter, "subscriber filter updated");
				subscriber.filter = filter;
				true
			}
			None => false,
		}
	}

	pub fn disconnect(&self, connection_id: ConnectionId) {
		if self.subscribers.remove(&connection_id).is_some() {
			debug!(target = "chatmux.hub", %connection_id, "subscriber disconnected");
		}
	}

	/// Delivers `envelope` to every matching subscriber, returning how many
	/// received it.
	pub fn publish(&self, envelope: EventEnvelope) -> usize {
		let mut delivered = 0;
		let mut closed = Vec::new();

		for entry in self.subscribers.iter() {
			if !entry.filter.matches(&envelope.session_id) {
				continue;
			}
			if entry.tx.send(envelope.clone()).is_ok() {
				delivered += 1;
			} else {
				closed.push(*entry.key());
			}
		}

		for connection_id in closed {
			self.subscribers.remove(&connection_id);
			debug!(target = "chatmux.hub", %connection_id, "pruned closed subscriber");
		}

		trace!(
			target = "chatmux.hub",
			event = %envelope.event_name(),
			delivered,
			"event published"
		);
		delivered
	}

	pub fn subscriber_count(&self) -> usize {
		self.subscribers.len()
	}
}

impl std::fmt::Debug for Hub {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Hub").field("subscribers", &self.subscribers.len()).finish()
	}
}

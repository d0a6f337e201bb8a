//! Session lifecycle state machine.
//!
//! ```text
//! Created -> Initializing -> AwaitingAuth <-> (qr) -> Authenticated -> Ready
//!                 |               |                        |
//!                 +---------------+--------> Failed -> Destroyed
//! ```
//!
//! [`decide`] is the pure transition function. [`run`] is the per-session task
//! that feeds it engine events plus the outcome of `initialize()`, then applies
//! the resulting [`Step`]: status change, account bookkeeping, publication,
//! and removal with best-effort teardown.

use std::sync::Arc;

use chatmux_protocol::{
	AccountInfo, DisconnectedPayload, EventEnvelope, EventKind, InboundMessage, LifecycleErrorPayload, QrPayload,
	ReadyPayload, SessionStatus,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::address::normalize_recipient;
use crate::engine::EngineEvent;
use crate::error::codes;
use crate::manager::Shared;
use crate::session::{Session, Snapshot};

/// Tunables of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
	/// Challenges accepted before the session is given up.
	pub max_auth_challenges: u32,
}

impl Default for LifecyclePolicy {
	fn default() -> Self {
		Self { max_auth_challenges: 5 }
	}
}

/// Something that happened to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
	Engine(EngineEvent),
	/// `initialize()` returned an error.
	InitializeFailed(String),
	/// The engine's event channel closed while the session was still live.
	EngineClosed,
}

/// Error that ends a session, published and recorded in the failure log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
	pub code: &'static str,
	pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Outcome {
	#[default]
	Continue,
	/// Unregister and tear down. `Some` passes through `Failed` first.
	Remove(Option<Failure>),
}

/// Result of [`decide`]. The default value means "ignore the input".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
	pub next: Option<SessionStatus>,
	pub auth_attempts: Option<u32>,
	pub account: Option<AccountInfo>,
	pub publish: Option<(EventKind, Value)>,
	pub outcome: Outcome,
}

impl Step {
	pub fn is_ignored(&self) -> bool {
		*self == Step::default()
	}

	fn to(next: SessionStatus, kind: EventKind, payload: Value) -> Self {
		Step {
			next: Some(next),
			publish: Some((kind, payload)),
			..Default::default()
		}
	}

	fn publish(kind: EventKind, payload: Value) -> Self {
		Step {
			publish: Some((kind, payload)),
			..Default::default()
		}
	}

	fn fail(kind: EventKind, code: &'static str, message: String) -> Self {
		let payload = LifecycleErrorPayload {
			code: code.to_string(),
			message: message.clone(),
			status: SessionStatus::Failed,
		};
		Step {
			next: Some(SessionStatus::Destroyed),
			publish: Some((kind, to_value(payload))),
			outcome: Outcome::Remove(Some(Failure { code, message })),
			..Default::default()
		}
	}
}

fn to_value(payload: impl serde::Serialize) -> Value {
	serde_json::to_value(payload).unwrap_or(Value::Null)
}

/// Computes the transition for `input` given the session's current state.
pub fn decide(state: &Snapshot, input: Input, policy: &LifecyclePolicy) -> Step {
	use SessionStatus::*;

	let status = state.status;
	if status.is_terminal() {
		return Step::default();
	}

	match input {
		Input::Engine(EngineEvent::AuthChallenge { qr }) => match status {
			Initializing | AwaitingAuth => {
				let attempt = state.auth_attempts + 1;
				if attempt > policy.max_auth_challenges {
					return Step::fail(
						EventKind::Error,
						codes::AUTH_RETRIES_EXHAUSTED,
						format!("no authentication after {} challenges", policy.max_auth_challenges),
					);
				}
				Step {
					auth_attempts: Some(attempt),
					..Step::to(AwaitingAuth, EventKind::Qr, to_value(QrPayload { qr, attempt }))
				}
			}
			_ => Step::default(),
		},
		Input::Engine(EngineEvent::AuthChallengeExhausted) if status.is_pre_ready() => Step::fail(
			EventKind::Error,
			codes::AUTH_RETRIES_EXHAUSTED,
			"engine stopped issuing authentication challenges".to_string(),
		),
		Input::Engine(EngineEvent::Authenticated) => match status {
			Initializing | AwaitingAuth => Step::to(Authenticated, EventKind::Authenticated, json!({})),
			_ => Step::default(),
		},
		Input::Engine(EngineEvent::Ready { account }) => match status {
			Initializing | AwaitingAuth | Authenticated => Step {
				account: account.clone(),
				..Step::to(Ready, EventKind::Ready, to_value(ReadyPayload { account }))
			},
			_ => Step::default(),
		},
		Input::Engine(EngineEvent::AuthFailure { message }) if status.is_pre_ready() => {
			Step::fail(EventKind::AuthFailure, codes::AUTH_FAILURE, message)
		}
		Input::Engine(EngineEvent::Disconnected { reason }) => {
			let removed = reason.is_terminal();
			let payload = to_value(DisconnectedPayload {
				reason: reason.as_str().to_string(),
				removed,
			});
			if removed {
				Step {
					next: Some(Destroyed),
					publish: Some((EventKind::Disconnected, payload)),
					outcome: Outcome::Remove(None),
					..Default::default()
				}
			} else {
				Step::publish(EventKind::Disconnected, payload)
			}
		}
		Input::Engine(EngineEvent::Message(message)) => {
			let to = if message.to.trim().is_empty() {
				state.account.as_ref().map(|a| a.id.clone()).unwrap_or_default()
			} else {
				normalize_recipient(&message.to)
			};
			Step::publish(
				EventKind::Message,
				to_value(InboundMessage {
					id: message.id,
					from: message.from,
					to,
					body: message.body,
					timestamp: message.timestamp,
					account: state.account.clone(),
				}),
			)
		}
		Input::InitializeFailed(message) if status.is_pre_ready() => {
			Step::fail(EventKind::Error, codes::INITIALIZATION_FAILED, message)
		}
		Input::EngineClosed if status == Initializing => Step::fail(
			EventKind::Error,
			codes::INITIALIZATION_FAILED,
			"engine stopped during initialization".to_string(),
		),
		Input::EngineClosed => Step::fail(
			EventKind::Error,
			codes::ENGINE_CLOSED,
			format!("engine stopped unexpectedly while {status}"),
		),
		_ => Step::default(),
	}
}

/// Drives one session until it is removed or its engine goes quiet.
///
/// Moves the session to `Initializing`, starts `initialize()` and consumes
/// engine events concurrently. Before every transition the task checks that
/// its session is still the registered instance, so a session destroyed (or
/// replaced) under it is never touched again.
pub(crate) async fn run(shared: Arc<Shared>, session: Arc<Session>, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
	let policy = shared.config.policy();
	if !session.advance(SessionStatus::Initializing) {
		return;
	}

	let engine = Arc::clone(session.engine());
	let init = engine.initialize();
	tokio::pin!(init);

	let mut initialized = false;
	let mut events_open = true;

	while events_open || !initialized {
		let input = tokio::select! {
			biased;
			event = events.recv(), if events_open => match event {
				Some(event) => Input::Engine(event),
				None => {
					events_open = false;
					Input::EngineClosed
				}
			},
			result = &mut init, if !initialized => {
				initialized = true;
				match result {
					Ok(()) => {
						debug!(target = "chatmux.lifecycle", session_id = %session.id(), "engine initialized");
						continue;
					}
					Err(err) => Input::InitializeFailed(err.to_string()),
				}
			}
		};

		if !shared.registry.is_current(&session) {
			debug!(target = "chatmux.lifecycle", session_id = %session.id(), "session no longer registered, stopping");
			return;
		}

		let snapshot = session.snapshot();
		let step = decide(&snapshot, input, &policy);
		if step.is_ignored() {
			debug!(
				target = "chatmux.lifecycle",
				session_id = %session.id(),
				status = %snapshot.status,
				"event not valid in current state, ignored"
			);
			continue;
		}

		if !apply(&shared, &session, step).await {
			return;
		}
	}

	debug!(target = "chatmux.lifecycle", session_id = %session.id(), "lifecycle finished");
}

/// Applies `step`. Returns false once the session has been removed.
async fn apply(shared: &Shared, session: &Arc<Session>, step: Step) -> bool {
	if let Some(attempts) = step.auth_attempts {
		session.set_auth_attempts(attempts);
	}
	if step.account.is_some() {
		session.set_account(step.account);
	}

	match step.outcome {
		Outcome::Continue => {
			if let Some(next) = step.next {
				if session.advance(next) {
					info!(target = "chatmux.lifecycle", session_id = %session.id(), status = %next, "session status changed");
				}
			}
			if let Some((kind, payload)) = step.publish {
				shared.hub.publish(EventEnvelope::new(session.id().clone(), kind, payload));
			}
			true
		}
		Outcome::Remove(failure) => {
			if let Some(failure) = &failure {
				session.fail(&failure.message);
			}
			if !shared.registry.remove_if_current(session) {
				debug!(target = "chatmux.lifecycle", session_id = %session.id(), "session already removed");
				return false;
			}
			if let Some((kind, payload)) = step.publish {
				shared.hub.publish(EventEnvelope::new(session.id().clone(), kind, payload));
			}
			match failure {
				Some(failure) => {
					warn!(
						target = "chatmux.lifecycle",
						session_id = %session.id(),
						code = failure.code,
						error = %failure.message,
						"session failed, removing"
					);
					shared.record_failure(session.id(), failure.code, &failure.message);
				}
				None => info!(target = "chatmux.lifecycle", session_id = %session.id(), "session logged out, removing"),
			}
			shared.teardown(session).await;
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::{DisconnectReason, IncomingMessage};

	fn state(status: SessionStatus) -> Snapshot {
		Snapshot {
			status,
			auth_attempts: 0,
			account: None,
		}
	}

	fn policy(max: u32) -> LifecyclePolicy {
		LifecyclePolicy { max_auth_challenges: max }
	}

	fn qr(code: &str) -> Input {
		Input::Engine(EngineEvent::AuthChallenge { qr: code.into() })
	}

	#[test]
	fn first_challenge_moves_to_awaiting_auth() {
		let step = decide(&state(SessionStatus::Initializing), qr("abc"), &policy(5));
		assert_eq!(step.next, Some(SessionStatus::AwaitingAuth));
		assert_eq!(step.auth_attempts, Some(1));
		let (kind, payload) = step.publish.unwrap();
		assert_eq!(kind, EventKind::Qr);
		assert_eq!(payload, json!({"qr": "abc", "attempt": 1}));
		assert_eq!(step.outcome, Outcome::Continue);
	}

	#[test]
	fn challenge_beyond_limit_fails_session() {
		let mut current = state(SessionStatus::AwaitingAuth);
		current.auth_attempts = 2;
		let step = decide(&current, qr("abc"), &policy(2));

		let Outcome::Remove(Some(failure)) = &step.outcome else {
			panic!("expected removal with failure, got {:?}", step.outcome);
		};
		assert_eq!(failure.code, codes::AUTH_RETRIES_EXHAUSTED);
		let (kind, payload) = step.publish.unwrap();
		assert_eq!(kind, EventKind::Error);
		assert_eq!(payload["code"], "AUTH_RETRIES_EXHAUSTED");
		assert_eq!(payload["status"], "failed");
	}

	#[test]
	fn engine_exhaustion_fails_session() {
		let step = decide(
			&state(SessionStatus::AwaitingAuth),
			Input::Engine(EngineEvent::AuthChallengeExhausted),
			&policy(5),
		);
		assert!(matches!(step.outcome, Outcome::Remove(Some(Failure { code: codes::AUTH_RETRIES_EXHAUSTED, .. }))));
	}

	#[test]
	fn qr_after_ready_is_ignored() {
		let step = decide(&state(SessionStatus::Ready), qr("late"), &policy(5));
		assert!(step.is_ignored());
	}

	#[test]
	fn ready_records_account() {
		let step = decide(
			&state(SessionStatus::Authenticated),
			Input::Engine(EngineEvent::ready("1555@c.us")),
			&policy(5),
		);
		assert_eq!(step.next, Some(SessionStatus::Ready));
		assert_eq!(step.account.as_ref().map(|a| a.id.as_str()), Some("1555@c.us"));
		let (kind, payload) = step.publish.unwrap();
		assert_eq!(kind, EventKind::Ready);
		assert_eq!(payload["account"]["id"], "1555@c.us");
	}

	#[test]
	fn ready_may_skip_authenticated() {
		for status in [SessionStatus::Initializing, SessionStatus::AwaitingAuth] {
			let step = decide(&state(status), Input::Engine(EngineEvent::ready("x@c.us")), &policy(5));
			assert_eq!(step.next, Some(SessionStatus::Ready));
		}
	}

	#[test]
	fn authenticated_twice_is_ignored() {
		let step = decide(&state(SessionStatus::Authenticated), Input::Engine(EngineEvent::Authenticated), &policy(5));
		assert!(step.is_ignored());
	}

	#[test]
	fn auth_failure_before_ready_removes() {
		let step = decide(
			&state(SessionStatus::AwaitingAuth),
			Input::Engine(EngineEvent::AuthFailure {
				message: "bad credentials".into(),
			}),
			&policy(5),
		);
		assert_eq!(step.publish.as_ref().map(|(kind, _)| *kind), Some(EventKind::AuthFailure));
		assert!(matches!(step.outcome, Outcome::Remove(Some(Failure { code: codes::AUTH_FAILURE, .. }))));
	}

	#[test]
	fn auth_failure_after_ready_is_ignored() {
		let step = decide(
			&state(SessionStatus::Ready),
			Input::Engine(EngineEvent::AuthFailure { message: "late".into() }),
			&policy(5),
		);
		assert!(step.is_ignored());
	}

	#[test]
	fn logout_and_unpaired_remove_without_failure() {
		for reason in [DisconnectReason::Logout, DisconnectReason::Unpaired] {
			let step = decide(
				&state(SessionStatus::Ready),
				Input::Engine(EngineEvent::Disconnected { reason }),
				&policy(5),
			);
			assert_eq!(step.outcome, Outcome::Remove(None));
			let (_, payload) = step.publish.unwrap();
			assert_eq!(payload["removed"], true);
		}
	}

	#[test]
	fn other_disconnect_only_publishes() {
		let step = decide(
			&state(SessionStatus::Ready),
			Input::Engine(EngineEvent::Disconnected {
				reason: DisconnectReason::Other("NAVIGATION".into()),
			}),
			&policy(5),
		);
		assert_eq!(step.next, None);
		assert_eq!(step.outcome, Outcome::Continue);
		let (kind, payload) = step.publish.unwrap();
		assert_eq!(kind, EventKind::Disconnected);
		assert_eq!(payload, json!({"reason": "NAVIGATION", "removed": false}));
	}

	#[test]
	fn inbound_message_is_normalized_and_tagged() {
		let mut current = state(SessionStatus::Ready);
		current.account = Some(AccountInfo {
			id: "1999@c.us".into(),
			..Default::default()
		});
		let step = decide(
			&current,
			Input::Engine(EngineEvent::Message(IncomingMessage {
				id: Some("m1".into()),
				from: "1555@c.us".into(),
				to: "1999".into(),
				body: "hello".into(),
				timestamp: 1_700_000_000,
			})),
			&policy(5),
		);
		let (kind, payload) = step.publish.unwrap();
		assert_eq!(kind, EventKind::Message);
		assert_eq!(payload["to"], "1999@c.us");
		assert_eq!(payload["account"]["id"], "1999@c.us");
		assert_eq!(payload["body"], "hello");
	}

	#[test]
	fn initialize_failure_fails_pre_ready_session() {
		let step = decide(
			&state(SessionStatus::Initializing),
			Input::InitializeFailed("driver missing".into()),
			&policy(5),
		);
		assert!(matches!(
			step.outcome,
			Outcome::Remove(Some(Failure {
				code: codes::INITIALIZATION_FAILED,
				..
			}))
		));
	}

	#[test]
	fn closed_engine_fails_live_session() {
		let step = decide(&state(SessionStatus::Initializing), Input::EngineClosed, &policy(5));
		assert!(matches!(
			step.outcome,
			Outcome::Remove(Some(Failure {
				code: codes::INITIALIZATION_FAILED,
				..
			}))
		));

		for status in [SessionStatus::AwaitingAuth, SessionStatus::Authenticated, SessionStatus::Ready] {
			let step = decide(&state(status), Input::EngineClosed, &policy(5));
			assert_eq!(step.next, Some(SessionStatus::Destroyed));
			assert_eq!(step.publish.as_ref().map(|(kind, _)| *kind), Some(EventKind::Error));
			assert!(matches!(
				step.outcome,
				Outcome::Remove(Some(Failure {
					code: codes::ENGINE_CLOSED,
					..
				}))
			));
		}
		assert!(decide(&state(SessionStatus::Destroyed), Input::EngineClosed, &policy(5)).is_ignored());
	}

	#[test]
	fn terminal_sessions_ignore_everything() {
		let step = decide(&state(SessionStatus::Failed), Input::Engine(EngineEvent::Authenticated), &policy(5));
		assert!(step.is_ignored());
	}
}

//! Process-wide event bus.
//!
//! Collaborators (UI, display) react to lifecycle changes without polling.

use tokio::sync::broadcast;

use crate::lifecycle::Lifecycle;

/// One-shot events emitted by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
	/// A committed lifecycle transition.
	StateChanged {
		/// State before the transition.
		from: Lifecycle,
		/// State after the transition.
		to: Lifecycle,
	},
	/// A registration code became available for display.
	RegistrationCode {
		/// The 6-character code.
		code: String,
		/// ISO-8601 expiry.
		expires_at: String,
	},
	/// The registration code was cleared (success, cancel, or expiry).
	RegistrationCodeCleared,
}

/// Broadcast bus for [`AgentEvent`]s.
#[derive(Clone)]
pub struct EventBus {
	tx: broadcast::Sender<AgentEvent>,
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new()
	}
}

impl EventBus {
	/// Create a bus with a small buffer; slow subscribers lose old events.
	#[must_use]
	pub fn new() -> Self {
		let (tx, _) = broadcast::channel(32);
		Self { tx }
	}

	/// Emit an event to all current subscribers.
	pub fn emit(&self, event: AgentEvent) {
		let _ = self.tx.send(event);
	}

	/// Subscribe to future events.
	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
		self.tx.subscribe()
	}
}

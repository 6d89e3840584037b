//! Lifecycle states and the permitted transition set.

use serde::{Deserialize, Serialize};

/// Top-level lifecycle of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
	/// Not provisioning, not connected.
	Idle,
	/// Phase-A enrollment request in flight.
	Provisioning,
	/// Registration code on screen; credential polling active.
	ShowCode,
	/// Session initiated, waiting for the connected edge.
	Connecting,
	/// Broker session up.
	Connected,
	/// Broker session lost; reconnect pending or running.
	Disconnected,
	/// Credentials rejected repeatedly. Terminal until re-provisioning.
	RegistrationInvalid,
}

impl Lifecycle {
	/// Whether the edge `self -> to` is in the permitted transition table.
	#[must_use]
	pub fn permits(self, to: Lifecycle) -> bool {
		use Lifecycle::*;
		matches!(
			(self, to),
			(Idle, Provisioning)
				| (Provisioning, ShowCode)
				| (Provisioning, Idle)
				| (ShowCode, Idle)
				| (ShowCode, Connecting)
				| (Idle, Connecting)
				| (Connecting, Connected)
				| (Connecting, RegistrationInvalid)
				| (Connected, Disconnected)
				| (Disconnected, Connected)
				| (Disconnected, RegistrationInvalid)
				| (RegistrationInvalid, Provisioning)
		)
	}
}

impl std::fmt::Display for Lifecycle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::Idle => "idle",
			Self::Provisioning => "provisioning",
			Self::ShowCode => "show_code",
			Self::Connecting => "connecting",
			Self::Connected => "connected",
			Self::Disconnected => "disconnected",
			Self::RegistrationInvalid => "registration_invalid",
		};
		f.write_str(name)
	}
}

#[cfg(test)]
mod tests {
	use super::Lifecycle::*;

	#[test]
	fn permitted_edges() {
		assert!(Idle.permits(Provisioning));
		assert!(Provisioning.permits(ShowCode));
		assert!(ShowCode.permits(Connecting));
		assert!(Connecting.permits(Connected));
		assert!(Connected.permits(Disconnected));
		assert!(Disconnected.permits(Connected));
		assert!(RegistrationInvalid.permits(Provisioning));
	}

	#[test]
	fn rejected_edges() {
		assert!(!Idle.permits(Connected));
		assert!(!Connected.permits(Provisioning));
		assert!(!RegistrationInvalid.permits(Connecting));
		assert!(!Provisioning.permits(Connected));
	}
}

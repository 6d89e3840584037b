//! Client-side control plane of the Makapix picture-frame player.
//!
//! The agent enrolls the device with the cloud, maintains the authenticated
//! broker session, selects and materializes channels of artwork for local
//! display, and reports playback telemetry. This crate hosts the lifecycle
//! supervisor, the enrollment client, the watchdogs, and the composition
//! root; the session, correlation, and channel layers live in their own
//! crates.

pub mod commands;
pub mod config;
pub mod downloads;
pub mod events;
pub mod lifecycle;
pub mod platform;
pub mod provision;
pub mod runtime;
pub mod supervisor;

pub use commands::CommandDispatcher;
pub use config::{AgentConfig, ConfigError};
pub use events::{AgentEvent, EventBus};
pub use lifecycle::Lifecycle;
pub use provision::{
	CREDENTIAL_POLL_CAP, CREDENTIAL_POLL_PERIOD, CredentialOutcome, EnrollmentApi, EnrollmentError,
	HttpEnrollment,
};
pub use runtime::{AgentRuntime, RuntimeDeps};
pub use supervisor::{
	DISCONNECT_REINIT_THRESHOLD, DriverControl, RECONNECT_WATCHDOG_PERIOD, STABLE_UPTIME,
	Supervisor, SupervisorDeps,
};

#[cfg(test)]
mod tests;

//! Broker session management and RPC correlation for the Makapix player.
//!
//! # Purpose
//!
//! - Own the TLS-mutual-authenticated broker session: lifecycle, edge-only
//!   connection events, subscription-readiness gating, auth-failure
//!   quarantine, and the exponential-backoff reconnect loop.
//! - Overlay request/response semantics on the pub/sub transport with
//!   correlation ids, per-request timeouts, and bounded retries.
//! - Publish the periodic status heartbeat, decoupled from its timer.
//!
//! # Mental model
//!
//! - [`BusSession`] is the single owner of the transport link. Everything
//!   else observes it through subscriptions: connection edges go to edge
//!   subscribers, inbound publishes go to inbound subscribers. The
//!   correlator is just another inbound subscriber; there is no mutual
//!   ownership between the two.
//! - *Connected* means the transport session is up. *Ready* additionally
//!   means the broker acknowledged the response-filter subscription.
//!   Outgoing RPC waits for ready, never just connected.
//! - Session state lives behind one mutex held only around simple
//!   operations, never across I/O. Pump tasks carry a generation token and
//!   bail out when `deinit`/`init` has moved the session on without them.
//!
//! # Invariants
//!
//! 1. Connection edges are delivered exactly on transitions: one event per
//!    actual `false→true` / `true→false` flip, no duplicates.
//!    - Enforced in: `SessionInner::set_connected`
//!    - Tested by: `tests::edges_are_delivered_once_per_transition`
//! 2. A request is pending iff its correlation id is in the pending map and
//!    its completion has not been signalled; the entry is removed on every
//!    exit path of `publish_and_wait`.
//!    - Enforced in: `Correlator::publish_and_wait`
//!    - Tested by: `tests::publish_and_wait_roundtrip`,
//!      `tests::pending_entry_absent_after_timeout`
//! 3. After three consecutive authentication failures the session emits
//!    [`SessionEdge::AuthQuarantine`] and the reconnect loop exits.
//!    - Enforced in: `SessionInner::note_auth_failure`, `Reconnector::run`
//!    - Tested by: `tests::auth_quarantine_after_three_failures`
//! 4. At most one reconnect task is alive; spawning while one runs is a
//!    no-op.
//!    - Enforced in: `Reconnector::spawn`
//!    - Tested by: `tests::reconnect_spawn_is_idempotent`

mod correlator;
mod error;
mod health;
mod reconnect;
mod session;
mod status;
pub mod transport;

pub use correlator::{ATTEMPT_TIMEOUT, Correlator, MAX_ATTEMPTS, READY_WAIT};
pub use error::{RequestError, RequestResult, TransportError};
pub use health::LinkHealthProbe;
pub use reconnect::{RECONNECT_DELAY_MAX, RECONNECT_DELAY_MIN, Reconnector};
pub use session::{
	AUTH_QUARANTINE_THRESHOLD, BusSession, InboundMessage, SessionConfig, SessionEdge,
};
pub use status::{STATUS_PERIOD, StatusInfo, StatusPublisher};
pub use transport::{
	BrokerConnector, BrokerLink, ConnectParams, LinkEvent, LinkHandle, LinkProbe, Qos, SharedBus,
	TlsMaterial,
};

#[cfg(test)]
mod tests;

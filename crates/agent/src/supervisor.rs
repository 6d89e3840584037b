//! Lifecycle supervisor.
//!
//! # Purpose
//!
//! - Own the top-level state machine of the agent and validate every
//!   transition against the permitted edge set.
//! - Drive the two-phase enrollment flow, including cooperative
//!   cancellation and the credential-installation protocol.
//! - Dispatch connection edges from the session into state transitions,
//!   reconnect spawning, and the consecutive-disconnect recovery path.
//!
//! # Mental model
//!
//! - The supervisor is the single writer of the lifecycle value. Everything
//!   else observes transitions through the event bus.
//! - Long-lived tasks exist exactly once each: the credential poller is
//!   created entering `ShowCode` and exits on any state change; the
//!   reconnect task is created on `Disconnected` and re-spawned by a ≥30 s
//!   watchdog if it died; driver-level recovery runs on one dedicated task
//!   fed by a channel, never inline in an edge callback.
//!
//! # Invariants
//!
//! 1. Illegal lifecycle edges are ignored, never applied.
//!    - Enforced in: `Inner::transition`
//!    - Tested by: `tests::illegal_transitions_are_ignored`
//! 2. A non-empty registration code implies an active polling task (or a
//!    transition is in flight); cancellation always clears the code.
//!    - Enforced in: `Inner::finish_provisioning`, `Supervisor::cancel_provisioning`
//!    - Tested by: `tests::cancel_clears_code_and_returns_to_idle`
//! 3. Credential installation happens in the fixed order: preserve address,
//!    clear, write certs, resolve address, write identity.
//!    - Enforced in: `Inner::install_credentials`
//!    - Tested by: `tests::cold_provisioning_reaches_connected`

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use makapix_bus::{BusSession, Reconnector, SessionConfig, SessionEdge, TlsMaterial};
use makapix_proto::{BrokerAddr, PlayerKey, ProvisionRequest};
use makapix_store::CredentialStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AgentConfig;
use crate::events::{AgentEvent, EventBus};
use crate::lifecycle::Lifecycle;
use crate::provision::{
	CREDENTIAL_POLL_CAP, CREDENTIAL_POLL_PERIOD, CredentialOutcome, EnrollmentApi,
};

/// Watchdog period for re-spawning a dropped reconnect task.
pub const RECONNECT_WATCHDOG_PERIOD: Duration = Duration::from_secs(30);
/// Consecutive disconnects that trigger a driver-level reinit.
pub const DISCONNECT_REINIT_THRESHOLD: u32 = 10;
/// A connection surviving this long resets the disconnect streak.
pub const STABLE_UPTIME: Duration = Duration::from_secs(60);

/// Driver-level recovery hook (network stack reinit).
#[async_trait]
pub trait DriverControl: Send + Sync {
	/// Re-initialize the network driver.
	async fn reinit(&self);
}

/// Everything the supervisor collaborates with.
pub struct SupervisorDeps {
	/// Persistent identity and mTLS material.
	pub store: CredentialStore,
	/// The broker session.
	pub session: BusSession,
	/// Reconnect task owner for the session.
	pub reconnector: Reconnector,
	/// Enrollment HTTP API.
	pub enrollment: Arc<dyn EnrollmentApi>,
	/// Driver recovery hook.
	pub driver: Arc<dyn DriverControl>,
	/// Process-wide event bus.
	pub events: EventBus,
	/// Static configuration.
	pub config: AgentConfig,
	/// Flag the link-health probe consults to stand down.
	pub provisioning_active: Arc<AtomicBool>,
}

/// Top-level state machine of the agent.
#[derive(Clone)]
pub struct Supervisor {
	inner: Arc<Inner>,
}

struct Inner {
	deps: SupervisorDeps,
	state: Mutex<SupState>,
	cancel_provisioning: AtomicBool,
	disconnect_streak: AtomicU32,
	recovery_tx: mpsc::UnboundedSender<()>,
}

struct SupState {
	lifecycle: Lifecycle,
	registration_code: Option<(String, String)>,
	provision_task: Option<JoinHandle<()>>,
	connected_at: Option<tokio::time::Instant>,
}

impl Supervisor {
	/// Build a supervisor and spawn its dedicated recovery task.
	#[must_use]
	pub fn new(deps: SupervisorDeps) -> Self {
		let (recovery_tx, mut recovery_rx) = mpsc::unbounded_channel::<()>();
		let driver = deps.driver.clone();
		tokio::spawn(async move {
			while recovery_rx.recv().await.is_some() {
				tracing::warn!("running driver-level recovery");
				driver.reinit().await;
			}
		});

		Self {
			inner: Arc::new(Inner {
				deps,
				state: Mutex::new(SupState {
					lifecycle: Lifecycle::Idle,
					registration_code: None,
					provision_task: None,
					connected_at: None,
				}),
				cancel_provisioning: AtomicBool::new(false),
				disconnect_streak: AtomicU32::new(0),
				recovery_tx,
			}),
		}
	}

	/// Spawn the edge dispatcher and the reconnect watchdog.
	pub fn start(&self) {
		let inner = self.inner.clone();
		let mut edges = inner.deps.session.subscribe_edges();
		tokio::spawn(async move {
			while let Some(edge) = edges.recv().await {
				inner.handle_edge(edge);
			}
		});

		let inner = self.inner.clone();
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(RECONNECT_WATCHDOG_PERIOD);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			interval.tick().await;
			loop {
				interval.tick().await;
				inner.watchdog_tick();
			}
		});
	}

	/// Current lifecycle value.
	#[must_use]
	pub fn lifecycle(&self) -> Lifecycle {
		self.inner.state.lock().unwrap().lifecycle
	}

	/// Registration code and expiry, while one is active.
	#[must_use]
	pub fn registration_code(&self) -> Option<(String, String)> {
		self.inner.state.lock().unwrap().registration_code.clone()
	}

	/// Begin enrollment. Permitted from `Idle` and `RegistrationInvalid`.
	pub fn start_provisioning(&self) {
		let from = self.lifecycle();
		if !from.permits(Lifecycle::Provisioning) {
			tracing::warn!(%from, "start_provisioning ignored");
			return;
		}

		// Tear down any session first; re-provisioning also clears the
		// quarantine counter.
		self.inner.deps.session.disconnect();
		self.inner.deps.session.reset_auth_failures();
		self.inner.cancel_provisioning.store(false, Ordering::SeqCst);
		self.inner
			.deps
			.provisioning_active
			.store(true, Ordering::SeqCst);

		if !self.inner.transition(Lifecycle::Provisioning) {
			return;
		}

		let inner = self.inner.clone();
		let task = tokio::spawn(async move {
			inner.run_provisioning().await;
		});
		self.inner.state.lock().unwrap().provision_task = Some(task);
	}

	/// Cancel an in-flight enrollment.
	pub fn cancel_provisioning(&self) {
		let from = self.lifecycle();
		if !matches!(from, Lifecycle::Provisioning | Lifecycle::ShowCode) {
			return;
		}
		self.inner.cancel_provisioning.store(true, Ordering::SeqCst);
		self.inner.clear_registration_code();
		self.inner.transition(Lifecycle::Idle);
		self.inner
			.deps
			.provisioning_active
			.store(false, Ordering::SeqCst);
	}

	/// Initiate the session when the store holds a full registration.
	pub async fn connect_if_registered(&self) {
		if self.lifecycle() != Lifecycle::Idle {
			return;
		}
		if !self.inner.deps.store.is_registered() {
			tracing::info!("not registered; staying idle");
			return;
		}
		let Some(config) = self.inner.session_config_from_store() else {
			tracing::warn!("stored credentials unreadable; staying idle");
			return;
		};

		self.inner.transition(Lifecycle::Connecting);
		self.inner.deps.session.init(config);
		if let Err(e) = self.inner.deps.session.connect().await {
			tracing::warn!(error = %e, "initial connect failed, handing over to reconnect");
			self.inner.deps.reconnector.spawn();
		}
	}

	/// One watchdog cycle; exposed for tests.
	#[doc(hidden)]
	pub fn watchdog_tick(&self) {
		self.inner.watchdog_tick();
	}
}

impl Inner {
	/// Apply a transition if the edge is permitted. Emits the change event.
	fn transition(&self, to: Lifecycle) -> bool {
		let from = {
			let mut state = self.state.lock().unwrap();
			let from = state.lifecycle;
			if !from.permits(to) {
				tracing::warn!(%from, %to, "transition rejected");
				return false;
			}
			state.lifecycle = to;
			from
		};
		tracing::info!(%from, %to, "lifecycle transition");
		self.deps.events.emit(AgentEvent::StateChanged { from, to });
		true
	}

	fn handle_edge(&self, edge: SessionEdge) {
		match edge {
			SessionEdge::Connected => {
				self.state.lock().unwrap().connected_at = Some(tokio::time::Instant::now());
				self.transition(Lifecycle::Connected);
			}
			SessionEdge::Disconnected => {
				if self.transition(Lifecycle::Disconnected) {
					self.deps.reconnector.spawn();

					// A connection that held for a while breaks the streak;
					// rapid connect/drop cycles accumulate toward reinit.
					let stable = {
						let state = self.state.lock().unwrap();
						state
							.connected_at
							.is_some_and(|at| at.elapsed() >= STABLE_UPTIME)
					};
					if stable {
						self.disconnect_streak.store(1, Ordering::SeqCst);
						return;
					}
					let streak = self.disconnect_streak.fetch_add(1, Ordering::SeqCst) + 1;
					if streak >= DISCONNECT_REINIT_THRESHOLD {
						self.disconnect_streak.store(0, Ordering::SeqCst);
						// Recovery runs on its own task, never here.
						let _ = self.recovery_tx.send(());
					}
				}
			}
			SessionEdge::AuthQuarantine => {
				self.transition(Lifecycle::RegistrationInvalid);
			}
		}
	}

	fn watchdog_tick(&self) {
		let disconnected = self.state.lock().unwrap().lifecycle == Lifecycle::Disconnected;
		if disconnected && !self.deps.reconnector.is_alive() && self.deps.reconnector.spawn() {
			tracing::info!("watchdog re-spawned reconnect task");
		}
	}

	fn cancelled(&self) -> bool {
		self.cancel_provisioning.load(Ordering::SeqCst)
	}

	fn clear_registration_code(&self) {
		let had_code = {
			let mut state = self.state.lock().unwrap();
			state.registration_code.take().is_some()
		};
		if had_code {
			self.deps.events.emit(AgentEvent::RegistrationCodeCleared);
		}
	}

	fn finish_provisioning(&self, next: Lifecycle) {
		self.clear_registration_code();
		self.transition(next);
		self.deps.provisioning_active.store(false, Ordering::SeqCst);
	}

	fn session_config_from_store(&self) -> Option<SessionConfig> {
		let store = &self.deps.store;
		Some(SessionConfig {
			player_key: store.player_key().ok()?,
			addr: store.broker_addr().ok()?,
			tls: TlsMaterial {
				ca_pem: store.ca().ok()?,
				cert_pem: store.cert().ok()?,
				key_pem: store.key().ok()?,
			},
		})
	}

	/// Phase A plus the phase-B poll loop.
	async fn run_provisioning(self: Arc<Self>) {
		let request = ProvisionRequest {
			model: self.deps.config.device_model.clone(),
			firmware_version: self.deps.config.firmware_version.clone(),
		};

		let response = match self.deps.enrollment.provision(&request).await {
			Ok(response) => response,
			Err(e) => {
				tracing::warn!(error = %e, "provisioning request failed");
				self.finish_provisioning(Lifecycle::Idle);
				return;
			}
		};

		if self.cancelled() {
			self.finish_provisioning(Lifecycle::Idle);
			return;
		}

		// Phase-A persistence: identity before certs. The window where the
		// device has an identity but no certs is tolerated; re-provisioning
		// overwrites it.
		let addr = BrokerAddr {
			host: response.mqtt_host.clone(),
			port: response.mqtt_port,
		};
		if let Err(e) = self.deps.store.put_identity(&response.player_key, &addr) {
			tracing::warn!(error = %e, "identity persistence failed");
			self.finish_provisioning(Lifecycle::Idle);
			return;
		}

		{
			let mut state = self.state.lock().unwrap();
			state.registration_code = Some((
				response.registration_code.clone(),
				response.expires_at.clone(),
			));
		}
		self.transition(Lifecycle::ShowCode);
		self.deps.events.emit(AgentEvent::RegistrationCode {
			code: response.registration_code.clone(),
			expires_at: response.expires_at.clone(),
		});

		self.poll_credentials(&response.player_key).await;
	}

	async fn poll_credentials(&self, key: &PlayerKey) {
		for _ in 0..CREDENTIAL_POLL_CAP {
			tokio::time::sleep(CREDENTIAL_POLL_PERIOD).await;
			if self.cancelled() {
				self.deps.provisioning_active.store(false, Ordering::SeqCst);
				return;
			}

			match self.deps.enrollment.credentials(key).await {
				Ok(CredentialOutcome::Ready(creds)) => {
					if self.cancelled() {
						self.deps.provisioning_active.store(false, Ordering::SeqCst);
						return;
					}
					if let Err(e) = self.install_credentials(key, &creds) {
						tracing::warn!(error = %e, "credential installation failed");
						self.finish_provisioning(Lifecycle::Idle);
						return;
					}
					if self.cancelled() {
						self.finish_provisioning(Lifecycle::Idle);
						return;
					}

					self.clear_registration_code();
					self.transition(Lifecycle::Connecting);
					self.deps.provisioning_active.store(false, Ordering::SeqCst);

					if let Some(config) = self.session_config_from_store() {
						self.deps.session.init(config);
						if let Err(e) = self.deps.session.connect().await {
							tracing::warn!(error = %e, "post-provisioning connect failed");
							self.deps.reconnector.spawn();
						}
					}
					return;
				}
				Ok(CredentialOutcome::Pending) => {}
				Err(e) => {
					// Transient; keep polling until the cap.
					tracing::debug!(error = %e, "credential poll failed");
				}
			}
		}

		tracing::info!("credential polling expired");
		self.finish_provisioning(Lifecycle::Idle);
	}

	/// The installation protocol: preserve address, clear, certs, address
	/// precedence (response over preserved over default), identity.
	fn install_credentials(
		&self,
		key: &PlayerKey,
		creds: &makapix_proto::CredentialsResponse,
	) -> makapix_store::Result<()> {
		let store = &self.deps.store;
		let preserved = store.broker_addr().ok();

		if store.has_player_key() || store.has_certs() {
			store.clear()?;
		}
		store.put_certs(&creds.ca_pem, &creds.cert_pem, &creds.key_pem)?;

		let host = creds
			.mqtt_host
			.clone()
			.or_else(|| preserved.as_ref().map(|a| a.host.clone()))
			.unwrap_or_else(|| self.deps.config.default_broker_host.clone());
		let port = creds
			.mqtt_port
			.or(preserved.as_ref().map(|a| a.port))
			.unwrap_or(self.deps.config.default_broker_port);

		store.put_identity(key, &BrokerAddr { host, port })
	}
}

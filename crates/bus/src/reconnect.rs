//! Exponential-backoff reconnect loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use makapix_store::CredentialStore;

use crate::error::TransportError;
use crate::session::{AUTH_QUARANTINE_THRESHOLD, BusSession, SessionConfig};
use crate::transport::{LinkProbe, TlsMaterial};

/// Initial reconnect delay.
pub const RECONNECT_DELAY_MIN: Duration = Duration::from_secs(5);
/// Reconnect delay cap.
pub const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(60);

/// Reconnect task owner.
///
/// At most one reconnect task is alive per reconnector; [`Reconnector::spawn`]
/// while one runs is a no-op. The task exits on success, on quarantine, or
/// when the store no longer holds credentials.
#[derive(Clone)]
pub struct Reconnector {
	inner: Arc<ReconnectorInner>,
}

struct ReconnectorInner {
	session: BusSession,
	store: CredentialStore,
	probe: Arc<dyn LinkProbe>,
	alive: AtomicBool,
}

impl Reconnector {
	/// Build a reconnector for a session.
	#[must_use]
	pub fn new(session: BusSession, store: CredentialStore, probe: Arc<dyn LinkProbe>) -> Self {
		Self {
			inner: Arc::new(ReconnectorInner {
				session,
				store,
				probe,
				alive: AtomicBool::new(false),
			}),
		}
	}

	/// Spawn the reconnect task. Returns false if one is already running.
	pub fn spawn(&self) -> bool {
		if self
			.inner
			.alive
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.is_err()
		{
			return false;
		}
		let inner = self.inner.clone();
		tokio::spawn(async move {
			inner.run().await;
			inner.alive.store(false, Ordering::SeqCst);
		});
		true
	}

	/// Whether a reconnect task is currently alive.
	#[must_use]
	pub fn is_alive(&self) -> bool {
		self.inner.alive.load(Ordering::SeqCst)
	}
}

impl ReconnectorInner {
	async fn run(&self) {
		let mut delay = RECONNECT_DELAY_MIN;
		loop {
			tokio::time::sleep(delay).await;

			if self.session.is_connected() {
				return;
			}
			if self.session.auth_failures() >= AUTH_QUARANTINE_THRESHOLD {
				tracing::warn!("reconnect loop exiting: auth quarantine");
				return;
			}
			// No link-layer address yet; try again without noise.
			if self.probe.local_ip().is_none() {
				continue;
			}

			let Some(config) = self.load_config() else {
				tracing::info!("reconnect loop exiting: no stored credentials");
				return;
			};

			self.session.deinit();
			self.session.init(config);
			match self.session.connect().await {
				Ok(()) => {
					tracing::info!("reconnected to broker");
					return;
				}
				Err(TransportError::AuthRejected) => {
					if self.session.auth_failures() >= AUTH_QUARANTINE_THRESHOLD {
						tracing::warn!("reconnect loop exiting: auth quarantine");
						return;
					}
					delay = bump(delay);
				}
				Err(e) => {
					tracing::warn!(error = %e, delay_secs = delay.as_secs(), "reconnect attempt failed");
					delay = bump(delay);
				}
			}
		}
	}

	fn load_config(&self) -> Option<SessionConfig> {
		let player_key = self.store.player_key().ok()?;
		let addr = self.store.broker_addr().ok()?;
		let tls = TlsMaterial {
			ca_pem: self.store.ca().ok()?,
			cert_pem: self.store.cert().ok()?,
			key_pem: self.store.key().ok()?,
		};
		Some(SessionConfig {
			player_key,
			addr,
			tls,
		})
	}
}

fn bump(delay: Duration) -> Duration {
	(delay * 2).min(RECONNECT_DELAY_MAX)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_doubles_and_caps() {
		let mut d = RECONNECT_DELAY_MIN;
		d = bump(d);
		assert_eq!(d, Duration::from_secs(10));
		d = bump(d);
		assert_eq!(d, Duration::from_secs(20));
		d = bump(d);
		assert_eq!(d, Duration::from_secs(40));
		d = bump(d);
		assert_eq!(d, Duration::from_secs(60));
		d = bump(d);
		assert_eq!(d, Duration::from_secs(60));
	}
}

//! Link-health watchdog.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::session::BusSession;
use crate::transport::LinkProbe;

/// Probe period.
pub const HEALTH_PROBE_PERIOD: Duration = Duration::from_secs(120);

/// Name resolved as the periodic reachability check.
pub const HEALTH_PROBE_NAME: &str = "api.makapix.net";

/// Periodic DNS probe that forces a disconnect when the link looks dead.
///
/// A forced disconnect produces the normal disconnected edge, which sends
/// the supervisor down the reconnect path. The probe is inert until the
/// session has connected once, and while provisioning holds the network.
pub struct LinkHealthProbe {
	task: JoinHandle<()>,
}

impl LinkHealthProbe {
	/// Spawn the probe task.
	pub fn spawn(
		session: BusSession,
		probe: Arc<dyn LinkProbe>,
		provisioning_active: Arc<AtomicBool>,
	) -> Self {
		let task = tokio::spawn(async move {
			let mut interval = tokio::time::interval(HEALTH_PROBE_PERIOD);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				interval.tick().await;
				if !session.ever_connected() {
					continue;
				}
				if provisioning_active.load(Ordering::SeqCst) {
					continue;
				}
				if !session.is_connected() {
					continue;
				}
				if !probe.resolve(HEALTH_PROBE_NAME) {
					tracing::warn!(name = HEALTH_PROBE_NAME, "link-health probe failed, forcing disconnect");
					session.disconnect();
				}
			}
		});
		Self { task }
	}
}

impl Drop for LinkHealthProbe {
	fn drop(&mut self) {
		self.task.abort();
	}
}

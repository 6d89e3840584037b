//! Periodic status heartbeat.
//!
//! The 30 s timer and the publisher are decoupled through a notification:
//! the timer task only gives the permit, and publication happens on the
//! publisher task, never from a timer callback.

use std::sync::Arc;
use std::time::Duration;

use makapix_proto::{StatusHeartbeat, topics};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::session::BusSession;
use crate::transport::{Qos, SharedBus};

/// Heartbeat period.
pub const STATUS_PERIOD: Duration = Duration::from_secs(30);

/// Agent-side facts carried in every heartbeat.
pub trait StatusInfo: Send + Sync {
	/// Firmware version string.
	fn firmware_version(&self) -> String;
	/// Channel currently adopted for playback, if any.
	fn current_channel(&self) -> Option<String>;
}

/// Handle to the status publisher task pair.
pub struct StatusPublisher {
	notify: Arc<Notify>,
	timer: JoinHandle<()>,
	publisher: JoinHandle<()>,
}

impl StatusPublisher {
	/// Spawn the timer and publisher tasks.
	pub fn spawn(
		session: BusSession,
		shared_bus: Arc<dyn SharedBus>,
		info: Arc<dyn StatusInfo>,
	) -> Self {
		let notify = Arc::new(Notify::new());

		let timer_notify = notify.clone();
		let timer = tokio::spawn(async move {
			let mut interval = tokio::time::interval(STATUS_PERIOD);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				interval.tick().await;
				timer_notify.notify_one();
			}
		});

		let publisher_notify = notify.clone();
		let started = Instant::now();
		let publisher = tokio::spawn(async move {
			loop {
				publisher_notify.notified().await;
				publish_once(&session, shared_bus.as_ref(), info.as_ref(), started);
			}
		});

		Self {
			notify,
			timer,
			publisher,
		}
	}

	/// Request an immediate out-of-cycle heartbeat.
	pub fn publish_now(&self) {
		self.notify.notify_one();
	}
}

impl Drop for StatusPublisher {
	fn drop(&mut self) {
		self.timer.abort();
		self.publisher.abort();
	}
}

fn publish_once(
	session: &BusSession,
	shared_bus: &dyn SharedBus,
	info: &dyn StatusInfo,
	started: Instant,
) {
	if !session.is_connected() {
		return;
	}
	if shared_bus.is_locked() {
		tracing::debug!(holder = ?shared_bus.holder(), "shared bus locked, skipping status");
		return;
	}
	let Some(player_key) = session.player_key() else {
		return;
	};

	let heartbeat = StatusHeartbeat {
		player_key: player_key.clone(),
		firmware_version: info.firmware_version(),
		uptime_secs: started.elapsed().as_secs(),
		current_channel: info.current_channel(),
	};
	let Ok(payload) = serde_json::to_vec(&heartbeat) else {
		return;
	};

	if let Err(e) = session.publish(&topics::status_topic(&player_key), &payload, Qos::AtMostOnce) {
		tracing::debug!(error = %e, "status publish failed");
	}
}

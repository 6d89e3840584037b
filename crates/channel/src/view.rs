//! View telemetry tracker.
//!
//! A swap of the displayed asset arms the tracker; a 1 s tick advances it.
//! The first view event fires after 5 s on screen, then one every 30 s.
//! Only vault-backed assets are reported.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use makapix_proto::{PostId, ViewIntent};
use tokio::task::JoinHandle;

use crate::collab::{AppState, ViewRecord, ViewSink};
use crate::vault::VAULT_DIR;

/// Seconds on screen before the first view event.
pub const FIRST_VIEW_SECS: u64 = 5;
/// Period of subsequent view events.
pub const VIEW_PERIOD_SECS: u64 = 30;

struct Tracked {
	post_id: PostId,
	filepath: PathBuf,
	channel: String,
	identifier: Option<String>,
	intent: ViewIntent,
	elapsed: u64,
}

/// Emits timed playback-engagement events for the asset on screen.
#[derive(Clone)]
pub struct ViewTracker {
	inner: Arc<Inner>,
}

struct Inner {
	sink: Arc<dyn ViewSink>,
	app_state: Arc<dyn AppState>,
	/// Read-and-cleared on a genuine swap; set by show-artwork.
	intent_flag: Arc<AtomicBool>,
	vault_prefix: PathBuf,
	state: Mutex<Option<Tracked>>,
}

impl ViewTracker {
	/// Build a tracker. `asset_root` is the directory containing the vault.
	#[must_use]
	pub fn new(
		sink: Arc<dyn ViewSink>,
		app_state: Arc<dyn AppState>,
		intent_flag: Arc<AtomicBool>,
		asset_root: &Path,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				sink,
				app_state,
				intent_flag,
				vault_prefix: asset_root.join(VAULT_DIR),
				state: Mutex::new(None),
			}),
		}
	}

	/// Signal that the displayed asset changed.
	///
	/// Redundant signals for the asset already being tracked are ignored and
	/// do not reset the timer. Assets outside the vault stop tracking.
	pub fn on_swap(
		&self,
		post_id: PostId,
		filepath: &Path,
		channel: &str,
		identifier: Option<&str>,
	) {
		let mut state = self.inner.state.lock().unwrap();

		if !filepath.starts_with(&self.inner.vault_prefix) {
			// Local-storage assets are not reported.
			*state = None;
			return;
		}

		if let Some(tracked) = state.as_ref()
			&& tracked.post_id == post_id
			&& tracked.filepath == filepath
		{
			return;
		}

		let intent = if self.inner.intent_flag.swap(false, Ordering::SeqCst) {
			ViewIntent::Artwork
		} else {
			ViewIntent::Channel
		};
		*state = Some(Tracked {
			post_id,
			filepath: filepath.to_path_buf(),
			channel: channel.to_string(),
			identifier: identifier.map(str::to_string),
			intent,
			elapsed: 0,
		});
	}

	/// Advance the timer by one second, emitting when due.
	pub fn tick(&self) {
		let record = {
			let mut state = self.inner.state.lock().unwrap();
			let Some(tracked) = state.as_mut() else {
				return;
			};
			tracked.elapsed += 1;
			if !due(tracked.elapsed) {
				return;
			}
			ViewRecord {
				post_id: tracked.post_id,
				intent: tracked.intent,
				play_order: self.inner.app_state.play_order(),
				channel: tracked.channel.clone(),
				identifier: tracked.identifier.clone(),
				ack_requested: tracked.intent == ViewIntent::Artwork,
			}
		};
		self.inner.sink.emit(record);
	}

	/// Spawn the 1 s ticker task. The task stops when the handle drops.
	pub fn spawn_ticker(&self) -> ViewTickerHandle {
		let tracker = self.clone();
		let task = tokio::spawn(async move {
			let mut interval = tokio::time::interval(Duration::from_secs(1));
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			// The first tick of a tokio interval fires immediately.
			interval.tick().await;
			loop {
				interval.tick().await;
				tracker.tick();
			}
		});
		ViewTickerHandle { task }
	}
}

/// A view event is due at 5 s and then every 30 s (35, 65, 95, ...).
fn due(elapsed: u64) -> bool {
	elapsed >= FIRST_VIEW_SECS && (elapsed - FIRST_VIEW_SECS) % VIEW_PERIOD_SECS == 0
}

/// Abort-on-drop handle to the ticker task.
pub struct ViewTickerHandle {
	task: JoinHandle<()>,
}

impl Drop for ViewTickerHandle {
	fn drop(&mut self) {
		self.task.abort();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cadence_is_5_then_every_30() {
		let hits: Vec<u64> = (1..=100).filter(|&s| due(s)).collect();
		assert_eq!(hits, vec![5, 35, 65, 95]);
	}
}

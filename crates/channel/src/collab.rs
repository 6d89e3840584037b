//! Collaborator seams the orchestration layer depends on.
//!
//! These mirror the capabilities of the display stack and downloader without
//! pulling their implementations into the core. Production wires the real
//! subsystems; tests use the fakes in [`test_helpers`].

use std::path::PathBuf;
use std::sync::Arc;

use makapix_proto::{
	ArtworkPost, ChannelId, ChannelKind, ChannelMessage, PlayOrder, PostId, ViewIntent,
};

use crate::handle::Channel;

/// The artwork decoder and framebuffer renderer, seen from the core.
pub trait PlaybackEngine: Send + Sync {
	/// Adopt a channel: the engine starts pulling asset references from it.
	fn adopt(&self, channel: Arc<dyn Channel>);
	/// Drop the engine's reference to the adopted channel.
	fn clear_channel(&self);
	/// Ask the engine to swap to the next asset when it can.
	fn request_swap(&self);
	/// Whether the engine already has a decoded animation ready to show.
	fn is_animation_ready(&self) -> bool;
	/// Terminal graceful degradation: play from local storage.
	fn fall_back_to_local(&self);
}

/// On-screen channel messages.
pub trait RenderSurface: Send + Sync {
	/// Post (or clear, with [`ChannelMessage::None`]) a channel message.
	/// `detail` carries the display name or an elapsed-seconds hint.
	fn set_channel_message(&self, message: ChannelMessage, detail: Option<String>);
}

/// The asset download queue.
#[async_trait::async_trait]
pub trait DownloadManager: Send + Sync {
	/// Make sure the first `n` missing assets of a channel are queued.
	fn ensure_downloads_ahead(&self, channel: &ChannelId, n: usize);
	/// Cancel all in-flight downloads for a channel.
	fn cancel_channel(&self, channel: &ChannelId);
	/// Whether downloads are in flight.
	fn is_busy(&self) -> bool;
	/// Fetch one artwork to its vault path, reporting percent progress.
	async fn download_artwork(
		&self,
		post: &ArtworkPost,
		progress: Box<dyn Fn(u8) + Send>,
	) -> std::io::Result<PathBuf>;
}

/// Application-level state the orchestrator reads and persists.
pub trait AppState: Send + Sync {
	/// Globally configured play order.
	fn play_order(&self) -> PlayOrder;
	/// Persist the last selected channel for next boot.
	fn set_last_channel(&self, kind: &ChannelKind, identifier: Option<&str>);
}

/// The play scheduler's completion signal for background refreshes.
pub trait SchedulerSignal: Send + Sync {
	/// A channel's index has been re-fetched.
	fn channel_refreshed(&self, channel: &ChannelId);
}

/// A view event as the tracker produces it; the sink attaches the player
/// identity and publishes.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRecord {
	/// Post on screen.
	pub post_id: PostId,
	/// What put it there.
	pub intent: ViewIntent,
	/// Global play order at emission time.
	pub play_order: PlayOrder,
	/// Channel name, or `"sdcard"`.
	pub channel: String,
	/// Channel identifier when the channel has one.
	pub identifier: Option<String>,
	/// Whether the cloud should acknowledge.
	pub ack_requested: bool,
}

/// Outlet for view telemetry.
pub trait ViewSink: Send + Sync {
	/// Emit one view event.
	fn emit(&self, record: ViewRecord);
}

/// Test doubles for the collaborator seams.
#[doc(hidden)]
pub mod test_helpers {
	use std::sync::Mutex;
	use std::sync::atomic::{AtomicBool, Ordering};

	use super::*;

	/// Playback engine that records adoption and swap calls.
	#[derive(Default)]
	pub struct FakePlayback {
		/// Currently adopted channel.
		pub adopted: Mutex<Option<Arc<dyn Channel>>>,
		/// Number of swap requests.
		pub swaps: Mutex<u32>,
		/// Number of clear calls.
		pub clears: Mutex<u32>,
		/// Scripted answer for `is_animation_ready`.
		pub animation_ready: AtomicBool,
		/// Whether the engine fell back to local storage.
		pub local_fallback: AtomicBool,
	}

	impl PlaybackEngine for FakePlayback {
		fn adopt(&self, channel: Arc<dyn Channel>) {
			*self.adopted.lock().unwrap() = Some(channel);
		}

		fn clear_channel(&self) {
			*self.adopted.lock().unwrap() = None;
			*self.clears.lock().unwrap() += 1;
		}

		fn request_swap(&self) {
			*self.swaps.lock().unwrap() += 1;
		}

		fn is_animation_ready(&self) -> bool {
			self.animation_ready.load(Ordering::SeqCst)
		}

		fn fall_back_to_local(&self) {
			self.local_fallback.store(true, Ordering::SeqCst);
		}
	}

	/// Render surface that records every message.
	#[derive(Default)]
	pub struct FakeSurface {
		/// Messages in posting order.
		pub messages: Mutex<Vec<(ChannelMessage, Option<String>)>>,
	}

	impl FakeSurface {
		/// Most recent message.
		pub fn last(&self) -> Option<ChannelMessage> {
			self.messages.lock().unwrap().last().map(|(m, _)| *m)
		}
	}

	impl RenderSurface for FakeSurface {
		fn set_channel_message(&self, message: ChannelMessage, detail: Option<String>) {
			self.messages.lock().unwrap().push((message, detail));
		}
	}

	/// Download manager that records calls and writes files on demand.
	#[derive(Default)]
	pub struct FakeDownloads {
		/// `ensure_downloads_ahead` calls.
		pub ensured: Mutex<Vec<(ChannelId, usize)>>,
		/// `cancel_channel` calls.
		pub cancelled: Mutex<Vec<ChannelId>>,
	}

	#[async_trait::async_trait]
	impl DownloadManager for FakeDownloads {
		fn ensure_downloads_ahead(&self, channel: &ChannelId, n: usize) {
			self.ensured.lock().unwrap().push((channel.clone(), n));
		}

		fn cancel_channel(&self, channel: &ChannelId) {
			self.cancelled.lock().unwrap().push(channel.clone());
		}

		fn is_busy(&self) -> bool {
			false
		}

		async fn download_artwork(
			&self,
			post: &ArtworkPost,
			progress: Box<dyn Fn(u8) + Send>,
		) -> std::io::Result<PathBuf> {
			progress(100);
			Ok(PathBuf::from(format!("/vault/{}", post.storage_key)))
		}
	}

	/// App state with a configurable play order.
	pub struct FakeAppState {
		/// Play order returned to callers.
		pub order: Mutex<PlayOrder>,
		/// Recorded last-channel persistences.
		pub last_channel: Mutex<Vec<(ChannelKind, Option<String>)>>,
	}

	impl Default for FakeAppState {
		fn default() -> Self {
			Self {
				order: Mutex::new(PlayOrder::Original),
				last_channel: Mutex::new(Vec::new()),
			}
		}
	}

	impl AppState for FakeAppState {
		fn play_order(&self) -> PlayOrder {
			*self.order.lock().unwrap()
		}

		fn set_last_channel(&self, kind: &ChannelKind, identifier: Option<&str>) {
			self.last_channel
				.lock()
				.unwrap()
				.push((kind.clone(), identifier.map(str::to_string)));
		}
	}

	/// Scheduler signal recorder.
	#[derive(Default)]
	pub struct FakeScheduler {
		/// Channels signalled as refreshed.
		pub refreshed: Mutex<Vec<ChannelId>>,
	}

	impl SchedulerSignal for FakeScheduler {
		fn channel_refreshed(&self, channel: &ChannelId) {
			self.refreshed.lock().unwrap().push(channel.clone());
		}
	}

	/// View sink recorder.
	#[derive(Default)]
	pub struct FakeViewSink {
		/// Emitted records in order.
		pub records: Mutex<Vec<ViewRecord>>,
	}

	impl ViewSink for FakeViewSink {
		fn emit(&self, record: ViewRecord) {
			self.records.lock().unwrap().push(record);
		}
	}
}

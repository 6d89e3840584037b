//! Serialized channel switching with preemption and fallback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use makapix_bus::LinkProbe;
use makapix_proto::{ArtworkPost, ChannelId, ChannelKind, ChannelMessage};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::collab::{AppState, DownloadManager, PlaybackEngine, RenderSurface};
use crate::error::SwitchError;
use crate::handle::{Channel, ChannelFactory, SingleAssetChannel};

/// Items requested from the download queue when a channel has no assets.
pub const PREFETCH_AHEAD: usize = 16;
/// Cap on the first-playable-asset wait.
pub const FIRST_ASSET_WAIT: Duration = Duration::from_secs(60);
/// Poll period within the first-asset wait.
pub const FIRST_ASSET_POLL: Duration = Duration::from_millis(500);

// 4 polls × 500 ms = one UI refresh every 2 s.
const UI_REFRESH_POLLS: u32 = 4;
const ERROR_MESSAGE_HOLD: Duration = Duration::from_secs(5);

/// A channel switch request as written into the pending slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchRequest {
	/// Kind of channel to switch to.
	pub kind: ChannelKind,
	/// Identifier for user/hashtag channels.
	pub identifier: Option<String>,
}

impl SwitchRequest {
	fn target(&self) -> ChannelId {
		self.kind.channel_id(self.identifier.as_deref())
	}

	fn display_name(&self) -> String {
		self.kind.display_name(self.identifier.as_deref())
	}
}

/// Reconstruct a switch request from a stable channel id.
fn request_for_id(id: &ChannelId) -> Option<SwitchRequest> {
	let raw = id.as_str();
	let (kind, identifier) = match raw {
		"all" => (ChannelKind::All, None),
		"promoted" => (ChannelKind::Promoted, None),
		_ => {
			if let Some(name) = raw.strip_prefix("user/") {
				(ChannelKind::User, Some(name.to_string()))
			} else if let Some(tag) = raw.strip_prefix("hashtag/") {
				(ChannelKind::Hashtag, Some(tag.to_string()))
			} else {
				return None;
			}
		}
	};
	Some(SwitchRequest { kind, identifier })
}

/// Everything the orchestrator collaborates with.
pub struct OrchestratorDeps {
	/// Creates channel handles.
	pub factory: Arc<dyn ChannelFactory>,
	/// The display stack.
	pub playback: Arc<dyn PlaybackEngine>,
	/// On-screen channel messages.
	pub surface: Arc<dyn RenderSurface>,
	/// The asset download queue.
	pub downloads: Arc<dyn DownloadManager>,
	/// Play-order setting and last-channel persistence.
	pub app_state: Arc<dyn AppState>,
	/// Link-layer probe (UI messages are only useful when the link is up).
	pub probe: Arc<dyn LinkProbe>,
	/// View-intent flag shared with the view tracker.
	pub intent_flag: Arc<AtomicBool>,
}

/// Accepts switch requests from any task and runs them serially.
#[derive(Clone)]
pub struct ChannelOrchestrator {
	inner: Arc<Inner>,
}

struct Inner {
	deps: OrchestratorDeps,
	state: Mutex<OrchState>,
	/// Monotonic abort flag; set by preemption, cleared by the switch task.
	abort: AtomicBool,
	wake: Notify,
	show_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct OrchState {
	current: Option<ChannelId>,
	loading: Option<ChannelId>,
	previous: Option<ChannelId>,
	adopted: Option<Arc<dyn Channel>>,
	/// Single-slot pending request; `Some` is the "has request" flag.
	pending: Option<SwitchRequest>,
}

enum SwitchStep {
	Done,
	Preempted,
	Fallback(SwitchRequest),
	Sdcard,
}

enum FirstAsset {
	Ready,
	Preempted,
	TimedOut,
}

impl ChannelOrchestrator {
	/// Build an orchestrator. [`ChannelOrchestrator::run`] must be spawned
	/// exactly once for requests to be serviced.
	#[must_use]
	pub fn new(deps: OrchestratorDeps) -> Self {
		Self {
			inner: Arc::new(Inner {
				deps,
				state: Mutex::new(OrchState::default()),
				abort: AtomicBool::new(false),
				wake: Notify::new(),
				show_task: Mutex::new(None),
			}),
		}
	}

	/// Request a switch. Callable from any task; returns immediately.
	///
	/// Identical targets collapse; a request arriving while another switch
	/// is loading preempts it and will be serviced next.
	pub fn request_channel_switch(&self, kind: ChannelKind, identifier: Option<&str>) {
		let request = SwitchRequest {
			kind,
			identifier: identifier.map(str::to_string),
		};
		let target = request.target();

		let loading = {
			let mut state = self.inner.state.lock().unwrap();
			if state.loading.as_ref() == Some(&target) {
				// Already loading exactly this channel.
				return;
			}
			state.pending = Some(request);
			state.loading.is_some()
		};

		if loading {
			self.inner.abort.store(true, Ordering::SeqCst);
		} else {
			self.inner.wake.notify_one();
		}
	}

	/// The switch task body. Spawn once; never returns.
	pub async fn run(&self) {
		loop {
			self.inner.wake.notified().await;
			while let Some(request) = self.inner.take_pending() {
				// The drained request is the one the abort was raised for.
				self.inner.abort.store(false, Ordering::SeqCst);
				match self.inner.execute(request).await {
					Ok(()) => {}
					Err(SwitchError::Preempted) => {
						// The pending slot carries the newer request; loop.
					}
				}
			}
		}
	}

	/// Show a single artwork now, outside normal channel playback.
	///
	/// Cancels any in-flight show-artwork task, downloads the file, and
	/// submits a direct swap with the intentional flag set.
	pub fn show_artwork(&self, post: ArtworkPost) {
		let inner = self.inner.clone();
		let mut slot = self.inner.show_task.lock().unwrap();
		if let Some(task) = slot.take() {
			task.abort();
		}
		*slot = Some(tokio::spawn(async move {
			inner.show_artwork_task(post).await;
		}));
	}

	/// Stable id of the adopted channel, if any.
	#[must_use]
	pub fn current_channel_id(&self) -> Option<ChannelId> {
		self.inner.state.lock().unwrap().current.clone()
	}

	/// Whether a switch is mid-flight.
	#[must_use]
	pub fn is_loading(&self) -> bool {
		self.inner.state.lock().unwrap().loading.is_some()
	}

	/// Name and identifier of the adopted channel, for telemetry.
	#[must_use]
	pub fn adopted_channel_info(&self) -> Option<(String, Option<String>)> {
		let state = self.inner.state.lock().unwrap();
		let adopted = state.adopted.as_ref()?;
		Some((adopted.channel_id().to_string(), adopted.identifier()))
	}
}

impl Inner {
	fn take_pending(&self) -> Option<SwitchRequest> {
		self.state.lock().unwrap().pending.take()
	}

	fn preempted(&self) -> bool {
		self.abort.load(Ordering::SeqCst) || self.state.lock().unwrap().pending.is_some()
	}

	/// Run one request plus its fallback chain.
	async fn execute(&self, request: SwitchRequest) -> Result<(), SwitchError> {
		let mut request = request;
		loop {
			match self.switch_once(&request).await {
				SwitchStep::Done => return Ok(()),
				SwitchStep::Preempted => return Err(SwitchError::Preempted),
				SwitchStep::Fallback(next) => {
					tracing::info!(channel = %next.target(), "falling back to previous channel");
					request = next;
				}
				SwitchStep::Sdcard => {
					self.fall_back_to_sdcard();
					return Ok(());
				}
			}
		}
	}

	async fn switch_once(&self, request: &SwitchRequest) -> SwitchStep {
		let target = request.target();
		let name = request.display_name();

		// Same channel already adopted: restart playback, skip the refresh.
		let restart = {
			let state = self.state.lock().unwrap();
			(state.current.as_ref() == Some(&target))
				.then(|| state.adopted.clone())
				.flatten()
		};
		if let Some(adopted) = restart {
			adopted.start_playback(self.deps.app_state.play_order());
			self.deps.playback.request_swap();
			return SwitchStep::Done;
		}

		// Record previous, raise the loading flags, detach the old handle.
		let (old, cancel_downloads) = {
			let mut state = self.state.lock().unwrap();
			let cancel = state
				.current
				.clone()
				.filter(|current| *current != target);
			state.previous = state.current.clone();
			state.loading = Some(target.clone());
			(state.adopted.take(), cancel)
		};
		if let Some(prior) = cancel_downloads {
			self.deps.downloads.cancel_channel(&prior);
		}
		if let Some(old) = old {
			// Clear the engine's reference before destroying to avoid the
			// engine pulling from a dead handle.
			self.deps.playback.clear_channel();
			old.destroy().await;
		}

		let handle = self.deps.factory.create(&request.kind, request.identifier.as_deref());
		self.state.lock().unwrap().current = Some(target.clone());

		if let Err(e) = handle.load().await {
			tracing::warn!(channel = %target, error = %e, "channel load failed");
			self.deps
				.surface
				.set_channel_message(ChannelMessage::Error, Some(name.clone()));
			tokio::time::sleep(ERROR_MESSAGE_HOLD).await;
			self.dispose_loading(&handle).await;
			if self.state.lock().unwrap().pending.is_some() {
				return SwitchStep::Preempted;
			}
			return SwitchStep::Sdcard;
		}

		if self.preempted() {
			self.dispose_loading(&handle).await;
			return SwitchStep::Preempted;
		}

		let stats = handle.stats();
		if stats.local_available == 0 {
			match self
				.wait_first_asset(&handle, &target, &name, stats.index_len)
				.await
			{
				FirstAsset::Ready => {}
				FirstAsset::Preempted => return SwitchStep::Preempted,
				FirstAsset::TimedOut => {
					self.deps
						.surface
						.set_channel_message(ChannelMessage::Error, Some(name.clone()));
					tokio::time::sleep(ERROR_MESSAGE_HOLD).await;
					self.dispose_loading(&handle).await;

					// Fallback priority: pending request, previous channel,
					// then local storage.
					if self.state.lock().unwrap().pending.is_some() {
						return SwitchStep::Preempted;
					}
					let previous = self.state.lock().unwrap().previous.take();
					if let Some(previous) = previous
						&& previous != target
						&& let Some(fallback) = request_for_id(&previous)
					{
						return SwitchStep::Fallback(fallback);
					}
					return SwitchStep::Sdcard;
				}
			}
		}

		handle.start_playback(self.deps.app_state.play_order());

		// Adoption: the engine starts pulling from the handle; the
		// orchestrator stays responsible for destroying it on replacement.
		{
			let mut state = self.state.lock().unwrap();
			state.adopted = Some(handle.clone());
			state.loading = None;
		}
		self.deps.playback.adopt(handle);
		self.deps.playback.request_swap();
		self.deps
			.surface
			.set_channel_message(ChannelMessage::None, None);
		self.deps
			.app_state
			.set_last_channel(&request.kind, request.identifier.as_deref());

		tracing::info!(channel = %target, "channel switch complete");
		SwitchStep::Done
	}

	/// Poll until one asset of the channel exists locally.
	async fn wait_first_asset(
		&self,
		handle: &Arc<dyn Channel>,
		target: &ChannelId,
		name: &str,
		index_len: usize,
	) -> FirstAsset {
		self.deps
			.downloads
			.ensure_downloads_ahead(target, PREFETCH_AHEAD);
		if self.deps.probe.local_ip().is_some() {
			let message = if index_len == 0 {
				ChannelMessage::Loading
			} else {
				ChannelMessage::Downloading
			};
			self.deps
				.surface
				.set_channel_message(message, Some(name.to_string()));
		}

		let polls = (FIRST_ASSET_WAIT.as_millis() / FIRST_ASSET_POLL.as_millis()) as u32;
		for poll in 1..=polls {
			tokio::time::sleep(FIRST_ASSET_POLL).await;

			if self.preempted() {
				self.dispose_loading(handle).await;
				return FirstAsset::Preempted;
			}
			if self.deps.playback.is_animation_ready() {
				return FirstAsset::Ready;
			}
			let stats = handle.stats();
			if stats.local_available > 0 {
				return FirstAsset::Ready;
			}

			if poll % UI_REFRESH_POLLS == 0 {
				let elapsed = poll / 2;
				if self.deps.probe.local_ip().is_some() {
					let message = if stats.index_len == 0 {
						ChannelMessage::Loading
					} else {
						ChannelMessage::Downloading
					};
					self.deps
						.surface
						.set_channel_message(message, Some(format!("{name} ({elapsed}s)")));
				}
				self.deps
					.downloads
					.ensure_downloads_ahead(target, PREFETCH_AHEAD);
			}
		}
		FirstAsset::TimedOut
	}

	/// Dispose a handle that never reached adoption and reset the flags.
	async fn dispose_loading(&self, handle: &Arc<dyn Channel>) {
		handle.destroy().await;
		{
			let mut state = self.state.lock().unwrap();
			state.current = None;
			state.loading = None;
		}
		self.abort.store(false, Ordering::SeqCst);
	}

	/// Terminal graceful degradation to local storage.
	fn fall_back_to_sdcard(&self) {
		tracing::warn!("falling back to local storage");
		{
			let mut state = self.state.lock().unwrap();
			state.current = None;
			state.loading = None;
			state.adopted = None;
		}
		self.deps.playback.clear_channel();
		self.deps.playback.fall_back_to_local();
		self.deps
			.surface
			.set_channel_message(ChannelMessage::None, None);
	}

	async fn show_artwork_task(&self, post: ArtworkPost) {
		let progress = Box::new(|pct: u8| {
			tracing::debug!(pct, "artwork download progress");
		});
		let path = match self.deps.downloads.download_artwork(&post, progress).await {
			Ok(path) => path,
			Err(e) => {
				tracing::warn!(post_id = post.post_id.0, error = %e, "artwork download failed");
				self.deps
					.surface
					.set_channel_message(ChannelMessage::Error, None);
				return;
			}
		};

		let single: Arc<dyn Channel> = Arc::new(SingleAssetChannel::new(post, path));
		let old = {
			let mut state = self.state.lock().unwrap();
			// The "artwork" sentinel keeps a later channel switch from
			// reading this as a same-channel no-op.
			state.current = Some(ChannelKind::Artwork.channel_id(None));
			state.adopted.replace(single.clone())
		};
		if let Some(old) = old {
			self.deps.playback.clear_channel();
			old.destroy().await;
		}

		self.deps.intent_flag.store(true, Ordering::SeqCst);
		self.deps.playback.adopt(single);
		self.deps.playback.request_swap();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_for_id_parses_known_shapes() {
		assert_eq!(
			request_for_id(&ChannelId("all".into())),
			Some(SwitchRequest {
				kind: ChannelKind::All,
				identifier: None
			})
		);
		assert_eq!(
			request_for_id(&ChannelId("user/kury".into())),
			Some(SwitchRequest {
				kind: ChannelKind::User,
				identifier: Some("kury".into())
			})
		);
		assert_eq!(request_for_id(&ChannelId("artwork".into())), None);
	}
}

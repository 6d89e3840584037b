//! Channel selection and playback-side orchestration for the Makapix player.
//!
//! # Purpose
//!
//! - Define the channel capability set ([`Channel`]) and its two
//!   implementations: the server-indexed [`RemoteChannel`] and the
//!   transient [`SingleAssetChannel`].
//! - Run channel switches serially with cooperative preemption, first-asset
//!   waiting, and graceful fallback ([`ChannelOrchestrator`]).
//! - Refresh channel indices in the background without switching
//!   ([`RefreshCoordinator`]).
//! - Emit timed playback-engagement telemetry ([`ViewTracker`]).
//!
//! # Mental model
//!
//! - Exactly one channel handle is *adopted* at any time; adoption hands the
//!   handle to the playback engine and makes the orchestrator responsible
//!   for destroying whatever was adopted before.
//! - Switches are totally ordered: the switch task drains a single-slot
//!   pending request, runs one switch to completion or preemption, and only
//!   then looks at the slot again. A newer request preempts via a monotonic
//!   abort flag that the switch procedure tests at every suspension point.
//! - The index may be larger than what is on disk. "First playable asset"
//!   means one post's vault file exists locally, not a full batch.
//!
//! # Invariants
//!
//! 1. At most one channel switch executes at a time; preemption is
//!    cooperative through the abort flag.
//!    - Enforced in: `ChannelOrchestrator::run`, `Inner::wait_first_asset`
//!    - Tested by: `tests::preemption_switches_to_newer_request`
//! 2. The active channel id matches the adopted handle: a non-empty current
//!    id with no adopted handle is a bug (the sdcard fallback clears both).
//!    - Enforced in: `Inner::dispose_loading`, `Inner::fall_back_to_sdcard`
//!    - Tested by: `tests::timeout_falls_back_to_sdcard`
//! 3. Under a storm of requests the last distinct request wins; identical
//!    targets collapse to one.
//!    - Enforced in: `ChannelOrchestrator::request_channel_switch`
//!    - Tested by: `tests::storm_settles_on_last_request`
//! 4. View events fire at 5 s and then every 30 s for vault-backed assets
//!    only; a redundant swap does not reset the timer.
//!    - Enforced in: `ViewTracker::on_swap`, `ViewTracker::tick`
//!    - Tested by: `tests::view_cadence`, `tests::redundant_swap_keeps_timer`

mod collab;
mod error;
mod handle;
mod orchestrator;
mod refresh;
mod vault;
mod view;

pub use collab::{
	AppState, DownloadManager, PlaybackEngine, RenderSurface, SchedulerSignal, ViewRecord, ViewSink,
};
#[doc(hidden)]
pub use collab::test_helpers;
pub use error::{ChannelError, IndexError, Result, SwitchError};
pub use handle::{
	Channel, ChannelFactory, ChannelIndexSource, ChannelStats, LoadOutcome, RemoteChannel,
	RemoteChannelFactory, RpcIndexSource, SingleAssetChannel,
};
pub use orchestrator::{
	ChannelOrchestrator, FIRST_ASSET_POLL, FIRST_ASSET_WAIT, OrchestratorDeps, PREFETCH_AHEAD,
	SwitchRequest,
};
pub use refresh::{MAX_REGISTRATIONS, RefreshCoordinator};
pub use vault::{extension_from_url, vault_path};
pub use view::{FIRST_VIEW_SECS, VIEW_PERIOD_SECS, ViewTickerHandle, ViewTracker};

#[cfg(test)]
mod tests;

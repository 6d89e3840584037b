//! Unit tests for channel handles, orchestration, refresh, and telemetry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use makapix_bus::LinkProbe;
use makapix_proto::{
	ArtworkPost, ChannelId, ChannelKind, ChannelMessage, ChannelPost, PlayOrder, PostId, PostKind,
	ViewIntent,
};
use pretty_assertions::assert_eq;

use crate::collab::test_helpers::{
	FakeAppState, FakeDownloads, FakePlayback, FakeScheduler, FakeSurface, FakeViewSink,
};
use crate::error::IndexError;
use crate::handle::{
	Channel, ChannelFactory, ChannelIndexSource, RemoteChannelFactory,
};
use crate::orchestrator::{ChannelOrchestrator, OrchestratorDeps};
use crate::refresh::RefreshCoordinator;
use crate::vault::vault_path;
use crate::view::ViewTracker;

fn artwork(post_id: i64, storage_key: &str) -> ArtworkPost {
	ArtworkPost {
		post_id: PostId(post_id),
		storage_key: storage_key.to_string(),
		url: format!("https://cdn.makapix.example/{storage_key}.webp"),
		kind: PostKind::Webp,
		owner: "kury".to_string(),
		width: 64,
		height: 64,
		frame_count: 1,
		transparency: false,
		dwell_secs: None,
	}
}

/// Write the vault file for a post so it counts as locally available.
fn place_asset(root: &Path, post: &ArtworkPost) {
	let path = vault_path(root, &post.storage_key, &post.url);
	std::fs::create_dir_all(path.parent().unwrap()).unwrap();
	std::fs::write(path, b"RIFF").unwrap();
}

/// Index source with per-channel canned outcomes.
#[derive(Default)]
struct FakeIndexSource {
	indices: Mutex<HashMap<ChannelId, Result<Vec<ChannelPost>, IndexError>>>,
	refreshes: Mutex<Vec<ChannelId>>,
}

impl FakeIndexSource {
	fn set_index(&self, id: &ChannelId, posts: Vec<ChannelPost>) {
		self.indices.lock().unwrap().insert(id.clone(), Ok(posts));
	}

	fn set_error(&self, id: &ChannelId, error: IndexError) {
		self.indices.lock().unwrap().insert(id.clone(), Err(error));
	}
}

#[async_trait]
impl ChannelIndexSource for FakeIndexSource {
	async fn fetch_index(&self, channel: &ChannelId) -> Result<Vec<ChannelPost>, IndexError> {
		self.indices
			.lock()
			.unwrap()
			.get(channel)
			.cloned()
			.unwrap_or(Err(IndexError::NotFound))
	}

	async fn push_refresh(&self, channel: &ChannelId) -> Result<(), IndexError> {
		self.refreshes.lock().unwrap().push(channel.clone());
		Ok(())
	}
}

/// Factory wrapper that counts creations.
struct CountingFactory {
	inner: RemoteChannelFactory,
	creates: AtomicU32,
}

impl ChannelFactory for CountingFactory {
	fn create(&self, kind: &ChannelKind, identifier: Option<&str>) -> Arc<dyn Channel> {
		self.creates.fetch_add(1, Ordering::SeqCst);
		self.inner.create(kind, identifier)
	}
}

struct Probe(bool);

impl LinkProbe for Probe {
	fn local_ip(&self) -> Option<std::net::IpAddr> {
		self.0.then(|| std::net::IpAddr::from([10, 0, 0, 2]))
	}

	fn resolve(&self, _name: &str) -> bool {
		self.0
	}
}

struct Rig {
	orchestrator: ChannelOrchestrator,
	source: Arc<FakeIndexSource>,
	playback: Arc<FakePlayback>,
	surface: Arc<FakeSurface>,
	downloads: Arc<FakeDownloads>,
	app_state: Arc<FakeAppState>,
	factory: Arc<CountingFactory>,
	intent_flag: Arc<AtomicBool>,
	root: tempfile::TempDir,
}

fn rig() -> Rig {
	let root = tempfile::tempdir().unwrap();
	let source = Arc::new(FakeIndexSource::default());
	let factory = Arc::new(CountingFactory {
		inner: RemoteChannelFactory::new(source.clone(), root.path().to_path_buf()),
		creates: AtomicU32::new(0),
	});
	let playback = Arc::new(FakePlayback::default());
	let surface = Arc::new(FakeSurface::default());
	let downloads = Arc::new(FakeDownloads::default());
	let app_state = Arc::new(FakeAppState::default());
	let intent_flag = Arc::new(AtomicBool::new(false));

	let orchestrator = ChannelOrchestrator::new(OrchestratorDeps {
		factory: factory.clone(),
		playback: playback.clone(),
		surface: surface.clone(),
		downloads: downloads.clone(),
		app_state: app_state.clone(),
		probe: Arc::new(Probe(true)),
		intent_flag: intent_flag.clone(),
	});

	let run = orchestrator.clone();
	tokio::spawn(async move { run.run().await });

	Rig {
		orchestrator,
		source,
		playback,
		surface,
		downloads,
		app_state,
		factory,
		intent_flag,
		root,
	}
}

async fn settle() {
	tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn switch_with_local_asset_adopts_channel() {
	let rig = rig();
	let promoted = ChannelKind::Promoted.channel_id(None);
	let post = artwork(1, "aaa");
	place_asset(rig.root.path(), &post);
	rig.source
		.set_index(&promoted, vec![ChannelPost::Artwork(post)]);

	rig.orchestrator
		.request_channel_switch(ChannelKind::Promoted, None);
	settle().await;

	assert_eq!(rig.orchestrator.current_channel_id(), Some(promoted.clone()));
	assert!(!rig.orchestrator.is_loading());
	let adopted = rig.playback.adopted.lock().unwrap();
	assert_eq!(adopted.as_ref().unwrap().channel_id(), promoted);
	drop(adopted);
	assert!(*rig.playback.swaps.lock().unwrap() >= 1);
	assert_eq!(rig.surface.last(), Some(ChannelMessage::None));
	assert_eq!(
		rig.app_state.last_channel.lock().unwrap().as_slice(),
		&[(ChannelKind::Promoted, None)]
	);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn empty_vault_requests_prefetch_and_waits_for_first_asset() {
	let rig = rig();
	let promoted = ChannelKind::Promoted.channel_id(None);
	let post = artwork(1, "bbb");
	rig.source
		.set_index(&promoted, vec![ChannelPost::Artwork(post.clone())]);

	rig.orchestrator
		.request_channel_switch(ChannelKind::Promoted, None);
	settle().await;

	// Index known but no files yet: DOWNLOADING plus a prefetch request.
	assert_eq!(rig.surface.last(), Some(ChannelMessage::Downloading));
	assert_eq!(
		rig.downloads.ensured.lock().unwrap().first(),
		Some(&(promoted.clone(), 16))
	);
	assert!(rig.orchestrator.is_loading());

	// An asset arrives a few polls later.
	tokio::time::sleep(Duration::from_secs(2)).await;
	place_asset(rig.root.path(), &post);
	tokio::time::sleep(Duration::from_secs(1)).await;

	assert_eq!(rig.orchestrator.current_channel_id(), Some(promoted));
	assert!(!rig.orchestrator.is_loading());
	assert_eq!(rig.surface.last(), Some(ChannelMessage::None));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn empty_index_shows_loading_message() {
	let rig = rig();
	let promoted = ChannelKind::Promoted.channel_id(None);
	rig.source.set_index(&promoted, vec![]);

	rig.orchestrator
		.request_channel_switch(ChannelKind::Promoted, None);
	settle().await;

	assert_eq!(rig.surface.last(), Some(ChannelMessage::Loading));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn timeout_falls_back_to_sdcard() {
	let rig = rig();
	let promoted = ChannelKind::Promoted.channel_id(None);
	rig.source.set_index(&promoted, vec![]);

	rig.orchestrator
		.request_channel_switch(ChannelKind::Promoted, None);
	// 60 s wait, 5 s error hold, margin.
	tokio::time::sleep(Duration::from_secs(70)).await;

	let messages: Vec<ChannelMessage> = rig
		.surface
		.messages
		.lock()
		.unwrap()
		.iter()
		.map(|(m, _)| *m)
		.collect();
	assert!(messages.contains(&ChannelMessage::Loading));
	assert!(messages.contains(&ChannelMessage::Error));
	assert!(rig.playback.local_fallback.load(Ordering::SeqCst));
	// Terminal degradation: no current id, no adopted handle.
	assert_eq!(rig.orchestrator.current_channel_id(), None);
	assert!(rig.playback.adopted.lock().unwrap().is_none());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn preemption_switches_to_newer_request() {
	let rig = rig();
	let promoted = ChannelKind::Promoted.channel_id(None);
	let all = ChannelKind::All.channel_id(None);

	// `promoted` has an index but no local files, so it blocks waiting.
	rig.source
		.set_index(&promoted, vec![ChannelPost::Artwork(artwork(1, "ccc"))]);
	let ready = artwork(2, "ddd");
	place_asset(rig.root.path(), &ready);
	rig.source
		.set_index(&all, vec![ChannelPost::Artwork(ready)]);

	rig.orchestrator
		.request_channel_switch(ChannelKind::Promoted, None);
	tokio::time::sleep(Duration::from_secs(1)).await;
	assert!(rig.orchestrator.is_loading());

	rig.orchestrator.request_channel_switch(ChannelKind::All, None);
	tokio::time::sleep(Duration::from_secs(2)).await;

	assert_eq!(rig.orchestrator.current_channel_id(), Some(all.clone()));
	let adopted = rig.playback.adopted.lock().unwrap();
	assert_eq!(adopted.as_ref().unwrap().channel_id(), all);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn storm_settles_on_last_request() {
	let rig = rig();
	for kind in [ChannelKind::Promoted, ChannelKind::All] {
		let id = kind.channel_id(None);
		rig.source
			.set_index(&id, vec![ChannelPost::Artwork(artwork(9, "blocked"))]);
	}
	let winner = artwork(3, "eee");
	place_asset(rig.root.path(), &winner);
	let user_id = ChannelKind::User.channel_id(Some("kury"));
	rig.source
		.set_index(&user_id, vec![ChannelPost::Artwork(winner)]);

	rig.orchestrator
		.request_channel_switch(ChannelKind::Promoted, None);
	tokio::time::sleep(Duration::from_millis(700)).await;
	rig.orchestrator.request_channel_switch(ChannelKind::All, None);
	rig.orchestrator
		.request_channel_switch(ChannelKind::User, Some("kury"));
	tokio::time::sleep(Duration::from_secs(3)).await;

	assert_eq!(rig.orchestrator.current_channel_id(), Some(user_id));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn duplicate_request_while_loading_collapses() {
	let rig = rig();
	let promoted = ChannelKind::Promoted.channel_id(None);
	let post = artwork(1, "fff");
	rig.source
		.set_index(&promoted, vec![ChannelPost::Artwork(post.clone())]);

	rig.orchestrator
		.request_channel_switch(ChannelKind::Promoted, None);
	tokio::time::sleep(Duration::from_secs(1)).await;
	assert!(rig.orchestrator.is_loading());

	// Same target again: collapses, must not abort the running switch.
	rig.orchestrator
		.request_channel_switch(ChannelKind::Promoted, None);
	place_asset(rig.root.path(), &post);
	tokio::time::sleep(Duration::from_secs(1)).await;

	assert_eq!(rig.orchestrator.current_channel_id(), Some(promoted));
	assert_eq!(rig.factory.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn same_channel_restart_skips_reload() {
	let rig = rig();
	let promoted = ChannelKind::Promoted.channel_id(None);
	let post = artwork(1, "ggg");
	place_asset(rig.root.path(), &post);
	rig.source
		.set_index(&promoted, vec![ChannelPost::Artwork(post)]);

	rig.orchestrator
		.request_channel_switch(ChannelKind::Promoted, None);
	settle().await;
	let swaps_before = *rig.playback.swaps.lock().unwrap();

	rig.orchestrator
		.request_channel_switch(ChannelKind::Promoted, None);
	settle().await;

	assert_eq!(rig.factory.creates.load(Ordering::SeqCst), 1);
	assert!(*rig.playback.swaps.lock().unwrap() > swaps_before);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn load_failure_shows_error_and_falls_back() {
	let rig = rig();
	let promoted = ChannelKind::Promoted.channel_id(None);
	rig.source
		.set_error(&promoted, IndexError::Request("boom".into()));

	rig.orchestrator
		.request_channel_switch(ChannelKind::Promoted, None);
	tokio::time::sleep(Duration::from_secs(6)).await;

	let messages: Vec<ChannelMessage> = rig
		.surface
		.messages
		.lock()
		.unwrap()
		.iter()
		.map(|(m, _)| *m)
		.collect();
	assert!(messages.contains(&ChannelMessage::Error));
	assert!(rig.playback.local_fallback.load(Ordering::SeqCst));
	assert_eq!(rig.orchestrator.current_channel_id(), None);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn switching_away_cancels_downloads_of_prior_channel() {
	let rig = rig();
	let promoted = ChannelKind::Promoted.channel_id(None);
	let all = ChannelKind::All.channel_id(None);
	for (id, key) in [(&promoted, "hhh"), (&all, "iii")] {
		let post = artwork(1, key);
		place_asset(rig.root.path(), &post);
		rig.source.set_index(id, vec![ChannelPost::Artwork(post)]);
	}

	rig.orchestrator
		.request_channel_switch(ChannelKind::Promoted, None);
	settle().await;
	rig.orchestrator.request_channel_switch(ChannelKind::All, None);
	settle().await;

	assert_eq!(
		rig.downloads.cancelled.lock().unwrap().as_slice(),
		&[promoted]
	);
	assert_eq!(rig.orchestrator.current_channel_id(), Some(all));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn show_artwork_sets_sentinel_and_intent() {
	let rig = rig();
	let post = artwork(42, "jjj");

	rig.orchestrator.show_artwork(post);
	settle().await;

	assert_eq!(
		rig.orchestrator.current_channel_id(),
		Some(ChannelId("artwork".into()))
	);
	assert!(rig.intent_flag.load(Ordering::SeqCst));
	let adopted = rig.playback.adopted.lock().unwrap();
	assert_eq!(
		adopted.as_ref().unwrap().channel_id(),
		ChannelId("artwork".into())
	);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn refresh_marks_completion_and_signals_scheduler() {
	let root = tempfile::tempdir().unwrap();
	let source = Arc::new(FakeIndexSource::default());
	let all = ChannelKind::All.channel_id(None);
	source.set_index(&all, vec![ChannelPost::Artwork(artwork(1, "kkk"))]);

	let factory = Arc::new(RemoteChannelFactory::new(
		source.clone(),
		root.path().to_path_buf(),
	));
	let scheduler = Arc::new(FakeScheduler::default());
	let coordinator = RefreshCoordinator::new(factory, scheduler.clone());

	coordinator.request_refresh(ChannelKind::All, None).await;
	assert_eq!(scheduler.refreshed.lock().unwrap().as_slice(), &[all.clone()]);
	assert!(coordinator.check_and_clear(&all));
	assert!(!coordinator.check_and_clear(&all));

	// A second refresh of an already-loaded persistent handle also pushes a
	// cloud-side refresh request.
	coordinator.request_refresh(ChannelKind::All, None).await;
	assert_eq!(source.refreshes.lock().unwrap().as_slice(), &[all]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn view_cadence() {
	let root = tempfile::tempdir().unwrap();
	let sink = Arc::new(FakeViewSink::default());
	let app_state = Arc::new(FakeAppState::default());
	let intent = Arc::new(AtomicBool::new(false));
	let tracker = ViewTracker::new(sink.clone(), app_state, intent, root.path());

	let path = root.path().join("vault/aa/bb/cc/x.webp");
	tracker.on_swap(PostId(42), &path, "promoted", None);

	for _ in 0..65 {
		tracker.tick();
	}
	let records = sink.records.lock().unwrap();
	assert_eq!(records.len(), 3); // at 5, 35, 65
	assert!(records.iter().all(|r| r.post_id == PostId(42)));
	assert!(records.iter().all(|r| r.intent == ViewIntent::Channel));
	assert_eq!(records[0].channel, "promoted");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn view_swap_stops_old_stream_and_rearms() {
	let root = tempfile::tempdir().unwrap();
	let sink = Arc::new(FakeViewSink::default());
	let app_state = Arc::new(FakeAppState::default());
	let intent = Arc::new(AtomicBool::new(false));
	let tracker = ViewTracker::new(sink.clone(), app_state, intent, root.path());

	let a = root.path().join("vault/aa/bb/cc/a.webp");
	let b = root.path().join("vault/aa/bb/cc/b.webp");

	tracker.on_swap(PostId(42), &a, "promoted", None);
	for _ in 0..70 {
		tracker.tick();
	}
	// 42 emitted at 5, 35, 65.
	assert_eq!(sink.records.lock().unwrap().len(), 3);

	tracker.on_swap(PostId(43), &b, "promoted", None);
	for _ in 0..5 {
		tracker.tick();
	}
	let records = sink.records.lock().unwrap();
	assert_eq!(records.len(), 4);
	assert_eq!(records[3].post_id, PostId(43));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn redundant_swap_keeps_timer() {
	let root = tempfile::tempdir().unwrap();
	let sink = Arc::new(FakeViewSink::default());
	let app_state = Arc::new(FakeAppState::default());
	let intent = Arc::new(AtomicBool::new(false));
	let tracker = ViewTracker::new(sink.clone(), app_state, intent, root.path());

	let path = root.path().join("vault/aa/bb/cc/x.webp");
	tracker.on_swap(PostId(42), &path, "promoted", None);
	for _ in 0..3 {
		tracker.tick();
	}
	// Same asset again: the 3 s already elapsed must stand.
	tracker.on_swap(PostId(42), &path, "promoted", None);
	for _ in 0..2 {
		tracker.tick();
	}
	assert_eq!(sink.records.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn sdcard_assets_are_not_tracked() {
	let root = tempfile::tempdir().unwrap();
	let sink = Arc::new(FakeViewSink::default());
	let app_state = Arc::new(FakeAppState::default());
	let intent = Arc::new(AtomicBool::new(false));
	let tracker = ViewTracker::new(sink.clone(), app_state, intent, root.path());

	tracker.on_swap(PostId(7), Path::new("/sdcard/img.webp"), "sdcard", None);
	for _ in 0..40 {
		tracker.tick();
	}
	assert!(sink.records.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn intent_flag_is_consumed_by_first_swap() {
	let root = tempfile::tempdir().unwrap();
	let sink = Arc::new(FakeViewSink::default());
	let app_state = Arc::new(FakeAppState::default());
	let intent = Arc::new(AtomicBool::new(true));
	let tracker = ViewTracker::new(sink.clone(), app_state, intent.clone(), root.path());

	let a = root.path().join("vault/aa/bb/cc/a.webp");
	let b = root.path().join("vault/aa/bb/cc/b.webp");

	tracker.on_swap(PostId(1), &a, "promoted", None);
	assert!(!intent.load(Ordering::SeqCst));
	for _ in 0..5 {
		tracker.tick();
	}
	tracker.on_swap(PostId(2), &b, "promoted", None);
	for _ in 0..5 {
		tracker.tick();
	}

	let records = sink.records.lock().unwrap();
	assert_eq!(records[0].intent, ViewIntent::Artwork);
	assert_eq!(records[1].intent, ViewIntent::Channel);
}

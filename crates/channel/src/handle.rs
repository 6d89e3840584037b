//! Channel handles.
//!
//! A channel is a named, ordered collection of artworks exposing the small
//! capability set the playback engine and orchestrator consume. Two
//! implementations exist: [`RemoteChannel`] (server-indexed, assets in the
//! local vault) and [`SingleAssetChannel`] (one artwork, created for a
//! show-this-now command).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use makapix_bus::Correlator;
use makapix_proto::{ArtworkPost, ChannelId, ChannelKind, ChannelPost, PlayOrder};
use rand::seq::SliceRandom;
use serde_json::json;

use crate::error::{ChannelError, IndexError, Result};
use crate::vault::vault_path;

/// Load outcomes that are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
	/// Index fetched with at least one entry.
	Loaded,
	/// Index fetched (or channel unknown) and empty. Acceptable.
	Empty,
}

/// Index size and local availability of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStats {
	/// Entries in the channel index.
	pub index_len: usize,
	/// Artworks whose vault file exists locally.
	pub local_available: usize,
}

/// Capability set common to all channel variants.
#[async_trait]
pub trait Channel: Send + Sync {
	/// Stable channel identifier.
	fn channel_id(&self) -> ChannelId;
	/// Human-readable display name.
	fn display_name(&self) -> String;
	/// Kind this channel was created as.
	fn kind(&self) -> ChannelKind;
	/// Identifier for user/hashtag channels.
	fn identifier(&self) -> Option<String>;
	/// Whether `load` has completed at least once.
	fn is_loaded(&self) -> bool;
	/// Acquire the channel index.
	async fn load(&self) -> Result<LoadOutcome>;
	/// Drop the in-memory index.
	async fn unload(&self);
	/// Build the play sequence in the given order and rewind.
	fn start_playback(&self, order: PlayOrder);
	/// Advance to the next locally available artwork.
	fn next(&self) -> Option<ArtworkPost>;
	/// Step back to the previous locally available artwork.
	fn prev(&self) -> Option<ArtworkPost>;
	/// Artwork at the playback cursor.
	fn current(&self) -> Option<ArtworkPost>;
	/// Ask the cloud to re-index this channel.
	async fn request_refresh(&self) -> Result<()>;
	/// Re-shuffle the play sequence (no-op outside random order).
	fn request_reshuffle(&self);
	/// Index size and local availability.
	fn stats(&self) -> ChannelStats;
	/// Release resources. The handle must not be used afterwards.
	async fn destroy(&self);
}

/// Source of channel indices.
///
/// Production goes through the correlator ([`RpcIndexSource`]); tests
/// provide canned indices.
#[async_trait]
pub trait ChannelIndexSource: Send + Sync {
	/// Fetch the full index of a channel.
	async fn fetch_index(
		&self,
		channel: &ChannelId,
	) -> std::result::Result<Vec<ChannelPost>, IndexError>;
	/// Ask the cloud to re-index a channel.
	async fn push_refresh(&self, channel: &ChannelId) -> std::result::Result<(), IndexError>;
}

/// Index source over the broker RPC layer.
pub struct RpcIndexSource {
	correlator: Arc<Correlator>,
}

impl RpcIndexSource {
	/// Build a source over a correlator.
	#[must_use]
	pub fn new(correlator: Arc<Correlator>) -> Self {
		Self { correlator }
	}
}

#[async_trait]
impl ChannelIndexSource for RpcIndexSource {
	async fn fetch_index(
		&self,
		channel: &ChannelId,
	) -> std::result::Result<Vec<ChannelPost>, IndexError> {
		let response = self
			.correlator
			.publish_and_wait("channel.get_posts", json!({ "channel": channel }))
			.await
			.map_err(|e| IndexError::Request(e.to_string()))?;

		if !response.success {
			if response.error_code == Some(404) {
				return Err(IndexError::NotFound);
			}
			return Err(IndexError::Request(
				response.error.unwrap_or_else(|| "unspecified".into()),
			));
		}

		let posts = response.body.get("posts").cloned().unwrap_or(json!([]));
		serde_json::from_value(posts).map_err(|e| IndexError::Malformed(e.to_string()))
	}

	async fn push_refresh(&self, channel: &ChannelId) -> std::result::Result<(), IndexError> {
		self.correlator
			.publish_and_wait("channel.refresh", json!({ "channel": channel }))
			.await
			.map_err(|e| IndexError::Request(e.to_string()))?;
		Ok(())
	}
}

struct IndexState {
	posts: Vec<ChannelPost>,
	sequence: Vec<ArtworkPost>,
	cursor: usize,
	order: PlayOrder,
	loaded: bool,
}

/// A server-indexed channel with assets in the local vault.
///
/// The index may list more entries than are downloaded; playback skips
/// entries without a local file.
pub struct RemoteChannel {
	kind: ChannelKind,
	identifier: Option<String>,
	id: ChannelId,
	source: Arc<dyn ChannelIndexSource>,
	asset_root: PathBuf,
	state: Mutex<IndexState>,
}

impl RemoteChannel {
	/// Create an unloaded remote channel.
	#[must_use]
	pub fn new(
		kind: ChannelKind,
		identifier: Option<&str>,
		source: Arc<dyn ChannelIndexSource>,
		asset_root: PathBuf,
	) -> Self {
		let id = kind.channel_id(identifier);
		Self {
			kind,
			identifier: identifier.map(str::to_string),
			id,
			source,
			asset_root,
			state: Mutex::new(IndexState {
				posts: Vec::new(),
				sequence: Vec::new(),
				cursor: 0,
				order: PlayOrder::Original,
				loaded: false,
			}),
		}
	}

	fn index_path(&self) -> PathBuf {
		// Channel ids may contain a single '/' (user/hashtag); it maps to a
		// subdirectory under the channel index dir.
		self.asset_root
			.join("channel")
			.join(format!("{}.idx", self.id))
	}

	fn persist_index(&self, posts: &[ChannelPost]) -> Result<()> {
		let path = self.index_path();
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let data = serde_json::to_vec(posts)
			.map_err(|e| ChannelError::Index(IndexError::Malformed(e.to_string())))?;
		std::fs::write(&path, data)?;
		Ok(())
	}

	fn cached_index(&self) -> Option<Vec<ChannelPost>> {
		let data = std::fs::read(self.index_path()).ok()?;
		serde_json::from_slice(&data).ok()
	}

	fn install_index(&self, posts: Vec<ChannelPost>) {
		let mut state = self.state.lock().unwrap();
		state.posts = posts;
		state.loaded = true;
		let order = state.order;
		Self::rebuild_sequence(&mut state, order);
	}

	fn rebuild_sequence(state: &mut IndexState, order: PlayOrder) {
		let mut sequence: Vec<ArtworkPost> = state
			.posts
			.iter()
			.flat_map(|post| match post {
				ChannelPost::Artwork(a) => vec![a.clone()],
				ChannelPost::Playlist(p) => p.entries.clone(),
			})
			.collect();
		match order {
			PlayOrder::Original => {}
			PlayOrder::Created => sequence.sort_by_key(|a| a.post_id),
			PlayOrder::Random => sequence.shuffle(&mut rand::thread_rng()),
		}
		state.sequence = sequence;
		state.order = order;
		state.cursor = 0;
	}

	fn local_file_exists(&self, post: &ArtworkPost) -> bool {
		vault_path(&self.asset_root, &post.storage_key, &post.url).is_file()
	}

	/// Advance the cursor by `step` until a locally available artwork is
	/// found, giving up after one full cycle.
	fn advance(&self, step: isize) -> Option<ArtworkPost> {
		let (order, sequence) = {
			let state = self.state.lock().unwrap();
			let len = state.sequence.len();
			if len == 0 {
				return None;
			}
			let mut order = Vec::with_capacity(len);
			let mut cursor = state.cursor as isize;
			for _ in 0..len {
				cursor = (cursor + step).rem_euclid(len as isize);
				order.push(cursor as usize);
			}
			(order, state.sequence.clone())
		};

		for idx in order {
			let post = &sequence[idx];
			if self.local_file_exists(post) {
				self.state.lock().unwrap().cursor = idx;
				return Some(post.clone());
			}
		}
		None
	}
}

#[async_trait]
impl Channel for RemoteChannel {
	fn channel_id(&self) -> ChannelId {
		self.id.clone()
	}

	fn display_name(&self) -> String {
		self.kind.display_name(self.identifier.as_deref())
	}

	fn kind(&self) -> ChannelKind {
		self.kind.clone()
	}

	fn identifier(&self) -> Option<String> {
		self.identifier.clone()
	}

	fn is_loaded(&self) -> bool {
		self.state.lock().unwrap().loaded
	}

	async fn load(&self) -> Result<LoadOutcome> {
		match self.source.fetch_index(&self.id).await {
			Ok(posts) => {
				if let Err(e) = self.persist_index(&posts) {
					tracing::warn!(channel = %self.id, error = %e, "index persistence failed");
				}
				let outcome = if posts.is_empty() {
					LoadOutcome::Empty
				} else {
					LoadOutcome::Loaded
				};
				self.install_index(posts);
				Ok(outcome)
			}
			Err(IndexError::NotFound) => {
				self.install_index(Vec::new());
				Ok(LoadOutcome::Empty)
			}
			Err(e) => {
				// Offline grace: fall back to the last persisted index.
				if let Some(posts) = self.cached_index() {
					tracing::warn!(channel = %self.id, error = %e, "using cached index");
					let outcome = if posts.is_empty() {
						LoadOutcome::Empty
					} else {
						LoadOutcome::Loaded
					};
					self.install_index(posts);
					return Ok(outcome);
				}
				Err(ChannelError::Index(e))
			}
		}
	}

	async fn unload(&self) {
		let mut state = self.state.lock().unwrap();
		state.posts.clear();
		state.sequence.clear();
		state.cursor = 0;
		state.loaded = false;
	}

	fn start_playback(&self, order: PlayOrder) {
		let mut state = self.state.lock().unwrap();
		Self::rebuild_sequence(&mut state, order);
	}

	fn next(&self) -> Option<ArtworkPost> {
		self.advance(1)
	}

	fn prev(&self) -> Option<ArtworkPost> {
		self.advance(-1)
	}

	fn current(&self) -> Option<ArtworkPost> {
		let post = {
			let state = self.state.lock().unwrap();
			state.sequence.get(state.cursor).cloned()
		};
		post.filter(|p| self.local_file_exists(p))
	}

	async fn request_refresh(&self) -> Result<()> {
		self.source
			.push_refresh(&self.id)
			.await
			.map_err(ChannelError::Index)
	}

	fn request_reshuffle(&self) {
		let mut state = self.state.lock().unwrap();
		if state.order == PlayOrder::Random {
			Self::rebuild_sequence(&mut state, PlayOrder::Random);
		}
	}

	fn stats(&self) -> ChannelStats {
		let (index_len, sequence) = {
			let state = self.state.lock().unwrap();
			(state.posts.len(), state.sequence.clone())
		};
		let local_available = sequence
			.iter()
			.filter(|p| self.local_file_exists(p))
			.count();
		ChannelStats {
			index_len,
			local_available,
		}
	}

	async fn destroy(&self) {
		self.unload().await;
	}
}

/// A transient channel wrapping exactly one artwork.
pub struct SingleAssetChannel {
	post: ArtworkPost,
	path: PathBuf,
}

impl SingleAssetChannel {
	/// Wrap a downloaded artwork.
	#[must_use]
	pub fn new(post: ArtworkPost, path: PathBuf) -> Self {
		Self { post, path }
	}

	/// Local path of the wrapped artwork.
	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}
}

#[async_trait]
impl Channel for SingleAssetChannel {
	fn channel_id(&self) -> ChannelId {
		ChannelKind::Artwork.channel_id(None)
	}

	fn display_name(&self) -> String {
		ChannelKind::Artwork.display_name(None)
	}

	fn kind(&self) -> ChannelKind {
		ChannelKind::Artwork
	}

	fn identifier(&self) -> Option<String> {
		None
	}

	fn is_loaded(&self) -> bool {
		true
	}

	async fn load(&self) -> Result<LoadOutcome> {
		Ok(LoadOutcome::Loaded)
	}

	async fn unload(&self) {}

	fn start_playback(&self, _order: PlayOrder) {}

	fn next(&self) -> Option<ArtworkPost> {
		Some(self.post.clone())
	}

	fn prev(&self) -> Option<ArtworkPost> {
		Some(self.post.clone())
	}

	fn current(&self) -> Option<ArtworkPost> {
		Some(self.post.clone())
	}

	async fn request_refresh(&self) -> Result<()> {
		Ok(())
	}

	fn request_reshuffle(&self) {}

	fn stats(&self) -> ChannelStats {
		let available = usize::from(self.path.is_file());
		ChannelStats {
			index_len: 1,
			local_available: available,
		}
	}

	async fn destroy(&self) {}
}

/// Factory the orchestrator creates handles through.
pub trait ChannelFactory: Send + Sync {
	/// Create an unloaded channel for a kind plus optional identifier.
	fn create(&self, kind: &ChannelKind, identifier: Option<&str>) -> Arc<dyn Channel>;
}

/// Factory producing [`RemoteChannel`]s over one index source.
pub struct RemoteChannelFactory {
	source: Arc<dyn ChannelIndexSource>,
	asset_root: PathBuf,
}

impl RemoteChannelFactory {
	/// Build a factory.
	#[must_use]
	pub fn new(source: Arc<dyn ChannelIndexSource>, asset_root: PathBuf) -> Self {
		Self { source, asset_root }
	}
}

impl ChannelFactory for RemoteChannelFactory {
	fn create(&self, kind: &ChannelKind, identifier: Option<&str>) -> Arc<dyn Channel> {
		Arc::new(RemoteChannel::new(
			kind.clone(),
			identifier,
			self.source.clone(),
			self.asset_root.clone(),
		))
	}
}

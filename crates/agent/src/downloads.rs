//! HTTP asset downloader feeding the vault.
//!
//! Works from the persisted channel index: `ensure_downloads_ahead` reads
//! `<root>/channel/<id>.idx`, stats the vault, and fetches the first missing
//! files. A 404 on an artwork is permanent; the post is skipped and not
//! retried within the process lifetime.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use makapix_channel::{DownloadManager, vault_path};
use makapix_proto::{ArtworkPost, ChannelId, ChannelPost};

/// Downloader over HTTPS into the content-addressed vault.
pub struct HttpDownloadManager {
	inner: Arc<Inner>,
}

struct Inner {
	client: reqwest::Client,
	asset_root: PathBuf,
	/// Channels whose queued downloads were cancelled.
	cancelled: Mutex<HashSet<ChannelId>>,
	/// Posts that came back 404; never retried.
	dead_posts: Mutex<HashSet<String>>,
	in_flight: AtomicU32,
}

impl HttpDownloadManager {
	/// Build a downloader rooted at the asset directory.
	#[must_use]
	pub fn new(asset_root: PathBuf) -> Self {
		Self {
			inner: Arc::new(Inner {
				client: reqwest::Client::new(),
				asset_root,
				cancelled: Mutex::new(HashSet::new()),
				dead_posts: Mutex::new(HashSet::new()),
				in_flight: AtomicU32::new(0),
			}),
		}
	}

	fn missing_posts(&self, channel: &ChannelId, n: usize) -> Vec<ArtworkPost> {
		let index_path = self
			.inner
			.asset_root
			.join("channel")
			.join(format!("{channel}.idx"));
		let Ok(data) = std::fs::read(index_path) else {
			return Vec::new();
		};
		let Ok(posts) = serde_json::from_slice::<Vec<ChannelPost>>(&data) else {
			return Vec::new();
		};

		let dead = self.inner.dead_posts.lock().unwrap();
		posts
			.iter()
			.flat_map(|post| match post {
				ChannelPost::Artwork(a) => vec![a.clone()],
				ChannelPost::Playlist(p) => p.entries.clone(),
			})
			.filter(|a| !dead.contains(&a.storage_key))
			.filter(|a| !vault_path(&self.inner.asset_root, &a.storage_key, &a.url).is_file())
			.take(n)
			.collect()
	}
}

impl Inner {
	async fn fetch(&self, post: &ArtworkPost) -> std::io::Result<PathBuf> {
		let target = vault_path(&self.asset_root, &post.storage_key, &post.url);
		if target.is_file() {
			return Ok(target);
		}

		let response = self
			.client
			.get(&post.url)
			.send()
			.await
			.map_err(|e| std::io::Error::other(e.to_string()))?;

		if response.status().as_u16() == 404 {
			// Permanent miss; skip the post.
			self.dead_posts
				.lock()
				.unwrap()
				.insert(post.storage_key.clone());
			return Err(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				"artwork gone",
			));
		}
		if !response.status().is_success() {
			return Err(std::io::Error::other(format!(
				"download status {}",
				response.status()
			)));
		}

		let body = response
			.bytes()
			.await
			.map_err(|e| std::io::Error::other(e.to_string()))?;
		if let Some(parent) = target.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let tmp = target.with_extension("part");
		tokio::fs::write(&tmp, &body).await?;
		tokio::fs::rename(&tmp, &target).await?;
		Ok(target)
	}
}

#[async_trait]
impl DownloadManager for HttpDownloadManager {
	fn ensure_downloads_ahead(&self, channel: &ChannelId, n: usize) {
		self.inner.cancelled.lock().unwrap().remove(channel);
		let posts = self.missing_posts(channel, n);
		if posts.is_empty() {
			return;
		}

		let inner = self.inner.clone();
		let channel = channel.clone();
		tokio::spawn(async move {
			for post in posts {
				if inner.cancelled.lock().unwrap().contains(&channel) {
					break;
				}
				inner.in_flight.fetch_add(1, Ordering::SeqCst);
				let result = inner.fetch(&post).await;
				inner.in_flight.fetch_sub(1, Ordering::SeqCst);
				if let Err(e) = result {
					tracing::debug!(post_id = post.post_id.0, error = %e, "asset download failed");
				}
			}
		});
	}

	fn cancel_channel(&self, channel: &ChannelId) {
		self.inner.cancelled.lock().unwrap().insert(channel.clone());
	}

	fn is_busy(&self) -> bool {
		self.inner.in_flight.load(Ordering::SeqCst) > 0
	}

	async fn download_artwork(
		&self,
		post: &ArtworkPost,
		progress: Box<dyn Fn(u8) + Send>,
	) -> std::io::Result<PathBuf> {
		progress(0);
		let path = self.inner.fetch(post).await?;
		progress(100);
		Ok(path)
	}
}

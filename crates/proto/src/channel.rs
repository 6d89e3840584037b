//! Channel and post content model.

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, PostId};

/// The kind of channel a switch request targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
	/// The firehose of all public artworks.
	All,
	/// Editorially promoted artworks.
	Promoted,
	/// Artworks by a single user; carries the user name.
	User,
	/// Artworks under a hashtag; carries the tag.
	Hashtag,
	/// Transient single-artwork channel created for a show-this-now command.
	Artwork,
	/// Local-storage playback; never reported to the cloud.
	Sdcard,
}

impl ChannelKind {
	/// Build the stable channel id for this kind plus optional identifier.
	#[must_use]
	pub fn channel_id(&self, identifier: Option<&str>) -> ChannelId {
		match self {
			Self::All => ChannelId("all".to_string()),
			Self::Promoted => ChannelId("promoted".to_string()),
			Self::User => ChannelId(format!("user/{}", identifier.unwrap_or_default())),
			Self::Hashtag => ChannelId(format!("hashtag/{}", identifier.unwrap_or_default())),
			Self::Artwork => ChannelId("artwork".to_string()),
			Self::Sdcard => ChannelId("sdcard".to_string()),
		}
	}

	/// Human-readable name shown while the channel loads.
	#[must_use]
	pub fn display_name(&self, identifier: Option<&str>) -> String {
		match self {
			Self::All => "All artworks".to_string(),
			Self::Promoted => "Promoted".to_string(),
			Self::User => format!("@{}", identifier.unwrap_or_default()),
			Self::Hashtag => format!("#{}", identifier.unwrap_or_default()),
			Self::Artwork => "Artwork".to_string(),
			Self::Sdcard => "SD card".to_string(),
		}
	}
}

/// Playback ordering for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayOrder {
	/// Index order as delivered by the cloud.
	#[default]
	Original,
	/// Creation-time order.
	Created,
	/// Shuffled order.
	Random,
}

/// Image container of an artwork file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
	Webp,
	Gif,
	Png,
	Jpeg,
}

impl PostKind {
	/// File extension for this container, including the dot.
	#[must_use]
	pub fn extension(self) -> &'static str {
		match self {
			Self::Webp => ".webp",
			Self::Gif => ".gif",
			Self::Png => ".png",
			Self::Jpeg => ".jpg",
		}
	}
}

/// A single artwork entry in a channel index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtworkPost {
	/// Cloud-side post id.
	pub post_id: PostId,
	/// Opaque storage key; hashed to derive the vault path.
	pub storage_key: String,
	/// Source URL the asset is downloaded from.
	pub url: String,
	/// Image container kind.
	pub kind: PostKind,
	/// Owner user name.
	#[serde(default)]
	pub owner: String,
	/// Pixel width.
	#[serde(default)]
	pub width: u32,
	/// Pixel height.
	#[serde(default)]
	pub height: u32,
	/// Animation frame count; 1 for stills.
	#[serde(default)]
	pub frame_count: u32,
	/// Whether the image carries an alpha channel.
	#[serde(default)]
	pub transparency: bool,
	/// Dwell time in seconds before advancing, when the cloud sets one.
	#[serde(default)]
	pub dwell_secs: Option<u32>,
}

/// An ordered set of artworks played as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistPost {
	/// Cloud-side post id of the playlist itself.
	pub post_id: PostId,
	/// Artworks in play order.
	pub entries: Vec<ArtworkPost>,
	/// Per-entry dwell override, when the cloud sets one.
	#[serde(default)]
	pub dwell_secs: Option<u32>,
}

/// One entry of a channel index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelPost {
	/// A single artwork.
	Artwork(ArtworkPost),
	/// A nested playlist.
	Playlist(PlaylistPost),
}

impl ChannelPost {
	/// Post id of the entry.
	#[must_use]
	pub fn post_id(&self) -> PostId {
		match self {
			Self::Artwork(a) => a.post_id,
			Self::Playlist(p) => p.post_id,
		}
	}

	/// First artwork of the entry, if any.
	#[must_use]
	pub fn first_artwork(&self) -> Option<&ArtworkPost> {
		match self {
			Self::Artwork(a) => Some(a),
			Self::Playlist(p) => p.entries.first(),
		}
	}
}

/// On-screen message classes posted to the render surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMessage {
	/// Clear any channel message.
	None,
	/// Index is being fetched.
	Loading,
	/// Index known, waiting for asset files.
	Downloading,
	/// Channel failed to load.
	Error,
	/// Channel loaded but has no posts.
	Empty,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn channel_ids_are_stable() {
		assert_eq!(ChannelKind::All.channel_id(None).as_str(), "all");
		assert_eq!(
			ChannelKind::User.channel_id(Some("kury")).as_str(),
			"user/kury"
		);
		assert_eq!(
			ChannelKind::Hashtag.channel_id(Some("pixelart")).as_str(),
			"hashtag/pixelart"
		);
	}

	#[test]
	fn playlist_first_artwork_is_first_entry() {
		let art = ArtworkPost {
			post_id: PostId(7),
			storage_key: "k".into(),
			url: "https://x/y.webp".into(),
			kind: PostKind::Webp,
			owner: String::new(),
			width: 0,
			height: 0,
			frame_count: 1,
			transparency: false,
			dwell_secs: None,
		};
		let post = ChannelPost::Playlist(PlaylistPost {
			post_id: PostId(1),
			entries: vec![art.clone()],
			dwell_secs: None,
		});
		assert_eq!(post.first_artwork(), Some(&art));
		assert_eq!(post.post_id(), PostId(1));
	}
}

//! JSON envelopes carried over the broker session.
//!
//! Every request object carries `request_id` and `player_key`; every response
//! carries `request_id` and `success`, plus `error`/`error_code` on failure.
//! Response fields beyond the envelope are dictated by the cloud and ride
//! through as opaque JSON; missing optional fields map to zero/empty.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::{ArtworkPost, ChannelKind, PlayOrder};
use crate::ids::{CorrelationId, PlayerKey, PostId};

/// Envelope attached to every outgoing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
	/// Correlation id echoed back by the response.
	pub request_id: CorrelationId,
	/// Identity of the requesting player.
	pub player_key: PlayerKey,
	/// Cloud method name, e.g. `"channel.get_posts"`.
	pub method: String,
	/// Method parameters, pass-through JSON.
	#[serde(default)]
	pub params: Value,
}

/// Envelope of every inbound response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
	/// Correlation id of the request this answers.
	pub request_id: CorrelationId,
	/// Whether the cloud accepted the request.
	#[serde(default)]
	pub success: bool,
	/// Human-readable error, present on failure.
	#[serde(default)]
	pub error: Option<String>,
	/// Machine-readable error code, present on failure.
	#[serde(default)]
	pub error_code: Option<i64>,
	/// Remaining response fields, opaque to the correlator.
	#[serde(flatten)]
	pub body: Value,
}

/// Periodic status heartbeat published while connected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHeartbeat {
	/// Identity of the player.
	pub player_key: PlayerKey,
	/// Firmware version string.
	pub firmware_version: String,
	/// Seconds since the agent started.
	pub uptime_secs: u64,
	/// Channel currently adopted for playback, if any.
	#[serde(default)]
	pub current_channel: Option<String>,
}

/// Cloud-to-player commands arriving on the command topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
	/// Switch playback to a channel.
	SwitchChannel {
		/// Kind of channel.
		kind: ChannelKind,
		/// Identifier for user/hashtag channels.
		#[serde(default)]
		identifier: Option<String>,
	},
	/// Show one artwork immediately, outside channel playback.
	ShowArtwork {
		/// The artwork to display.
		post: ArtworkPost,
	},
	/// Re-index a channel without switching to it.
	RefreshChannel {
		/// Kind of channel.
		kind: ChannelKind,
		/// Identifier for user/hashtag channels.
		#[serde(default)]
		identifier: Option<String>,
	},
}

/// What caused the asset currently on screen to be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewIntent {
	/// An explicit show-this-artwork command.
	Artwork,
	/// Normal channel playback.
	Channel,
}

/// A timed playback-engagement event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewEvent {
	/// Post on screen.
	pub post_id: PostId,
	/// What put it there.
	pub intent: ViewIntent,
	/// Global play-order setting at emission time.
	pub play_order: PlayOrder,
	/// Name of the channel being played, or `"sdcard"`.
	pub channel: String,
	/// Channel identifier (user name, hashtag) when the channel has one.
	#[serde(default)]
	pub identifier: Option<String>,
	/// Identity of the reporting player.
	pub player_key: PlayerKey,
	/// Whether the cloud should acknowledge the event.
	#[serde(default)]
	pub ack_requested: bool,
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;

	#[test]
	fn response_envelope_tolerates_missing_optionals() {
		let parsed: ResponseEnvelope = serde_json::from_value(json!({
			"request_id": "00112233445566778899aabbccddeeff",
		}))
		.unwrap();
		assert!(!parsed.success);
		assert_eq!(parsed.error, None);
		assert_eq!(parsed.error_code, None);
	}

	#[test]
	fn response_envelope_keeps_extra_fields_opaque() {
		let parsed: ResponseEnvelope = serde_json::from_value(json!({
			"request_id": "00112233445566778899aabbccddeeff",
			"success": true,
			"has_more": true,
			"next_cursor": "abc",
		}))
		.unwrap();
		assert_eq!(parsed.body.get("has_more"), Some(&json!(true)));
		assert_eq!(parsed.body.get("next_cursor"), Some(&json!("abc")));
	}
}

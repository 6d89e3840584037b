//! Broker topic scheme.
//!
//! All traffic for one player lives under `<prefix>/player/<player_key>/`:
//! per-request correlation topics, a wildcard response subscription, the
//! periodic status topic, and the view telemetry topic.

use crate::ids::{CorrelationId, PlayerKey};

/// Topic namespace prefix shared by every Makapix deployment.
pub const TOPIC_PREFIX: &str = "makapix";

/// Topic a request is published to, carrying its correlation id.
#[must_use]
pub fn request_topic(key: &PlayerKey, corr: &CorrelationId) -> String {
	format!("{TOPIC_PREFIX}/player/{key}/request/{corr}")
}

/// Wildcard filter covering every response topic for this player.
#[must_use]
pub fn response_filter(key: &PlayerKey) -> String {
	format!("{TOPIC_PREFIX}/player/{key}/response/#")
}

/// Prefix shared by all response topics for this player (no wildcard).
#[must_use]
pub fn response_prefix(key: &PlayerKey) -> String {
	format!("{TOPIC_PREFIX}/player/{key}/response/")
}

/// Filter for cloud-to-player command topics.
#[must_use]
pub fn command_filter(key: &PlayerKey) -> String {
	format!("{TOPIC_PREFIX}/player/{key}/command/#")
}

/// Prefix shared by all command topics for this player (no wildcard).
#[must_use]
pub fn command_prefix(key: &PlayerKey) -> String {
	format!("{TOPIC_PREFIX}/player/{key}/command/")
}

/// Whether `topic` is a command topic for this player.
#[must_use]
pub fn is_command_topic(key: &PlayerKey, topic: &str) -> bool {
	topic.starts_with(&command_prefix(key))
}

/// Topic for the periodic status heartbeat.
#[must_use]
pub fn status_topic(key: &PlayerKey) -> String {
	format!("{TOPIC_PREFIX}/player/{key}/status")
}

/// Topic for view telemetry events.
#[must_use]
pub fn view_topic(key: &PlayerKey) -> String {
	format!("{TOPIC_PREFIX}/player/{key}/view")
}

/// Whether `topic` is a response topic for this player.
#[must_use]
pub fn is_response_topic(key: &PlayerKey, topic: &str) -> bool {
	topic.starts_with(&response_prefix(key))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn key() -> PlayerKey {
		PlayerKey::new("0f9b2c1d-4a5e-4f60-9b1a-7c8d9e0f1a2b").unwrap()
	}

	#[test]
	fn request_topic_embeds_correlation_id() {
		let corr = CorrelationId::from_wire("00112233445566778899aabbccddeeff");
		let topic = request_topic(&key(), &corr);
		assert!(topic.ends_with("/request/00112233445566778899aabbccddeeff"));
		assert!(topic.starts_with("makapix/player/"));
	}

	#[test]
	fn response_topics_match_filter_prefix() {
		let key = key();
		let topic = format!("{}abc", response_prefix(&key));
		assert!(is_response_topic(&key, &topic));
		assert!(!is_response_topic(&key, &status_topic(&key)));
	}
}

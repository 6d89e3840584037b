//! Typed identifiers used across the control plane.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum length of a [`PlayerKey`] in bytes.
pub const PLAYER_KEY_MAX: usize = 36;

/// Maximum length of a broker host name in bytes.
pub const BROKER_HOST_MAX: usize = 63;

/// Opaque identifier assigned by the cloud to this device.
///
/// Both the identity of the player and its authentication subject. Issued
/// once during provisioning and immutable until an explicit reset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerKey(String);

impl PlayerKey {
	/// Wrap a raw key string, rejecting oversized values.
	pub fn new(raw: impl Into<String>) -> Option<Self> {
		let raw = raw.into();
		if raw.is_empty() || raw.len() > PLAYER_KEY_MAX {
			return None;
		}
		Some(Self(raw))
	}

	/// The raw key string.
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for PlayerKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Broker network address: host name plus TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAddr {
	/// Host name, at most [`BROKER_HOST_MAX`] bytes.
	pub host: String,
	/// TCP port.
	pub port: u16,
}

impl fmt::Display for BrokerAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.host, self.port)
	}
}

/// Stable identifier of a channel.
///
/// Remote channels use the cloud-side name (`"all"`, `"promoted"`,
/// `"user/<name>"`, ...); the transient show-this-now channel uses the
/// `"artwork"` sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
	/// The raw id string.
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ChannelId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Cloud-side integer id of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub i64);

/// Correlation identifier for request/response matching over pub/sub.
///
/// A random 128-bit value rendered as 32 lowercase hex characters. Globally
/// unique for the lifetime of the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
	/// Generate a fresh random correlation id.
	#[must_use]
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().simple().to_string())
	}

	/// Wrap an id received on the wire.
	pub fn from_wire(raw: impl Into<String>) -> Self {
		Self(raw.into())
	}

	/// The hex string form.
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for CorrelationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn player_key_rejects_oversize() {
		assert!(PlayerKey::new("a".repeat(PLAYER_KEY_MAX)).is_some());
		assert!(PlayerKey::new("a".repeat(PLAYER_KEY_MAX + 1)).is_none());
		assert!(PlayerKey::new("").is_none());
	}

	#[test]
	fn correlation_id_is_32_hex_chars() {
		let id = CorrelationId::generate();
		assert_eq!(id.as_str().len(), 32);
		assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn correlation_ids_are_unique() {
		let a = CorrelationId::generate();
		let b = CorrelationId::generate();
		assert_ne!(a, b);
	}
}

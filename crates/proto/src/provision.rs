//! Enrollment HTTP API payloads.
//!
//! Two endpoints: `POST /provision` issues a player key and a short
//! registration code; `GET /player/{player_key}/credentials` returns the
//! mTLS material once a human has completed registration on the companion
//! site (404 until then).

use serde::{Deserialize, Serialize};

use crate::ids::PlayerKey;

/// Lifetime of a registration code in seconds (15 minutes).
pub const REGISTRATION_CODE_TTL_SECS: u64 = 15 * 60;

/// Body of `POST /provision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
	/// Device model string.
	pub model: String,
	/// Firmware version string.
	pub firmware_version: String,
}

/// Successful response of `POST /provision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionResponse {
	/// Newly issued player identity.
	pub player_key: PlayerKey,
	/// 6-character human-readable code to enter on the companion site.
	pub registration_code: String,
	/// ISO-8601 expiry of the code.
	pub expires_at: String,
	/// Broker host to connect to once registered.
	pub mqtt_host: String,
	/// Broker port.
	pub mqtt_port: u16,
}

/// Successful response of `GET /player/{player_key}/credentials`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsResponse {
	/// PEM-encoded certificate-authority chain.
	pub ca_pem: String,
	/// PEM-encoded client certificate.
	pub cert_pem: String,
	/// PEM-encoded client private key.
	pub key_pem: String,
	/// Broker host override, when the cloud moved the player.
	#[serde(default)]
	pub mqtt_host: Option<String>,
	/// Broker port override.
	#[serde(default)]
	pub mqtt_port: Option<u16>,
}

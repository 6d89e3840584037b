//! Agent configuration.
//!
//! Loaded from a TOML file with defaults for every field; the binary may
//! override the state directory on the command line.

use std::path::{Path, PathBuf};

use makapix_proto::PlayOrder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("i/o error reading {path}: {error}")]
	Io {
		path: PathBuf,
		error: std::io::Error,
	},

	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),
}

/// Static configuration of the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
	/// Root directory for the KV/blob store, channel indices, and vault.
	pub state_dir: PathBuf,
	/// Base URL of the enrollment HTTP API.
	pub provisioning_url: String,
	/// Device model reported during enrollment.
	pub device_model: String,
	/// Firmware version reported during enrollment and in heartbeats.
	pub firmware_version: String,
	/// Build-time default broker host, used when neither the credential
	/// response nor the store carries one.
	pub default_broker_host: String,
	/// Build-time default broker port.
	pub default_broker_port: u16,
	/// Global play order.
	pub play_order: PlayOrder,
}

impl Default for AgentConfig {
	fn default() -> Self {
		Self {
			state_dir: dirs::data_dir()
				.unwrap_or_else(|| PathBuf::from("/var/lib"))
				.join("makapix"),
			provisioning_url: "https://api.makapix.net".to_string(),
			device_model: "makapix-frame".to_string(),
			firmware_version: env!("CARGO_PKG_VERSION").to_string(),
			default_broker_host: "mqtt.makapix.net".to_string(),
			default_broker_port: 8883,
			play_order: PlayOrder::Original,
		}
	}
}

impl AgentConfig {
	/// Load from a TOML file. A missing file yields the defaults.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let raw = match std::fs::read_to_string(path) {
			Ok(raw) => raw,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Ok(Self::default());
			}
			Err(error) => {
				return Err(ConfigError::Io {
					path: path.to_path_buf(),
					error,
				});
			}
		};
		Ok(toml::from_str(&raw)?)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn missing_file_yields_defaults() {
		let config = AgentConfig::load(Path::new("/nonexistent/makapix.toml")).unwrap();
		assert_eq!(config.default_broker_port, 8883);
	}

	#[test]
	fn partial_file_fills_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("agent.toml");
		std::fs::write(&path, "device_model = \"frame-mini\"\n").unwrap();

		let config = AgentConfig::load(&path).unwrap();
		assert_eq!(config.device_model, "frame-mini");
		assert_eq!(config.provisioning_url, "https://api.makapix.net");
	}
}

//! Two-phase enrollment with the cloud service.
//!
//! Phase A issues a player key and a human-readable registration code.
//! Phase B polls for the mTLS material until a human completes registration
//! on the companion site, then installs everything atomically enough that a
//! reader either sees the full set or treats the device as unregistered.

use std::time::Duration;

use async_trait::async_trait;
use makapix_proto::{CredentialsResponse, PlayerKey, ProvisionRequest, ProvisionResponse};
use thiserror::Error;

/// Poll period for phase B.
pub const CREDENTIAL_POLL_PERIOD: Duration = Duration::from_secs(3);
/// Poll cap: 300 polls at 3 s matches the 15-minute code expiry.
pub const CREDENTIAL_POLL_CAP: u32 = 300;

/// Errors from the enrollment API.
#[derive(Debug, Error)]
pub enum EnrollmentError {
	/// Transport-level failure.
	#[error("enrollment transport error: {0}")]
	Transport(String),

	/// Unexpected HTTP status.
	#[error("enrollment service returned status {0}")]
	Status(u16),

	/// Body did not decode.
	#[error("malformed enrollment response: {0}")]
	Decode(String),
}

/// Outcome of one credential poll.
#[derive(Debug)]
pub enum CredentialOutcome {
	/// Registration complete; material delivered.
	Ready(Box<CredentialsResponse>),
	/// The human has not finished registration yet. Keep polling.
	Pending,
}

/// The enrollment HTTP API, seen from the core.
#[async_trait]
pub trait EnrollmentApi: Send + Sync {
	/// `POST /provision`: issue an identity and registration code.
	async fn provision(
		&self,
		request: &ProvisionRequest,
	) -> Result<ProvisionResponse, EnrollmentError>;

	/// `GET /player/{player_key}/credentials`: fetch mTLS material.
	/// A 404 maps to [`CredentialOutcome::Pending`].
	async fn credentials(&self, key: &PlayerKey) -> Result<CredentialOutcome, EnrollmentError>;
}

/// Production enrollment client over HTTPS.
pub struct HttpEnrollment {
	base_url: String,
	client: reqwest::Client,
}

impl HttpEnrollment {
	/// Build a client for a base URL (no trailing slash).
	#[must_use]
	pub fn new(base_url: impl Into<String>) -> Self {
		Self {
			base_url: base_url.into(),
			client: reqwest::Client::new(),
		}
	}
}

#[async_trait]
impl EnrollmentApi for HttpEnrollment {
	async fn provision(
		&self,
		request: &ProvisionRequest,
	) -> Result<ProvisionResponse, EnrollmentError> {
		let url = format!("{}/provision", self.base_url);
		let response = self
			.client
			.post(&url)
			.json(request)
			.send()
			.await
			.map_err(|e| EnrollmentError::Transport(e.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			return Err(EnrollmentError::Status(status.as_u16()));
		}
		response
			.json()
			.await
			.map_err(|e| EnrollmentError::Decode(e.to_string()))
	}

	async fn credentials(&self, key: &PlayerKey) -> Result<CredentialOutcome, EnrollmentError> {
		let url = format!("{}/player/{key}/credentials", self.base_url);
		let response = self
			.client
			.get(&url)
			.send()
			.await
			.map_err(|e| EnrollmentError::Transport(e.to_string()))?;

		let status = response.status();
		if status.as_u16() == 404 {
			return Ok(CredentialOutcome::Pending);
		}
		if !status.is_success() {
			return Err(EnrollmentError::Status(status.as_u16()));
		}
		let creds: CredentialsResponse = response
			.json()
			.await
			.map_err(|e| EnrollmentError::Decode(e.to_string()))?;
		Ok(CredentialOutcome::Ready(Box::new(creds)))
	}
}

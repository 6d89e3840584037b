//! Error types for the session and correlation layers.

use thiserror::Error;

/// Errors surfaced by the transport seam.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
	/// TCP/TLS session could not be established.
	#[error("transport connect failed: {0}")]
	ConnectFailed(String),

	/// The broker rejected the TLS client certificate.
	#[error("broker rejected client authentication")]
	AuthRejected,

	/// Operation attempted without a live session.
	#[error("not connected")]
	NotConnected,

	/// The link was closed underneath the operation.
	#[error("link closed")]
	Closed,
}

/// Errors surfaced by `publish_and_wait`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
	/// Session is not connected.
	#[error("not connected")]
	NotConnected,

	/// Session connected but the response subscription was never
	/// acknowledged within the readiness window.
	#[error("session not ready")]
	NotReady,

	/// The publish itself failed.
	#[error("publish failed: {0}")]
	PublishFailed(TransportError),

	/// No response arrived across all publish attempts.
	#[error("request timed out")]
	Timeout,

	/// The response arrived but could not be parsed.
	#[error("invalid response: {0}")]
	InvalidResponse(String),
}

/// Result alias for correlator operations.
pub type RequestResult<T> = std::result::Result<T, RequestError>;

//! Error types for the storage layer.

use thiserror::Error;

/// Errors surfaced by storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
	/// The key or blob does not exist. Expected for unregistered devices.
	#[error("not found: {0}")]
	NotFound(String),

	/// The object exists but is incomplete; callers treat this as absent.
	#[error("truncated object: {0}")]
	Truncated(String),

	/// Underlying driver failure.
	#[error("storage i/o error: {0}")]
	Io(#[from] std::io::Error),

	/// Malformed key name or value.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

//! Error types for channels and switching.

use thiserror::Error;

/// Errors from channel index acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
	/// The cloud does not know the channel (empty index is acceptable).
	#[error("channel not found")]
	NotFound,

	/// The request layer failed.
	#[error("index request failed: {0}")]
	Request(String),

	/// The cached or fetched index could not be decoded.
	#[error("malformed index: {0}")]
	Malformed(String),
}

/// Errors from channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
	/// Index acquisition failed.
	#[error(transparent)]
	Index(#[from] IndexError),

	/// Local persistence of the index failed.
	#[error("index persistence failed: {0}")]
	Io(#[from] std::io::Error),
}

/// Outcome classification for a channel switch.
///
/// Hard failures never escape the switch procedure: it degrades to local
/// storage instead. Preemption is the one non-success outcome the switch
/// task must react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SwitchError {
	/// A newer request preempted this switch; the pending slot carries it.
	#[error("switch preempted")]
	Preempted,
}

/// Result alias for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

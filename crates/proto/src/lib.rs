//! Wire types for the Makapix player control plane.
//!
//! This crate defines the data structures exchanged between the player agent
//! and the cloud service: typed identifiers, the broker topic scheme, the
//! JSON request/response envelopes, provisioning payloads, and the channel
//! content model. It carries no I/O of its own.

pub mod channel;
pub mod ids;
pub mod provision;
pub mod topics;
pub mod wire;

pub use channel::{
	ArtworkPost, ChannelKind, ChannelMessage, ChannelPost, PlayOrder, PlaylistPost, PostKind,
};
pub use ids::{BrokerAddr, ChannelId, CorrelationId, PlayerKey, PostId};
pub use provision::{CredentialsResponse, ProvisionRequest, ProvisionResponse};
pub use wire::{Command, RequestEnvelope, ResponseEnvelope, StatusHeartbeat, ViewEvent, ViewIntent};

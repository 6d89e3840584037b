//! Persistent state for the Makapix player agent.
//!
//! # Purpose
//!
//! - Define the two storage partitions the agent depends on: a flat
//!   key-value namespace for small, frequently read enrollment values and a
//!   blob partition for the multi-kilobyte mTLS PEM material.
//! - Define [`CredentialStore`], the typed facade the rest of the core uses.
//!
//! # Mental model
//!
//! - *Registered* means the identity is stored AND all three PEM objects are
//!   present and readable. Anything less reads as unregistered.
//! - `put_certs` performs three separate writes and is not atomic. Readers
//!   that find partial state treat it as absent; re-provisioning may
//!   overwrite any partial state.
//! - Truncation is observable: a PEM blob that lost its END marker reads as
//!   [`StoreError::Truncated`], which every caller maps to absence.

mod backend;
mod credentials;
mod error;

pub use backend::{BlobStore, FsStore, KvStore};
pub use credentials::{CredentialStore, KV_MQTT_HOST, KV_MQTT_PORT, KV_PLAYER_KEY};
pub use error::{Result, StoreError};

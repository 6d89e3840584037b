//! Cloud command dispatch.
//!
//! Drains the session's inbound stream, picks out command-topic publishes,
//! and routes them to the channel layer. Malformed commands are logged and
//! dropped; the session continues.

use makapix_bus::BusSession;
use makapix_channel::{ChannelOrchestrator, RefreshCoordinator};
use makapix_proto::{Command, topics};
use tokio::task::JoinHandle;

/// Spawns the command dispatch task.
pub struct CommandDispatcher;

impl CommandDispatcher {
	/// Subscribe to the session and route commands until the session ends.
	pub fn spawn(
		session: BusSession,
		orchestrator: ChannelOrchestrator,
		refresh: RefreshCoordinator,
	) -> JoinHandle<()> {
		let mut rx = session.subscribe_inbound();
		tokio::spawn(async move {
			while let Some(msg) = rx.recv().await {
				let Some(key) = session.player_key() else {
					continue;
				};
				if !topics::is_command_topic(&key, &msg.topic) {
					continue;
				}

				let command: Command = match serde_json::from_slice(&msg.payload) {
					Ok(command) => command,
					Err(e) => {
						tracing::warn!(topic = %msg.topic, error = %e, "malformed command dropped");
						continue;
					}
				};
				tracing::info!(?command, "command received");

				match command {
					Command::SwitchChannel { kind, identifier } => {
						orchestrator.request_channel_switch(kind, identifier.as_deref());
					}
					Command::ShowArtwork { post } => {
						orchestrator.show_artwork(post);
					}
					Command::RefreshChannel { kind, identifier } => {
						refresh.request_refresh(kind, identifier.as_deref()).await;
					}
				}
			}
		})
	}
}

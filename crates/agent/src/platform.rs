//! Platform adapters.
//!
//! Implementations of the collaborator seams that do not belong to the
//! core: the link probe, the last-channel application state, the view
//! sink over the broker session, and stand-ins for the display stack.
//! Deployments replace the stand-ins with the real renderer and a real
//! broker transport; the [`LoopbackConnector`] exists for development runs
//! without a broker.

use std::future::Future;
use std::net::{IpAddr, ToSocketAddrs, UdpSocket};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use makapix_bus::transport::test_helpers::FakeBroker;
use makapix_bus::{
	BrokerConnector, BrokerLink, BusSession, ConnectParams, LinkProbe, Qos, SharedBus, StatusInfo,
	TransportError,
};
use makapix_channel::{
	AppState, ChannelOrchestrator, PlaybackEngine, RenderSurface, ViewRecord, ViewSink,
};
use makapix_proto::{ChannelKind, ChannelMessage, PlayOrder, ViewEvent, topics};
use makapix_store::KvStore;

use crate::config::AgentConfig;

/// Link probe over the host network stack.
pub struct SystemLinkProbe;

impl LinkProbe for SystemLinkProbe {
	fn local_ip(&self) -> Option<IpAddr> {
		// Routing-table trick: no packet is sent for a UDP connect.
		let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
		socket.connect("8.8.8.8:53").ok()?;
		Some(socket.local_addr().ok()?.ip())
	}

	fn resolve(&self, name: &str) -> bool {
		(name, 443).to_socket_addrs().is_ok()
	}
}

/// Last-channel persistence and the global play order, over the KV store.
pub struct KvAppState {
	kv: Arc<dyn KvStore>,
	play_order: PlayOrder,
}

const KV_NAMESPACE: &str = "makapix";
const KV_LAST_KIND: &str = "last_channel_kind";
const KV_LAST_IDENT: &str = "last_channel_ident";

impl KvAppState {
	/// Build over the KV partition with the configured play order.
	#[must_use]
	pub fn new(kv: Arc<dyn KvStore>, play_order: PlayOrder) -> Self {
		Self { kv, play_order }
	}

	/// Channel selection persisted by the previous run, if any.
	#[must_use]
	pub fn last_channel(&self) -> Option<(ChannelKind, Option<String>)> {
		let kind = self.kv.kv_get(KV_NAMESPACE, KV_LAST_KIND).ok()?;
		let kind: ChannelKind = serde_json::from_str(&kind).ok()?;
		let ident = self.kv.kv_get(KV_NAMESPACE, KV_LAST_IDENT).ok();
		Some((kind, ident))
	}
}

impl AppState for KvAppState {
	fn play_order(&self) -> PlayOrder {
		self.play_order
	}

	fn set_last_channel(&self, kind: &ChannelKind, identifier: Option<&str>) {
		if let Ok(kind) = serde_json::to_string(kind)
			&& let Err(e) = self.kv.kv_put(KV_NAMESPACE, KV_LAST_KIND, &kind)
		{
			tracing::debug!(error = %e, "last-channel persistence failed");
		}
		match identifier {
			Some(ident) => {
				let _ = self.kv.kv_put(KV_NAMESPACE, KV_LAST_IDENT, ident);
			}
			None => {
				let _ = self.kv.kv_delete(KV_NAMESPACE, KV_LAST_IDENT);
			}
		}
	}
}

/// View sink publishing to the session's view topic.
pub struct BusViewSink {
	session: BusSession,
}

impl BusViewSink {
	/// Build over the session.
	#[must_use]
	pub fn new(session: BusSession) -> Self {
		Self { session }
	}
}

impl ViewSink for BusViewSink {
	fn emit(&self, record: ViewRecord) {
		let Some(player_key) = self.session.player_key() else {
			return;
		};
		let event = ViewEvent {
			post_id: record.post_id,
			intent: record.intent,
			play_order: record.play_order,
			channel: record.channel,
			identifier: record.identifier,
			player_key: player_key.clone(),
			ack_requested: record.ack_requested,
		};
		let Ok(payload) = serde_json::to_vec(&event) else {
			return;
		};
		if let Err(e) =
			self.session
				.publish(&topics::view_topic(&player_key), &payload, Qos::AtMostOnce)
		{
			tracing::debug!(error = %e, "view publish failed");
		}
	}
}

/// Heartbeat facts sourced from config and the orchestrator.
pub struct AgentStatusInfo {
	firmware_version: String,
	orchestrator: ChannelOrchestrator,
}

impl AgentStatusInfo {
	/// Build from the loaded config and the orchestrator.
	#[must_use]
	pub fn new(config: &AgentConfig, orchestrator: ChannelOrchestrator) -> Self {
		Self {
			firmware_version: config.firmware_version.clone(),
			orchestrator,
		}
	}
}

impl StatusInfo for AgentStatusInfo {
	fn firmware_version(&self) -> String {
		self.firmware_version.clone()
	}

	fn current_channel(&self) -> Option<String> {
		self.orchestrator.current_channel_id().map(|id| id.to_string())
	}
}

/// Shared bus that is never locked (no OTA subsystem on this build).
pub struct NoSharedBus;

impl SharedBus for NoSharedBus {
	fn is_locked(&self) -> bool {
		false
	}

	fn holder(&self) -> Option<String> {
		None
	}
}

/// Driver recovery stand-in; logs and continues.
pub struct NoopDriver;

#[async_trait::async_trait]
impl crate::supervisor::DriverControl for NoopDriver {
	async fn reinit(&self) {
		tracing::warn!("driver reinit requested (no-op on this platform)");
	}
}

/// Playback stand-in that logs adoption and swaps.
#[derive(Default)]
pub struct LogPlayback {
	ready: AtomicBool,
}

impl PlaybackEngine for LogPlayback {
	fn adopt(&self, channel: Arc<dyn makapix_channel::Channel>) {
		self.ready.store(true, Ordering::SeqCst);
		tracing::info!(channel = %channel.channel_id(), "playback adopted channel");
	}

	fn clear_channel(&self) {
		self.ready.store(false, Ordering::SeqCst);
	}

	fn request_swap(&self) {
		tracing::debug!("swap requested");
	}

	fn is_animation_ready(&self) -> bool {
		self.ready.load(Ordering::SeqCst)
	}

	fn fall_back_to_local(&self) {
		tracing::warn!("playback falling back to local storage");
	}
}

/// Render surface stand-in that logs channel messages.
pub struct LogSurface;

impl RenderSurface for LogSurface {
	fn set_channel_message(&self, message: ChannelMessage, detail: Option<String>) {
		match message {
			ChannelMessage::None => tracing::debug!("channel message cleared"),
			_ => tracing::info!(?message, ?detail, "channel message"),
		}
	}
}

/// Development connector: an in-process broker that accepts every session.
///
/// Lets the full agent run end-to-end on a workstation; deployments provide
/// a connector over their MQTT/TLS stack instead.
pub struct LoopbackConnector {
	broker: FakeBroker,
}

impl Default for LoopbackConnector {
	fn default() -> Self {
		Self::new()
	}
}

impl LoopbackConnector {
	/// Create the in-process broker.
	#[must_use]
	pub fn new() -> Self {
		Self {
			broker: FakeBroker::new(),
		}
	}

	/// The underlying broker, for injecting traffic in development.
	#[must_use]
	pub fn broker(&self) -> &FakeBroker {
		&self.broker
	}
}

impl BrokerConnector for LoopbackConnector {
	fn connect(
		&self,
		params: &ConnectParams,
	) -> Pin<Box<dyn Future<Output = Result<BrokerLink, TransportError>> + Send>> {
		self.broker.connect(params)
	}
}

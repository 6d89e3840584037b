//! The authenticated broker session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use makapix_proto::{BrokerAddr, PlayerKey, topics};
use tokio::sync::{mpsc, watch};

use crate::error::TransportError;
use crate::transport::{BrokerConnector, BrokerLink, ConnectParams, LinkEvent, LinkHandle, Qos, TlsMaterial};

/// Consecutive auth failures that trigger quarantine.
pub const AUTH_QUARANTINE_THRESHOLD: u32 = 3;

/// Parameters for one session: identity, broker address, TLS material.
#[derive(Debug, Clone)]
pub struct SessionConfig {
	/// Player identity; doubles as the transport client id.
	pub player_key: PlayerKey,
	/// Broker address.
	pub addr: BrokerAddr,
	/// Mutual-TLS material.
	pub tls: TlsMaterial,
}

impl SessionConfig {
	fn connect_params(&self) -> ConnectParams {
		ConnectParams {
			host: self.addr.host.clone(),
			port: self.addr.port,
			client_id: self.player_key.as_str().to_string(),
			tls: self.tls.clone(),
		}
	}
}

/// Edge-only connection events delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEdge {
	/// Transport transitioned disconnected → connected.
	Connected,
	/// Transport transitioned connected → disconnected.
	Disconnected,
	/// Auth-failure counter reached the quarantine threshold.
	AuthQuarantine,
}

/// An inbound publish matching one of the session's subscriptions.
#[derive(Debug, Clone)]
pub struct InboundMessage {
	/// Topic the message arrived on.
	pub topic: String,
	/// Raw payload bytes.
	pub payload: Vec<u8>,
}

/// Owner of the broker link and its lifecycle.
///
/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct BusSession {
	inner: Arc<SessionInner>,
}

struct SessionInner {
	connector: Arc<dyn BrokerConnector>,
	state: Mutex<SessionState>,
	/// Generation token; bumped by `init`/`deinit` so stale pump tasks
	/// cannot mutate a newer session's state.
	epoch: AtomicU64,
	ready_tx: watch::Sender<bool>,
	edges: Mutex<Vec<mpsc::UnboundedSender<SessionEdge>>>,
	inbound: Mutex<Vec<mpsc::UnboundedSender<InboundMessage>>>,
}

#[derive(Default)]
struct SessionState {
	config: Option<SessionConfig>,
	handle: Option<Arc<dyn LinkHandle>>,
	connected: bool,
	ever_connected: bool,
	auth_failures: u32,
}

impl BusSession {
	/// Create a session manager over a connector. No I/O happens here.
	#[must_use]
	pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
		let (ready_tx, _) = watch::channel(false);
		Self {
			inner: Arc::new(SessionInner {
				connector,
				state: Mutex::new(SessionState::default()),
				epoch: AtomicU64::new(0),
				ready_tx,
				edges: Mutex::new(Vec::new()),
				inbound: Mutex::new(Vec::new()),
			}),
		}
	}

	/// Prepare the session. Any previous link must be torn down first.
	pub fn init(&self, config: SessionConfig) {
		self.inner.epoch.fetch_add(1, Ordering::SeqCst);
		let mut state = self.inner.state.lock().unwrap();
		state.handle = None;
		state.connected = false;
		state.config = Some(config);
		let _ = self.inner.ready_tx.send(false);
	}

	/// Initiate the session.
	///
	/// Resolves once the transport handshake completed. On success the
	/// response and command filters are subscribed and the pump task is
	/// running; readiness follows on the response-filter SubAck.
	pub async fn connect(&self) -> Result<(), TransportError> {
		let (params, key, epoch) = {
			let state = self.inner.state.lock().unwrap();
			if state.connected {
				return Ok(());
			}
			let Some(config) = state.config.as_ref() else {
				return Err(TransportError::ConnectFailed("session not initialized".into()));
			};
			(
				config.connect_params(),
				config.player_key.clone(),
				self.inner.epoch.load(Ordering::SeqCst),
			)
		};

		match self.inner.connector.connect(&params).await {
			Ok(link) => self.inner.clone().adopt_link(link, key, epoch),
			Err(TransportError::AuthRejected) => {
				self.inner.note_auth_failure();
				Err(TransportError::AuthRejected)
			}
			Err(e) => Err(e),
		}
	}

	/// Tear the link down, delivering the disconnect edge synchronously.
	pub fn disconnect(&self) {
		let handle = {
			let mut state = self.inner.state.lock().unwrap();
			state.handle.take()
		};
		if let Some(handle) = handle {
			handle.disconnect();
		}
		self.inner.set_connected(false, None);
	}

	/// Release the session so a subsequent [`BusSession::init`] is safe.
	pub fn deinit(&self) {
		self.disconnect();
		self.inner.epoch.fetch_add(1, Ordering::SeqCst);
		let mut state = self.inner.state.lock().unwrap();
		state.config = None;
	}

	/// Whether the transport session is up.
	#[must_use]
	pub fn is_connected(&self) -> bool {
		self.inner.state.lock().unwrap().connected
	}

	/// Whether the session is up AND the response subscription is
	/// acknowledged. Precondition for RPC.
	#[must_use]
	pub fn is_ready(&self) -> bool {
		*self.inner.ready_tx.borrow()
	}

	/// Whether this session has connected successfully at least once.
	#[must_use]
	pub fn ever_connected(&self) -> bool {
		self.inner.state.lock().unwrap().ever_connected
	}

	/// Current consecutive auth-failure count.
	#[must_use]
	pub fn auth_failures(&self) -> u32 {
		self.inner.state.lock().unwrap().auth_failures
	}

	/// Zero the auth-failure counter (on re-provisioning).
	pub fn reset_auth_failures(&self) {
		self.inner.state.lock().unwrap().auth_failures = 0;
	}

	/// Identity the session was initialized with.
	#[must_use]
	pub fn player_key(&self) -> Option<PlayerKey> {
		let state = self.inner.state.lock().unwrap();
		state.config.as_ref().map(|c| c.player_key.clone())
	}

	/// Block until ready or until `timeout` elapses.
	pub async fn wait_ready(&self, timeout: Duration) -> bool {
		let mut rx = self.inner.ready_tx.subscribe();
		if *rx.borrow() {
			return true;
		}
		tokio::time::timeout(timeout, async {
			while rx.changed().await.is_ok() {
				if *rx.borrow() {
					return true;
				}
			}
			false
		})
		.await
		.unwrap_or(false)
	}

	/// Publish a payload on the live link.
	pub fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), TransportError> {
		let handle = {
			let state = self.inner.state.lock().unwrap();
			if !state.connected {
				return Err(TransportError::NotConnected);
			}
			state.handle.clone()
		};
		let Some(handle) = handle else {
			return Err(TransportError::NotConnected);
		};
		handle.publish(topic, payload, qos)
	}

	/// Subscribe to connection edges.
	pub fn subscribe_edges(&self) -> mpsc::UnboundedReceiver<SessionEdge> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.inner.edges.lock().unwrap().push(tx);
		rx
	}

	/// Subscribe to inbound publishes.
	pub fn subscribe_inbound(&self) -> mpsc::UnboundedReceiver<InboundMessage> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.inner.inbound.lock().unwrap().push(tx);
		rx
	}
}

impl SessionInner {
	/// Install a freshly connected link, unless the session moved on.
	fn adopt_link(
		self: Arc<Self>,
		link: BrokerLink,
		key: PlayerKey,
		epoch: u64,
	) -> Result<(), TransportError> {
		let BrokerLink { handle, events } = link;

		{
			let mut state = self.state.lock().unwrap();
			if self.epoch.load(Ordering::SeqCst) != epoch {
				drop(state);
				handle.disconnect();
				return Err(TransportError::Closed);
			}
			state.handle = Some(handle.clone());
		}

		self.set_connected(true, Some(epoch));

		let response_filter = topics::response_filter(&key);
		if let Err(e) = handle.subscribe(&response_filter) {
			tracing::warn!(error = %e, "response subscription failed");
		}
		if let Err(e) = handle.subscribe(&topics::command_filter(&key)) {
			tracing::warn!(error = %e, "command subscription failed");
		}

		tokio::spawn(self.pump(events, response_filter, epoch));
		Ok(())
	}

	/// Drain link events until disconnect or the session moves on.
	async fn pump(
		self: Arc<Self>,
		mut events: mpsc::UnboundedReceiver<LinkEvent>,
		response_filter: String,
		epoch: u64,
	) {
		loop {
			let event = events.recv().await;
			if self.epoch.load(Ordering::SeqCst) != epoch {
				return;
			}
			match event {
				Some(LinkEvent::SubAck { filter }) => {
					if filter == response_filter {
						tracing::debug!("response subscription acknowledged");
						let _ = self.ready_tx.send(true);
					}
				}
				Some(LinkEvent::Publish { topic, payload }) => {
					self.fan_out_inbound(InboundMessage { topic, payload });
				}
				Some(LinkEvent::Disconnected { reason }) => {
					tracing::info!(%reason, "broker link dropped");
					self.set_connected(false, Some(epoch));
					return;
				}
				None => {
					self.set_connected(false, Some(epoch));
					return;
				}
			}
		}
	}

	/// Flip the connected flag, emitting an edge only on a real transition.
	fn set_connected(&self, connected: bool, epoch: Option<u64>) {
		let edge = {
			let mut state = self.state.lock().unwrap();
			if let Some(epoch) = epoch
				&& self.epoch.load(Ordering::SeqCst) != epoch
			{
				return;
			}
			if state.connected == connected {
				None
			} else {
				state.connected = connected;
				if connected {
					state.ever_connected = true;
					state.auth_failures = 0;
					Some(SessionEdge::Connected)
				} else {
					state.handle = None;
					Some(SessionEdge::Disconnected)
				}
			}
		};

		if let Some(edge) = edge {
			if edge == SessionEdge::Disconnected {
				let _ = self.ready_tx.send(false);
			}
			self.fan_out_edge(edge);
		}
	}

	/// Count a TLS auth rejection; emits quarantine at the threshold.
	fn note_auth_failure(&self) {
		let quarantined = {
			let mut state = self.state.lock().unwrap();
			state.auth_failures += 1;
			tracing::warn!(failures = state.auth_failures, "broker rejected authentication");
			state.auth_failures == AUTH_QUARANTINE_THRESHOLD
		};
		if quarantined {
			self.fan_out_edge(SessionEdge::AuthQuarantine);
		}
	}

	fn fan_out_edge(&self, edge: SessionEdge) {
		let mut edges = self.edges.lock().unwrap();
		edges.retain(|tx| tx.send(edge).is_ok());
	}

	fn fan_out_inbound(&self, msg: InboundMessage) {
		let mut inbound = self.inbound.lock().unwrap();
		inbound.retain(|tx| tx.send(msg.clone()).is_ok());
	}
}

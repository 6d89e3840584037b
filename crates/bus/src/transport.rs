//! Transport seam between the session manager and the network stack.
//!
//! The core is transport-agnostic: production wires an MQTT-over-mTLS
//! implementation behind [`BrokerConnector`], tests use the in-process
//! [`test_helpers::FakeBroker`]. The seam mirrors how the session consumes
//! the link: one connect call yielding a command handle plus an event
//! stream, drained by a single pump task.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::TransportError;

/// Delivery guarantee for a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
	/// Fire and forget.
	AtMostOnce,
	/// At-least-once; requests use this, the correlator deduplicates.
	AtLeastOnce,
}

/// PEM material for mutual TLS.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
	/// Certificate-authority chain.
	pub ca_pem: String,
	/// Client certificate.
	pub cert_pem: String,
	/// Client private key.
	pub key_pem: String,
}

/// Events emitted by a live link.
#[derive(Debug, Clone)]
pub enum LinkEvent {
	/// The broker acknowledged a subscription.
	SubAck {
		/// The filter that was acknowledged.
		filter: String,
	},
	/// An inbound publish matched one of our subscriptions.
	Publish {
		/// Topic the message arrived on.
		topic: String,
		/// Raw payload bytes.
		payload: Vec<u8>,
	},
	/// The link dropped.
	Disconnected {
		/// Human-readable reason for logs.
		reason: String,
	},
}

/// Command half of a live link.
pub trait LinkHandle: Send + Sync {
	/// Publish a payload to a topic.
	fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), TransportError>;
	/// Subscribe to a topic filter; acknowledged via [`LinkEvent::SubAck`].
	fn subscribe(&self, filter: &str) -> Result<(), TransportError>;
	/// Tear the link down. The event stream ends after this.
	fn disconnect(&self);
}

/// A successfully established link: command handle plus event stream.
pub struct BrokerLink {
	/// Command half.
	pub handle: Arc<dyn LinkHandle>,
	/// Event half, drained by the session pump task.
	pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

impl std::fmt::Debug for BrokerLink {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BrokerLink").finish_non_exhaustive()
	}
}

/// Connection parameters handed to the connector.
#[derive(Debug, Clone)]
pub struct ConnectParams {
	/// Broker host.
	pub host: String,
	/// Broker port.
	pub port: u16,
	/// Client identity (the player key).
	pub client_id: String,
	/// Mutual-TLS material.
	pub tls: TlsMaterial,
}

/// Factory for broker links.
///
/// Production implementations establish a TLS-mutual session; the returned
/// future resolves once the handshake completed (or failed). A rejected
/// client certificate surfaces as [`TransportError::AuthRejected`] so the
/// session manager can count it toward quarantine.
pub trait BrokerConnector: Send + Sync + 'static {
	/// Establish one session.
	fn connect(
		&self,
		params: &ConnectParams,
	) -> Pin<Box<dyn Future<Output = Result<BrokerLink, TransportError>> + Send>>;
}

/// Link-layer probe the reconnect loop and health watchdog consult.
pub trait LinkProbe: Send + Sync {
	/// Local IP address, if the link layer is up.
	fn local_ip(&self) -> Option<IpAddr>;
	/// Resolve a known name; used as the periodic link-health check.
	fn resolve(&self, name: &str) -> bool;
}

/// External mutex held by other subsystems (e.g. OTA) around the shared bus.
///
/// The status publisher skips a cycle while it is locked.
pub trait SharedBus: Send + Sync {
	/// Whether the bus is currently locked by another subsystem.
	fn is_locked(&self) -> bool;
	/// Name of the holder, for logs.
	fn holder(&self) -> Option<String>;
}

/// Test doubles for the transport seam.
#[doc(hidden)]
pub mod test_helpers {
	use std::collections::VecDeque;
	use std::sync::Mutex;

	use super::*;

	/// Scriptable in-memory broker.
	///
	/// Connect outcomes are popped from a queue (default: success);
	/// publishes are recorded; subscriptions are acknowledged immediately
	/// unless `auto_suback` is off. Tests inject inbound publishes and
	/// disconnect edges through the current link's event sender.
	#[derive(Clone)]
	pub struct FakeBroker {
		inner: Arc<FakeBrokerInner>,
	}

	struct FakeBrokerInner {
		connect_script: Mutex<VecDeque<Result<(), TransportError>>>,
		published: Mutex<Vec<(String, Vec<u8>, Qos)>>,
		subscriptions: Mutex<Vec<String>>,
		auto_suback: Mutex<bool>,
		current: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
		connect_count: Mutex<u32>,
	}

	impl Default for FakeBroker {
		fn default() -> Self {
			Self::new()
		}
	}

	impl FakeBroker {
		/// Create a broker that accepts every connect.
		#[must_use]
		pub fn new() -> Self {
			Self {
				inner: Arc::new(FakeBrokerInner {
					connect_script: Mutex::new(VecDeque::new()),
					published: Mutex::new(Vec::new()),
					subscriptions: Mutex::new(Vec::new()),
					auto_suback: Mutex::new(true),
					current: Mutex::new(None),
					connect_count: Mutex::new(0),
				}),
			}
		}

		/// Queue the outcome of the next connect attempt.
		pub fn script_connect(&self, outcome: Result<(), TransportError>) {
			self.inner.connect_script.lock().unwrap().push_back(outcome);
		}

		/// Suppress automatic SubAck delivery.
		pub fn set_auto_suback(&self, on: bool) {
			*self.inner.auto_suback.lock().unwrap() = on;
		}

		/// All recorded publishes.
		pub fn published(&self) -> Vec<(String, Vec<u8>, Qos)> {
			self.inner.published.lock().unwrap().clone()
		}

		/// All recorded subscription filters.
		pub fn subscriptions(&self) -> Vec<String> {
			self.inner.subscriptions.lock().unwrap().clone()
		}

		/// Number of connect attempts observed.
		pub fn connect_count(&self) -> u32 {
			*self.inner.connect_count.lock().unwrap()
		}

		/// Inject an inbound publish on the current link.
		pub fn inject(&self, topic: &str, payload: &[u8]) {
			if let Some(tx) = self.inner.current.lock().unwrap().as_ref() {
				let _ = tx.send(LinkEvent::Publish {
					topic: topic.to_string(),
					payload: payload.to_vec(),
				});
			}
		}

		/// Deliver a SubAck for a filter on the current link.
		pub fn ack_subscription(&self, filter: &str) {
			if let Some(tx) = self.inner.current.lock().unwrap().as_ref() {
				let _ = tx.send(LinkEvent::SubAck {
					filter: filter.to_string(),
				});
			}
		}

		/// Drop the current link from the broker side.
		pub fn force_disconnect(&self, reason: &str) {
			if let Some(tx) = self.inner.current.lock().unwrap().take() {
				let _ = tx.send(LinkEvent::Disconnected {
					reason: reason.to_string(),
				});
			}
		}
	}

	struct FakeHandle {
		inner: Arc<FakeBrokerInner>,
		events: mpsc::UnboundedSender<LinkEvent>,
	}

	impl LinkHandle for FakeHandle {
		fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), TransportError> {
			if self.events.is_closed() {
				return Err(TransportError::NotConnected);
			}
			self.inner
				.published
				.lock()
				.unwrap()
				.push((topic.to_string(), payload.to_vec(), qos));
			Ok(())
		}

		fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
			self.inner
				.subscriptions
				.lock()
				.unwrap()
				.push(filter.to_string());
			if *self.inner.auto_suback.lock().unwrap() {
				let _ = self.events.send(LinkEvent::SubAck {
					filter: filter.to_string(),
				});
			}
			Ok(())
		}

		fn disconnect(&self) {
			let _ = self.events.send(LinkEvent::Disconnected {
				reason: "client disconnect".to_string(),
			});
		}
	}

	impl BrokerConnector for FakeBroker {
		fn connect(
			&self,
			_params: &ConnectParams,
		) -> Pin<Box<dyn Future<Output = Result<BrokerLink, TransportError>> + Send>> {
			let inner = self.inner.clone();
			Box::pin(async move {
				*inner.connect_count.lock().unwrap() += 1;
				let scripted = inner.connect_script.lock().unwrap().pop_front();
				if let Some(Err(e)) = scripted {
					return Err(e);
				}

				let (tx, rx) = mpsc::unbounded_channel();
				*inner.current.lock().unwrap() = Some(tx.clone());
				let handle = Arc::new(FakeHandle { inner, events: tx });
				Ok(BrokerLink { handle, events: rx })
			})
		}
	}

	/// Probe that always reports an address and resolving DNS.
	pub struct AlwaysUpProbe;

	impl LinkProbe for AlwaysUpProbe {
		fn local_ip(&self) -> Option<IpAddr> {
			Some(IpAddr::from([192, 168, 1, 20]))
		}

		fn resolve(&self, _name: &str) -> bool {
			true
		}
	}

	/// Shared bus that is never locked.
	pub struct UnlockedBus;

	impl SharedBus for UnlockedBus {
		fn is_locked(&self) -> bool {
			false
		}

		fn holder(&self) -> Option<String> {
			None
		}
	}
}

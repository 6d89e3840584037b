//! Request/response correlation over pub/sub.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use makapix_proto::{CorrelationId, RequestEnvelope, ResponseEnvelope, topics};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{RequestError, RequestResult, TransportError};
use crate::session::{BusSession, InboundMessage};
use crate::transport::Qos;

/// How long to wait for subscription readiness before giving up.
pub const READY_WAIT: Duration = Duration::from_secs(5);
/// Per-attempt response wait.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
/// Publish attempts per request.
pub const MAX_ATTEMPTS: u32 = 3;

const RETRY_DELAY_MIN: Duration = Duration::from_secs(1);
const RETRY_DELAY_MAX: Duration = Duration::from_secs(60);

/// One in-flight request.
struct PendingEntry {
	/// Completion signal, given exactly once by the response handler.
	notify: Notify,
	/// Captured response payload.
	payload: Mutex<Option<Vec<u8>>>,
}

/// RPC overlay on the broker session.
///
/// The correlator subscribes to the session's inbound stream like any other
/// consumer; the session does not know it exists. Pending entries live in a
/// map guarded by a single mutex held only around map operations.
pub struct Correlator {
	session: BusSession,
	pending: Arc<Mutex<HashMap<CorrelationId, Arc<PendingEntry>>>>,
	dispatch: JoinHandle<()>,
}

impl Correlator {
	/// Build a correlator over a session and start its response dispatcher.
	#[must_use]
	pub fn new(session: BusSession) -> Self {
		let pending = Arc::new(Mutex::new(HashMap::new()));
		let rx = session.subscribe_inbound();
		let dispatch = tokio::spawn(dispatch(session.clone(), pending.clone(), rx));
		Self {
			session,
			pending,
			dispatch,
		}
	}

	/// Publish a request and wait for its correlated response.
	///
	/// Retries up to [`MAX_ATTEMPTS`] times with exponential backoff between
	/// attempts. The pending entry is present for the whole wait and removed
	/// on every exit path.
	pub async fn publish_and_wait(
		&self,
		method: &str,
		params: Value,
	) -> RequestResult<ResponseEnvelope> {
		if !self.session.is_connected() {
			return Err(RequestError::NotConnected);
		}
		if !self.session.wait_ready(READY_WAIT).await {
			return Err(RequestError::NotReady);
		}
		let Some(player_key) = self.session.player_key() else {
			return Err(RequestError::NotConnected);
		};

		let corr = CorrelationId::generate();
		let envelope = RequestEnvelope {
			request_id: corr.clone(),
			player_key: player_key.clone(),
			method: method.to_string(),
			params,
		};
		let payload = serde_json::to_vec(&envelope)
			.map_err(|e| RequestError::InvalidResponse(e.to_string()))?;
		let topic = topics::request_topic(&player_key, &corr);

		let entry = Arc::new(PendingEntry {
			notify: Notify::new(),
			payload: Mutex::new(None),
		});
		self.pending
			.lock()
			.unwrap()
			.insert(corr.clone(), entry.clone());

		let result = self.attempt_loop(&topic, &payload, &entry).await;
		self.pending.lock().unwrap().remove(&corr);
		result
	}

	async fn attempt_loop(
		&self,
		topic: &str,
		payload: &[u8],
		entry: &Arc<PendingEntry>,
	) -> RequestResult<ResponseEnvelope> {
		let mut retry_delay = RETRY_DELAY_MIN;
		for attempt in 1..=MAX_ATTEMPTS {
			if attempt > 1 {
				tokio::time::sleep(retry_delay).await;
				retry_delay = (retry_delay * 2).min(RETRY_DELAY_MAX);
			}

			match self.session.publish(topic, payload, Qos::AtLeastOnce) {
				Ok(()) => {}
				Err(TransportError::NotConnected) => return Err(RequestError::NotConnected),
				Err(e) => return Err(RequestError::PublishFailed(e)),
			}

			match tokio::time::timeout(ATTEMPT_TIMEOUT, entry.notify.notified()).await {
				Ok(()) => {
					let captured = entry.payload.lock().unwrap().take();
					let Some(captured) = captured else {
						return Err(RequestError::InvalidResponse("empty completion".into()));
					};
					return serde_json::from_slice::<ResponseEnvelope>(&captured)
						.map_err(|e| RequestError::InvalidResponse(e.to_string()));
				}
				Err(_) => {
					// No response this attempt. Abort outright if the link
					// went away; otherwise retry.
					if !self.session.is_connected() {
						return Err(RequestError::NotConnected);
					}
					tracing::warn!(attempt, topic, "request attempt timed out");
				}
			}
		}
		Err(RequestError::Timeout)
	}

	/// Correlation ids currently pending. Test and diagnostic hook.
	#[doc(hidden)]
	#[must_use]
	pub fn pending_ids(&self) -> Vec<CorrelationId> {
		self.pending.lock().unwrap().keys().cloned().collect()
	}
}

impl Drop for Correlator {
	fn drop(&mut self) {
		self.dispatch.abort();
	}
}

/// Drain inbound publishes and complete pending entries.
///
/// Idempotent with respect to a missing entry: responses with an unknown
/// correlation id are discarded with a warning.
async fn dispatch(
	session: BusSession,
	pending: Arc<Mutex<HashMap<CorrelationId, Arc<PendingEntry>>>>,
	mut rx: tokio::sync::mpsc::UnboundedReceiver<InboundMessage>,
) {
	while let Some(msg) = rx.recv().await {
		let Some(key) = session.player_key() else {
			continue;
		};
		if !topics::is_response_topic(&key, &msg.topic) {
			continue;
		}

		let parsed: Value = match serde_json::from_slice(&msg.payload) {
			Ok(v) => v,
			Err(e) => {
				tracing::warn!(error = %e, topic = %msg.topic, "unparseable response discarded");
				continue;
			}
		};
		let Some(corr) = parsed.get("request_id").and_then(Value::as_str) else {
			tracing::warn!(topic = %msg.topic, "response without request_id discarded");
			continue;
		};
		let corr = CorrelationId::from_wire(corr);

		let entry = pending.lock().unwrap().get(&corr).cloned();
		let Some(entry) = entry else {
			tracing::warn!(%corr, "response for unknown correlation id discarded");
			continue;
		};
		*entry.payload.lock().unwrap() = Some(msg.payload);
		entry.notify.notify_one();
	}
}

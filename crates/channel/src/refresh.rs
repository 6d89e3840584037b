//! Background channel-index refresh.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use makapix_proto::{ChannelId, ChannelKind};

use crate::collab::SchedulerSignal;
use crate::handle::{Channel, ChannelFactory};

/// Bound on the completion-registration table.
pub const MAX_REGISTRATIONS: usize = 8;

/// Transient handles kept warm for user/hashtag refreshes.
const TRANSIENT_RING: usize = 4;

/// Refreshes channel indices without switching the active channel.
///
/// Holds persistent handles for the high-traffic `all` and `promoted`
/// channels and a small ring of transient handles; on overflow the oldest
/// transient is stopped and destroyed.
#[derive(Clone)]
pub struct RefreshCoordinator {
	inner: Arc<Inner>,
}

struct Inner {
	factory: Arc<dyn ChannelFactory>,
	scheduler: Arc<dyn SchedulerSignal>,
	persistent: HashMap<ChannelId, Arc<dyn Channel>>,
	transients: Mutex<VecDeque<(ChannelId, Arc<dyn Channel>)>>,
	registrations: Mutex<Vec<(ChannelId, bool)>>,
}

impl RefreshCoordinator {
	/// Build a coordinator, creating the two persistent handles.
	#[must_use]
	pub fn new(factory: Arc<dyn ChannelFactory>, scheduler: Arc<dyn SchedulerSignal>) -> Self {
		let mut persistent = HashMap::new();
		for kind in [ChannelKind::All, ChannelKind::Promoted] {
			let id = kind.channel_id(None);
			persistent.insert(id, factory.create(&kind, None));
		}
		Self {
			inner: Arc::new(Inner {
				factory,
				scheduler,
				persistent,
				transients: Mutex::new(VecDeque::new()),
				registrations: Mutex::new(Vec::new()),
			}),
		}
	}

	/// Refresh one channel's index and signal the scheduler when done.
	pub async fn request_refresh(&self, kind: ChannelKind, identifier: Option<&str>) {
		let id = kind.channel_id(identifier);
		let (handle, evicted) = self.inner.handle_for(&kind, identifier, &id);
		if let Some(evicted) = evicted {
			evicted.unload().await;
			evicted.destroy().await;
		}

		self.inner.register(&id);

		let was_loaded = handle.is_loaded();
		if let Err(e) = handle.load().await {
			tracing::warn!(channel = %id, error = %e, "refresh load failed");
		}
		if was_loaded {
			if let Err(e) = handle.request_refresh().await {
				tracing::warn!(channel = %id, error = %e, "refresh request failed");
			}
		}

		self.inner.complete(&id);
		self.inner.scheduler.channel_refreshed(&id);
	}

	/// Observe and clear a completed refresh for a channel.
	#[must_use]
	pub fn check_and_clear(&self, id: &ChannelId) -> bool {
		let mut registrations = self.inner.registrations.lock().unwrap();
		if let Some(pos) = registrations
			.iter()
			.position(|(rid, completed)| rid == id && *completed)
		{
			registrations.remove(pos);
			return true;
		}
		false
	}
}

impl Inner {
	/// Get or create the handle for a channel; may evict the oldest
	/// transient, which the caller must stop and destroy.
	fn handle_for(
		&self,
		kind: &ChannelKind,
		identifier: Option<&str>,
		id: &ChannelId,
	) -> (Arc<dyn Channel>, Option<Arc<dyn Channel>>) {
		if let Some(handle) = self.persistent.get(id) {
			return (handle.clone(), None);
		}

		let mut transients = self.transients.lock().unwrap();
		if let Some((_, handle)) = transients.iter().find(|(tid, _)| tid == id) {
			return (handle.clone(), None);
		}

		let handle = self.factory.create(kind, identifier);
		transients.push_back((id.clone(), handle.clone()));
		let evicted = if transients.len() > TRANSIENT_RING {
			transients.pop_front().map(|(_, h)| h)
		} else {
			None
		};
		(handle, evicted)
	}

	fn register(&self, id: &ChannelId) {
		let mut registrations = self.registrations.lock().unwrap();
		if let Some(entry) = registrations.iter_mut().find(|(rid, _)| rid == id) {
			entry.1 = false;
			return;
		}
		if registrations.len() >= MAX_REGISTRATIONS {
			registrations.remove(0);
		}
		registrations.push((id.clone(), false));
	}

	fn complete(&self, id: &ChannelId) {
		let mut registrations = self.registrations.lock().unwrap();
		if let Some(entry) = registrations.iter_mut().find(|(rid, _)| rid == id) {
			entry.1 = true;
		}
	}
}

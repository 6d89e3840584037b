//! Composition root for the agent.
//!
//! Wires the store, session, correlator, channel stack, supervisor, and
//! watchdog tasks together. The long-lived tasks the supervisor contract
//! names (status publisher, channel switcher, credential poller, reconnect)
//! all originate here or inside the supervisor, each exactly once.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use makapix_bus::{
	BrokerConnector, BusSession, Correlator, LinkHealthProbe, LinkProbe, Reconnector, SharedBus,
	StatusPublisher,
};
use makapix_channel::{
	ChannelOrchestrator, OrchestratorDeps, PlaybackEngine, RefreshCoordinator,
	RemoteChannelFactory, RenderSurface, RpcIndexSource, SchedulerSignal, ViewTickerHandle,
	ViewTracker,
};
use makapix_proto::ChannelId;
use makapix_store::{CredentialStore, FsStore, StoreError};
use tokio::task::JoinHandle;

use crate::commands::CommandDispatcher;
use crate::config::AgentConfig;
use crate::downloads::HttpDownloadManager;
use crate::events::{AgentEvent, EventBus};
use crate::lifecycle::Lifecycle;
use crate::platform::{AgentStatusInfo, BusViewSink, KvAppState};
use crate::provision::EnrollmentApi;
use crate::supervisor::{DriverControl, Supervisor, SupervisorDeps};

/// Platform pieces the runtime cannot construct itself.
pub struct RuntimeDeps {
	/// Broker transport factory.
	pub connector: Arc<dyn BrokerConnector>,
	/// The display stack.
	pub playback: Arc<dyn PlaybackEngine>,
	/// On-screen messages.
	pub surface: Arc<dyn RenderSurface>,
	/// Shared-bus mutex holder (OTA etc.).
	pub shared_bus: Arc<dyn SharedBus>,
	/// Link-layer probe.
	pub probe: Arc<dyn LinkProbe>,
	/// Driver recovery hook.
	pub driver: Arc<dyn DriverControl>,
	/// Enrollment HTTP API.
	pub enrollment: Arc<dyn EnrollmentApi>,
}

struct LogScheduler;

impl SchedulerSignal for LogScheduler {
	fn channel_refreshed(&self, channel: &ChannelId) {
		tracing::debug!(%channel, "refresh completed");
	}
}

/// The assembled agent.
pub struct AgentRuntime {
	supervisor: Supervisor,
	orchestrator: ChannelOrchestrator,
	refresh: RefreshCoordinator,
	view_tracker: ViewTracker,
	events: EventBus,
	session: BusSession,
	_status: Arc<StatusPublisher>,
	app_state: Arc<KvAppState>,
	_health: LinkHealthProbe,
	_view_ticker: ViewTickerHandle,
	_tasks: Vec<JoinHandle<()>>,
}

impl AgentRuntime {
	/// Build and start every component.
	pub fn start(config: AgentConfig, deps: RuntimeDeps) -> Result<Self, StoreError> {
		let fs = Arc::new(FsStore::open(&config.state_dir)?);
		let store = CredentialStore::new(fs.clone(), fs.clone());

		let session = BusSession::new(deps.connector);
		let correlator = Arc::new(Correlator::new(session.clone()));
		let index_source = Arc::new(RpcIndexSource::new(correlator));
		let factory = Arc::new(RemoteChannelFactory::new(
			index_source,
			config.state_dir.clone(),
		));
		let downloads = Arc::new(HttpDownloadManager::new(config.state_dir.clone()));
		let app_state = Arc::new(KvAppState::new(fs, config.play_order));
		let intent_flag = Arc::new(AtomicBool::new(false));

		let orchestrator = ChannelOrchestrator::new(OrchestratorDeps {
			factory: factory.clone(),
			playback: deps.playback,
			surface: deps.surface,
			downloads,
			app_state: app_state.clone(),
			probe: deps.probe.clone(),
			intent_flag: intent_flag.clone(),
		});
		let mut tasks = Vec::new();
		{
			let switcher = orchestrator.clone();
			tasks.push(tokio::spawn(async move { switcher.run().await }));
		}

		let refresh = RefreshCoordinator::new(factory, Arc::new(LogScheduler));
		tasks.push(CommandDispatcher::spawn(
			session.clone(),
			orchestrator.clone(),
			refresh.clone(),
		));

		let view_sink = Arc::new(BusViewSink::new(session.clone()));
		let view_tracker = ViewTracker::new(
			view_sink,
			app_state.clone(),
			intent_flag,
			&config.state_dir,
		);
		let view_ticker = view_tracker.spawn_ticker();

		let provisioning_active = Arc::new(AtomicBool::new(false));
		let reconnector = Reconnector::new(session.clone(), store.clone(), deps.probe.clone());
		let events = EventBus::new();

		let supervisor = Supervisor::new(SupervisorDeps {
			store,
			session: session.clone(),
			reconnector,
			enrollment: deps.enrollment,
			driver: deps.driver,
			events: events.clone(),
			config: config.clone(),
			provisioning_active: provisioning_active.clone(),
		});
		supervisor.start();

		let status = Arc::new(StatusPublisher::spawn(
			session.clone(),
			deps.shared_bus,
			Arc::new(AgentStatusInfo::new(&config, orchestrator.clone())),
		));
		let health = LinkHealthProbe::spawn(session.clone(), deps.probe, provisioning_active);

		// A connected edge triggers an immediate heartbeat and, on the first
		// one, restores the last channel selection.
		{
			let mut rx = events.subscribe();
			let status = status.clone();
			let orchestrator = orchestrator.clone();
			let app_state = app_state.clone();
			tasks.push(tokio::spawn(async move {
				let mut restored = false;
				while let Ok(event) = rx.recv().await {
					if let AgentEvent::StateChanged {
						to: Lifecycle::Connected,
						..
					} = event
					{
						status.publish_now();
						if !restored {
							restored = true;
							if let Some((kind, ident)) = app_state.last_channel() {
								orchestrator.request_channel_switch(kind, ident.as_deref());
							}
						}
					}
				}
			}));
		}

		Ok(Self {
			supervisor,
			orchestrator,
			refresh,
			view_tracker,
			events,
			session,
			_status: status,
			app_state,
			_health: health,
			_view_ticker: view_ticker,
			_tasks: tasks,
		})
	}

	/// The lifecycle supervisor.
	#[must_use]
	pub fn supervisor(&self) -> &Supervisor {
		&self.supervisor
	}

	/// The channel orchestrator.
	#[must_use]
	pub fn orchestrator(&self) -> &ChannelOrchestrator {
		&self.orchestrator
	}

	/// The refresh coordinator.
	#[must_use]
	pub fn refresh(&self) -> &RefreshCoordinator {
		&self.refresh
	}

	/// The view tracker.
	#[must_use]
	pub fn view_tracker(&self) -> &ViewTracker {
		&self.view_tracker
	}

	/// The event bus.
	#[must_use]
	pub fn events(&self) -> &EventBus {
		&self.events
	}

	/// The broker session.
	#[must_use]
	pub fn session(&self) -> &BusSession {
		&self.session
	}

	/// Last-channel persistence.
	#[must_use]
	pub fn app_state(&self) -> &KvAppState {
		&self.app_state
	}
}

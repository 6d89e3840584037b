//! Makapix player agent binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use makapix_agent::platform::{
	LogPlayback, LogSurface, LoopbackConnector, NoSharedBus, NoopDriver, SystemLinkProbe,
};
use makapix_agent::{AgentConfig, AgentRuntime, HttpEnrollment, RuntimeDeps};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "makapix-agent", about = "Makapix player control plane")]
struct Args {
	/// Path to the agent configuration file.
	#[arg(long, default_value = "makapix.toml")]
	config: PathBuf,

	/// Override the state directory.
	#[arg(long)]
	state_dir: Option<PathBuf>,

	/// Begin provisioning immediately instead of connecting.
	#[arg(long)]
	provision: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
		.init();

	let args = Args::parse();
	let mut config = AgentConfig::load(&args.config)?;
	if let Some(state_dir) = args.state_dir {
		config.state_dir = state_dir;
	}
	tracing::info!(state_dir = %config.state_dir.display(), "starting makapix agent");

	let enrollment = Arc::new(HttpEnrollment::new(config.provisioning_url.clone()));
	let runtime = AgentRuntime::start(
		config,
		RuntimeDeps {
			connector: Arc::new(LoopbackConnector::new()),
			playback: Arc::new(LogPlayback::default()),
			surface: Arc::new(LogSurface),
			shared_bus: Arc::new(NoSharedBus),
			probe: Arc::new(SystemLinkProbe),
			driver: Arc::new(NoopDriver),
			enrollment,
		},
	)?;

	if args.provision {
		runtime.supervisor().start_provisioning();
	} else {
		runtime.supervisor().connect_if_registered().await;
	}

	tokio::signal::ctrl_c().await?;
	tracing::info!("shutting down");
	runtime.session().disconnect();
	Ok(())
}

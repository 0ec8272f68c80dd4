use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use saba_fleet::config::FleetConfig;
use saba_fleet::context::{Collaborators, FleetContext};
use saba_fleet::election::{self, Role};
use saba_fleet::gateway::{self, GatewayState};
use saba_fleet::host::{HostIdentity, LocalBotHost};
use saba_fleet::protocol::{server, TcpLink};
use saba_fleet::registry::MarkerStore;
use saba_fleet::restart::{recovery, schedule, RestartManager};
use saba_fleet::update::{self, BinarySelfUpdater, UpdateOrchestrator};
use saba_fleet::{process_monitor, utils, VERSION};
use saba_fleet_updater::BinaryInstaller;

/// 재시작 직후 이전 프로세스가 포트를 놓을 때까지 최대 대기
const PREDECESSOR_WAIT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    tracing::info!("saba-fleet {} starting", VERSION);

    let config = Arc::new(FleetConfig::load()?);
    let paths = config.paths();
    paths.ensure()?;

    if let Some(pid) = utils::predecessor_pid() {
        tracing::info!("Waiting for previous process {} to exit", pid);
        if !process_monitor::wait_for_exit(pid, PREDECESSOR_WAIT).await {
            tracing::warn!("Previous process {} still running after {:?}", pid, PREDECESSOR_WAIT);
        }
    }

    let markers = MarkerStore::new(paths.ports_dir());
    let recovery_report = recovery::recover_on_startup(&paths, &markers, std::process::id()).await;
    if recovery_report.recovered {
        tracing::info!(
            "[Recovery] Recovered from restart: killed {:?}, pruned {} marker(s)",
            recovery_report.killed,
            recovery_report.pruned_markers
        );
    }

    let startup = election::start(&config)?;
    let shutdown = CancellationToken::new();

    let identity = HostIdentity {
        name: config.node_name.clone(),
        bot_kind: config.bot_kind.clone(),
        version: VERSION.to_string(),
        mode: config.mode.clone(),
    };
    let host = LocalBotHost::spawn(identity, &config.units, shutdown.clone());
    let feed = update::release_feed(&config.releases)?;
    let installer = Arc::new(BinarySelfUpdater::new(
        feed.clone(),
        BinaryInstaller::for_current_exe()?,
        &config.bot_kind,
        VERSION,
        shutdown.clone(),
        Duration::from_millis(config.update.shutdown_delay_ms),
    ));

    let ctx = FleetContext::new(
        config.clone(),
        Collaborators {
            host,
            link: Arc::new(TcpLink::new(config.probe.clone())),
            feed,
            installer,
        },
        startup.control_port,
        startup.role,
        shutdown.clone(),
    );
    tracing::info!(
        "Instance {} (pid {}) on control port {} as {:?}",
        ctx.instance_id,
        ctx.pid,
        ctx.control_port,
        startup.role
    );

    if let Err(e) = ctx.markers.write(ctx.pid, ctx.control_port) {
        tracing::warn!("Failed to write port marker: {}", e);
    }

    let control = tokio::spawn(server::serve(startup.control, ctx.clone(), shutdown.clone()));

    let restarts = RestartManager::new(ctx.clone());
    let state = GatewayState {
        ctx: ctx.clone(),
        updates: Arc::new(UpdateOrchestrator::new(ctx.clone())),
        restarts: restarts.clone(),
    };

    match startup.dashboard {
        Some(listener) => {
            gateway::spawn(listener, state, shutdown.clone());
        }
        None => {
            let promoted_ctx = ctx.clone();
            let cancel = shutdown.clone();
            election::spawn_monitor(config.clone(), shutdown.clone(), move |listener| {
                promoted_ctx.set_role(Role::Coordinator);
                gateway::spawn(listener, state, cancel);
            });
        }
    }

    schedule::spawn_timer(restarts, shutdown.clone());
    if recovery_report.recovered {
        recovery::spawn_follow_up(ctx.clone());
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            ctx.host.shutdown();
        }
        _ = shutdown.cancelled() => {}
    }

    if let Err(e) = control.await {
        tracing::warn!("Control server task ended abnormally: {}", e);
    }
    if let Err(e) = ctx.markers.remove(ctx.pid) {
        tracing::warn!("Failed to remove port marker: {}", e);
    }
    tracing::info!("saba-fleet stopped");
    Ok(())
}

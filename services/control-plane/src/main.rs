//! zonefleet control plane
//!
//! Places pending zones on nodes and keeps recorded node health and zone
//! status in line with the fleet.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zonefleet_control_plane::{
    config::Config,
    db::Database,
    node::{SshNodeClient, SshShell},
    reconciler::ReconcileWorker,
    scheduler::SchedulerWorker,
    state::AppState,
};

/// How long each worker gets to finish its current tick after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // RUST_LOG wins over ZONEFLEET_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        scheduler_interval_secs = config.scheduler_interval.as_secs(),
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        ssh_binary = %config.ssh.binary,
        dev_mode = config.dev_mode,
        "Starting zonefleet control plane"
    );

    let db = Database::connect(&config.database)
        .await
        .context("connecting to database")?;
    db.health_check().await.context("database health check")?;

    if config.dev_mode {
        db.run_migrations()
            .await
            .context("applying migrations (dev mode)")?;
    }

    let state = AppState::new(
        Arc::new(db.repository()),
        Arc::new(SshNodeClient::new(SshShell::new(config.ssh.clone()))),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = SchedulerWorker::new(
        state.scheduler(config.scheduler.clone()),
        config.scheduler_interval,
    );
    let scheduler_handle = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { scheduler.run(shutdown).await }
    });

    let reconciler = ReconcileWorker::new(state.reconciler(), config.reconcile_interval);
    let reconciler_handle = tokio::spawn(async move { reconciler.run(shutdown_rx).await });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
    }
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    join_worker("scheduler", scheduler_handle).await;
    join_worker("reconciler", reconciler_handle).await;

    info!("Control plane stopped");
    Ok(())
}

async fn join_worker(name: &'static str, handle: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(worker = name, error = %e, "Worker panicked"),
        Err(_) => warn!(worker = name, "Worker did not stop within the grace period"),
    }
}

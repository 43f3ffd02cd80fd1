//! Identity-resolution daemon entry point
//!
//! Wires the record store, the identity provider, and the resolver service
//! together, then supervises the two protocol servers, the periodic
//! reconciliation timer, and the shutdown-signal watcher as one group: the
//! first task to finish tears the whole daemon down.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::sync::watch;
use tokio::time::{Duration, interval};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use common::config::Config;
use common::store::UserStore;
use daemon::provider::{IdentityProvider, KeycloakProvider};
use daemon::service::ResolverService;
use daemon::{admin_server, data_server, socket};

/// Resolution must be callable by unprivileged processes
const DATA_SOCKET_MODE: u32 = 0o666;
/// Mutations are owner-only
const ADMIN_SOCKET_MODE: u32 = 0o600;
/// Cadence of the periodic reconciliation
const SYNC_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(Level::INFO)
        .init();

    info!("Starting identity resolution daemon");

    let config = Config::from_env();

    let store = Arc::new(UserStore::open(&config.store_path).context("open record store")?);
    let provider: Arc<dyn IdentityProvider> =
        Arc::new(KeycloakProvider::new(&config.provider).context("provider client")?);
    let service = ResolverService::new(config.clone(), store, provider);

    let data_listener = socket::bind(&config.data_socket_path, DATA_SOCKET_MODE)?;
    let admin_listener = socket::bind(&config.admin_socket_path, ADMIN_SOCKET_MODE)?;

    info!(
        "listening on {} (data) and {} (management)",
        config.data_socket_path, config.admin_socket_path
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The four tasks race; whichever finishes first ends the group. The
    // accept loops unblock through listener drop on teardown, the sync
    // timer through the shutdown signal.
    let result = tokio::select! {
        r = data_server::run(data_listener, service.clone()) => r.context("data server"),
        r = admin_server::run(admin_listener, service.clone()) => r.context("management server"),
        r = sync_loop(service, shutdown_rx) => r,
        r = wait_for_signal(shutdown_tx) => r,
    };

    if let Err(err) = &result {
        error!("daemon stopping: {:#}", err);
    }
    info!("daemon stopped");

    result
}

/// Invoke reconciliation on a fixed interval
///
/// A failed sync is logged and retried on the next tick; only the shutdown
/// signal ends this task.
async fn sync_loop(service: ResolverService, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let mut ticker = interval(SYNC_INTERVAL);
    // A tokio interval fires immediately; consume that tick so the first
    // reconciliation runs one full interval after startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("sync timer stopping");
                    return Ok(());
                }
            }
            _ = ticker.tick() => {
                if let Err(err) = service.sync().await {
                    error!("periodic sync failed: {:#}", err);
                }
            }
        }
    }
}

/// Block until SIGINT or SIGTERM, then raise the shared shutdown signal
async fn wait_for_signal(shutdown: watch::Sender<bool>) -> Result<()> {
    let mut sigterm = unix_signal(SignalKind::terminate()).context("install SIGTERM handler")?;

    tokio::select! {
        _ = signal::ctrl_c() => info!("interrupt received"),
        _ = sigterm.recv() => info!("terminate received"),
    }

    let _ = shutdown.send(true);
    Ok(())
}

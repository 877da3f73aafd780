use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

use server::clock::SystemClock;
use server::config::ServerConfig;
use server::hub::Hub;
use server::logging::init_tracing;
use server::rooms::RoomManager;
use server::routes::{router, AppState};
use server::store::InMemoryRoomStore;
use server::supervisor::Supervisor;

const LOG_TARGET: &str = "bin::badam_server";

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();
    init_tracing(&config.log_filter, config.log_json)?;

    let hub = Arc::new(Hub::default());
    let store = Arc::new(InMemoryRoomStore::new());
    let clock = Arc::new(SystemClock);
    let manager = Arc::new(match config.rng_seed {
        Some(seed) => RoomManager::with_seed(store, hub.clone(), clock, config.timeouts(), seed),
        None => RoomManager::new(store, hub.clone(), clock, config.timeouts()),
    });
    let supervisor = Supervisor::new(manager.clone(), hub.clone());

    spawn_janitor(manager.clone(), supervisor.clone(), config.janitor_period());

    let app = router(AppState {
        manager,
        hub,
        supervisor,
    });

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(target: LOG_TARGET, addr = %config.bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!(target: LOG_TARGET, "shut down");
    Ok(())
}

fn spawn_janitor(manager: Arc<RoomManager>, supervisor: Supervisor, period: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let purged = manager.purge_stale();
            for game_id in &purged {
                supervisor.cancel(*game_id);
            }
            let reaped = supervisor.reap();
            debug!(target: LOG_TARGET, purged = purged.len(), reaped, "janitor pass");
        }
    });
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler; run until killed
        std::future::pending::<()>().await;
    }
}

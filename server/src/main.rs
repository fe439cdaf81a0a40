use std::sync::Arc;

use anyhow::Context;
use jam_server::{
    collaborators::{AnyTrackResolver, HeaderIdentityProvider, HttpTrackResolver, TrackResolver},
    config::ServerConfig,
    gateway::{self, AppState},
    logging,
    room_manager::RoomManager,
};
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let config = ServerConfig::from_env().context("invalid configuration")?;

    let track_resolver: Arc<dyn TrackResolver> = match &config.catalog_url {
        Some(catalog_url) => Arc::new(HttpTrackResolver::new(catalog_url)?),
        None => {
            warn!("JAM_CATALOG_URL is not set, every track id is accepted");
            Arc::new(AnyTrackResolver)
        }
    };
    let identity = Arc::new(HeaderIdentityProvider::new(&config.identity_header)?);
    let room_manager = Arc::new(RoomManager::new(track_resolver, config.room_settings()));

    let shutdown = CancellationToken::new();
    let sessions = TaskTracker::new();

    let reaper = room_manager.clone().spawn_reaper(
        config.reaper_interval(),
        config.idle_timeout(),
        shutdown.clone(),
    );

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("could not bind to {}", config.bind_address()))?;
    info!(address = %listener.local_addr()?, "listening");

    let server = tokio::spawn(gateway::serve(
        listener,
        AppState {
            room_manager: room_manager.clone(),
            identity,
            shutdown: shutdown.clone(),
            sessions: sessions.clone(),
            max_frame_bytes: config.max_frame_bytes,
        },
    ));

    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to create interrupt signal stream")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to create terminate signal stream")?;
    tokio::select! {
        _ = interrupt.recv() => info!("interrupted, gracefully shutting down"),
        _ = terminate.recv() => info!("terminated, gracefully shutting down"),
    }

    shutdown.cancel();
    sessions.close();
    sessions.wait().await;
    room_manager.close_all().await;

    server.await.context("server task failed")??;
    let _ = reaper.await;

    info!("server shut down");

    Ok(())
}

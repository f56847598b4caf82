use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use paircast_core::{
    commands::library,
    config::Config,
    counter::PersistentCounterStore,
};
use paircast_server::sim::SimProvider;

#[tokio::main]
async fn main() -> Result<(), paircast_core::Error> {
    paircast_core::logging::init("paircast")?;
    library::init_uptime();

    let cfg = Arc::new(Config::load()?);
    let counter = Arc::new(PersistentCounterStore::load(&cfg.data_file)?);

    let state = paircast_server::build(Arc::clone(&cfg), Arc::new(SimProvider), Arc::clone(&counter));

    let shutdown = CancellationToken::new();
    let autosave = counter.spawn_autosave(cfg.counter_save_interval, shutdown.clone());

    let restored = state.lifecycle.reload_existing().await;
    tracing::info!(restored, port = cfg.port, "paircast starting");

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = paircast_server::app(state);

    axum_serve(listener, app).await?;

    shutdown.cancel();
    let _ = autosave.await;
    counter.save()?;
    tracing::info!("paircast stopped");
    Ok(())
}

async fn axum_serve(
    listener: tokio::net::TcpListener,
    app: axum::Router,
) -> Result<(), paircast_core::Error> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .map_err(paircast_core::Error::Io)
}

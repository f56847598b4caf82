//! HTTP and WebSocket surface for the paircast host: the pairing API, the
//! logout API, the command listing, real-time stats push, and the static
//! landing page.

pub mod routes;
pub mod sim;
pub mod ws;

use std::sync::Arc;

use axum::{
    routing::{any, get, post},
    Router,
};
use tower_http::{services::ServeDir, trace::TraceLayer};

use paircast_core::{
    commands::{library::BundledCommands, router::CommandRouter, CommandRegistry},
    config::Config,
    counter::PersistentCounterStore,
    pairing::PairingCoordinator,
    session::{ConnectionLifecycle, SessionRegistry},
    stats::StatsHub,
    transport::TransportProvider,
};

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub lifecycle: ConnectionLifecycle,
    pub pairing: Arc<PairingCoordinator>,
    pub stats: Arc<StatsHub>,
    pub commands: Arc<CommandRegistry>,
}

/// Wire the whole application together around a transport provider.
pub fn build(
    cfg: Arc<Config>,
    provider: Arc<dyn TransportProvider>,
    counter: Arc<PersistentCounterStore>,
) -> AppState {
    let stats = Arc::new(StatsHub::new(counter));

    let commands = Arc::new(CommandRegistry::new());
    commands.register_source(Arc::new(BundledCommands));
    commands.reload();

    let router = Arc::new(CommandRouter::new(Arc::clone(&cfg), Arc::clone(&commands)));
    let sessions = Arc::new(SessionRegistry::new());
    let lifecycle = ConnectionLifecycle::new(
        Arc::clone(&cfg),
        sessions,
        provider,
        Arc::clone(&stats),
        router,
    );
    let pairing = Arc::new(PairingCoordinator::new(
        Arc::clone(&cfg),
        lifecycle.clone(),
        Arc::clone(&stats),
    ));

    AppState {
        cfg,
        lifecycle,
        pairing,
        stats,
        commands,
    }
}

/// The full HTTP router: JSON API, WebSocket push, static files.
pub fn app(state: AppState) -> Router {
    let static_dir = state.cfg.static_dir.clone();
    Router::new()
        .route("/api/pair", post(routes::pair))
        .route("/api/logout", post(routes::logout))
        .route("/api/commands", get(routes::commands))
        .route("/ws", any(ws::ws_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

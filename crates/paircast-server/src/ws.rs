//! Real-time stats push. Every client gets the current snapshot on connect,
//! then a copy of each [`PushEvent`] the core broadcasts.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};

use paircast_core::stats::{PushEvent, StatsHub};

use crate::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// A snapshot event for one freshly connected client.
fn initial_event(stats: &StatsHub) -> PushEvent {
    let snap = stats.snapshot();
    PushEvent::StatsUpdate {
        active_sockets: snap.active_sockets,
        total_users: snap.total_users,
    }
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut events = state.stats.subscribe();

    let writer = tokio::spawn(async move {
        let first = initial_event(&state.stats);
        let json = match serde_json::to_string(&first) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "could not serialize initial snapshot");
                return;
            }
        };
        if sink.send(Message::Text(json.into())).await.is_err() {
            return;
        }

        loop {
            match events.recv().await {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::warn!(error = %e, "could not serialize push event");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                // Fell behind; resume with whatever comes next.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "stats subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Clients only listen; drain until they hang up.
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }
    tracing::debug!("stats client disconnected");
}

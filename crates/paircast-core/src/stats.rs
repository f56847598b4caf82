use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::{counter::PersistentCounterStore, domain::SessionId, Result};

/// Events pushed to real-time observers (the WebSocket hub, tests).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum PushEvent {
    #[serde(rename = "statsUpdate")]
    StatsUpdate {
        #[serde(rename = "activeSockets")]
        active_sockets: u64,
        #[serde(rename = "totalUsers")]
        total_users: u64,
    },
    #[serde(rename = "linked")]
    Linked {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename = "unlinked")]
    Unlinked {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename = "pairingTimeout")]
    PairingTimeout { number: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub active_sockets: u64,
    pub total_users: u64,
}

/// Aggregates `{activeSockets, totalUsers}` and pushes a snapshot to every
/// observer whenever either changes.
pub struct StatsHub {
    active_sockets: Mutex<u64>,
    counter: Arc<PersistentCounterStore>,
    tx: broadcast::Sender<PushEvent>,
}

impl StatsHub {
    pub fn new(counter: Arc<PersistentCounterStore>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            active_sockets: Mutex::new(0),
            counter,
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_sockets: *self.active_sockets.lock().unwrap_or_else(|e| e.into_inner()),
            total_users: self.counter.total_users(),
        }
    }

    /// A lifecycle entered the OPEN state.
    pub fn socket_opened(&self) {
        {
            let mut guard = self.active_sockets.lock().unwrap_or_else(|e| e.into_inner());
            *guard += 1;
        }
        self.broadcast_stats();
    }

    /// A lifecycle left the OPEN state. Clamped at zero.
    pub fn socket_closed(&self) {
        {
            let mut guard = self.active_sockets.lock().unwrap_or_else(|e| e.into_inner());
            *guard = guard.saturating_sub(1);
        }
        self.broadcast_stats();
    }

    /// Count a first-time user; persists immediately.
    pub fn user_counted(&self) -> Result<u64> {
        let total = self.counter.increment()?;
        self.broadcast_stats();
        Ok(total)
    }

    pub fn linked(&self, session_id: &SessionId) {
        self.push(PushEvent::Linked {
            session_id: session_id.to_string(),
        });
    }

    pub fn unlinked(&self, session_id: &SessionId) {
        self.push(PushEvent::Unlinked {
            session_id: session_id.to_string(),
        });
    }

    pub fn pairing_timeout(&self, number: &SessionId) {
        self.push(PushEvent::PairingTimeout {
            number: number.to_string(),
        });
    }

    pub fn broadcast_stats(&self) {
        let snap = self.snapshot();
        self.push(PushEvent::StatsUpdate {
            active_sockets: snap.active_sockets,
            total_users: snap.total_users,
        });
    }

    fn push(&self, event: PushEvent) {
        // No receivers connected is fine.
        let _ = self.tx.send(event);
    }
}

//! Pairing flow: validate the number, bring the session up, fetch a code
//! from the transport, and expire it if the link never completes.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use crate::{
    creds::CredentialStore,
    config::Config,
    domain::SessionId,
    session::ConnectionLifecycle,
    stats::StatsHub,
    Error, Result,
};

/// What `/api/pair` hands back to the caller.
#[derive(Clone, Debug)]
pub struct PairingResponse {
    pub code: String,
    pub is_new_user: bool,
}

struct PairingRecord {
    code: String,
    issued_at: Instant,
}

/// Issues pairing codes and tracks their expiry windows.
pub struct PairingCoordinator {
    cfg: Arc<Config>,
    lifecycle: ConnectionLifecycle,
    stats: Arc<StatsHub>,
    codes: Arc<Mutex<HashMap<SessionId, PairingRecord>>>,
}

impl PairingCoordinator {
    pub fn new(cfg: Arc<Config>, lifecycle: ConnectionLifecycle, stats: Arc<StatsHub>) -> Self {
        Self {
            cfg,
            lifecycle,
            stats,
            codes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The unexpired code for a session, if one is pending.
    pub fn pending_code(&self, id: &SessionId) -> Option<String> {
        self.lock().get(id).map(|record| record.code.clone())
    }

    /// Validate and pair a number. First-time numbers are counted before the
    /// code is issued, so the stats push and the HTTP response agree.
    pub async fn request_pairing(&self, raw: &str) -> Result<PairingResponse> {
        let id = SessionId::parse(raw)?;

        let is_new_user = !self.lifecycle.registry().contains(&id)
            && !CredentialStore::linked(&self.cfg.sessions_dir, &id);

        let handle = self.lifecycle.open(&id).await?;
        if is_new_user {
            self.stats.user_counted()?;
        }

        // Give the transport a moment to finish its handshake before asking
        // for a code.
        tokio::time::sleep(self.cfg.pairing_grace).await;

        let conn = handle
            .connection()
            .await
            .ok_or_else(|| Error::Transport("connection not ready for pairing".to_string()))?;
        let code = conn.request_pairing_code(id.as_str()).await?;
        tracing::info!(session = %id, "pairing code issued");

        let issued_at = Instant::now();
        self.lock().insert(
            id.clone(),
            PairingRecord {
                code: code.clone(),
                issued_at,
            },
        );
        self.spawn_expiry(id, issued_at);

        Ok(PairingResponse { code, is_new_user })
    }

    /// Watchdog for one issued code. A newer code for the same number
    /// supersedes this one; otherwise the timeout fires independent of the
    /// link outcome.
    fn spawn_expiry(&self, id: SessionId, issued_at: Instant) {
        let cfg = Arc::clone(&self.cfg);
        let stats = Arc::clone(&self.stats);
        let codes = Arc::clone(&self.codes);
        tokio::spawn(async move {
            tokio::time::sleep(cfg.pairing_ttl).await;

            let still_current = {
                let mut map = codes.lock().unwrap_or_else(|e| e.into_inner());
                match map.get(&id) {
                    Some(record) if record.issued_at == issued_at => {
                        map.remove(&id);
                        true
                    }
                    _ => false,
                }
            };
            if !still_current {
                return;
            }

            // Report only; the lifecycle keeps running and nothing is closed
            // or deleted.
            tracing::warn!(session = %id, "pairing code expired");
            stats.pairing_timeout(&id);
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, PairingRecord>> {
        self.codes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::Result;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CounterData {
    #[serde(rename = "totalUsers")]
    total_users: u64,
    #[serde(rename = "lastUpdated")]
    last_updated: String,
}

/// Durable `totalUsers` counter with crash-safe reload.
///
/// The file is rewritten atomically (temp file + rename) so a crash mid-write
/// never leaves a truncated counter behind.
#[derive(Debug)]
pub struct PersistentCounterStore {
    path: PathBuf,
    total_users: Mutex<u64>,
}

impl PersistentCounterStore {
    /// Seed from the persisted value; absent file defaults to zero and is
    /// created immediately.
    pub fn load(path: &Path) -> Result<Self> {
        let total_users = match fs::read_to_string(path) {
            Ok(txt) => match serde_json::from_str::<CounterData>(&txt) {
                Ok(data) => {
                    tracing::info!(total_users = data.total_users, "loaded persistent counter");
                    data.total_users
                }
                Err(e) => {
                    tracing::error!(error = %e, "corrupt counter file, starting from zero");
                    0
                }
            },
            Err(_) => {
                tracing::info!("no persistent counter found, starting fresh");
                0
            }
        };

        let store = Self {
            path: path.to_path_buf(),
            total_users: Mutex::new(total_users),
        };
        store.save()?;
        Ok(store)
    }

    pub fn total_users(&self) -> u64 {
        *self.total_users.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count one new user and persist immediately.
    pub fn increment(&self) -> Result<u64> {
        let value = {
            let mut guard = self.total_users.lock().unwrap_or_else(|e| e.into_inner());
            *guard += 1;
            *guard
        };
        self.save()?;
        Ok(value)
    }

    pub fn save(&self) -> Result<()> {
        let data = CounterData {
            total_users: self.total_users(),
            last_updated: chrono::Utc::now().to_rfc3339(),
        };
        let txt = serde_json::to_string_pretty(&data)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, txt)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Periodic snapshot task; stops when the token is cancelled and writes a
    /// final snapshot on the way out.
    pub fn spawn_autosave(
        self: &Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(e) = store.save() {
                            tracing::error!(error = %e, "periodic counter save failed");
                        }
                    }
                    _ = token.cancelled() => {
                        if let Err(e) = store.save() {
                            tracing::error!(error = %e, "final counter save failed");
                        }
                        break;
                    }
                }
            }
        })
    }
}

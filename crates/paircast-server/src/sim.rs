//! Simulated transport for local development and the demo dashboard: links
//! instantly, accepts every send, and fabricates pairing codes. Swap in a
//! real provider to talk to an actual messaging network.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;

use paircast_core::{
    creds::CredentialStore,
    domain::{GroupMetadata, Jid, MessageKey},
    transport::{
        OpenedConnection, OutgoingContent, SendOptions, TransportCapabilities, TransportConnection,
        TransportEvent, TransportProvider, EVENT_CHANNEL_CAPACITY,
    },
    Error, Result,
};

const CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

fn fabricate_code() -> String {
    let mut rng = rand::thread_rng();
    let mut code = String::with_capacity(9);
    for i in 0..8 {
        if i == 4 {
            code.push('-');
        }
        let idx = rng.gen_range(0..CODE_CHARSET.len());
        code.push(CODE_CHARSET[idx] as char);
    }
    code
}

pub struct SimProvider;

#[async_trait]
impl TransportProvider for SimProvider {
    async fn open(&self, creds: Arc<CredentialStore>) -> Result<OpenedConnection> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let conn = Arc::new(SimConnection {
            self_jid: Jid::direct(creds.id().as_str()),
            events: Mutex::new(Some(tx.clone())),
        });

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            if let Err(e) = creds.save("creds.json", b"{\"simulated\":true}") {
                tracing::warn!(session = %creds.id(), error = %e, "could not store material");
            }
            let _ = tx.send(TransportEvent::CredentialsChanged).await;
            let _ = tx.send(TransportEvent::Connected).await;
        });

        Ok(OpenedConnection { conn, events: rx })
    }
}

struct SimConnection {
    self_jid: Jid,
    /// Dropped on close so the event stream ends.
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

#[async_trait]
impl TransportConnection for SimConnection {
    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities { channel_follow: false }
    }

    fn self_jid(&self) -> Jid {
        self.self_jid.clone()
    }

    fn self_name(&self) -> Option<String> {
        None
    }

    async fn request_pairing_code(&self, number: &str) -> Result<String> {
        let code = fabricate_code();
        tracing::info!(%number, %code, "fabricated pairing code");
        Ok(code)
    }

    async fn send(&self, to: &Jid, content: OutgoingContent, _opts: SendOptions) -> Result<()> {
        match content {
            OutgoingContent::Text(text) => {
                tracing::info!(%to, len = text.len(), "simulated text send");
            }
            OutgoingContent::Reaction { emoji, .. } => {
                tracing::info!(%to, %emoji, "simulated reaction");
            }
        }
        Ok(())
    }

    async fn mark_read(&self, _keys: &[MessageKey]) -> Result<()> {
        Ok(())
    }

    async fn group_metadata(&self, group: &Jid) -> Result<GroupMetadata> {
        Err(Error::Transport(format!("no simulated group {group}")))
    }

    async fn follow_channel(&self, _channel: &Jid) -> Result<()> {
        Err(Error::Transport("channel follow unsupported".to_string()))
    }

    async fn presence_subscribe(&self, _target: &Jid) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

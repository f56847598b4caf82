//! Shared fakes for exercising the lifecycle, router, and pairing flows
//! against synthetic transport events.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    config::Config,
    creds::CredentialStore,
    domain::{
        GroupMetadata, GroupParticipant, IncomingMessage, Jid, MessageContent, MessageKey,
        ParticipantRole, SessionId,
    },
    transport::{
        DisconnectReason, OpenedConnection, OutgoingContent, SendOptions, TransportCapabilities,
        TransportConnection, TransportEvent, TransportProvider, EVENT_CHANNEL_CAPACITY,
    },
    Error, Result,
};

pub fn test_config(root: &Path) -> Config {
    Config {
        port: 0,
        static_dir: root.join("public"),
        prefix: "*".to_string(),
        bot_name: "testbot".to_string(),
        owner_name: "tester".to_string(),
        repo_link: String::new(),
        channel_jids: vec![Jid::new("chan1@newsletter")],
        auto_status_seen: true,
        auto_status_react: true,
        auto_status_reply: true,
        auto_status_message: "seen by testbot".to_string(),
        sessions_dir: root.join("sessions"),
        data_file: root.join("persistent-data.json"),
        reconnect_delay: Duration::from_millis(10),
        max_reconnect_attempts: 5,
        pairing_grace: Duration::from_millis(5),
        pairing_ttl: Duration::from_millis(50),
        post_connect_delay: Duration::from_millis(5),
        counter_save_interval: Duration::from_secs(3600),
    }
}

#[derive(Clone, Debug)]
pub struct SentMessage {
    pub to: Jid,
    pub content: OutgoingContent,
    pub opts: SendOptions,
}

/// Transport connection that records every operation.
pub struct FakeConnection {
    self_jid: Jid,
    capabilities: TransportCapabilities,
    pub sent: Mutex<Vec<SentMessage>>,
    pub marked_read: Mutex<Vec<MessageKey>>,
    pub followed: Mutex<Vec<Jid>>,
    pub presence_subscribed: Mutex<Vec<Jid>>,
    pub group: Mutex<Option<GroupMetadata>>,
    pub closed: AtomicUsize,
}

impl FakeConnection {
    pub fn new(number: &str) -> Arc<Self> {
        Self::with_capabilities(number, TransportCapabilities { channel_follow: true })
    }

    pub fn without_channel_follow(number: &str) -> Arc<Self> {
        Self::with_capabilities(number, TransportCapabilities { channel_follow: false })
    }

    fn with_capabilities(number: &str, capabilities: TransportCapabilities) -> Arc<Self> {
        Arc::new(Self {
            self_jid: Jid::direct(number),
            capabilities,
            sent: Mutex::new(Vec::new()),
            marked_read: Mutex::new(Vec::new()),
            followed: Mutex::new(Vec::new()),
            presence_subscribed: Mutex::new(Vec::new()),
            group: Mutex::new(None),
            closed: AtomicUsize::new(0),
        })
    }

    pub fn set_group(&self, metadata: GroupMetadata) {
        *self.group.lock().unwrap() = Some(metadata);
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match &m.content {
                OutgoingContent::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent_reactions(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match &m.content {
                OutgoingContent::Reaction { emoji, .. } => Some(emoji.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl TransportConnection for FakeConnection {
    fn capabilities(&self) -> TransportCapabilities {
        self.capabilities
    }

    fn self_jid(&self) -> Jid {
        self.self_jid.clone()
    }

    fn self_name(&self) -> Option<String> {
        Some("Test User".to_string())
    }

    async fn request_pairing_code(&self, number: &str) -> Result<String> {
        Ok(format!("CODE-{}", &number[number.len().saturating_sub(4)..]))
    }

    async fn send(&self, to: &Jid, content: OutgoingContent, opts: SendOptions) -> Result<()> {
        self.sent.lock().unwrap().push(SentMessage {
            to: to.clone(),
            content,
            opts,
        });
        Ok(())
    }

    async fn mark_read(&self, keys: &[MessageKey]) -> Result<()> {
        self.marked_read.lock().unwrap().extend_from_slice(keys);
        Ok(())
    }

    async fn group_metadata(&self, group: &Jid) -> Result<GroupMetadata> {
        self.group
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Transport(format!("no metadata for {group}")))
    }

    async fn follow_channel(&self, channel: &Jid) -> Result<()> {
        self.followed.lock().unwrap().push(channel.clone());
        Ok(())
    }

    async fn presence_subscribe(&self, target: &Jid) -> Result<()> {
        self.presence_subscribed.lock().unwrap().push(target.clone());
        Ok(())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// One opened fake connection with its event injector.
pub struct FakeLink {
    pub session_id: SessionId,
    pub conn: Arc<FakeConnection>,
    pub events: mpsc::Sender<TransportEvent>,
}

impl FakeLink {
    pub async fn connect(&self) {
        let _ = self.events.send(TransportEvent::Connected).await;
    }

    pub async fn disconnect(&self, reason: DisconnectReason) {
        let _ = self
            .events
            .send(TransportEvent::Disconnected { reason })
            .await;
    }

    pub async fn deliver(&self, message: IncomingMessage) {
        let _ = self
            .events
            .send(TransportEvent::Message(Box::new(message)))
            .await;
    }
}

/// Provider handing out [`FakeConnection`]s and retaining injection handles.
#[derive(Default)]
pub struct FakeProvider {
    pub links: Mutex<Vec<Arc<FakeLink>>>,
    pub open_calls: AtomicUsize,
    pub fail_opens: AtomicUsize,
    /// Extra time every open call spends mid-handshake.
    pub open_delay: Mutex<Duration>,
    /// Emit `Connected` immediately after open.
    pub auto_connect: bool,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn auto_connecting() -> Arc<Self> {
        Arc::new(Self {
            auto_connect: true,
            ..Self::default()
        })
    }

    /// Make the next `n` open calls fail with a transport error.
    pub fn fail_next_opens(&self, n: usize) {
        self.fail_opens.store(n, Ordering::SeqCst);
    }

    /// Make every subsequent open call linger for `delay` before returning.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }

    pub fn open_count(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn link(&self, index: usize) -> Arc<FakeLink> {
        self.links.lock().unwrap()[index].clone()
    }

    pub fn latest_link(&self) -> Arc<FakeLink> {
        self.links.lock().unwrap().last().cloned().expect("no links opened")
    }
}

#[async_trait]
impl TransportProvider for FakeProvider {
    async fn open(&self, creds: Arc<CredentialStore>) -> Result<OpenedConnection> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.fail_opens.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_opens.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Transport("simulated open failure".to_string()));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let conn = FakeConnection::new(creds.id().as_str());
        let link = Arc::new(FakeLink {
            session_id: creds.id().clone(),
            conn: Arc::clone(&conn),
            events: tx.clone(),
        });
        self.links.lock().unwrap().push(link);

        if self.auto_connect {
            let _ = tx.send(TransportEvent::Connected).await;
        }

        Ok(OpenedConnection { conn, events: rx })
    }
}

pub fn direct_message(from: &str, text: &str) -> IncomingMessage {
    IncomingMessage {
        key: MessageKey {
            remote_jid: Jid::direct(from),
            id: "msg-1".to_string(),
            from_me: false,
            participant: None,
        },
        content: MessageContent::Text(text.to_string()),
        quoted: None,
        mentioned: Vec::new(),
    }
}

pub fn group_message(group: &str, from: &str, text: &str) -> IncomingMessage {
    IncomingMessage {
        key: MessageKey {
            remote_jid: Jid::new(format!("{group}@g.us")),
            id: "msg-2".to_string(),
            from_me: false,
            participant: Some(Jid::direct(from)),
        },
        content: MessageContent::Text(text.to_string()),
        quoted: None,
        mentioned: Vec::new(),
    }
}

pub fn status_message(from: &str, content: MessageContent) -> IncomingMessage {
    IncomingMessage {
        key: MessageKey {
            remote_jid: Jid::new(crate::domain::STATUS_BROADCAST),
            id: "status-1".to_string(),
            from_me: false,
            participant: Some(Jid::direct(from)),
        },
        content,
        quoted: None,
        mentioned: Vec::new(),
    }
}

pub fn roster(group: &str, members: &[(&str, ParticipantRole)]) -> GroupMetadata {
    GroupMetadata {
        id: Jid::new(format!("{group}@g.us")),
        subject: "Test Group".to_string(),
        participants: members
            .iter()
            .map(|(number, role)| GroupParticipant {
                jid: Jid::direct(number),
                role: *role,
            })
            .collect(),
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    creds::CredentialStore,
    domain::{GroupMetadata, IncomingMessage, Jid, MessageKey},
    Result,
};

/// Suggested bound for provider event channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Why the transport dropped the connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote account was unlinked; retrying is pointless.
    LoggedOut,
    ConnectionLost,
    /// Another client took over the session.
    Replaced,
    Other(String),
}

impl DisconnectReason {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DisconnectReason::LoggedOut)
    }
}

/// Events a connection pushes into the core.
#[derive(Debug)]
pub enum TransportEvent {
    /// Handshake finished; the connection is usable.
    Connected,
    Disconnected { reason: DisconnectReason },
    /// Authentication material changed; the provider has already persisted it
    /// into the credential directory.
    CredentialsChanged,
    Message(Box<IncomingMessage>),
}

/// What the concrete connection supports, negotiated once at open time
/// instead of probing method-by-method.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportCapabilities {
    /// Native channel-follow operation. When absent the core falls back to a
    /// presence subscription.
    pub channel_follow: bool,
}

#[derive(Clone, Debug)]
pub enum OutgoingContent {
    Text(String),
    Reaction { emoji: String, key: MessageKey },
}

#[derive(Clone, Debug, Default)]
pub struct SendOptions {
    /// Quote this message in the outgoing one.
    pub quoted: Option<MessageKey>,
}

/// One live connection to the messaging network.
#[async_trait]
pub trait TransportConnection: Send + Sync {
    fn capabilities(&self) -> TransportCapabilities;

    /// The account's own address once known.
    fn self_jid(&self) -> Jid;
    fn self_name(&self) -> Option<String>;

    async fn request_pairing_code(&self, number: &str) -> Result<String>;
    async fn send(&self, to: &Jid, content: OutgoingContent, opts: SendOptions) -> Result<()>;
    async fn mark_read(&self, keys: &[MessageKey]) -> Result<()>;
    async fn group_metadata(&self, group: &Jid) -> Result<GroupMetadata>;

    /// Only valid when `capabilities().channel_follow` is set.
    async fn follow_channel(&self, channel: &Jid) -> Result<()>;
    /// Fallback subscription path for transports without channel-follow.
    async fn presence_subscribe(&self, target: &Jid) -> Result<()>;

    async fn close(&self);
}

/// A freshly opened connection plus its event stream. The caller owns the
/// receiver and must drain it; the provider stops sending once the stream is
/// dropped.
pub struct OpenedConnection {
    pub conn: Arc<dyn TransportConnection>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Factory for transport connections. The wire protocol behind this port is
/// entirely the provider's business.
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Initialize a connection from the session's credential directory.
    /// Fails when the transport cannot start (e.g. corrupted credentials).
    async fn open(&self, creds: Arc<CredentialStore>) -> Result<OpenedConnection>;
}

//! Session lifecycle: connect, reconnect with a bounded retry budget, and
//! explicit logout. One driver task per session owns the transport event
//! stream for as long as the session lives.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    commands::router::CommandRouter,
    config::Config,
    creds::CredentialStore,
    domain::SessionId,
    stats::StatsHub,
    transport::{
        DisconnectReason, OpenedConnection, OutgoingContent, SendOptions, TransportConnection,
        TransportEvent, TransportProvider,
    },
    Error, Result,
};

/// Marker set the first time a credential lifetime reaches OPEN. Deleted with
/// the credential directory on logout, so a re-pair is welcomed again.
pub const WELCOME_FLAG: &str = "welcome-sent";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Init,
    Connecting,
    Open,
    ClosedRecoverable,
    ClosedTerminal,
}

struct SessionState {
    state: LinkState,
    attempts: u32,
    has_linked: bool,
    conn: Option<Arc<dyn TransportConnection>>,
    prefix_override: Option<String>,
}

/// Shared view of one session. Cheap to clone via `Arc`.
pub struct SessionHandle {
    id: SessionId,
    creds: Arc<CredentialStore>,
    state: Mutex<SessionState>,
}

impl SessionHandle {
    fn new(id: SessionId, creds: Arc<CredentialStore>) -> Arc<Self> {
        Arc::new(Self {
            id,
            creds,
            state: Mutex::new(SessionState {
                state: LinkState::Init,
                attempts: 0,
                has_linked: false,
                conn: None,
                prefix_override: None,
            }),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn creds(&self) -> &Arc<CredentialStore> {
        &self.creds
    }

    pub async fn state(&self) -> LinkState {
        self.state.lock().await.state
    }

    pub async fn attempts(&self) -> u32 {
        self.state.lock().await.attempts
    }

    /// True once this session has reached OPEN at least once.
    pub async fn has_linked(&self) -> bool {
        self.state.lock().await.has_linked
    }

    /// The live connection, if any.
    pub async fn connection(&self) -> Option<Arc<dyn TransportConnection>> {
        self.state.lock().await.conn.clone()
    }

    /// Per-session command prefix, when one overrides the global default.
    pub async fn prefix_override(&self) -> Option<String> {
        self.state.lock().await.prefix_override.clone()
    }

    pub async fn set_prefix_override(&self, prefix: Option<String>) {
        self.state.lock().await.prefix_override = prefix;
    }
}

/// All currently known sessions, keyed by normalized number.
pub struct SessionRegistry {
    inner: std::sync::Mutex<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut out: Vec<SessionId> = self.lock().keys().cloned().collect();
        out.sort();
        out
    }

    /// Fetch the handle for `id`, creating it (and its credential directory)
    /// on first sight.
    pub fn get_or_create(&self, id: &SessionId, sessions_dir: &std::path::Path) -> Result<Arc<SessionHandle>> {
        if let Some(handle) = self.get(id) {
            return Ok(handle);
        }
        let creds = Arc::new(CredentialStore::open(sessions_dir, id)?);
        let handle = SessionHandle::new(id.clone(), creds);
        self.lock().insert(id.clone(), Arc::clone(&handle));
        Ok(handle)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Arc<SessionHandle>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

enum Decision {
    Retry(u32),
    Stop,
}

/// Drives every session from first connect to terminal close.
#[derive(Clone)]
pub struct ConnectionLifecycle {
    cfg: Arc<Config>,
    registry: Arc<SessionRegistry>,
    provider: Arc<dyn TransportProvider>,
    stats: Arc<StatsHub>,
    router: Arc<CommandRouter>,
}

impl ConnectionLifecycle {
    pub fn new(
        cfg: Arc<Config>,
        registry: Arc<SessionRegistry>,
        provider: Arc<dyn TransportProvider>,
        stats: Arc<StatsHub>,
        router: Arc<CommandRouter>,
    ) -> Self {
        Self {
            cfg,
            registry,
            provider,
            stats,
            router,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Ensure a session exists and is connecting. Idempotent: a session with
    /// a live connection, or one mid-connect, is returned as-is.
    pub async fn open(&self, id: &SessionId) -> Result<Arc<SessionHandle>> {
        let handle = self.registry.get_or_create(id, &self.cfg.sessions_dir)?;
        if !Self::try_claim(&handle).await {
            return Ok(handle);
        }
        self.start(Arc::clone(&handle)).await?;
        Ok(handle)
    }

    /// Claim the right to dial for this session. The claim is taken under the
    /// state lock before any provider await, so concurrent callers cannot end
    /// up with two live connections.
    async fn try_claim(handle: &Arc<SessionHandle>) -> bool {
        let mut st = handle.state.lock().await;
        if st.conn.is_some() || st.state == LinkState::Connecting {
            return false;
        }
        st.state = LinkState::Connecting;
        true
    }

    /// Reconnect every session directory that holds stored material.
    /// Returns the number of sessions brought up.
    pub async fn reload_existing(&self) -> usize {
        let ids = match CredentialStore::list_linked(&self.cfg.sessions_dir) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "could not scan session directories");
                return 0;
            }
        };
        let mut restored = 0usize;
        for id in ids {
            match self.open(&id).await {
                Ok(_) => restored += 1,
                Err(e) => tracing::error!(session = %id, error = %e, "startup reconnect failed"),
            }
        }
        if restored > 0 {
            tracing::info!(sessions = restored, "restored stored sessions");
        }
        restored
    }

    /// Tear a session down for good: close the connection, forget the handle,
    /// and delete its credential directory. The only path that deletes
    /// credentials.
    pub async fn logout(&self, raw: &str) -> Result<SessionId> {
        let id = SessionId::parse(raw)?;
        let known = self.registry.remove(&id);

        if known.is_none() && !CredentialStore::exists(&self.cfg.sessions_dir, &id) {
            return Err(Error::SessionNotFound(id.to_string()));
        }

        if let Some(handle) = known {
            let (was_open, conn) = {
                let mut st = handle.state.lock().await;
                let was_open = st.state == LinkState::Open;
                st.state = LinkState::ClosedTerminal;
                (was_open, st.conn.take())
            };
            if let Some(conn) = conn {
                conn.close().await;
            }
            if was_open {
                self.stats.socket_closed();
            }
            handle.creds().delete_all()?;
        } else {
            CredentialStore::open(&self.cfg.sessions_dir, &id)?.delete_all()?;
        }

        self.stats.unlinked(&id);
        tracing::info!(session = %id, "logged out");
        Ok(id)
    }

    /// First connect for a claimed handle. Releases the claim on failure.
    async fn start(&self, handle: Arc<SessionHandle>) -> Result<()> {
        {
            let mut st = handle.state.lock().await;
            st.attempts = 0;
        }
        let opened = match self.provider.open(Arc::clone(handle.creds())).await {
            Ok(opened) => opened,
            Err(e) => {
                let mut st = handle.state.lock().await;
                st.state = LinkState::Init;
                return Err(e);
            }
        };
        {
            let mut st = handle.state.lock().await;
            st.conn = Some(Arc::clone(&opened.conn));
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.drive(handle, opened).await;
        });
        Ok(())
    }

    /// Per-session driver: pump events until disconnect, then either retry
    /// within the attempt budget or finish the session.
    async fn drive(self, handle: Arc<SessionHandle>, mut opened: OpenedConnection) {
        loop {
            let reason = self.pump(&handle, opened).await;
            match self.classify(&handle, &reason).await {
                Decision::Stop => {
                    self.finish(&handle).await;
                    return;
                }
                Decision::Retry(attempt) => {
                    tracing::warn!(
                        session = %handle.id(),
                        ?reason,
                        attempt,
                        max = self.cfg.max_reconnect_attempts,
                        "connection lost, reconnecting after delay"
                    );
                }
            }

            opened = loop {
                tokio::time::sleep(self.cfg.reconnect_delay).await;
                // Logged out while waiting.
                if !self.registry.contains(handle.id()) {
                    return;
                }
                // Another caller reconnected, or is mid-connect with its own
                // driver; this one steps aside.
                if !Self::try_claim(&handle).await {
                    return;
                }
                match self.provider.open(Arc::clone(handle.creds())).await {
                    Ok(opened) => {
                        let mut st = handle.state.lock().await;
                        st.conn = Some(Arc::clone(&opened.conn));
                        break opened;
                    }
                    Err(e) => {
                        tracing::warn!(session = %handle.id(), error = %e, "reconnect attempt failed");
                        match self.classify(&handle, &DisconnectReason::ConnectionLost).await {
                            Decision::Retry(_) => continue,
                            Decision::Stop => {
                                self.finish(&handle).await;
                                return;
                            }
                        }
                    }
                }
            };
        }
    }

    /// Drain one connection's events. Returns the disconnect reason; a stream
    /// that ends without one counts as a lost connection.
    async fn pump(&self, handle: &Arc<SessionHandle>, opened: OpenedConnection) -> DisconnectReason {
        let OpenedConnection { conn, mut events } = opened;
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected => self.on_open(handle, &conn).await,
                TransportEvent::Disconnected { reason } => return reason,
                TransportEvent::CredentialsChanged => {
                    tracing::debug!(session = %handle.id(), "credentials updated");
                }
                TransportEvent::Message(msg) => {
                    if let Err(e) = self
                        .router
                        .dispatch(Arc::clone(handle), Arc::clone(&conn), *msg)
                        .await
                    {
                        tracing::error!(session = %handle.id(), error = %e, "message dispatch failed");
                    }
                }
            }
        }
        DisconnectReason::ConnectionLost
    }

    async fn on_open(&self, handle: &Arc<SessionHandle>, conn: &Arc<dyn TransportConnection>) {
        let was_open = {
            let mut st = handle.state.lock().await;
            let was_open = st.state == LinkState::Open;
            st.state = LinkState::Open;
            st.attempts = 0;
            st.has_linked = true;
            was_open
        };
        if was_open {
            return;
        }

        self.stats.socket_opened();
        self.stats.linked(handle.id());
        tracing::info!(session = %handle.id(), jid = %conn.self_jid(), "session open");

        if !handle.creds().has_flag(WELCOME_FLAG) {
            if let Err(e) = handle.creds().set_flag(WELCOME_FLAG) {
                tracing::warn!(session = %handle.id(), error = %e, "could not persist welcome marker");
            }
            let cfg = Arc::clone(&self.cfg);
            let conn = Arc::clone(conn);
            let id = handle.id().clone();
            tokio::spawn(async move {
                post_connect(cfg, conn, id).await;
            });
        }
    }

    /// Account for a closed connection and decide whether to retry.
    async fn classify(&self, handle: &Arc<SessionHandle>, reason: &DisconnectReason) -> Decision {
        // Logout already tore the session down.
        if !self.registry.contains(handle.id()) {
            let mut st = handle.state.lock().await;
            st.state = LinkState::ClosedTerminal;
            st.conn = None;
            return Decision::Stop;
        }

        let (was_open, decision) = {
            let mut st = handle.state.lock().await;
            let was_open = st.state == LinkState::Open;
            st.conn = None;
            if reason.is_recoverable() && st.attempts < self.cfg.max_reconnect_attempts {
                st.attempts += 1;
                st.state = LinkState::ClosedRecoverable;
                (was_open, Decision::Retry(st.attempts))
            } else {
                st.state = LinkState::ClosedTerminal;
                (was_open, Decision::Stop)
            }
        };
        if was_open {
            self.stats.socket_closed();
        }
        decision
    }

    /// Terminal close. Credentials stay on disk; only logout deletes them.
    async fn finish(&self, handle: &Arc<SessionHandle>) {
        if self.registry.remove(handle.id()).is_some() {
            self.stats.unlinked(handle.id());
            tracing::info!(session = %handle.id(), "session closed for good");
        }
    }
}

/// Runs once per credential lifetime, shortly after the first OPEN: subscribe
/// the configured channels and greet the account's own chat.
async fn post_connect(cfg: Arc<Config>, conn: Arc<dyn TransportConnection>, id: SessionId) {
    tokio::time::sleep(cfg.post_connect_delay).await;

    let caps = conn.capabilities();
    for channel in &cfg.channel_jids {
        let res = if caps.channel_follow {
            conn.follow_channel(channel).await
        } else {
            conn.presence_subscribe(channel).await
        };
        match res {
            Ok(()) => tracing::info!(session = %id, channel = %channel, "subscribed channel"),
            Err(e) => {
                tracing::warn!(session = %id, channel = %channel, error = %e, "channel subscription failed");
            }
        }
    }

    let greeting = conn
        .self_name()
        .map(|name| format!("Hey *{name}*!\n\n"))
        .unwrap_or_default();
    let welcome = format!(
        "{greeting}✅ {} connected!\n\n📌 Prefix: {}\n📖 Send {}menu to see the command list.",
        cfg.bot_name, cfg.prefix, cfg.prefix
    );
    if let Err(e) = conn
        .send(&conn.self_jid(), OutgoingContent::Text(welcome), SendOptions::default())
        .await
    {
        tracing::warn!(session = %id, error = %e, "welcome message failed");
    }
}

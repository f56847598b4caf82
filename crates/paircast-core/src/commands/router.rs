//! Inbound message routing: status-broadcast policies first, then prefix
//! resolution, tokenization, and dispatch to built-ins or the registry.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use rand::seq::SliceRandom;

use crate::{
    commands::{builtin, CommandContext, CommandRegistry},
    config::Config,
    domain::{ChatKind, IncomingMessage, Jid, ParticipantRole},
    session::SessionHandle,
    transport::{OutgoingContent, SendOptions, TransportConnection},
    Result,
};

const STATUS_REACTIONS: &[&str] = &["❤️", "🔥", "😍", "👍", "😂", "🙌", "🎉", "💯"];

/// The most recent media status seen from a sender, kept for commands that
/// re-share it on request.
#[derive(Clone)]
pub struct CachedStatus {
    pub message: IncomingMessage,
    pub cached_at: Instant,
}

/// Routes every inbound message for every session.
///
/// Handler and policy failures are logged and swallowed here; a bad command
/// must never take the connection down.
pub struct CommandRouter {
    cfg: Arc<Config>,
    registry: Arc<CommandRegistry>,
    status_media: Mutex<HashMap<Jid, CachedStatus>>,
}

impl CommandRouter {
    pub fn new(cfg: Arc<Config>, registry: Arc<CommandRegistry>) -> Self {
        Self {
            cfg,
            registry,
            status_media: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Last cached media status from `sender`, if any.
    pub fn cached_status(&self, sender: &Jid) -> Option<CachedStatus> {
        self.status_media
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(sender)
            .cloned()
    }

    pub async fn dispatch(
        &self,
        session: Arc<SessionHandle>,
        conn: Arc<dyn TransportConnection>,
        message: IncomingMessage,
    ) -> Result<()> {
        let kind = message.key.remote_jid.kind();
        if kind == ChatKind::StatusBroadcast {
            self.handle_status(conn, message).await;
            return Ok(());
        }

        let body = message.content.body();
        tracing::debug!(
            chat = %message.key.remote_jid,
            sender = %message.key.sender(),
            kind = ?kind,
            content = message.content.type_name(),
            "inbound message"
        );
        let prefix = session
            .prefix_override()
            .await
            .unwrap_or_else(|| self.cfg.prefix.clone());

        // Anything unprefixed is plain conversation.
        let Some(rest) = body.strip_prefix(&prefix) else {
            return Ok(());
        };
        let rest = rest.trim();
        let Some(name_token) = rest.split_whitespace().next() else {
            return Ok(());
        };
        let name = name_token.to_lowercase();
        let args: Vec<String> = rest
            .split_whitespace()
            .skip(1)
            .map(str::to_string)
            .collect();
        let query = rest[name_token.len()..].trim().to_string();

        let descriptor = self.registry.snapshot().get(&name).cloned();
        if kind != ChatKind::Channel && !builtin::is_builtin(&name) && descriptor.is_none() {
            tracing::debug!(session = %session.id(), command = %name, "unknown command ignored");
            return Ok(());
        }

        let ctx = self
            .build_context(session, conn, message, kind, prefix, args, query)
            .await;

        // Broadcast channels get the reduced interaction style and consume
        // every prefixed command.
        if kind == ChatKind::Channel {
            if let Err(e) = builtin::dispatch_channel(&ctx, &name, &self.registry).await {
                tracing::error!(command = %name, error = %e, "channel command failed");
            }
            return Ok(());
        }

        match builtin::dispatch(&ctx, &name, &self.registry).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(command = %name, error = %e, "builtin command failed");
                return Ok(());
            }
        }

        if let Some(descriptor) = descriptor {
            if let Some(handler) = &descriptor.handler {
                tracing::info!(
                    session = %ctx.session.id(),
                    command = %descriptor.pattern,
                    "executing command"
                );
                if let Err(e) = handler.execute(&ctx).await {
                    tracing::error!(
                        command = %descriptor.pattern,
                        error = %e,
                        "command handler failed"
                    );
                }
            }
        }
        Ok(())
    }

    async fn build_context(
        &self,
        session: Arc<SessionHandle>,
        conn: Arc<dyn TransportConnection>,
        message: IncomingMessage,
        kind: ChatKind,
        prefix: String,
        args: Vec<String>,
        query: String,
    ) -> CommandContext {
        let chat = message.key.remote_jid.clone();
        let sender = message.key.sender().clone();
        let is_group = kind == ChatKind::Group;

        let group = if is_group {
            match conn.group_metadata(&chat).await {
                Ok(metadata) => Some(metadata),
                Err(e) => {
                    tracing::warn!(chat = %chat, error = %e, "group metadata unavailable");
                    None
                }
            }
        } else {
            None
        };

        let is_admin = group
            .as_ref()
            .and_then(|g| g.role_of(&sender))
            .map(|role| matches!(role, ParticipantRole::Admin | ParticipantRole::SuperAdmin))
            .unwrap_or(false);
        // The session's own account, regardless of chat.
        let is_owner = message.key.from_me || sender.bare() == conn.self_jid().bare();

        CommandContext {
            cfg: Arc::clone(&self.cfg),
            conn,
            session,
            message,
            chat,
            kind,
            is_group,
            sender,
            prefix,
            args,
            query,
            group,
            is_admin,
            is_owner,
        }
    }

    /// Status broadcasts never reach command dispatch; they get the
    /// configured auto policies, each failing independently.
    async fn handle_status(&self, conn: Arc<dyn TransportConnection>, message: IncomingMessage) {
        let key = message.key.clone();
        let Some(author) = key.participant.clone() else {
            tracing::debug!("status update without author, skipping");
            return;
        };

        if self.cfg.auto_status_seen {
            if let Err(e) = conn.mark_read(&[key.clone()]).await {
                tracing::warn!(author = %author, error = %e, "status mark-as-seen failed");
            }
        }

        if self.cfg.auto_status_react {
            let emoji = {
                let mut rng = rand::thread_rng();
                (*STATUS_REACTIONS.choose(&mut rng).unwrap_or(&"❤️")).to_string()
            };
            let reaction = OutgoingContent::Reaction {
                emoji,
                key: key.clone(),
            };
            if let Err(e) = conn
                .send(&key.remote_jid, reaction, SendOptions::default())
                .await
            {
                tracing::warn!(author = %author, error = %e, "status reaction failed");
            }
        }

        if self.cfg.auto_status_reply {
            if let Err(e) = conn
                .send(
                    &author,
                    OutgoingContent::Text(self.cfg.auto_status_message.clone()),
                    SendOptions {
                        quoted: Some(key.clone()),
                    },
                )
                .await
            {
                tracing::warn!(author = %author, error = %e, "status auto-reply failed");
            }
        }

        if message.content.is_media() {
            self.status_media
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(
                    author,
                    CachedStatus {
                        message,
                        cached_at: Instant::now(),
                    },
                );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        commands::{test_support::*, CommandDescriptor},
        domain::{MessageContent, SessionId},
        session::SessionRegistry,
        testutil::{
            direct_message, group_message, roster, status_message, test_config, FakeConnection,
        },
    };

    struct Rig {
        router: CommandRouter,
        registry: Arc<CommandRegistry>,
        session: Arc<SessionHandle>,
        conn: Arc<FakeConnection>,
        _dir: tempfile::TempDir,
    }

    fn rig() -> Rig {
        rig_with(|_| {})
    }

    fn rig_with(tweak: impl FnOnce(&mut Config)) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        tweak(&mut cfg);
        let cfg = Arc::new(cfg);

        let registry = Arc::new(CommandRegistry::new());
        let router = CommandRouter::new(Arc::clone(&cfg), Arc::clone(&registry));

        let sessions = SessionRegistry::new();
        let id = SessionId::parse("15551234567").unwrap();
        let session = sessions.get_or_create(&id, &cfg.sessions_dir).unwrap();
        let conn = FakeConnection::new("15551234567");

        Rig {
            router,
            registry,
            session,
            conn,
            _dir: dir,
        }
    }

    fn register(rig: &Rig, descriptor: CommandDescriptor) {
        rig.registry.register_source(Arc::new(StaticSource {
            source_name: "test".to_string(),
            items: vec![descriptor],
        }));
        rig.registry.reload();
    }

    async fn dispatch(rig: &Rig, message: IncomingMessage) {
        rig.router
            .dispatch(
                Arc::clone(&rig.session),
                Arc::clone(&rig.conn) as Arc<dyn TransportConnection>,
                message,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unprefixed_text_is_ignored() {
        let r = rig();
        dispatch(&r, direct_message("15550001111", "hello there")).await;
        assert!(r.conn.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_command_is_swallowed() {
        let r = rig();
        dispatch(&r, direct_message("15550001111", "*definitelynotacommand")).await;
        assert!(r.conn.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn registry_command_gets_args_and_query() {
        struct Probe;
        #[async_trait::async_trait]
        impl crate::commands::CommandHandler for Probe {
            async fn execute(&self, ctx: &CommandContext) -> Result<()> {
                assert_eq!(ctx.args, vec!["one", "two"]);
                assert_eq!(ctx.query, "one  two");
                assert_eq!(ctx.prefix, "*");
                ctx.reply("done").await
            }
        }

        let r = rig();
        register(&r, CommandDescriptor::new("echo", "fun", "", Arc::new(Probe)));
        dispatch(&r, direct_message("15550001111", "*Echo one  two")).await;
        assert_eq!(r.conn.sent_texts(), vec!["done"]);
    }

    #[tokio::test]
    async fn handler_errors_do_not_propagate() {
        let r = rig();
        let handler = CountingHandler::failing();
        register(
            &r,
            CommandDescriptor::new("boom", "fun", "", Arc::clone(&handler) as _),
        );
        dispatch(&r, direct_message("15550001111", "*boom")).await;
        assert_eq!(handler.count(), 1);
    }

    #[tokio::test]
    async fn builtin_wins_over_registry_entry_with_same_name() {
        let r = rig();
        let shadow = CountingHandler::new();
        register(
            &r,
            CommandDescriptor::new("ping", "fun", "", Arc::clone(&shadow) as _),
        );
        dispatch(&r, direct_message("15550001111", "*ping")).await;
        assert_eq!(shadow.count(), 0);
        assert!(r.conn.sent_texts().iter().any(|t| t.contains("Pong")));
    }

    #[tokio::test]
    async fn menu_lists_every_pattern_exactly_once() {
        let r = rig();
        register(
            &r,
            CommandDescriptor::new("uptime", "utility", "", CountingHandler::new()).alias("runtime"),
        );
        dispatch(&r, direct_message("15550001111", "*menu")).await;

        let texts = r.conn.sent_texts();
        let menu = texts.first().expect("menu reply");
        assert_eq!(menu.matches("*uptime\n").count(), 1);
        // The alias is a lookup key, not a listed entry.
        assert!(!menu.contains("*runtime"));
        assert_eq!(menu.matches("*ping\n").count(), 1);
    }

    #[tokio::test]
    async fn per_session_prefix_override_applies() {
        let r = rig();
        r.session.set_prefix_override(Some("!".to_string())).await;

        dispatch(&r, direct_message("15550001111", "*ping")).await;
        assert!(r.conn.sent.lock().unwrap().is_empty());

        dispatch(&r, direct_message("15550001111", "!ping")).await;
        assert!(r.conn.sent_texts().iter().any(|t| t.contains("Pong")));
    }

    #[tokio::test]
    async fn prefix_builtin_is_owner_only() {
        let r = rig();
        dispatch(&r, direct_message("15550001111", "*prefix")).await;
        assert!(r.conn.sent_texts().iter().any(|t| t.contains("Owner only")));

        // The session's own number is the owner.
        dispatch(&r, direct_message("15551234567", "*prefix")).await;
        assert!(r
            .conn
            .sent_texts()
            .iter()
            .any(|t| t.contains("Current prefix: *")));
    }

    #[tokio::test]
    async fn group_context_carries_roster_flags() {
        struct Probe;
        #[async_trait::async_trait]
        impl crate::commands::CommandHandler for Probe {
            async fn execute(&self, ctx: &CommandContext) -> Result<()> {
                assert!(ctx.is_group);
                assert!(ctx.is_admin);
                assert_eq!(ctx.group.as_ref().unwrap().participants.len(), 2);
                Ok(())
            }
        }

        let r = rig();
        r.conn.set_group(roster(
            "12036302Group",
            &[
                ("15550001111", ParticipantRole::Admin),
                ("15550002222", ParticipantRole::Member),
            ],
        ));
        register(&r, CommandDescriptor::new("who", "group", "", Arc::new(Probe)));
        dispatch(&r, group_message("12036302Group", "15550001111", "*who")).await;
    }

    #[tokio::test]
    async fn group_metadata_failure_degrades_to_no_roster() {
        struct Probe;
        #[async_trait::async_trait]
        impl crate::commands::CommandHandler for Probe {
            async fn execute(&self, ctx: &CommandContext) -> Result<()> {
                assert!(ctx.is_group);
                assert!(ctx.group.is_none());
                assert!(!ctx.is_admin);
                Ok(())
            }
        }

        let r = rig();
        register(&r, CommandDescriptor::new("who", "group", "", Arc::new(Probe)));
        dispatch(&r, group_message("12036302Group", "15550001111", "*who")).await;
    }

    #[tokio::test]
    async fn channel_commands_use_the_reduced_path() {
        let r = rig();
        let handler = CountingHandler::new();
        register(
            &r,
            CommandDescriptor::new("stats", "fun", "", Arc::clone(&handler) as _),
        );

        let mut message = direct_message("x", "*stats");
        message.key.remote_jid = Jid::new("chan1@newsletter");
        dispatch(&r, message).await;

        // Consumed by the acknowledgment, never the registry handler.
        assert_eq!(handler.count(), 0);
        assert!(r
            .conn
            .sent_texts()
            .iter()
            .any(|t| t.contains("Command received: stats")));
    }

    #[tokio::test]
    async fn status_policies_mark_react_reply_and_cache() {
        let r = rig();
        dispatch(
            &r,
            status_message("15550001111", MessageContent::Image { caption: None }),
        )
        .await;

        assert_eq!(r.conn.marked_read.lock().unwrap().len(), 1);
        assert_eq!(r.conn.sent_reactions().len(), 1);
        assert_eq!(r.conn.sent_texts(), vec!["seen by testbot"]);
        assert!(r
            .router
            .cached_status(&Jid::direct("15550001111"))
            .is_some());
    }

    #[tokio::test]
    async fn status_policies_respect_toggles_and_skip_text_cache() {
        let r = rig_with(|cfg| {
            cfg.auto_status_react = false;
            cfg.auto_status_reply = false;
        });
        dispatch(
            &r,
            status_message("15550001111", MessageContent::Text("just text".to_string())),
        )
        .await;

        assert_eq!(r.conn.marked_read.lock().unwrap().len(), 1);
        assert!(r.conn.sent.lock().unwrap().is_empty());
        assert!(r
            .router
            .cached_status(&Jid::direct("15550001111"))
            .is_none());
    }
}

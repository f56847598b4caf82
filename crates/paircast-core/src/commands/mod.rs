//! Command table, dispatch context, and the routing engine.

pub mod builtin;
pub mod library;
pub mod router;

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::{
    config::Config,
    domain::{ChatKind, GroupMetadata, IncomingMessage, Jid},
    session::SessionHandle,
    transport::{OutgoingContent, SendOptions, TransportConnection},
    Result,
};

/// Everything a handler gets for one invocation.
pub struct CommandContext {
    pub cfg: Arc<Config>,
    pub conn: Arc<dyn TransportConnection>,
    pub session: Arc<SessionHandle>,
    pub message: IncomingMessage,

    /// The chat the message arrived in.
    pub chat: Jid,
    pub kind: ChatKind,
    pub is_group: bool,
    pub sender: Jid,

    /// Effective prefix the command was invoked with.
    pub prefix: String,
    /// Whitespace-delimited tokens after the command name.
    pub args: Vec<String>,
    /// Everything after the command name, trimmed.
    pub query: String,

    /// Roster, fetched on demand for group chats.
    pub group: Option<GroupMetadata>,
    pub is_admin: bool,
    pub is_owner: bool,
}

impl CommandContext {
    /// Send a text reply quoting the originating message.
    pub async fn reply(&self, text: impl Into<String>) -> Result<()> {
        self.conn
            .send(
                &self.chat,
                OutgoingContent::Text(text.into()),
                SendOptions {
                    quoted: Some(self.message.key.clone()),
                },
            )
            .await
    }

    /// Send a plain text message to the chat without quoting.
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        self.conn
            .send(&self.chat, OutgoingContent::Text(text.into()), SendOptions::default())
            .await
    }

    /// React to the originating message.
    pub async fn react(&self, emoji: &str) -> Result<()> {
        self.conn
            .send(
                &self.chat,
                OutgoingContent::Reaction {
                    emoji: emoji.to_string(),
                    key: self.message.key.clone(),
                },
                SendOptions::default(),
            )
            .await
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, ctx: &CommandContext) -> Result<()>;
}

/// One loadable command definition.
#[derive(Clone)]
pub struct CommandDescriptor {
    /// Unique lookup key. Empty patterns are rejected at load time.
    pub pattern: String,
    pub aliases: Vec<String>,
    pub category: String,
    pub description: String,
    /// `None` marks a malformed definition; skipped with a diagnostic.
    pub handler: Option<Arc<dyn CommandHandler>>,
}

impl CommandDescriptor {
    pub fn new(
        pattern: impl Into<String>,
        category: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            aliases: Vec::new(),
            category: category.into(),
            description: description.into(),
            handler: Some(handler),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }
}

/// A plugin contributing one or more command descriptors.
///
/// This replaces ad-hoc source-file reloading: sources are registered once
/// and [`CommandRegistry::reload`] is the single entry point that rebuilds
/// the table (a file watcher can simply call it again).
pub trait CommandSource: Send + Sync {
    fn name(&self) -> &str;
    fn descriptors(&self) -> Vec<CommandDescriptor>;
}

type CommandMap = HashMap<String, Arc<CommandDescriptor>>;

/// Loadable command table with atomic hot-reload.
///
/// Lookups clone the current `Arc` snapshot, so an in-flight dispatch keeps
/// referencing the mapping it started with even if a reload lands mid-way.
pub struct CommandRegistry {
    sources: RwLock<Vec<Arc<dyn CommandSource>>>,
    map: RwLock<Arc<CommandMap>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            map: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn register_source(&self, source: Arc<dyn CommandSource>) {
        self.sources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(source);
    }

    /// Rebuild the table from all sources and swap it in atomically.
    /// Last loaded definition for a given pattern wins.
    pub fn reload(&self) {
        let sources = self
            .sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut next: CommandMap = HashMap::new();
        let mut loaded = 0usize;

        for source in &sources {
            for descriptor in source.descriptors() {
                if descriptor.pattern.trim().is_empty() {
                    tracing::warn!(source = source.name(), "skipping descriptor without pattern");
                    continue;
                }
                if descriptor.handler.is_none() {
                    tracing::warn!(
                        source = source.name(),
                        pattern = %descriptor.pattern,
                        "skipping descriptor without handler"
                    );
                    continue;
                }
                let descriptor = Arc::new(descriptor);
                next.insert(descriptor.pattern.clone(), Arc::clone(&descriptor));
                for alias in &descriptor.aliases {
                    next.insert(alias.clone(), Arc::clone(&descriptor));
                }
                loaded += 1;
            }
        }

        *self.map.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
        tracing::info!(commands = loaded, sources = sources.len(), "command table reloaded");
    }

    /// Current mapping snapshot (patterns and aliases).
    pub fn snapshot(&self) -> Arc<CommandMap> {
        Arc::clone(&self.map.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// All registered lookup keys (patterns and aliases), sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut out: Vec<String> = self.snapshot().keys().cloned().collect();
        out.sort();
        out
    }

    /// Unique patterns (aliases excluded), sorted.
    pub fn patterns(&self) -> Vec<String> {
        let snap = self.snapshot();
        let mut out: Vec<String> = snap
            .iter()
            .filter(|(key, descriptor)| **key == descriptor.pattern)
            .map(|(key, _)| key.clone())
            .collect();
        out.sort();
        out
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Handler that counts invocations; optionally fails every time.
    pub struct CountingHandler {
        pub calls: AtomicUsize,
        pub fail: bool,
        pub reply: Option<String>,
    }

    impl CountingHandler {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
                reply: None,
            })
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: true,
                reply: None,
            })
        }

        pub fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
                reply: Some(text.to_string()),
            })
        }

        pub fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CommandHandler for CountingHandler {
        async fn execute(&self, ctx: &CommandContext) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(text) = &self.reply {
                ctx.reply(text.clone()).await?;
            }
            if self.fail {
                return Err(crate::Error::Transport("handler exploded".to_string()));
            }
            Ok(())
        }
    }

    pub struct StaticSource {
        pub source_name: String,
        pub items: Vec<CommandDescriptor>,
    }

    impl CommandSource for StaticSource {
        fn name(&self) -> &str {
            &self.source_name
        }

        fn descriptors(&self) -> Vec<CommandDescriptor> {
            self.items.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn source(name: &str, items: Vec<CommandDescriptor>) -> Arc<dyn CommandSource> {
        Arc::new(StaticSource {
            source_name: name.to_string(),
            items,
        })
    }

    #[test]
    fn last_loaded_definition_wins_for_duplicate_patterns() {
        let registry = CommandRegistry::new();
        let first = CountingHandler::new();
        let second = CountingHandler::new();

        registry.register_source(source(
            "a",
            vec![CommandDescriptor::new("ping", "utility", "first", first)],
        ));
        registry.register_source(source(
            "b",
            vec![CommandDescriptor::new("ping", "utility", "second", second)],
        ));
        registry.reload();

        let snap = registry.snapshot();
        assert_eq!(registry.patterns(), vec!["ping"]);
        assert_eq!(snap.get("ping").unwrap().description, "second");
    }

    #[test]
    fn aliases_resolve_to_the_same_descriptor() {
        let registry = CommandRegistry::new();
        registry.register_source(source(
            "a",
            vec![CommandDescriptor::new("uptime", "utility", "", CountingHandler::new())
                .alias("runtime")],
        ));
        registry.reload();

        let snap = registry.snapshot();
        assert!(Arc::ptr_eq(
            snap.get("uptime").unwrap(),
            snap.get("runtime").unwrap()
        ));
        // Aliases are lookup keys but not patterns.
        assert_eq!(registry.patterns(), vec!["uptime"]);
        assert_eq!(registry.keys(), vec!["runtime", "uptime"]);
    }

    #[test]
    fn malformed_descriptors_are_skipped_not_fatal() {
        let registry = CommandRegistry::new();
        registry.register_source(source(
            "a",
            vec![
                CommandDescriptor {
                    pattern: "".to_string(),
                    aliases: vec![],
                    category: "x".to_string(),
                    description: "".to_string(),
                    handler: Some(CountingHandler::new()),
                },
                CommandDescriptor {
                    pattern: "broken".to_string(),
                    aliases: vec![],
                    category: "x".to_string(),
                    description: "".to_string(),
                    handler: None,
                },
                CommandDescriptor::new("ok", "x", "", CountingHandler::new()),
            ],
        ));
        registry.reload();

        assert_eq!(registry.patterns(), vec!["ok"]);
    }

    #[test]
    fn reload_swaps_atomically_and_snapshots_are_stable() {
        let registry = CommandRegistry::new();
        registry.register_source(source(
            "a",
            vec![CommandDescriptor::new("old", "x", "", CountingHandler::new())],
        ));
        registry.reload();

        let before = registry.snapshot();
        assert!(before.contains_key("old"));

        registry.register_source(source(
            "b",
            vec![CommandDescriptor::new("new", "x", "", CountingHandler::new())],
        ));
        registry.reload();

        // An in-flight dispatch keeps the snapshot it started with.
        assert!(!before.contains_key("new"));
        assert!(registry.snapshot().contains_key("new"));
    }
}

//! Bundled command pack registered at startup. Third-party packs implement
//! [`CommandSource`] the same way and call [`CommandRegistry::reload`].

use std::{
    sync::OnceLock,
    time::Instant,
};

use async_trait::async_trait;
use rand::Rng;

use super::{CommandContext, CommandDescriptor, CommandHandler, CommandSource};
use crate::{domain::Jid, Result};

#[cfg(test)]
use super::CommandRegistry;

static STARTED: OnceLock<Instant> = OnceLock::new();

/// Pin the process start time. Called once from the binary before serving.
pub fn init_uptime() {
    let _ = STARTED.get_or_init(Instant::now);
}

pub struct BundledCommands;

impl CommandSource for BundledCommands {
    fn name(&self) -> &str {
        "bundled"
    }

    fn descriptors(&self) -> Vec<CommandDescriptor> {
        vec![
            CommandDescriptor::new(
                "ship",
                "fun",
                "Match two group members",
                std::sync::Arc::new(Ship),
            ),
            CommandDescriptor::new(
                "uptime",
                "utility",
                "How long the host has been running",
                std::sync::Arc::new(Uptime),
            )
            .alias("runtime"),
            CommandDescriptor::new(
                "owner",
                "utility",
                "Who runs this bot",
                std::sync::Arc::new(Owner),
            ),
        ]
    }
}

struct Ship;

#[async_trait]
impl CommandHandler for Ship {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        if !ctx.is_group {
            return ctx.reply("❌ This command only works in groups").await;
        }

        let target = pick_target(ctx);
        let Some(target) = target else {
            return ctx.reply("❌ Nobody here to ship you with").await;
        };

        let score: u32 = rand::thread_rng().gen_range(0..=100);
        ctx.react("❤️").await?;
        ctx.reply(format!(
            "💘 SHIP METER 💘\n\n@{} ❤️ @{}\n\n💞 Compatibility: {score}%",
            ctx.sender.bare(),
            target.bare()
        ))
        .await
    }
}

/// Mention beats quote beats a random other group member.
fn pick_target(ctx: &CommandContext) -> Option<Jid> {
    if let Some(mentioned) = ctx.message.mentioned.first() {
        return Some(mentioned.clone());
    }
    if let Some(quoted) = &ctx.message.quoted {
        return Some(quoted.sender.clone());
    }
    let group = ctx.group.as_ref()?;
    let others: Vec<&Jid> = group
        .participants
        .iter()
        .map(|p| &p.jid)
        .filter(|jid| jid.bare() != ctx.sender.bare())
        .collect();
    if others.is_empty() {
        return None;
    }
    let index = rand::thread_rng().gen_range(0..others.len());
    Some(others[index].clone())
}

struct Uptime;

#[async_trait]
impl CommandHandler for Uptime {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let elapsed = STARTED.get_or_init(Instant::now).elapsed();
        let secs = elapsed.as_secs();
        let (days, hours, mins) = (secs / 86_400, (secs % 86_400) / 3_600, (secs % 3_600) / 60);
        ctx.reply(format!(
            "⏱️ Uptime: {days}d {hours}h {mins}m {}s",
            secs % 60
        ))
        .await
    }
}

struct Owner;

#[async_trait]
impl CommandHandler for Owner {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let mut text = format!("👤 Owner: {}", ctx.cfg.owner_name);
        if !ctx.cfg.repo_link.is_empty() {
            text.push_str(&format!("\n🌐 {}", ctx.cfg.repo_link));
        }
        ctx.reply(text).await
    }
}

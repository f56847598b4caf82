//! The fixed, always-available command set: latency check, prefix
//! inspection, and the menu/help listing.

use std::time::Instant;

use rand::seq::SliceRandom;

use super::{CommandContext, CommandRegistry};
use crate::Result;

/// Built-ins shown in the menu, with their category.
pub const BUILTINS: &[(&str, &str)] = &[
    ("ping", "utility"),
    ("menu", "utility"),
    ("help", "utility"),
    ("prefix", "settings"),
];

const REACTION_EMOJIS: &[&str] = &["🔥", "⚡", "🚀", "💨", "🎯", "🎉", "🌟", "💥"];
const TEXT_EMOJIS: &[&str] = &["💎", "🏆", "⚡", "🚀", "🌠", "🔱", "🛡️", "✨"];

pub fn is_builtin(name: &str) -> bool {
    matches!(name, "ping" | "speed" | "prefix" | "menu" | "help")
}

/// Run a built-in in a direct or group chat. Returns false when the name is
/// not a built-in so the caller falls through to the registry.
pub async fn dispatch(
    ctx: &CommandContext,
    name: &str,
    registry: &CommandRegistry,
) -> Result<bool> {
    match name {
        "ping" | "speed" => {
            ping(ctx).await?;
            Ok(true)
        }
        "prefix" => {
            prefix(ctx).await?;
            Ok(true)
        }
        "menu" | "help" => {
            ctx.reply(generate_menu(ctx, registry)).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Channel (broadcast-only) destinations get a reduced interaction style:
/// ping and menu answer plainly, everything else is acknowledged. Always
/// consumes the command.
pub async fn dispatch_channel(
    ctx: &CommandContext,
    name: &str,
    registry: &CommandRegistry,
) -> Result<()> {
    match name {
        "ping" | "speed" => {
            let text = format!(
                "⚡ {} SPEED CHECK ⚡\n\n👤 Owner: {}",
                ctx.cfg.bot_name, ctx.cfg.owner_name
            );
            ctx.send(text).await
        }
        "menu" | "help" => ctx.send(generate_menu(ctx, registry)).await,
        other => ctx.send(format!("✅ Command received: {other}")).await,
    }
}

async fn ping(ctx: &CommandContext) -> Result<()> {
    let started = Instant::now();
    ctx.reply("🏓 Pong! Checking speed...").await?;
    let elapsed = started.elapsed();

    let (reaction, text_emoji) = {
        let mut rng = rand::thread_rng();
        let reaction = *REACTION_EMOJIS.choose(&mut rng).unwrap_or(&"⚡");
        let mut text_emoji = *TEXT_EMOJIS.choose(&mut rng).unwrap_or(&"💎");
        while text_emoji == reaction {
            text_emoji = *TEXT_EMOJIS.choose(&mut rng).unwrap_or(&"💎");
        }
        (reaction, text_emoji)
    };

    ctx.react(reaction).await?;
    ctx.reply(format!(
        "⚡ {} SPEED CHECK ⚡\n\n⏱️ Response Time: {:.2}s {}\n👤 Owner: {}",
        ctx.cfg.bot_name,
        elapsed.as_secs_f64(),
        text_emoji,
        ctx.cfg.owner_name
    ))
    .await
}

async fn prefix(ctx: &CommandContext) -> Result<()> {
    if !ctx.is_owner {
        return ctx.reply("❌ Owner only command").await;
    }
    ctx.reply(format!("📌 Current prefix: {}", ctx.prefix)).await
}

/// Enumerate built-ins and registry commands grouped by category, with a
/// fixed-width ordinal per entry.
pub fn generate_menu(ctx: &CommandContext, registry: &CommandRegistry) -> String {
    let snapshot = registry.snapshot();

    let mut entries: Vec<(String, String)> = BUILTINS
        .iter()
        .map(|(name, category)| (category.to_string(), name.to_string()))
        .collect();
    for (key, descriptor) in snapshot.iter() {
        // Patterns only; aliases would list the same command twice.
        if *key == descriptor.pattern {
            entries.push((descriptor.category.clone(), descriptor.pattern.clone()));
        }
    }

    let total = entries.len();
    let width = total.to_string().len().max(2);

    let mut by_category: std::collections::BTreeMap<String, Vec<String>> =
        std::collections::BTreeMap::new();
    for (category, name) in entries {
        by_category.entry(category).or_default().push(name);
    }

    let mut out = format!(
        "🚀 {} 🚀\n\n📌 Prefix : {}\n👤 Owner  : {}\n🔧 Total  : {} commands\n\n📋 COMMAND LIST\n───────────────────\n",
        ctx.cfg.bot_name, ctx.prefix, ctx.cfg.owner_name, total
    );

    let mut ordinal = 0usize;
    for (category, mut names) in by_category {
        names.sort();
        out.push_str(&format!("\n🔹 {}:\n", category.to_uppercase()));
        for name in names {
            ordinal += 1;
            out.push_str(&format!("   {ordinal:0width$}. {}{}\n", ctx.prefix, name));
        }
    }

    if !ctx.cfg.repo_link.is_empty() {
        out.push_str(&format!("\n🌐 {}\n", ctx.cfg.repo_link));
    }
    out
}

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::{domain::Jid, Error, Result};

/// Typed configuration for the host process.
///
/// Everything comes from environment variables (with `.env` support) so the
/// process can run unchanged under systemd, Docker, or a PaaS.
#[derive(Clone, Debug)]
pub struct Config {
    // HTTP surface
    pub port: u16,
    pub static_dir: PathBuf,

    // Bot identity
    pub prefix: String,
    pub bot_name: String,
    pub owner_name: String,
    pub repo_link: String,

    // Broadcast channels followed after a successful link
    pub channel_jids: Vec<Jid>,

    // Auto-status policies
    pub auto_status_seen: bool,
    pub auto_status_react: bool,
    pub auto_status_reply: bool,
    pub auto_status_message: String,

    // Durable state
    pub sessions_dir: PathBuf,
    pub data_file: PathBuf,

    // Lifecycle policy. Fixed delay and a hard attempt ceiling; deliberately
    // not a backoff curve.
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,

    // Pairing policy
    pub pairing_grace: Duration,
    pub pairing_ttl: Duration,
    pub post_connect_delay: Duration,

    // Counter persistence
    pub counter_save_interval: Duration,
}

impl Config {
    /// Unset or blank variables fall back to defaults; a set-but-malformed
    /// value is a startup error, never a silent fallback.
    pub fn load() -> Result<Self> {
        // Best-effort; absence of a .env file is fine.
        let _ = dotenvy::dotenv();

        let port = env_num::<u16>("PORT")?.unwrap_or(3000);
        let static_dir = env_path("STATIC_DIR").unwrap_or_else(|| PathBuf::from("public"));

        let prefix = env_str("PREFIX").unwrap_or_else(|| "*".to_string());
        let bot_name = env_str("BOT_NAME").unwrap_or_else(|| "paircast".to_string());
        let owner_name = env_str("OWNER_NAME").unwrap_or_else(|| "unknown".to_string());
        let repo_link = env_str("REPO_LINK").unwrap_or_default();

        let channel_jids = dedup(parse_csv(env_str("CHANNEL_JIDS")))
            .into_iter()
            .map(Jid::new)
            .collect();

        let auto_status_seen = env_bool("AUTO_STATUS_SEEN")?.unwrap_or(true);
        let auto_status_react = env_bool("AUTO_STATUS_REACT")?.unwrap_or(false);
        let auto_status_reply = env_bool("AUTO_STATUS_REPLY")?.unwrap_or(false);
        let auto_status_message = env_str("AUTO_STATUS_MSG")
            .unwrap_or_else(|| "Your status has been seen".to_string());

        let sessions_dir = env_path("SESSIONS_DIR").unwrap_or_else(|| PathBuf::from("sessions"));
        let data_file =
            env_path("DATA_FILE").unwrap_or_else(|| PathBuf::from("persistent-data.json"));

        let reconnect_delay =
            Duration::from_millis(env_num::<u64>("RECONNECT_DELAY_MS")?.unwrap_or(5_000));
        let max_reconnect_attempts = env_num::<u32>("MAX_RECONNECT_ATTEMPTS")?.unwrap_or(5);

        let pairing_grace =
            Duration::from_millis(env_num::<u64>("PAIRING_GRACE_MS")?.unwrap_or(3_000));
        let pairing_ttl =
            Duration::from_millis(env_num::<u64>("PAIRING_TTL_MS")?.unwrap_or(120_000));
        let post_connect_delay =
            Duration::from_millis(env_num::<u64>("POST_CONNECT_DELAY_MS")?.unwrap_or(3_000));

        let counter_save_interval =
            Duration::from_millis(env_num::<u64>("COUNTER_SAVE_INTERVAL_MS")?.unwrap_or(30_000));

        Ok(Self {
            port,
            static_dir,
            prefix,
            bot_name,
            owner_name,
            repo_link,
            channel_jids,
            auto_status_seen,
            auto_status_react,
            auto_status_reply,
            auto_status_message,
            sessions_dir,
            data_file,
            reconnect_delay,
            max_reconnect_attempts,
            pairing_grace,
            pairing_ttl,
            post_connect_delay,
            counter_save_interval,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_bool(key: &str) -> Result<Option<bool>> {
    env_str(key).map(|s| parse_bool(key, &s)).transpose()
}

fn env_num<T: FromStr>(key: &str) -> Result<Option<T>> {
    env_str(key).map(|s| parse_num(key, &s)).transpose()
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key} must be a boolean, got {raw:?}"))),
    }
}

fn parse_num<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{key} must be a number, got {raw:?}")))
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|s| seen.insert(s.clone())).collect()
}

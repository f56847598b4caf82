use crate::{Error, Result};

/// Session identity: a phone number normalized to digits only.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

/// Phone-number length policy (digits, after normalization).
pub const MIN_NUMBER_DIGITS: usize = 8;
pub const MAX_NUMBER_DIGITS: usize = 15;

impl SessionId {
    /// Strip everything that is not a digit. No length validation; use
    /// [`SessionId::parse`] where the policy applies.
    pub fn normalize(raw: &str) -> Self {
        Self(raw.chars().filter(|c| c.is_ascii_digit()).collect())
    }

    /// Normalize and enforce the 8-15 digit policy.
    pub fn parse(raw: &str) -> Result<Self> {
        let id = Self::normalize(raw);
        if id.0.is_empty() {
            return Err(Error::InvalidNumber("no digits in input".to_string()));
        }
        if id.0.len() < MIN_NUMBER_DIGITS || id.0.len() > MAX_NUMBER_DIGITS {
            return Err(Error::InvalidNumber(format!(
                "expected {MIN_NUMBER_DIGITS}-{MAX_NUMBER_DIGITS} digits, got {}",
                id.0.len()
            )));
        }
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The distinguished broadcast identity for status posts.
pub const STATUS_BROADCAST: &str = "status@broadcast";

/// Transport address (chat, group, channel, or the status broadcast).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Jid(String);

impl Jid {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Direct-chat address for a phone number.
    pub fn direct(number: &str) -> Self {
        Self(format!("{number}@s.whatsapp.net"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> ChatKind {
        if self.0 == STATUS_BROADCAST {
            ChatKind::StatusBroadcast
        } else if self.0.ends_with("@g.us") {
            ChatKind::Group
        } else if self.0.ends_with("@newsletter") {
            ChatKind::Channel
        } else {
            ChatKind::Direct
        }
    }

    /// User part without server or device suffix (`123:4@host` -> `123`).
    pub fn bare(&self) -> &str {
        let user = self.0.split('@').next().unwrap_or(&self.0);
        user.split(':').next().unwrap_or(user)
    }
}

impl std::fmt::Display for Jid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message destination category, derived from the address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    Direct,
    Group,
    Channel,
    StatusBroadcast,
}

/// Stable reference to one transport message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageKey {
    pub remote_jid: Jid,
    pub id: String,
    pub from_me: bool,
    /// Set for group/status messages: the actual author.
    pub participant: Option<Jid>,
}

impl MessageKey {
    /// The author of the message (participant in groups, the chat itself in
    /// direct conversations).
    pub fn sender(&self) -> &Jid {
        self.participant.as_ref().unwrap_or(&self.remote_jid)
    }
}

/// Transport message payload, reduced to what the router needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Image { caption: Option<String> },
    Video { caption: Option<String> },
    Audio,
    Document { file_name: Option<String> },
    Sticker,
    Contact,
    Location,
    Other(String),
}

impl MessageContent {
    /// Textual body used for command parsing: text as-is, captions for media,
    /// a bracketed placeholder otherwise.
    pub fn body(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Image { caption } => {
                caption.clone().unwrap_or_else(|| "[Image]".to_string())
            }
            MessageContent::Video { caption } => {
                caption.clone().unwrap_or_else(|| "[Video]".to_string())
            }
            MessageContent::Audio => "[Audio]".to_string(),
            MessageContent::Document { file_name } => {
                file_name.clone().unwrap_or_else(|| "[Document]".to_string())
            }
            MessageContent::Sticker => "[Sticker]".to_string(),
            MessageContent::Contact => "[Contact]".to_string(),
            MessageContent::Location => "[Location]".to_string(),
            MessageContent::Other(kind) => format!("[{kind}]"),
        }
    }

    /// Media that can be cached for later status forwarding.
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            MessageContent::Image { .. } | MessageContent::Video { .. }
        )
    }

    pub fn type_name(&self) -> &str {
        match self {
            MessageContent::Text(_) => "text",
            MessageContent::Image { .. } => "image",
            MessageContent::Video { .. } => "video",
            MessageContent::Audio => "audio",
            MessageContent::Document { .. } => "document",
            MessageContent::Sticker => "sticker",
            MessageContent::Contact => "contact",
            MessageContent::Location => "location",
            MessageContent::Other(kind) => kind,
        }
    }
}

/// Minimal synthetic view of a message referenced by another message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotedMessage {
    pub key: MessageKey,
    pub content: MessageContent,
    pub sender: Jid,
}

/// One inbound message as delivered by the transport.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub key: MessageKey,
    pub content: MessageContent,
    pub quoted: Option<QuotedMessage>,
    pub mentioned: Vec<Jid>,
}

/// Group roster entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParticipantRole {
    Member,
    Admin,
    SuperAdmin,
}

#[derive(Clone, Debug)]
pub struct GroupParticipant {
    pub jid: Jid,
    pub role: ParticipantRole,
}

#[derive(Clone, Debug)]
pub struct GroupMetadata {
    pub id: Jid,
    pub subject: String,
    pub participants: Vec<GroupParticipant>,
}

impl GroupMetadata {
    pub fn role_of(&self, who: &Jid) -> Option<ParticipantRole> {
        self.participants
            .iter()
            .find(|p| p.jid.bare() == who.bare())
            .map(|p| p.role)
    }
}

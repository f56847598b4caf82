/// Core error type.
///
/// Adapter crates should map their specific errors into this type so the host
/// can handle failures consistently (client-facing message vs retryable).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid phone number: {0}")]
    InvalidNumber(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no session for {0}")]
    SessionNotFound(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

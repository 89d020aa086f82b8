use thiserror::Error;

pub type Result<T> = std::result::Result<T, AiError>;

/// Failure of a single provider call.
///
/// The variants split into two classes. Transient failures (network, timeout,
/// rate limit, 5xx) may succeed on a later attempt; everything else is
/// permanent and must not be retried.
#[derive(Debug, Clone, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited ({status}): {message}")]
    RateLimited { status: u16, message: String },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Invalid request ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl AiError {
    /// Map a non-success HTTP status to the matching error class.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => AiError::RateLimited { status, message },
            408 | 500..=599 => AiError::Server { status, message },
            401 | 403 => AiError::Auth { status, message },
            _ => AiError::InvalidRequest { status, message },
        }
    }

    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AiError::Network(_)
                | AiError::Timeout(_)
                | AiError::RateLimited { .. }
                | AiError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AiError::Timeout(e.to_string())
        } else if e.is_decode() {
            AiError::Parse(e.to_string())
        } else {
            AiError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for AiError {
    fn from(e: serde_json::Error) -> Self {
        AiError::Parse(e.to_string())
    }
}

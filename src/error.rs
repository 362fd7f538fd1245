//! Unified error types for the trading agent.
//!
//! Recovery policy is driven by [`ErrorKind`]: transient errors are retried
//! with backoff, authorization failures halt the bot, validation failures
//! reject the offending signal without side effects, and fatal errors refuse
//! to start.

use thiserror::Error;

/// Coarse classification used by retry loops and the shutdown policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, 5xx, 429. Retry with backoff.
    Transient,
    /// 401/403. Fatal: alert and halt.
    Authz,
    /// Local precondition failed. Reject, no side effect.
    Validation,
    /// Venue disagrees about state (e.g. cancel of a missing order).
    StateConflict,
    /// Corrupt key, bad config. Refuse to start.
    Fatal,
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("rest error: {0}")]
    Rest(#[from] RestError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading/validation errors. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment error: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Request-signing errors. Key problems are fatal at startup.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to read private key file: {0}")]
    KeyFileRead(#[from] std::io::Error),

    #[error("failed to parse RSA private key: {0}")]
    KeyParse(String),

    #[error("failed to generate signature: {0}")]
    Signature(String),
}

/// REST client errors, carrying the HTTP status where one was received.
#[derive(Debug, Error)]
pub enum RestError {
    #[error("request error: {0}")]
    Request(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited (429)")]
    RateLimited,

    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),
}

impl RestError {
    /// Classify into the §7 taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout | Self::Request(_) | Self::RateLimited => ErrorKind::Transient,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorKind::Authz,
                404 => ErrorKind::StateConflict,
                429 => ErrorKind::Transient,
                s if *s >= 500 && *s != 501 => ErrorKind::Transient,
                _ => ErrorKind::Validation,
            },
            Self::Parse(_) => ErrorKind::Transient,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Whether a retry loop should attempt this call again.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Stream client errors.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("websocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("websocket closed: {0}")]
    Closed(String),

    #[error("no message for {0} seconds")]
    Silent(u64),

    #[error("failed to send websocket message: {0}")]
    SendFailed(String),

    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Order execution errors.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("order submission failed: {0}")]
    SubmissionFailed(#[from] RestError),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("failed to cancel order {venue_id} after {attempts} attempts: {reason}")]
    CancelFailed {
        venue_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds {
        required: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    #[error("unknown order: {0}")]
    UnknownOrder(String),

    #[error("unknown position: {0}")]
    UnknownPosition(uuid::Uuid),
}

/// Convenient result alias.
pub type Result<T, E = BotError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_error_classification() {
        assert_eq!(RestError::Timeout.kind(), ErrorKind::Transient);
        assert_eq!(RestError::RateLimited.kind(), ErrorKind::Transient);
        assert_eq!(
            RestError::Api { status: 401, body: String::new() }.kind(),
            ErrorKind::Authz
        );
        assert_eq!(
            RestError::Api { status: 404, body: String::new() }.kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(
            RestError::Api { status: 503, body: String::new() }.kind(),
            ErrorKind::Transient
        );
        // 501 is explicitly not retryable
        assert_eq!(
            RestError::Api { status: 501, body: String::new() }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            RestError::Api { status: 400, body: String::new() }.kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn retryable_matches_transient() {
        assert!(RestError::Timeout.is_retryable());
        assert!(!RestError::Api { status: 400, body: String::new() }.is_retryable());
    }
}

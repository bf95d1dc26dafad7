//! Error taxonomy for the streaming engine.
//!
//! Transport errors are recovered internally via reconnect/backoff and never
//! surface to callers; authentication and bootstrap exhaustion do.

use thiserror::Error;

/// Errors raised on the streaming path.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The socket never opened within the connection-attempt timeout.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// Transport-level failure (connect error, abnormal close, socket error).
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream rejected our API key. Non-retryable for this connection.
    #[error("authentication rejected by upstream (INVALID_API_KEY)")]
    AuthRejected,

    /// The engine was asked to stop.
    #[error("engine stopped")]
    Stopped,
}

impl StreamError {
    /// Whether the session should be retried with backoff. Authentication
    /// failures and explicit stops are terminal for the run loop.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::ConnectTimeout(_) | StreamError::Transport(_) => true,
            StreamError::AuthRejected | StreamError::Stopped => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Errors raised while bootstrapping the symbol universe over REST.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("universe fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("universe fetch rate limited; retries exhausted after {retries} attempts")]
    RateLimited { retries: u32 },

    #[error("universe fetch returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("universe response malformed: {0}")]
    Malformed(String),

    #[error("universe fetch produced no monitorable pairs")]
    Empty,
}

/// Errors raised by a [`PersistenceGateway`](crate::persist::PersistenceGateway)
/// operation. These are logged and swallowed on the ingestion path.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("persistence request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("persistence request returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("persistence response malformed: {0}")]
    Malformed(String),
}

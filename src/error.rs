//! Unified SDK error types.

use thiserror::Error;

/// Top-level SDK error.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Caller-side input error (missing fields, out-of-range values).
    #[error("validation error: {0}")]
    Validation(String),

    #[error("websocket error: {0}")]
    Ws(#[from] WsError),

    /// Error reported by the market-data transport backing the order builder.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SdkError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        SdkError::Validation(msg.into())
    }
}

/// WebSocket-layer errors.
///
/// Clonable with string payloads so values can flow through subscriber error
/// queues without borrowing the underlying transport error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WsError {
    #[error("connection is not established")]
    NotConnected,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("failed to send message: {0}")]
    SendFailed(String),

    #[error("failed to parse message: {0}")]
    MessageParse(String),

    #[error("heartbeat timeout after {timeout_ms}ms without a frame")]
    HeartbeatTimeout { timeout_ms: u64 },

    #[error("reconnect attempts exhausted after {attempts}")]
    ReconnectExhausted { attempts: u32 },

    /// The subscriber's bounded buffer was full; `count` events were dropped.
    #[error("subscriber lagged: dropped {count} {event_type} event(s) on {topic}")]
    Lagged {
        count: u64,
        topic: String,
        event_type: String,
    },

    #[error("operation timed out")]
    Timeout,

    #[error("client is closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for WsError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed | Error::AlreadyClosed => WsError::NotConnected,
            Error::Io(e) => WsError::Read(e.to_string()),
            Error::Url(e) => WsError::InvalidUrl(e.to_string()),
            Error::Http(resp) => {
                WsError::ConnectionFailed(format!("http status {}", resp.status()))
            }
            other => WsError::ConnectionFailed(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for WsError {
    fn from(err: serde_json::Error) -> Self {
        WsError::MessageParse(err.to_string())
    }
}

/// Result alias for WebSocket operations.
pub type WsResult<T> = Result<T, WsError>;

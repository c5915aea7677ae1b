//! Network error types

use std::time::Duration;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("not connected")]
    NotConnected,

    #[error("acknowledgement status: {0}")]
    Ack(String),

    #[error("cancelled while awaiting acknowledgement")]
    Cancelled,

    #[error("unable to handle message")]
    UnknownMessage,

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

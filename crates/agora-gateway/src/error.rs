use std::time::Duration;

use agora_types::NormalizeError;

use crate::codec::CodecError;

/// Errors surfaced by the gateway client. `Clone` so a shared connection
/// attempt can hand the same outcome to every caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Socket not connected")]
    NotConnected,

    /// Rejected locally before anything was sent.
    #[error("{0}")]
    Validation(String),

    /// The server acknowledged with `success: false`.
    #[error("{0}")]
    Rejected(String),

    #[error("No acknowledgement for {event} within {timeout:?}")]
    AckTimeout { event: String, timeout: Duration },

    #[error("Connection closed before the request was acknowledged")]
    ConnectionClosed,

    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Connection refused: {0}")]
    ConnectRejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid payload: {0}")]
    Payload(#[from] NormalizeError),

    #[error("Session storage error: {0}")]
    Session(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Transport(format!("failed to encode payload: {err}"))
    }
}

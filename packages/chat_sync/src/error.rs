//! Error taxonomy for the sync engine.
//!
//! Each concern gets its own enum so callers can tell a retryable transport
//! failure from a credential refusal or a rejected send without string
//! matching.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// A frame or payload that could not be understood. Never fatal to the
/// connection: the frame is dropped and logged.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed stomp frame: {0}")]
    Stomp(String),

    #[error("unknown stomp command: {0}")]
    UnknownCommand(String),

    #[error("invalid message payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("message field `{0}` is missing or empty")]
    MissingField(&'static str),
}

/// Socket or broker failure. Triggers a scheduled reconnect while signed in.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("broker is unavailable: {0}")]
    Unavailable(String),

    #[error("websocket error: {0}")]
    WebSocket(#[source] Box<tungstenite::Error>),

    #[error("handshake not acknowledged within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("unexpected {0} frame during handshake")]
    UnexpectedFrame(&'static str),

    #[error("broker reported an error: {0}")]
    Broker(String),

    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Map a tungstenite error, folding refused/reset sockets into
    /// [`TransportError::Unavailable`].
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        match &err {
            tungstenite::Error::Io(io_err)
                if matches!(
                    io_err.kind(),
                    std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                ) =>
            {
                Self::Unavailable(io_err.to_string())
            }
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed
            }
            _ => Self::WebSocket(Box::new(err)),
        }
    }
}

/// Credential refusal or sign-out. Tears the connection down without retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("not signed in")]
    NotSignedIn,

    #[error("credential refused: {0}")]
    Refused(String),

    #[error("credential source failed: {0}")]
    Source(String),
}

/// REST collaborator failure (history and partner list).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server returned status {0}")]
    Status(u16),

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("request cancelled")]
    Cancelled,
}

impl ApiError {
    /// Whether retrying the same request can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Cancelled => true,
            Self::Status(code) => *code >= 500,
            Self::NotAuthenticated | Self::Auth(_) | Self::Rejected(_) => false,
        }
    }
}

/// A send rejected at the call site. No state was touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("not connected to the chat broker")]
    NotConnected,

    #[error("not signed in")]
    NotSignedIn,

    #[error("message is empty")]
    EmptyContent,

    #[error("could not encode message: {0}")]
    Encode(String),
}

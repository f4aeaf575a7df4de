use thiserror::Error;

use parley_shared::frame::FrameError;
use parley_shared::ChatError;

/// Errors produced by the network layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// WebSocket open / read / write failure.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Hub protocol error: {0}")]
    Frame(#[from] FrameError),

    #[error("Connect attempt timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Hub link closed")]
    LinkClosed,

    #[error("Not connected to the hub")]
    NotConnected,

    /// The socket writer is not draining outbound frames.
    #[error("Hub outbound queue is full")]
    Backpressure,

    /// The connection actor is gone (session disposed).
    #[error("Hub task stopped")]
    HubStopped,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Server responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<NetError> for ChatError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Unauthorized | NetError::Forbidden => ChatError::Authorization(e.to_string()),
            NetError::Http(_) | NetError::Status { .. } | NetError::Decode(_) | NetError::Url(_) => {
                ChatError::Network(e.to_string())
            }
            NetError::Frame(_) => ChatError::Protocol(e.to_string()),
            NetError::Transport(_)
            | NetError::Timeout(_)
            | NetError::LinkClosed
            | NetError::NotConnected
            | NetError::Backpressure
            | NetError::HubStopped => ChatError::Connection(e.to_string()),
        }
    }
}

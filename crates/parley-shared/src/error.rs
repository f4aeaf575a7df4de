use thiserror::Error;

/// Errors surfaced by the chat core to its consumers.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Hub connect / reconnect failure. Normally absorbed by the retry loop
    /// and only visible through the connection status.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Rejected before any network call.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// REST transport or HTTP failure. Never retried automatically.
    #[error("Network error: {0}")]
    Network(String),

    /// The backend refused the call for the current role or token.
    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message body is empty")]
    EmptyBody,

    #[error("Message body is too long: {len} characters (max {max})")]
    BodyTooLong { len: usize, max: usize },

    #[error("No local user is set")]
    NoLocalUser,

    #[error("No peer given")]
    NoPeer,

    #[error("No failed message with correlation id {0}")]
    UnknownMessage(String),
}

impl ChatError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ChatError::Validation(_))
    }
}

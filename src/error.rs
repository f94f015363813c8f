use thiserror::Error;

/// Custom error types for the relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Join handshake errors
    #[error("Invalid join message: {0}")]
    InvalidJoin(String),

    /// Application message errors
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Message is missing a type discriminator")]
    MissingMessageType,

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Video payload errors
    #[error("Failed to decode video payload: {0}")]
    VideoDecodeFailed(String),

    #[error("Video payload is empty")]
    EmptyVideo,

    /// Transport errors
    #[error("Connection closed before join")]
    ClosedBeforeJoin,

    #[error("Network error: {0}")]
    NetworkError(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigurationParseFailed(String),
}

/// Convenience type alias for Results using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Helper to create network errors
    pub fn network(msg: impl Into<String>) -> Self {
        RelayError::NetworkError(msg.into())
    }

    pub fn invalid_join(msg: impl Into<String>) -> Self {
        RelayError::InvalidJoin(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        RelayError::MalformedMessage(msg.into())
    }
}

impl From<base64::DecodeError> for RelayError {
    fn from(err: base64::DecodeError) -> Self {
        RelayError::VideoDecodeFailed(err.to_string())
    }
}
